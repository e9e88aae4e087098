// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::delay::Delay;
use super::types::VertexId;
use crate::expr::Expr;

/// Directed token channel between two vertex ports, in the same graph
/// (spec.md §3). A port slot holds at most one edge — enforced by
/// [`super::Graph::add_edge`].
pub struct Edge {
    src: VertexId,
    src_port: usize,
    dst: VertexId,
    dst_port: usize,
    src_rate: Expr,
    dst_rate: Expr,
    delay: Option<Delay>,
}

impl Edge {
    pub(crate) fn new(
        src: VertexId,
        src_port: usize,
        dst: VertexId,
        dst_port: usize,
        src_rate: Expr,
        dst_rate: Expr,
        delay: Option<Delay>,
    ) -> Self {
        Edge { src, src_port, dst, dst_port, src_rate, dst_rate, delay }
    }

    pub fn src(&self) -> VertexId {
        self.src
    }

    pub fn src_port(&self) -> usize {
        self.src_port
    }

    pub fn dst(&self) -> VertexId {
        self.dst
    }

    pub fn dst_port(&self) -> usize {
        self.dst_port
    }

    pub fn src_rate(&self) -> &Expr {
        &self.src_rate
    }

    pub fn dst_rate(&self) -> &Expr {
        &self.dst_rate
    }

    pub fn delay(&self) -> Option<&Delay> {
        self.delay.as_ref()
    }
}
