// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::delay::Delay;
use super::edge::Edge;
use super::param::{Param, ParamKind};
use super::types::{EdgeId, ParamId, VertexId};
use super::vertex::{Vertex, VertexType};
use crate::error::{Result, Spider2Error};
use crate::expr::Expr;
use std::collections::HashSet;

/// In-memory representation of one (sub)graph: vertices, edges and
/// parameters live in parallel index-addressed arenas (spec.md §9's
/// re-architecture note for the original's cyclic vertex↔edge↔graph
/// references). A `GRAPH`-typed vertex owns its subgraph directly
/// (`Vertex::subgraph`); there is no stored weak parent pointer — callers
/// that need the parent (BRV, dependency resolution, firing handlers) are
/// handed it explicitly as they recurse, since they already hold the
/// parent on their own call stack.
#[derive(Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    params: Vec<Param>,
    /// Port-slot occupancy, `(vertex, port)` keyed, in+out namespaces kept
    /// apart by the bool.
    occupied_ports: HashSet<(VertexId, usize, bool)>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    // ---- construction -----------------------------------------------

    pub fn add_vertex(
        &mut self,
        kind: VertexType,
        n_in: usize,
        n_out: usize,
        label: impl Into<String>,
    ) -> Result<VertexId> {
        let vertex = Vertex::new(kind, n_in, n_out, label)?;
        let id = VertexId::from(self.vertices.len());
        self.vertices.push(vertex);
        Ok(id)
    }

    pub fn add_param(&mut self, kind: ParamKind) -> ParamId {
        let id = ParamId::from(self.params.len());
        let param = match kind {
            ParamKind::Static(v) => Param::new_static(v),
            ParamKind::Dynamic { expr, value } => {
                let mut p = Param::new_dynamic(expr);
                if let Some(v) = value {
                    p.set_dynamic_value(v);
                }
                p
            }
            ParamKind::Inherited { parent_param } => Param::new_inherited(parent_param),
        };
        self.params.push(param);
        id
    }

    pub fn add_edge(
        &mut self,
        src: VertexId,
        src_port: usize,
        dst: VertexId,
        dst_port: usize,
        src_rate: Expr,
        dst_rate: Expr,
        delay: Option<Delay>,
    ) -> Result<EdgeId> {
        self.vertex(src)?;
        self.vertex(dst)?;
        if src_port >= self.vertex(src)?.n_out() {
            return Err(Spider2Error::InvalidConstruction(format!(
                "source port {src_port} out of range for vertex {src:?}"
            )));
        }
        if dst_port >= self.vertex(dst)?.n_in() {
            return Err(Spider2Error::InvalidConstruction(format!(
                "sink port {dst_port} out of range for vertex {dst:?}"
            )));
        }
        if !self.occupied_ports.insert((src, src_port, false)) {
            return Err(Spider2Error::InvalidConstruction(format!(
                "output port {src_port} of vertex {src:?} already connected"
            )));
        }
        if !self.occupied_ports.insert((dst, dst_port, true)) {
            return Err(Spider2Error::InvalidConstruction(format!(
                "input port {dst_port} of vertex {dst:?} already connected"
            )));
        }
        let edge = Edge::new(src, src_port, dst, dst_port, src_rate, dst_rate, delay);
        let id = EdgeId::from(self.edges.len());
        self.edges.push(edge);
        Ok(id)
    }

    /// Attach a subgraph to a `GRAPH`-typed vertex.
    pub fn connect_subgraph(&mut self, vertex: VertexId, subgraph: Graph) -> Result<()> {
        let v = self.vertex_mut(vertex)?;
        v.attach_subgraph(subgraph)
    }

    /// Declare that a CONFIG vertex sets the given parameters. Per spec.md
    /// §4.2, a CONFIG vertex may only set parameters within the same
    /// graph — enforced here since `params` are validated against `self`.
    pub fn set_config_outputs(&mut self, vertex: VertexId, params: Vec<ParamId>) -> Result<()> {
        for p in &params {
            if p.index() >= self.params.len() {
                return Err(Spider2Error::InvalidConstruction(format!(
                    "CONFIG vertex {vertex:?} sets out-of-range parameter {p:?}"
                )));
            }
        }
        self.vertex_mut(vertex)?.set_config_sets(params)
    }

    // ---- queries ------------------------------------------------------

    pub fn vertex(&self, id: VertexId) -> Result<&Vertex> {
        self.vertices.get(id.index()).ok_or_else(|| {
            Spider2Error::InvalidConstruction(format!("no such vertex {id:?}"))
        })
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> Result<&mut Vertex> {
        self.vertices.get_mut(id.index()).ok_or_else(|| {
            Spider2Error::InvalidConstruction(format!("no such vertex {id:?}"))
        })
    }

    pub fn edge(&self, id: EdgeId) -> Result<&Edge> {
        self.edges.get(id.index()).ok_or_else(|| {
            Spider2Error::InvalidConstruction(format!("no such edge {id:?}"))
        })
    }

    pub fn param(&self, id: ParamId) -> Result<&Param> {
        self.params.get(id.index()).ok_or_else(|| {
            Spider2Error::InvalidConstruction(format!("no such param {id:?}"))
        })
    }

    pub fn param_mut(&mut self, id: ParamId) -> Result<&mut Param> {
        self.params.get_mut(id.index()).ok_or_else(|| {
            Spider2Error::InvalidConstruction(format!("no such param {id:?}"))
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn vertices(&self) -> impl Iterator<Item = (VertexId, &Vertex)> {
        self.vertices.iter().enumerate().map(|(i, v)| (VertexId::from(i), v))
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().enumerate().map(|(i, e)| (EdgeId::from(i), e))
    }

    pub fn params(&self) -> impl Iterator<Item = (ParamId, &Param)> {
        self.params.iter().enumerate().map(|(i, p)| (ParamId::from(i), p))
    }

    /// Edges whose source is `v`.
    pub fn out_edges(&self, v: VertexId) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges().filter(move |(_, e)| e.src() == v)
    }

    /// Edges whose sink is `v`.
    pub fn in_edges(&self, v: VertexId) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges().filter(move |(_, e)| e.dst() == v)
    }

    // ---- static analysis ------------------------------------------------

    /// Whether every parameter in this graph (and all subgraphs) is
    /// resolvable without waiting on a CONFIG job: STATIC, or INHERITED
    /// from a static ancestor parameter (spec.md §4.2). `ancestors` is the
    /// chain of enclosing graphs, nearest first, needed to resolve
    /// INHERITED parameters that chain further up.
    pub fn is_fully_static(&self, ancestors: &[&Graph]) -> bool {
        for (id, _) in self.params() {
            if !self.param_is_static(id.index(), ancestors) {
                return false;
            }
        }
        for (_, v) in self.vertices() {
            if let Some(sub) = v.subgraph() {
                let mut child_ancestors = Vec::with_capacity(ancestors.len() + 1);
                child_ancestors.push(self);
                child_ancestors.extend_from_slice(ancestors);
                if !sub.is_fully_static(&child_ancestors) {
                    return false;
                }
            }
        }
        true
    }

    fn param_is_static(&self, idx: usize, ancestors: &[&Graph]) -> bool {
        match self.params[idx].kind() {
            ParamKind::Static(_) => true,
            ParamKind::Dynamic { .. } => false,
            ParamKind::Inherited { parent_param } => ancestors
                .first()
                .map(|parent| parent.param_is_static(*parent_param, &ancestors[1..]))
                .unwrap_or(false),
        }
    }

    /// Internal (non-interface) vertices, the universe the BRV resolver's
    /// connected-component walk operates over (spec.md §4.3).
    pub fn internal_vertex_ids(&self) -> Vec<VertexId> {
        self.vertices()
            .filter(|(_, v)| !v.is_interface())
            .map(|(id, _)| id)
            .collect()
    }

    /// Edges with both endpoints internal (non-interface) — the edges the
    /// BRV spanning-tree walk is allowed to cross.
    pub fn internal_edges(&self) -> Vec<EdgeId> {
        self.edges()
            .filter(|(_, e)| {
                self.vertex(e.src()).map(|v| !v.is_interface()).unwrap_or(false)
                    && self.vertex(e.dst()).map(|v| !v.is_interface()).unwrap_or(false)
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Recursively rejects graphs where a persistent delay's token count
    /// depends on a CONFIG-set parameter (spec.md §9's open question: the
    /// source leaves this undefined, so it's treated as malformed rather
    /// than guessed at).
    pub fn validate(&self) -> Result<()> {
        let config_params: HashSet<usize> =
            self.vertices().filter(|(_, v)| v.kind() == VertexType::Config).flat_map(|(_, v)| v.config_sets().iter().map(|p| p.index())).collect();
        for (id, edge) in self.edges() {
            let Some(delay) = edge.delay() else { continue };
            if !delay.is_persistent() {
                continue;
            }
            for p in delay.tokens_expr().referenced_params() {
                if config_params.contains(&p) {
                    return Err(Spider2Error::InvalidConstruction(format!(
                        "persistent delay on edge {id:?} depends on CONFIG-set parameter {p}"
                    )));
                }
            }
        }
        for (_, v) in self.vertices() {
            if let Some(sub) = v.subgraph() {
                sub.validate()?;
            }
        }
        Ok(())
    }
}
