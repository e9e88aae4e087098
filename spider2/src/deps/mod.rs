// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Dependency resolver (spec.md §4.5): for one consumer firing's input edge,
//! compute the finite list of [`ExecDependencyInfo`] records describing
//! which producer firings (possibly across interface boundaries or delay
//! hops) supply its tokens.

use crate::error::{Result, Spider2Error};
use crate::firing::FiringHandler;
use crate::graph::{EdgeId, Graph, VertexId, VertexType};

/// One execution dependency of a consumer firing on a producer (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecDependencyInfo {
    pub producer_vertex: VertexId,
    pub producer_firing_start: u32,
    pub producer_firing_end: u32,
    pub mem_start: i64,
    pub mem_end: i64,
    pub rate: i64,
    pub producer_edge: EdgeId,
    /// Path of `(subgraph vertex, firing)` hops from the handler the
    /// resolution started at down to the handler that actually owns
    /// `producer_vertex`. Empty means "the handler the caller passed in".
    pub handler_path: Vec<(VertexId, u32)>,
    pub merged: bool,
}

/// One level of the graph/handler nesting the resolver walks through.
/// Borrowed, not owned: the whole chain lives on the caller's stack for the
/// duration of one `resolve` call, mirroring how BRV and firing resolution
/// are handed their ancestor chain explicitly rather than storing it.
pub struct ResolutionFrame<'a> {
    graph: &'a Graph,
    handler: &'a FiringHandler,
    subgraph_vertex: Option<VertexId>,
    subgraph_firing: u32,
    parent: Option<&'a ResolutionFrame<'a>>,
}

impl<'a> ResolutionFrame<'a> {
    pub fn root(graph: &'a Graph, handler: &'a FiringHandler) -> Self {
        ResolutionFrame { graph, handler, subgraph_vertex: None, subgraph_firing: 0, parent: None }
    }

    fn child(
        &'a self,
        graph: &'a Graph,
        handler: &'a FiringHandler,
        subgraph_vertex: VertexId,
        subgraph_firing: u32,
    ) -> Self {
        ResolutionFrame {
            graph,
            handler,
            subgraph_vertex: Some(subgraph_vertex),
            subgraph_firing,
            parent: Some(self),
        }
    }
}

fn frame_path(frame: &ResolutionFrame) -> Vec<(VertexId, u32)> {
    let mut path = Vec::new();
    let mut cur = Some(frame);
    while let Some(f) = cur {
        if let Some(v) = f.subgraph_vertex {
            path.push((v, f.subgraph_firing));
        }
        cur = f.parent;
    }
    path.reverse();
    path
}

fn interface_port_index(graph: &Graph, interface: VertexId, kind: VertexType) -> Option<usize> {
    graph.vertices().filter(|(_, v)| v.kind() == kind).position(|(id, _)| id == interface)
}

/// Split a half-open token range `[lo, hi)` across firings of a vertex
/// producing/consuming `rate` tokens per firing.
fn divide_window(lo: i64, hi: i64, rate: i64) -> Result<(u32, u32, i64, i64)> {
    if rate <= 0 {
        return Err(Spider2Error::ArithmeticError(format!("non-positive rate {rate} in dependency window")));
    }
    if lo < 0 || hi < lo {
        return Err(Spider2Error::BufferUnderrun(format!("invalid token window [{lo}, {hi})")));
    }
    let start_firing = lo / rate;
    let mem_start = lo % rate;
    let last_token = hi - 1;
    let end_firing = last_token / rate;
    let mem_end = last_token % rate + 1;
    Ok((start_firing as u32, end_firing as u32, mem_start, mem_end))
}

/// Entry point: dependencies of firing `consumer_firing` of `edge`'s sink,
/// computed from that firing's own rate window.
pub fn dependencies_for_consumer(
    frame: &ResolutionFrame,
    edge_id: EdgeId,
    consumer_firing: u32,
) -> Result<Vec<ExecDependencyInfo>> {
    let edge = frame.graph.edge(edge_id)?;
    let dst_rate = edge.dst_rate().eval(frame.handler.params())?;
    if dst_rate <= 0 {
        return Err(Spider2Error::ArithmeticError(format!("non-positive sink rate {dst_rate}")));
    }
    let lo = i64::from(consumer_firing) * dst_rate;
    resolve_dependencies(frame, edge_id, lo, lo + dst_rate)
}

/// Resolve the producers of token range `[lo, hi)` on `edge`, inside `frame`.
pub fn resolve_dependencies(
    frame: &ResolutionFrame,
    edge_id: EdgeId,
    lo: i64,
    hi: i64,
) -> Result<Vec<ExecDependencyInfo>> {
    if lo >= hi {
        return Ok(Vec::new());
    }
    if lo < 0 {
        return Err(Spider2Error::BufferUnderrun(format!("negative token offset {lo}")));
    }

    let edge = frame.graph.edge(edge_id)?;
    let delay_tokens = match edge.delay() {
        Some(d) => d.tokens_expr().eval(frame.handler.params())?,
        None => 0,
    };

    // Delay tokens shift the consumer's tape position earlier relative to
    // the producer's own firing count: consumer index `lo` is satisfied by
    // producer-relative index `lo - D`, which is negative for the portion
    // that comes out of the delay (setter-provided, or already sitting in a
    // persistent buffer from a prior iteration).
    let window_lo = lo - delay_tokens;
    let window_hi = hi - delay_tokens;
    let setter = edge.delay().and_then(|d| d.setter());

    if window_hi <= 0 {
        return Ok(match setter {
            Some(setter) => vec![ExecDependencyInfo {
                producer_vertex: setter,
                producer_firing_start: 0,
                producer_firing_end: 0,
                mem_start: window_lo + delay_tokens,
                mem_end: window_hi + delay_tokens,
                rate: delay_tokens,
                producer_edge: edge_id,
                handler_path: frame_path(frame),
                merged: false,
            }],
            // A persistent delay with no setter: tokens already sit in the
            // buffer from a prior iteration, so there is no intra-iteration
            // execution dependency to report.
            None => Vec::new(),
        });
    }

    if window_lo < 0 {
        let mut out = Vec::new();
        if let Some(setter) = setter {
            out.push(ExecDependencyInfo {
                producer_vertex: setter,
                producer_firing_start: 0,
                producer_firing_end: 0,
                mem_start: window_lo + delay_tokens,
                mem_end: delay_tokens,
                rate: delay_tokens,
                producer_edge: edge_id,
                handler_path: frame_path(frame),
                merged: false,
            });
        }
        out.extend(resolve_producer_window(frame, edge_id, 0, window_hi)?);
        return Ok(out);
    }

    resolve_producer_window(frame, edge_id, window_lo, window_hi)
}

fn resolve_producer_window(
    frame: &ResolutionFrame,
    edge_id: EdgeId,
    lo: i64,
    hi: i64,
) -> Result<Vec<ExecDependencyInfo>> {
    let edge = frame.graph.edge(edge_id)?;
    let producer = edge.src();
    let producer_vertex = frame.graph.vertex(producer)?;
    let rate = edge.src_rate().eval(frame.handler.params())?;

    match producer_vertex.kind() {
        VertexType::InputIf => {
            let parent = frame.parent.ok_or_else(|| {
                Spider2Error::InvalidConstruction("INPUT_IF has no parent frame to cross into".into())
            })?;
            let subgraph_vertex = frame.subgraph_vertex.ok_or_else(|| {
                Spider2Error::InvalidConstruction("INPUT_IF frame is missing its subgraph vertex".into())
            })?;
            let port = interface_port_index(frame.graph, producer, VertexType::InputIf).ok_or_else(|| {
                Spider2Error::InvalidConstruction("INPUT_IF not found among its own graph's interfaces".into())
            })?;
            let (parent_edge_id, parent_edge) = parent
                .graph
                .in_edges(subgraph_vertex)
                .find(|(_, e)| e.dst_port() == port)
                .ok_or_else(|| {
                    Spider2Error::InvalidConstruction("no parent edge feeds this INPUT_IF port".into())
                })?;
            let parent_rate = parent_edge.dst_rate().eval(parent.handler.params())?;
            if parent_rate <= 0 {
                return Err(Spider2Error::ArithmeticError("non-positive parent interface rate".into()));
            }
            let base = i64::from(frame.subgraph_firing) * parent_rate;
            resolve_dependencies(parent, parent_edge_id, base + lo, base + hi)
        }
        VertexType::Graph => {
            let (firing_start, firing_end, mem_start, mem_end) = divide_window(lo, hi, rate)?;
            let subgraph = producer_vertex
                .subgraph()
                .ok_or_else(|| Spider2Error::InvalidConstruction("GRAPH vertex has no subgraph".into()))?;
            let out_if = subgraph
                .vertices()
                .filter(|(_, v)| v.kind() == VertexType::OutputIf)
                .nth(edge.src_port())
                .map(|(id, _)| id)
                .ok_or_else(|| {
                    Spider2Error::InvalidConstruction("no matching OUTPUT_IF for GRAPH producer port".into())
                })?;
            let (inner_edge_id, _) = subgraph
                .in_edges(out_if)
                .find(|(_, e)| e.dst_port() == 0)
                .ok_or_else(|| Spider2Error::InvalidConstruction("OUTPUT_IF has no incoming edge".into()))?;

            let mut out = Vec::new();
            for firing in firing_start..=firing_end {
                let child = frame.handler.child(producer, firing).ok_or_else(|| {
                    Spider2Error::InvalidConstruction("missing child firing handler for GRAPH vertex".into())
                })?;
                let child_frame = frame.child(subgraph, child, producer, firing);
                let local_lo = if firing == firing_start { mem_start } else { 0 };
                let local_hi = if firing == firing_end { mem_end } else { rate };
                out.extend(resolve_dependencies(&child_frame, inner_edge_id, local_lo, local_hi)?);
            }
            Ok(out)
        }
        _ => {
            let (firing_start, firing_end, mem_start, mem_end) = divide_window(lo, hi, rate)?;
            Ok(vec![ExecDependencyInfo {
                producer_vertex: producer,
                producer_firing_start: firing_start,
                producer_firing_end: firing_end,
                mem_start,
                mem_end,
                rate,
                producer_edge: edge_id,
                handler_path: frame_path(frame),
                merged: false,
            }])
        }
    }
}
