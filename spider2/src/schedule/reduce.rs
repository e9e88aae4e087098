// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pre-emission reductions on the expanded single-rate job graph (spec.md
//! §4.6): Join→End collapsing, Fork/Join flattening, Repeat elimination,
//! and unit Fork/Duplicate bypass. Applied iteratively, in insertion order,
//! until a pass makes no change — the fixpoint order spec.md leaves open is
//! resolved that way here (see DESIGN.md).

use crate::graph::VertexType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobNodeId(pub u32);

/// One node of the expanded job graph the reducer rewrites in place. Unlike
/// [`crate::graph::Vertex`] this only tracks the handful of kinds the
/// reductions care about; everything else is `VertexType::Normal`.
#[derive(Debug, Clone)]
pub struct JobNode {
    pub id: JobNodeId,
    pub kind: VertexType,
    pub n_in: usize,
    pub n_out: usize,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct JobEdge {
    pub from: JobNodeId,
    pub from_port: usize,
    pub to: JobNodeId,
    pub to_port: usize,
    pub rate: i64,
}

#[derive(Default)]
pub struct JobGraph {
    pub nodes: Vec<JobNode>,
    pub edges: Vec<JobEdge>,
}

impl JobGraph {
    pub fn new() -> Self {
        JobGraph::default()
    }

    pub fn add_node(&mut self, kind: VertexType, n_in: usize, n_out: usize) -> JobNodeId {
        let id = JobNodeId(self.nodes.len() as u32);
        self.nodes.push(JobNode { id, kind, n_in, n_out, deleted: false });
        id
    }

    pub fn add_edge(&mut self, from: JobNodeId, from_port: usize, to: JobNodeId, to_port: usize, rate: i64) {
        self.edges.push(JobEdge { from, from_port, to, to_port, rate });
    }

    fn node(&self, id: JobNodeId) -> &JobNode {
        &self.nodes[id.0 as usize]
    }

    fn out_edges(&self, id: JobNodeId) -> Vec<usize> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.from == id)
            .map(|(i, _)| i)
            .collect()
    }

    fn in_edges(&self, id: JobNodeId) -> Vec<usize> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.to == id)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = &JobNode> {
        self.nodes.iter().filter(|n| !n.deleted)
    }

    pub fn live_edges(&self) -> impl Iterator<Item = &JobEdge> {
        self.edges.iter().filter(|e| !self.node(e.from).deleted && !self.node(e.to).deleted)
    }
}

/// Run every reduction to a fixpoint, in insertion order, re-scanning from
/// the top after any change.
pub fn reduce(g: &mut JobGraph) {
    loop {
        let mut changed = false;
        changed |= join_to_end(g);
        changed |= fork_join_cancel(g);
        changed |= flatten_same_kind(g, VertexType::Fork);
        changed |= flatten_same_kind(g, VertexType::Join);
        changed |= eliminate_unit_repeat(g);
        changed |= bypass_unit_fanout(g, VertexType::Fork);
        changed |= bypass_unit_fanout(g, VertexType::Duplicate);
        if !changed {
            break;
        }
    }
}

/// If a JOIN's only consumer is an END, delete both and route each JOIN
/// input to a fresh END with matching rate.
fn join_to_end(g: &mut JobGraph) -> bool {
    let mut changed = false;
    let join_ids: Vec<JobNodeId> = g.live_nodes().filter(|n| n.kind == VertexType::Join).map(|n| n.id).collect();
    for join in join_ids {
        let outs = g.out_edges(join);
        if outs.len() != 1 {
            continue;
        }
        let end_id = g.edges[outs[0]].to;
        if g.node(end_id).kind != VertexType::End {
            continue;
        }
        let ins = g.in_edges(join);
        let mut new_edges = Vec::new();
        for &ei in &ins {
            let rate = g.edges[ei].rate;
            let from = g.edges[ei].from;
            let from_port = g.edges[ei].from_port;
            let fresh_end = g.add_node(VertexType::End, 1, 0);
            new_edges.push((from, from_port, fresh_end, rate));
        }
        g.nodes[join.0 as usize].deleted = true;
        g.nodes[end_id.0 as usize].deleted = true;
        for (from, from_port, to, rate) in new_edges {
            g.add_edge(from, from_port, to, 0, rate);
        }
        changed = true;
    }
    changed
}

/// A Fork whose every output feeds, 1:1 and exclusively, the inputs of one
/// Join is a semantic no-op (spec.md §8's Fork/Join adjacency law): delete
/// both and connect the Fork's source directly to the Join's sink.
fn fork_join_cancel(g: &mut JobGraph) -> bool {
    let mut changed = false;
    let forks: Vec<JobNodeId> = g.live_nodes().filter(|n| n.kind == VertexType::Fork).map(|n| n.id).collect();
    for fork in forks {
        let fork_ins = g.in_edges(fork);
        let fork_outs = g.out_edges(fork);
        if fork_ins.len() != 1 || fork_outs.is_empty() {
            continue;
        }
        let join = g.edges[fork_outs[0]].to;
        if g.node(join).kind != VertexType::Join {
            continue;
        }
        let all_to_join = fork_outs.iter().all(|&ei| g.edges[ei].to == join);
        let join_ins = g.in_edges(join);
        if !all_to_join || join_ins.len() != fork_outs.len() {
            continue;
        }
        let join_outs = g.out_edges(join);
        if join_outs.len() != 1 {
            continue;
        }
        let (from, from_port) = (g.edges[fork_ins[0]].from, g.edges[fork_ins[0]].from_port);
        let (to, to_port, rate) = (g.edges[join_outs[0]].to, g.edges[join_outs[0]].to_port, g.edges[join_outs[0]].rate);
        g.edges.retain(|e| {
            e.from != fork && e.to != fork && e.from != join && e.to != join
        });
        g.add_edge(from, from_port, to, to_port, rate);
        g.nodes[fork.0 as usize].deleted = true;
        g.nodes[join.0 as usize].deleted = true;
        changed = true;
    }
    changed
}

/// Flatten `Fork -> Fork` or `Join -> Join` chains into a single node with
/// the union of ports, when the intermediate node has exactly one peer on
/// the shared side.
fn flatten_same_kind(g: &mut JobGraph, kind: VertexType) -> bool {
    let mut changed = false;
    let ids: Vec<JobNodeId> = g.live_nodes().filter(|n| n.kind == kind).map(|n| n.id).collect();
    for outer in ids {
        if g.node(outer).deleted {
            continue;
        }
        let candidate_edges = if kind == VertexType::Fork { g.out_edges(outer) } else { g.in_edges(outer) };
        for ei in candidate_edges {
            if g.node(g.edges[ei].from).deleted || g.node(g.edges[ei].to).deleted {
                continue;
            }
            let inner = if kind == VertexType::Fork { g.edges[ei].to } else { g.edges[ei].from };
            if inner == outer || g.node(inner).kind != kind {
                continue;
            }
            let shared_side_degree =
                if kind == VertexType::Fork { g.in_edges(inner).len() } else { g.out_edges(inner).len() };
            if shared_side_degree != 1 {
                continue;
            }
            // Splice inner directly into outer's free side, dropping the
            // connecting edge.
            if kind == VertexType::Fork {
                for oe in g.out_edges(inner) {
                    let (to, to_port, rate) = (g.edges[oe].to, g.edges[oe].to_port, g.edges[oe].rate);
                    g.edges[oe].from = outer;
                    g.edges[oe].from_port = g.nodes[outer.0 as usize].n_out;
                    g.nodes[outer.0 as usize].n_out += 1;
                    let _ = (to, to_port, rate);
                }
            } else {
                for ie in g.in_edges(inner) {
                    g.edges[ie].to = outer;
                    g.edges[ie].to_port = g.nodes[outer.0 as usize].n_in;
                    g.nodes[outer.0 as usize].n_in += 1;
                }
            }
            g.edges.retain(|e| e.from != inner && e.to != inner);
            g.nodes[inner.0 as usize].deleted = true;
            changed = true;
            break;
        }
    }
    changed
}

/// A REPEAT with equal input/output rate is a no-op: rewire source directly
/// to sink.
fn eliminate_unit_repeat(g: &mut JobGraph) -> bool {
    let mut changed = false;
    let ids: Vec<JobNodeId> = g.live_nodes().filter(|n| n.kind == VertexType::Repeat).map(|n| n.id).collect();
    for id in ids {
        let ins = g.in_edges(id);
        let outs = g.out_edges(id);
        if ins.len() != 1 || outs.len() != 1 {
            continue;
        }
        if g.edges[ins[0]].rate != g.edges[outs[0]].rate {
            continue;
        }
        let (from, from_port) = (g.edges[ins[0]].from, g.edges[ins[0]].from_port);
        let (to, to_port, rate) = (g.edges[outs[0]].to, g.edges[outs[0]].to_port, g.edges[outs[0]].rate);
        g.edges.retain(|e| e.to != id && e.from != id);
        g.add_edge(from, from_port, to, to_port, rate);
        g.nodes[id.0 as usize].deleted = true;
        changed = true;
    }
    changed
}

/// A FORK or DUPLICATE with exactly one output port carries tokens through
/// unchanged: bypass it.
fn bypass_unit_fanout(g: &mut JobGraph, kind: VertexType) -> bool {
    let mut changed = false;
    let ids: Vec<JobNodeId> = g.live_nodes().filter(|n| n.kind == kind).map(|n| n.id).collect();
    for id in ids {
        let ins = g.in_edges(id);
        let outs = g.out_edges(id);
        if ins.len() != 1 || outs.len() != 1 {
            continue;
        }
        let (from, from_port) = (g.edges[ins[0]].from, g.edges[ins[0]].from_port);
        let (to, to_port, rate) = (g.edges[outs[0]].to, g.edges[outs[0]].to_port, g.edges[outs[0]].rate);
        g.edges.retain(|e| e.to != id && e.from != id);
        g.add_edge(from, from_port, to, to_port, rate);
        g.nodes[id.0 as usize].deleted = true;
        changed = true;
    }
    changed
}
