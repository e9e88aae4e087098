// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-iteration, per-subgraph firing state (spec.md §3 `FiringHandler`,
//! §4.4).

use crate::brv::{compute_brv, InterfaceRates};
use crate::error::{Result, Spider2Error};
use crate::graph::{Graph, ParamKind, VertexId};
use ahash::AHashMap as HashMap;

pub const UNSCHEDULED: u32 = u32::MAX;

/// Per-iteration, per-subgraph object owning resolved parameters, the BRV,
/// the task-index table, and child handlers for nested subgraph firings.
pub struct FiringHandler {
    params: Vec<i64>,
    rv: Vec<u32>,
    task_ix: HashMap<(VertexId, u32), u32>,
    children: HashMap<(VertexId, u32), FiringHandler>,
    resolved: bool,
}

impl FiringHandler {
    pub fn new(param_count: usize) -> Self {
        FiringHandler {
            params: vec![0; param_count],
            rv: Vec::new(),
            task_ix: HashMap::new(),
            children: HashMap::new(),
            resolved: false,
        }
    }

    /// Whether every parameter value is known and the BRV has been
    /// computed — spec.md §3's definition of "resolved".
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn params(&self) -> &[i64] {
        &self.params
    }

    /// Resolve this handler's parameter table: STATIC and previously-set
    /// DYNAMIC values are read as-is; unset DYNAMIC values fall back to
    /// their build-time expression (evaluated against the table being
    /// built so far, supporting forward references within the same
    /// graph); INHERITED values are looked up in `parent`.
    pub fn resolve_params(&mut self, graph: &Graph, parent: Option<&FiringHandler>) -> Result<()> {
        let mut resolved = vec![0i64; graph.param_count()];
        for (id, p) in graph.params() {
            let idx = id.index();
            resolved[idx] = match p.kind() {
                ParamKind::Static(v) => *v,
                ParamKind::Dynamic { expr, value } => match value {
                    Some(v) => *v,
                    None => match expr {
                        Some(e) => e.eval(&resolved[..idx])?,
                        None => {
                            return Err(Spider2Error::BadParamRef { index: idx, param_count: graph.param_count() })
                        }
                    },
                },
                ParamKind::Inherited { parent_param } => {
                    let parent = parent.ok_or_else(|| {
                        Spider2Error::InvalidConstruction(format!(
                            "inherited param {idx} has no parent firing handler"
                        ))
                    })?;
                    *parent.params.get(*parent_param).ok_or(Spider2Error::BadParamRef {
                        index: *parent_param,
                        param_count: parent.params.len(),
                    })?
                }
            };
        }
        self.params = resolved;
        Ok(())
    }

    /// Compute the repetition vector for `graph` given the currently
    /// resolved parameter table, marking this handler resolved.
    pub fn resolve_brv(&mut self, graph: &Graph, interface_rates: &InterfaceRates) -> Result<()> {
        self.rv = compute_brv(graph, &self.params, interface_rates)?;
        self.resolved = true;
        Ok(())
    }

    pub fn rv(&self, vertex: VertexId) -> u32 {
        self.rv.get(vertex.index()).copied().unwrap_or(0)
    }

    pub fn rv_table(&self) -> &[u32] {
        &self.rv
    }

    /// Cheap fan-out: copy another sibling firing's resolved state when
    /// parameters don't differ between them (spec.md §4.4).
    pub fn apply(&mut self, other: &FiringHandler) {
        self.params = other.params.clone();
        self.rv = other.rv.clone();
        self.resolved = other.resolved;
    }

    pub fn register_task_ix(&mut self, vertex: VertexId, firing: u32, task_id: u32) {
        self.task_ix.insert((vertex, firing), task_id);
    }

    pub fn task_ix(&self, vertex: VertexId, firing: u32) -> u32 {
        self.task_ix.get(&(vertex, firing)).copied().unwrap_or(UNSCHEDULED)
    }

    pub fn child(&self, vertex: VertexId, firing: u32) -> Option<&FiringHandler> {
        self.children.get(&(vertex, firing))
    }

    pub fn child_mut(&mut self, vertex: VertexId, firing: u32) -> Option<&mut FiringHandler> {
        self.children.get_mut(&(vertex, firing))
    }

    pub fn ensure_child(&mut self, vertex: VertexId, firing: u32, param_count: usize) -> &mut FiringHandler {
        self.children.entry((vertex, firing)).or_insert_with(|| FiringHandler::new(param_count))
    }

    pub fn children(&self) -> impl Iterator<Item = (&(VertexId, u32), &FiringHandler)> {
        self.children.iter()
    }

    /// Invoked when a CONFIG job completes: writes the new value and
    /// rebuilds only the child firing handlers of subgraph vertices that
    /// actually inherit this parameter — unrelated siblings' task-ix
    /// tables are left untouched (spec.md §4.4).
    pub fn set_output_param(&mut self, graph: &Graph, index: usize, value: i64) -> Result<()> {
        if index >= self.params.len() {
            return Err(Spider2Error::BadParamRef { index, param_count: self.params.len() });
        }
        self.params[index] = value;
        self.resolved = false;

        let mut dependent_vertices = Vec::new();
        for (vid, vtx) in graph.vertices() {
            if let Some(sub) = vtx.subgraph() {
                let depends = sub.params().any(|(_, p)| {
                    matches!(p.kind(), ParamKind::Inherited { parent_param } if *parent_param == index)
                });
                if depends {
                    dependent_vertices.push(vid);
                }
            }
        }
        self.children.retain(|(vid, _), _| !dependent_vertices.contains(vid));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::graph::{Graph, VertexType};

    #[test]
    fn static_and_inherited_params_resolve() {
        let mut parent_graph = Graph::new();
        parent_graph.add_param(ParamKind::Static(9));
        let mut parent = FiringHandler::new(1);
        parent.resolve_params(&parent_graph, None).unwrap();

        let mut child_graph = Graph::new();
        child_graph.add_param(ParamKind::Inherited { parent_param: 0 });
        let mut child = FiringHandler::new(1);
        child.resolve_params(&child_graph, Some(&parent)).unwrap();
        assert_eq!(child.params(), &[9]);
    }

    #[test]
    fn dynamic_param_falls_back_to_expression() {
        let mut g = Graph::new();
        g.add_param(ParamKind::Dynamic { expr: Some(Expr::constant(4)), value: None });
        let mut h = FiringHandler::new(1);
        h.resolve_params(&g, None).unwrap();
        assert_eq!(h.params(), &[4]);
    }

    #[test]
    fn set_output_param_drops_only_dependent_children() {
        let mut g = Graph::new();
        let n_param = g.add_param(ParamKind::Dynamic { expr: None, value: None });

        let mut dependent_sub = Graph::new();
        dependent_sub.add_param(ParamKind::Inherited { parent_param: n_param.index() });
        let dep_vertex = g.add_vertex(VertexType::Graph, 0, 0, "dep").unwrap();
        g.connect_subgraph(dep_vertex, dependent_sub).unwrap();

        let independent_sub = Graph::new();
        let indep_vertex = g.add_vertex(VertexType::Graph, 0, 0, "indep").unwrap();
        g.connect_subgraph(indep_vertex, independent_sub).unwrap();

        let mut handler = FiringHandler::new(1);
        handler.ensure_child(dep_vertex, 0, 0);
        handler.ensure_child(indep_vertex, 0, 0);
        handler.register_task_ix(indep_vertex, 0, 42);

        handler.set_output_param(&g, n_param.index(), 5).unwrap();

        assert!(handler.child(dep_vertex, 0).is_none());
        assert!(handler.child(indep_vertex, 0).is_some());
        assert_eq!(handler.task_ix(indep_vertex, 0), 42);
        assert!(!handler.is_resolved());
    }
}
