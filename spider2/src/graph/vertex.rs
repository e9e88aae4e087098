// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::types::ParamId;
use super::Graph;
use crate::error::{Result, Spider2Error};

/// Closed set of vertex kinds. Matches spec.md §3's `VertexType`; modeled
/// as a tagged enum (not a visitor hierarchy) per the design notes in
/// spec.md §9 — `copy`/`export`-style operations become free functions
/// that pattern-match on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexType {
    Normal,
    Config,
    Delay,
    Fork,
    Join,
    Head,
    Tail,
    Duplicate,
    Repeat,
    Init,
    End,
    InputIf,
    OutputIf,
    ExternIn,
    ExternOut,
    /// Recursively owns a subgraph; see [`Vertex::subgraph`].
    Graph,
}

/// Fixed arity requirements for vertex kinds with constrained port counts
/// (spec.md §4.2). `None` means "any count ≥ 0 is acceptable at
/// construction" (checked instead by the BRV resolver / firing handler at
/// resolution time).
pub(crate) fn arity_requirement(kind: VertexType) -> (Option<usize>, Option<usize>) {
    match kind {
        VertexType::Fork => (Some(1), None), // 1 in, >=1 out
        VertexType::Join => (None, Some(1)), // >=1 in, 1 out
        VertexType::Duplicate => (Some(1), None),
        VertexType::Head => (None, Some(1)),
        VertexType::Tail => (None, Some(1)),
        VertexType::Repeat => (Some(1), Some(1)),
        VertexType::InputIf => (Some(0), Some(1)),
        VertexType::OutputIf => (Some(1), Some(0)),
        VertexType::ExternIn => (Some(0), Some(1)),
        VertexType::ExternOut => (Some(1), Some(0)),
        _ => (None, None),
    }
}

fn check_arity(kind: VertexType, n_in: usize, n_out: usize) -> Result<()> {
    let (min_in, exact_or_min_out) = arity_requirement(kind);
    let fail = |what: &str| {
        Err(Spider2Error::InvalidConstruction(format!(
            "{kind:?} vertex has {what} (in={n_in}, out={n_out})"
        )))
    };
    match kind {
        VertexType::Fork | VertexType::Duplicate => {
            if n_in != 1 || n_out < 1 {
                return fail("wrong arity: expected 1 in, >=1 out");
            }
        }
        VertexType::Join => {
            if n_in < 1 || n_out != 1 {
                return fail("wrong arity: expected >=1 in, 1 out");
            }
        }
        VertexType::Head | VertexType::Tail => {
            if n_in < 1 || n_out != 1 {
                return fail("wrong arity: expected >=1 in, 1 out");
            }
        }
        VertexType::Repeat => {
            if n_in != 1 || n_out != 1 {
                return fail("wrong arity: expected 1 in, 1 out");
            }
        }
        VertexType::InputIf | VertexType::ExternIn => {
            if n_in != 0 || n_out != 1 {
                return fail("wrong arity: expected 0 in, 1 out");
            }
        }
        VertexType::OutputIf | VertexType::ExternOut => {
            if n_in != 1 || n_out != 0 {
                return fail("wrong arity: expected 1 in, 0 out");
            }
        }
        _ => {
            let _ = (min_in, exact_or_min_out);
        }
    }
    Ok(())
}

/// A graph vertex. Immutable after construction (application lifetime),
/// identified by its arena index within the owning [`Graph`].
pub struct Vertex {
    kind: VertexType,
    n_in: usize,
    n_out: usize,
    /// For CONFIG vertices: the indices of the graph parameters this
    /// vertex's job output sets. Empty for every other kind.
    config_sets: Vec<ParamId>,
    /// For GRAPH vertices: the owned subgraph. `None` for every other kind.
    subgraph: Option<Box<Graph>>,
    /// Optional human-readable label (kernel name, etc.), purely advisory.
    label: String,
}

impl Vertex {
    pub(crate) fn new(
        kind: VertexType,
        n_in: usize,
        n_out: usize,
        label: impl Into<String>,
    ) -> Result<Self> {
        check_arity(kind, n_in, n_out)?;
        if kind == VertexType::Config {
            // CONFIG vertices set parameters but may have arbitrary ports.
        }
        Ok(Vertex {
            kind,
            n_in,
            n_out,
            config_sets: Vec::new(),
            subgraph: None,
            label: label.into(),
        })
    }

    pub fn kind(&self) -> VertexType {
        self.kind
    }

    pub fn n_in(&self) -> usize {
        self.n_in
    }

    pub fn n_out(&self) -> usize {
        self.n_out
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config_sets(&self) -> &[ParamId] {
        &self.config_sets
    }

    pub(crate) fn set_config_sets(&mut self, params: Vec<ParamId>) -> Result<()> {
        if self.kind != VertexType::Config {
            return Err(Spider2Error::InvalidConstruction(format!(
                "only CONFIG vertices may set parameters (vertex {:?})",
                self.label
            )));
        }
        self.config_sets = params;
        Ok(())
    }

    pub fn subgraph(&self) -> Option<&Graph> {
        self.subgraph.as_deref()
    }

    pub fn subgraph_mut(&mut self) -> Option<&mut Graph> {
        self.subgraph.as_deref_mut()
    }

    pub(crate) fn attach_subgraph(&mut self, subgraph: Graph) -> Result<()> {
        if self.kind != VertexType::Graph {
            return Err(Spider2Error::InvalidConstruction(
                "only GRAPH vertices may own a subgraph".into(),
            ));
        }
        self.subgraph = Some(Box::new(subgraph));
        Ok(())
    }

    /// Whether this vertex participates in BRV's connected-component walk:
    /// interface vertices are boundary markers, not part of the inner
    /// dataflow component (spec.md §4.3).
    pub fn is_interface(&self) -> bool {
        matches!(
            self.kind,
            VertexType::InputIf | VertexType::OutputIf | VertexType::ExternIn | VertexType::ExternOut
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_requires_one_in_at_least_one_out() {
        assert!(Vertex::new(VertexType::Fork, 1, 2, "f").is_ok());
        assert!(Vertex::new(VertexType::Fork, 2, 2, "f").is_err());
        assert!(Vertex::new(VertexType::Fork, 1, 0, "f").is_err());
    }

    #[test]
    fn join_requires_single_output() {
        assert!(Vertex::new(VertexType::Join, 3, 1, "j").is_ok());
        assert!(Vertex::new(VertexType::Join, 3, 2, "j").is_err());
    }

    #[test]
    fn input_if_has_no_inputs() {
        assert!(Vertex::new(VertexType::InputIf, 0, 1, "in").is_ok());
        assert!(Vertex::new(VertexType::InputIf, 1, 1, "in").is_err());
    }

    #[test]
    fn normal_vertex_has_unconstrained_arity() {
        assert!(Vertex::new(VertexType::Normal, 7, 3, "n").is_ok());
    }
}
