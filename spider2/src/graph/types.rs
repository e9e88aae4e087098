// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Index-addressed identifiers for graph entities.
//!
//! Graph entities never hold direct references to each other (see
//! `DESIGN.md` for the cyclic-reference rationale); every cross-reference is
//! one of these newtype indices into the owning [`crate::graph::Graph`]'s
//! arenas.

use serde::{Deserialize, Serialize};

macro_rules! index_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<usize> for $name {
            fn from(v: usize) -> Self {
                $name(v as u32)
            }
        }
    };
}

index_type!(VertexId);
index_type!(EdgeId);
index_type!(ParamId);
