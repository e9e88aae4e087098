// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Kernel registration (spec.md §6's "register refinements by `(name,
//! function pointer/handle, input-param-count, output-param-count)`").

use crate::error::{Result, Spider2Error};
use crate::runtime::RefinementRegistry as RuntimeRegistry;
use ahash::AHashMap as HashMap;
use std::sync::RwLock;

/// Calling convention a registered kernel must satisfy (spec.md §6).
pub type RefinementFn =
    fn(input_params: &[i64], output_params: &mut [i64], input_buffers: &[&[u8]], output_buffers: &mut [&mut [u8]]) -> Result<()>;

#[derive(Clone, Copy)]
struct Entry {
    function: RefinementFn,
    param_in_count: usize,
    param_out_count: usize,
}

/// Append-only, process-wide registry of kernels by index. Refinements are
/// looked up by the index assigned at registration time; the registry is
/// read-only once the application finishes setup (spec.md §5).
#[derive(Default)]
pub struct Refinements {
    by_name: RwLock<HashMap<String, u32>>,
    entries: RwLock<Vec<Entry>>,
}

impl Refinements {
    pub fn new() -> Self {
        Refinements::default()
    }

    /// Registers a kernel, returning the index future jobs reference it by.
    /// Names must be unique.
    pub fn register(&self, name: &str, function: RefinementFn, param_in_count: usize, param_out_count: usize) -> Result<u32> {
        let mut by_name = self.by_name.write().unwrap();
        if by_name.contains_key(name) {
            return Err(Spider2Error::InvalidConstruction(format!("refinement '{name}' already registered")));
        }
        let mut entries = self.entries.write().unwrap();
        let index = entries.len() as u32;
        entries.push(Entry { function, param_in_count, param_out_count });
        by_name.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.by_name.read().unwrap().get(name).copied()
    }

    pub fn param_counts(&self, kernel_index: u32) -> Option<(usize, usize)> {
        self.entries.read().unwrap().get(kernel_index as usize).map(|e| (e.param_in_count, e.param_out_count))
    }
}

impl RuntimeRegistry for Refinements {
    fn call(
        &self,
        kernel_index: u32,
        input_params: &[i64],
        output_params: &mut [i64],
        input_buffers: &[&[u8]],
        output_buffers: &mut [&mut [u8]],
    ) -> Result<()> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(kernel_index as usize).ok_or_else(|| Spider2Error::ProtocolError {
            lrt: kernel_index,
            message: "no refinement registered at this kernel index".into(),
        })?;
        if input_params.len() != entry.param_in_count || output_params.len() != entry.param_out_count {
            return Err(Spider2Error::BadParamRef { index: kernel_index as usize, param_count: entry.param_in_count });
        }
        (entry.function)(input_params, output_params, input_buffers, output_buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(_: &[i64], _: &mut [i64], _: &[&[u8]], _: &mut [&mut [u8]]) -> Result<()> {
        Ok(())
    }

    #[test]
    fn register_assigns_increasing_indices_and_rejects_duplicate_names() {
        let reg = Refinements::new();
        let a = reg.register("add", identity, 2, 1).unwrap();
        let b = reg.register("sub", identity, 2, 1).unwrap();
        assert_eq!((a, b), (0, 1));
        assert!(reg.register("add", identity, 2, 1).is_err());
    }

    #[test]
    fn call_rejects_param_count_mismatch() {
        let reg = Refinements::new();
        reg.register("f", identity, 1, 1).unwrap();
        let mut out = [0i64; 1];
        let err = RuntimeRegistry::call(&reg, 0, &[1, 2], &mut out, &[], &mut []);
        assert!(matches!(err, Err(Spider2Error::BadParamRef { .. })));
    }

    #[test]
    fn call_dispatches_to_the_registered_function() {
        fn double(inp: &[i64], out: &mut [i64], _: &[&[u8]], _: &mut [&mut [u8]]) -> Result<()> {
            out[0] = inp[0] * 2;
            Ok(())
        }
        let reg = Refinements::new();
        let idx = reg.register("double", double, 1, 1).unwrap();
        let mut out = [0i64; 1];
        RuntimeRegistry::call(&reg, idx, &[21], &mut out, &[], &mut []).unwrap();
        assert_eq!(out[0], 42);
    }
}
