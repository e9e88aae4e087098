// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Error types for spider2.
//!
//! One variant per error kind named in the runtime's error-handling design:
//! construction failures are synchronous and fatal for the call, everything
//! else is raised during an iteration and aborts that iteration only.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Spider2Error {
    #[error("invalid graph construction: {0}")]
    InvalidConstruction(String),

    #[error("parameter index {index} out of range (graph has {param_count} params)")]
    BadParamRef { index: usize, param_count: usize },

    #[error("arithmetic error evaluating expression: {0}")]
    ArithmeticError(String),

    #[error("inconsistent rates while resolving BRV: {0}")]
    InconsistentRatesError(String),

    #[error("scheduling error for task {task_id}: {reason}")]
    SchedulingError { task_id: u32, reason: String },

    #[error("FIFO allocation error: {0}")]
    AllocationError(String),

    #[error("protocol error on lrt {lrt}: {message}")]
    ProtocolError { lrt: u32, message: String },

    #[error("dependency resolver produced a negative memory range: {0}")]
    BufferUnderrun(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type that uses [`Spider2Error`].
pub type Result<T> = std::result::Result<T, Spider2Error>;
