// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! End-to-end promotions of the concrete scenarios onto the full
//! resolve/schedule pipeline. The scenarios' own rv/dependency-window math
//! is already covered at the module level (brv, deps, schedule::reduce);
//! these tests check that `algorithm` wires those pieces together
//! correctly, not the arithmetic itself.

use spider2::algorithm::{plan_dynamic_iteration, resolve_and_schedule};
use spider2::error::Result;
use spider2::expr::Expr;
use spider2::firing::FiringHandler;
use spider2::graph::{Graph, ParamKind, VertexType};
use spider2::runtime::RefinementRegistry;
use spider2::schedule::Platform;

fn set_uniform_timing(platform: &mut Platform, kernels: u32, pes: u32, cycles: u64) {
    for k in 0..kernels {
        for pe in 0..pes {
            platform.set_timing(k, pe, cycles);
        }
    }
}

/// S2: triangle `A→B→C, A→C` with rates `(2,1),(1,1),(2,1)`, scheduled on
/// 2 PEs with unit timings, should produce makespan 3.
#[test]
fn s2_triangle_end_to_end_makespan() -> Result<()> {
    let mut g = Graph::new();
    let a = g.add_vertex(VertexType::Normal, 0, 2, "A")?;
    let b = g.add_vertex(VertexType::Normal, 1, 1, "B")?;
    let c = g.add_vertex(VertexType::Normal, 2, 0, "C")?;
    g.add_edge(a, 0, b, 0, Expr::constant(2), Expr::constant(1), None)?;
    g.add_edge(b, 0, c, 0, Expr::constant(1), Expr::constant(1), None)?;
    g.add_edge(a, 1, c, 1, Expr::constant(2), Expr::constant(1), None)?;

    let mut handler = FiringHandler::new(g.param_count());
    let mut platform = Platform::new(2);
    set_uniform_timing(&mut platform, 3, 2, 1);

    let (schedule, batch) = resolve_and_schedule(&g, &mut handler, &platform)?;
    assert_eq!(handler.rv(a), 1);
    assert_eq!(handler.rv(b), 2);
    assert_eq!(handler.rv(c), 2);
    assert_eq!(schedule.makespan(), 3);
    assert_eq!(batch.vertex_of.len(), schedule.tasks().len());
    Ok(())
}

struct ConfigRegistry;

impl RefinementRegistry for ConfigRegistry {
    fn call(
        &self,
        kernel_index: u32,
        _input_params: &[i64],
        output_params: &mut [i64],
        _input_buffers: &[&[u8]],
        _output_buffers: &mut [&mut [u8]],
    ) -> Result<()> {
        if kernel_index == 0 {
            output_params[0] = 5;
        }
        Ok(())
    }
}

/// S4: CONFIG vertex sets `N`; a downstream consumer's repetition count
/// depends on it. The init phase schedules only the CONFIG vertex; the
/// run phase is only resolvable once its output has been folded back.
#[test]
fn s4_dynamic_parameter_drives_downstream_repetition() -> Result<()> {
    let mut g = Graph::new();
    // A fallback of 1 lets the very first (pre-CONFIG) resolution pass
    // succeed; the real value of 5 arrives once the CONFIG job runs.
    let n = g.add_param(ParamKind::Dynamic { expr: Some(Expr::constant(1)), value: None });
    let cfg = g.add_vertex(VertexType::Config, 0, 1, "C")?;
    g.set_config_outputs(cfg, vec![n])?;
    let consumer = g.add_vertex(VertexType::Normal, 1, 0, "consumer")?;
    g.add_edge(cfg, 0, consumer, 0, Expr::param(n.index()), Expr::constant(1), None)?;

    let mut handler = FiringHandler::new(g.param_count());
    let mut platform = Platform::new(1);
    set_uniform_timing(&mut platform, 2, 1, 1);

    let plan = plan_dynamic_iteration(&g, &mut handler, &platform)?;
    assert_eq!(plan.init_schedule.tasks().len(), 1);
    assert_eq!(handler.rv(consumer), 1); // still on the fallback value

    // Simulates the CONFIG job actually executing on a runner: its kernel
    // index is the vertex's own index (0, the only vertex in the graph).
    let mut output = [0i64];
    ConfigRegistry.call(cfg.index() as u32, &[], &mut output, &[], &mut [])?;
    assert_eq!(output[0], 5);

    handler.set_output_param(&g, n.index(), output[0])?;
    let (run_schedule, run_batch) = plan.resolve_run_phase(&g, &mut handler, &platform)?;
    assert_eq!(handler.rv(consumer), 5);
    assert_eq!(run_schedule.tasks().len(), 5);
    assert_eq!(run_batch.vertex_of.len(), 5);
    Ok(())
}

/// S4 continued: a different CONFIG output (`N=1`) yields a different
/// downstream repetition count from the same graph shape.
#[test]
fn s4_dynamic_parameter_with_smaller_value() -> Result<()> {
    let mut g = Graph::new();
    let n = g.add_param(ParamKind::Dynamic { expr: Some(Expr::constant(1)), value: None });
    let cfg = g.add_vertex(VertexType::Config, 0, 1, "C")?;
    g.set_config_outputs(cfg, vec![n])?;
    let consumer = g.add_vertex(VertexType::Normal, 1, 0, "consumer")?;
    g.add_edge(cfg, 0, consumer, 0, Expr::param(n.index()), Expr::constant(1), None)?;

    let mut handler = FiringHandler::new(g.param_count());
    let mut platform = Platform::new(1);
    set_uniform_timing(&mut platform, 2, 1, 1);
    let plan = plan_dynamic_iteration(&g, &mut handler, &platform)?;

    handler.set_output_param(&g, n.index(), 1)?;
    let (run_schedule, _) = plan.resolve_run_phase(&g, &mut handler, &platform)?;
    assert_eq!(handler.rv(consumer), 1);
    assert_eq!(run_schedule.tasks().len(), 1);
    Ok(())
}
