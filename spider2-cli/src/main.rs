// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! spider2 CLI
//!
//! Drives a small built-in dataflow graph through a number of iterations
//! against an in-process coordinator/runner pool, for exercising the
//! runtime without a real application graph loader in front of it.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use ahash::AHashMap as HashMap;
use spider2::algorithm::resolve_and_schedule;
use spider2::context::{LogChannel, RuntimeContext};
use spider2::error::Result as Spider2Result;
use spider2::firing::FiringHandler;
use spider2::graph::{Graph, VertexType};
use spider2::refinement::Refinements;
use spider2::runtime::{Coordinator, JobMessage, Runner};
use spider2::schedule::Platform;

#[derive(Parser)]
#[command(name = "spider2")]
#[command(author, version, about = "spider2 dataflow runtime CLI", long_about = None)]
struct Cli {
    /// Number of processing elements in the demo platform.
    #[arg(long, default_value_t = 2)]
    pes: usize,

    /// Number of iterations to run the demo graph through.
    #[arg(long, default_value_t = 3)]
    iterations: u32,

    /// Enable every log channel instead of the default quiet mode.
    #[arg(short, long)]
    verbose: bool,

    /// Emit a schedule/gantt export after the run (printed, not written to
    /// disk — a real exporter is out of scope here).
    #[arg(long)]
    export_gantt: bool,
}

/// `src -> dst`, two Normal vertices each firing once per iteration.
/// Good enough to exercise scheduling and the runner protocol end to end
/// without dragging in a graph file format.
fn demo_graph() -> Spider2Result<Graph> {
    let mut g = Graph::new();
    let src = g.add_vertex(VertexType::Normal, 0, 1, "source")?;
    let dst = g.add_vertex(VertexType::Normal, 1, 0, "sink")?;
    g.add_edge(src, 0, dst, 0, spider2::expr::Expr::constant(4), spider2::expr::Expr::constant(4), None)?;
    Ok(g)
}

fn noop(_in: &[i64], _out: &mut [i64], _in_bufs: &[&[u8]], _out_bufs: &mut [&mut [u8]]) -> Spider2Result<()> {
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let run_id = cuid2::create_id();

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "spider2=trace" } else { "spider2=info" })
        .init();
    tracing::info!(%run_id, "starting run");

    let mut platform = Platform::new(cli.pes);
    for pe in 0..cli.pes as u32 {
        platform.set_timing(0, pe, 10);
        platform.set_timing(1, pe, 10);
    }

    let ctx = {
        let mut builder = RuntimeContext::builder(platform).export_gantt(cli.export_gantt);
        if cli.verbose {
            builder = builder.enable_all_channels();
        } else {
            builder = builder.enable_channel(LogChannel::General);
        }
        builder.build()
    };

    let registry = Arc::new(Refinements::new());
    registry.register("source", noop, 0, 0)?;
    registry.register("sink", noop, 0, 0)?;

    let graph = demo_graph()?;
    let mut handler = FiringHandler::new(graph.param_count());

    let (param_tx, param_rx) = crossbeam_channel::unbounded();
    let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
    let coordinator_notify = Arc::new(spider2::runtime::Queue::new());
    let mut runner_notify = HashMap::default();
    let mut runner_jobs = HashMap::default();
    let mut runners = Vec::new();

    for pe in 0..cli.pes as u32 {
        let (runner, notify, jobs) = Runner::new(pe, cli.pes, coordinator_notify.clone(), param_tx.clone(), ack_tx.clone());
        runner_notify.insert(pe, notify);
        runner_jobs.insert(pe, jobs);
        runners.push(runner);
    }

    // Every runner needs every peer's notify queue so a cross-PE broadcast
    // (Runner::execute's JobUpdateJobStamp) actually reaches its waiters.
    let mut handles = Vec::new();
    for mut runner in runners {
        runner.set_peers(runner_notify.clone());
        handles.push(runner.run_forever(registry.clone()));
    }

    let coordinator = Coordinator::new(runner_notify, runner_jobs, param_rx, ack_rx);

    for iteration in 0..cli.iterations {
        coordinator.start_iteration();
        let (schedule, batch) = resolve_and_schedule(&graph, &mut handler, ctx.platform())?;
        tracing::info!(iteration, makespan = schedule.makespan(), tasks = schedule.tasks().len(), "iteration planned");

        for task in schedule.tasks() {
            if !task.executable {
                continue;
            }
            let Some(pe) = task.mapped_pe else { continue };
            let vertex = batch.vertex_of[&task.id];
            let sync_list = schedule.sync_list(task.id).to_vec();
            let job = job_for_task(task.kernel_index, vertex, task.firing, sync_list, task.broadcast);
            coordinator.dispatch(pe, job)?;
        }

        let outputs = coordinator.end_iteration();
        for stats in schedule.pe_stats() {
            tracing::debug!(load = stats.load, utilization = stats.utilization(schedule.makespan()), "pe stats");
        }
        if !outputs.is_empty() {
            tracing::debug!(count = outputs.len(), "config outputs produced this iteration");
        }

        if cli.export_gantt {
            let report = serde_json::to_string_pretty(schedule.pe_stats())?;
            println!("{report}");
        }
    }

    coordinator.stop();
    for handle in handles {
        handle.join().expect("runner thread panicked")?;
    }

    tracing::info!(%run_id, export_trace = ctx.export_trace(), export_srdag = ctx.export_srdag(), "run complete");

    Ok(())
}

/// Build a [`JobMessage`] for a scheduled task.
fn job_for_task(
    kernel_index: u32,
    vertex: spider2::graph::VertexId,
    firing: u32,
    sync_list: Vec<spider2::schedule::SyncEntry>,
    broadcast: bool,
) -> JobMessage {
    JobMessage {
        kernel_index,
        vertex,
        firing,
        input_params: Vec::new(),
        output_param_count: 0,
        input_buffers: Vec::new(),
        output_sizes: Vec::new(),
        sync_list,
        broadcast,
    }
}
