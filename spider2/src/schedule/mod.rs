// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! List scheduler with critical-path priority and best-fit PE mapping
//! (spec.md §4.6), plus the pre-emission graph reductions.

use crate::error::{Result, Spider2Error};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use serde::Serialize;

pub mod platform;
pub mod reduce;

pub use platform::{Cluster, Platform};

/// One scheduled (or not-yet-schedulable) execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    NotSchedulable,
    Pending,
    Ready,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

/// One execution unit: a single firing of a single vertex for the current
/// iteration (spec.md §3 `Task`).
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub kernel_index: u32,
    pub firing: u32,
    /// Other tasks this one depends on.
    pub dependencies: Vec<TaskId>,
    pub mapped_pe: Option<u32>,
    pub start: u64,
    pub end: u64,
    pub state: TaskState,
    pub broadcast: bool,
    pub executable: bool,
}

impl Task {
    pub fn new(id: TaskId, kernel_index: u32, firing: u32) -> Self {
        Task {
            id,
            kernel_index,
            firing,
            dependencies: Vec::new(),
            mapped_pe: None,
            start: 0,
            end: 0,
            state: TaskState::Pending,
            broadcast: false,
            executable: true,
        }
    }
}

/// Per-peer-LRT synchronization constraint attached to a scheduled task
/// (spec.md §3 "Sync list", §4.6).
#[derive(Debug, Clone, Copy)]
pub struct SyncEntry {
    pub peer_pe: u32,
    pub exec_ix: u32,
    pub rate: i64,
}

/// Plain serializable so an external exporter crate can turn this into a
/// Gantt chart without this crate knowing anything about file formats.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PeStats {
    pub start: u64,
    pub end: u64,
    pub job_count: u32,
    pub load: u64,
}

impl PeStats {
    pub fn idle(&self, makespan: u64) -> u64 {
        makespan.saturating_sub(self.load)
    }

    pub fn utilization(&self, makespan: u64) -> f64 {
        if makespan == 0 {
            0.0
        } else {
            self.load as f64 / makespan as f64
        }
    }
}

/// The derived schedule for one iteration: the task list plus per-PE
/// statistics, rebuilt from scratch every iteration (spec.md §3 `Schedule`).
pub struct Schedule {
    tasks: Vec<Task>,
    sync_lists: HashMap<TaskId, Vec<SyncEntry>>,
    pe_stats: Vec<PeStats>,
}

impl Schedule {
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0 as usize)
    }

    pub fn sync_list(&self, id: TaskId) -> &[SyncEntry] {
        self.sync_lists.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pe_stats(&self) -> &[PeStats] {
        &self.pe_stats
    }

    pub fn makespan(&self) -> u64 {
        self.tasks.iter().map(|t| t.end).max().unwrap_or(0)
    }
}

/// Pluggable scheduling policy; spec.md names exactly one (the list
/// scheduler), but the ambient design keeps a trait seam the way the
/// teacher separates strategy from mechanism (spec.md §9's "closed set of
/// vertex kinds" note applies the same logic here: one concrete impl today,
/// room for another without touching callers).
pub trait SchedulingPolicy {
    fn schedule(&self, tasks: Vec<Task>, platform: &Platform) -> Result<Schedule>;
}

/// Critical-path-level list scheduler with best-fit PE mapping (spec.md
/// §4.6).
#[derive(Debug, Default)]
pub struct ListScheduler;

impl ListScheduler {
    pub fn new() -> Self {
        ListScheduler
    }

    /// `level(v,k) = 0` if no successor in this iteration, else
    /// `max(level(successor) + execTime(successor))`.
    fn compute_levels(tasks: &[Task], platform: &Platform) -> Vec<u64> {
        let n = tasks.len();
        let mut successors = vec![Vec::new(); n];
        for (i, t) in tasks.iter().enumerate() {
            for dep in &t.dependencies {
                successors[dep.0 as usize].push(i);
            }
        }
        let mut levels = vec![0u64; n];
        let mut visited = vec![false; n];

        fn visit(
            i: usize,
            tasks: &[Task],
            successors: &[Vec<usize>],
            platform: &Platform,
            levels: &mut [u64],
            visited: &mut [bool],
        ) -> u64 {
            if visited[i] {
                return levels[i];
            }
            visited[i] = true;
            let mut level = 0u64;
            for &s in &successors[i] {
                let exec_time = platform.min_timing(tasks[s].kernel_index).unwrap_or(0);
                let succ_level = visit(s, tasks, successors, platform, levels, visited);
                level = level.max(succ_level + exec_time);
            }
            levels[i] = level;
            level
        }

        for i in 0..n {
            visit(i, tasks, &successors, platform, &mut levels, &mut visited);
        }
        levels
    }
}

impl SchedulingPolicy for ListScheduler {
    fn schedule(&self, mut tasks: Vec<Task>, platform: &Platform) -> Result<Schedule> {
        let levels = Self::compute_levels(&tasks, platform);

        let mut order: Vec<usize> = (0..tasks.len()).collect();
        order.sort_by(|&a, &b| {
            levels[b].cmp(&levels[a]).then_with(|| tasks[a].id.0.cmp(&tasks[b].id.0))
        });
        let (mut schedulable, mut rest): (Vec<usize>, Vec<usize>) =
            order.into_iter().partition(|&i| tasks[i].executable);
        schedulable.append(&mut rest);

        let mut pe_available = vec![0u64; platform.pe_count()];
        let mut pe_stats = vec![PeStats::default(); platform.pe_count()];
        let mut finished: HashMap<TaskId, (u32, u64)> = HashMap::new();

        for &i in &schedulable {
            if !tasks[i].executable {
                continue;
            }
            let kernel = tasks[i].kernel_index;
            let mut candidates = Vec::new();
            for pe in 0..platform.pe_count() as u32 {
                if let Some(timing) = platform.timing(kernel, pe) {
                    candidates.push((pe, timing));
                }
            }
            if candidates.is_empty() {
                return Err(Spider2Error::SchedulingError {
                    task_id: tasks[i].id.0,
                    reason: "no PE is mappable for this task's kernel".into(),
                });
            }

            let mut t_min = 0u64;
            for dep in tasks[i].dependencies.clone() {
                let (dep_pe, dep_end) = *finished.get(&dep).ok_or_else(|| Spider2Error::SchedulingError {
                    task_id: tasks[i].id.0,
                    reason: format!("dependency {:?} not yet scheduled", dep),
                })?;
                for &(pe, _) in &candidates {
                    let comm = platform.comm_cost(dep_pe, pe, 0);
                    t_min = t_min.max(dep_end + comm);
                }
            }

            let mut best: Option<(u32, u64, u64)> = None;
            for (pe, timing) in candidates {
                let start = t_min.max(pe_available[pe as usize]);
                let end = start + timing;
                best = match best {
                    Some((bp, bs, be)) if be <= end => Some((bp, bs, be)),
                    _ => Some((pe, start, end)),
                };
            }
            let (pe, start, end) = best.expect("candidates non-empty");

            pe_available[pe as usize] = end;
            let stats = &mut pe_stats[pe as usize];
            if stats.job_count == 0 {
                stats.start = start;
            }
            stats.end = end;
            stats.job_count += 1;
            stats.load += end - start;

            tasks[i].mapped_pe = Some(pe);
            tasks[i].start = start;
            tasks[i].end = end;
            tasks[i].state = TaskState::Ready;
            finished.insert(tasks[i].id, (pe, end));
        }

        let sync_lists = build_sync_lists(&mut tasks);
        Ok(Schedule { tasks, sync_lists, pe_stats })
    }
}

/// For every task `T` and predecessor `P` on a different PE, record
/// `(P.execIx, P.rate)` keyed by `P`'s PE — the information a worker needs
/// to wait on `localJobStampsArray` before running `T` (spec.md §4.6, §5).
///
/// `exec_ix` is `P`'s own position within its PE's dispatch order (the order
/// `tasks` is iterated in here, which is also the order a caller dispatches
/// `Schedule::tasks()` in) — NOT `P.firing`, which is just the producer
/// vertex's own repetition index and has no relationship to queue position
/// once more than one vertex shares a PE. Any task that turns out to have a
/// cross-PE dependent is marked `broadcast`, since only a broadcasting
/// runner stamps `JobUpdateJobStamp` for peers to wait on.
fn build_sync_lists(tasks: &mut [Task]) -> HashMap<TaskId, Vec<SyncEntry>> {
    let mut by_id: HashMap<TaskId, usize> = HashMap::new();
    for (i, t) in tasks.iter().enumerate() {
        by_id.insert(t.id, i);
    }

    let mut pe_exec_ix: HashMap<TaskId, u32> = HashMap::new();
    let mut next_ix: HashMap<u32, u32> = HashMap::new();
    for t in tasks.iter() {
        if let Some(pe) = t.mapped_pe {
            let ix = next_ix.entry(pe).or_insert(0);
            pe_exec_ix.insert(t.id, *ix);
            *ix += 1;
        }
    }

    let mut out: HashMap<TaskId, Vec<SyncEntry>> = HashMap::new();
    let mut broadcasters: HashSet<TaskId> = HashSet::default();
    for i in 0..tasks.len() {
        let Some(pe) = tasks[i].mapped_pe else { continue };
        let mut entries = Vec::new();
        for dep in tasks[i].dependencies.clone() {
            let Some(&pi) = by_id.get(&dep) else { continue };
            let Some(pred_pe) = tasks[pi].mapped_pe else { continue };
            if pred_pe != pe {
                let exec_ix = pe_exec_ix[&dep];
                entries.push(SyncEntry { peer_pe: pred_pe, exec_ix, rate: tasks[pi].end as i64 });
                broadcasters.insert(dep);
            }
        }
        if !entries.is_empty() {
            out.insert(tasks[i].id, entries);
        }
    }

    for t in tasks.iter_mut() {
        if broadcasters.contains(&t.id) {
            t.broadcast = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::platform::Platform;

    fn two_pe_uniform_platform(kernels: u32) -> Platform {
        let mut p = Platform::new(2);
        for k in 0..kernels {
            p.set_timing(k, 0, 1);
            p.set_timing(k, 1, 1);
        }
        p
    }

    #[test]
    fn independent_tasks_spread_across_pes() {
        let platform = two_pe_uniform_platform(2);
        let tasks = vec![Task::new(TaskId(0), 0, 0), Task::new(TaskId(1), 1, 0)];
        let schedule = ListScheduler::new().schedule(tasks, &platform).unwrap();
        let pes: Vec<_> = schedule.tasks().iter().map(|t| t.mapped_pe).collect();
        assert_ne!(pes[0], pes[1]);
        assert_eq!(schedule.makespan(), 1);
    }

    #[test]
    fn dependent_task_waits_for_predecessor() {
        let platform = two_pe_uniform_platform(2);
        let mut consumer = Task::new(TaskId(1), 1, 0);
        consumer.dependencies.push(TaskId(0));
        let tasks = vec![Task::new(TaskId(0), 0, 0), consumer];
        let schedule = ListScheduler::new().schedule(tasks, &platform).unwrap();
        let producer = schedule.task(TaskId(0)).unwrap();
        let consumer = schedule.task(TaskId(1)).unwrap();
        assert!(consumer.start >= producer.end);
    }

    #[test]
    fn unmappable_kernel_is_a_scheduling_error() {
        let platform = Platform::new(1);
        let tasks = vec![Task::new(TaskId(0), 0, 0)];
        assert!(matches!(
            ListScheduler::new().schedule(tasks, &platform),
            Err(Spider2Error::SchedulingError { .. })
        ));
    }

    #[test]
    fn scenario_s2_triangle_makespan_three() {
        // A->B->C, A->C on 2 PEs with unit timings; spec.md S2 expects
        // makespan = 3 once A=1,B=2,C=2 firings are expanded into 5 tasks
        // (A0, B0, B1, C0, C1) with B,C each depending on their slice of A.
        let platform = two_pe_uniform_platform(1);
        let a0 = Task::new(TaskId(0), 0, 0);
        let mut b0 = Task::new(TaskId(1), 0, 0);
        b0.dependencies.push(TaskId(0));
        let mut b1 = Task::new(TaskId(2), 0, 1);
        b1.dependencies.push(TaskId(0));
        let mut c0 = Task::new(TaskId(3), 0, 0);
        c0.dependencies.push(TaskId(1));
        c0.dependencies.push(TaskId(0));
        let mut c1 = Task::new(TaskId(4), 0, 1);
        c1.dependencies.push(TaskId(2));
        c1.dependencies.push(TaskId(0));
        let tasks = vec![a0, b0, b1, c0, c1];
        let schedule = ListScheduler::new().schedule(tasks, &platform).unwrap();
        assert_eq!(schedule.makespan(), 3);
    }
}
