// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Coordinator/runner messaging protocol (spec.md §4.8, §5).
//!
//! One GRT coordinator plus N runners (one per PE) communicate exclusively
//! through notification queues, an indexed job store, and a param-message
//! channel. Every queue here is its own mutex + condition variable, the way
//! the teacher keeps one lock per resource rather than a single big one
//! (see `core/runtime/commands.rs`'s per-command reply channels).

use crate::error::{Result, Spider2Error};
use crate::graph::VertexId;
use crate::schedule::SyncEntry;
use ahash::AHashMap as HashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Sentinel for an unreceived peer stamp (spec.md §4.8: `localJobStampsArray`
/// starts at `UINT32_MAX`).
pub const UNSET_STAMP: u32 = u32::MAX;

/// A single unit of dispatched work: one firing of one vertex, its resolved
/// input parameters, and the buffers it reads and writes.
#[derive(Debug, Clone)]
pub struct JobMessage {
    pub kernel_index: u32,
    pub vertex: VertexId,
    pub firing: u32,
    pub input_params: Vec<i64>,
    pub output_param_count: usize,
    pub input_buffers: Vec<Vec<u8>>,
    pub output_sizes: Vec<usize>,
    pub sync_list: Vec<SyncEntry>,
    pub broadcast: bool,
}

/// Output parameters produced by a CONFIG job, destined for the coordinator.
#[derive(Debug, Clone)]
pub struct ParamMessage {
    pub vertex: VertexId,
    pub firing: u32,
    pub values: Vec<i64>,
}

/// The closed set of notifications runners and the coordinator exchange.
#[derive(Debug, Clone)]
pub enum NotificationKind {
    LrtStartIteration,
    LrtEndIteration,
    LrtClear,
    LrtStop,
    JobNew(u32),
    JobUpdateJobStamp { peer: u32, stamp: u32 },
    Trace(String),
    ParamUpdate,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(kind: NotificationKind) -> Self {
        Notification { kind }
    }
}

/// A blocking FIFO queue, one mutex + condvar per instance (spec.md §5).
pub struct Queue<T> {
    inner: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Queue { inner: Mutex::new(VecDeque::new()), not_empty: Condvar::new() }
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        let mut guard = self.inner.lock();
        guard.push_back(item);
        self.not_empty.notify_one();
    }

    /// Blocks the calling thread until an item is available.
    pub fn pop_blocking(&self) -> T {
        let mut guard = self.inner.lock();
        loop {
            if let Some(item) = guard.pop_front() {
                return item;
            }
            self.not_empty.wait(&mut guard);
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// An indexed store supporting append-with-id and random-access removal,
/// with a free list so the backing memory stays bounded across iterations
/// (spec.md §5's "free-list of reusable slots").
pub struct IndexedQueue<T> {
    slots: Mutex<IndexedQueueInner<T>>,
}

struct IndexedQueueInner<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> Default for IndexedQueue<T> {
    fn default() -> Self {
        IndexedQueue { slots: Mutex::new(IndexedQueueInner { slots: Vec::new(), free: Vec::new() }) }
    }
}

impl<T> IndexedQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: T) -> u32 {
        let mut inner = self.slots.lock();
        if let Some(id) = inner.free.pop() {
            inner.slots[id as usize] = Some(item);
            id
        } else {
            inner.slots.push(Some(item));
            (inner.slots.len() - 1) as u32
        }
    }

    /// Removes and returns the item, freeing the slot for reuse.
    pub fn take(&self, id: u32) -> Option<T> {
        let mut inner = self.slots.lock();
        let item = inner.slots.get_mut(id as usize).and_then(Option::take);
        if item.is_some() {
            inner.free.push(id);
        }
        item
    }

    /// Puts a previously-`take`n item back under the same id (a job that
    /// turned out not to be runnable yet).
    pub fn reinsert(&self, id: u32, item: T) {
        let mut inner = self.slots.lock();
        inner.slots[id as usize] = Some(item);
        inner.free.retain(|&f| f != id);
    }

    pub fn contains(&self, id: u32) -> bool {
        self.slots.lock().slots.get(id as usize).map(Option::is_some).unwrap_or(false)
    }
}

/// Calling convention for a registered kernel (spec.md §6).
pub trait RefinementRegistry: Send + Sync {
    fn call(
        &self,
        kernel_index: u32,
        input_params: &[i64],
        output_params: &mut [i64],
        input_buffers: &[&[u8]],
        output_buffers: &mut [&mut [u8]],
    ) -> Result<()>;
}

/// One worker runner bound to a PE (spec.md §4.8).
pub struct Runner {
    pub id: u32,
    notifications: Arc<Queue<Notification>>,
    jobs: Arc<IndexedQueue<JobMessage>>,
    peers: HashMap<u32, Arc<Queue<Notification>>>,
    coordinator_notify: Arc<Queue<Notification>>,
    param_tx: crossbeam_channel::Sender<ParamMessage>,
    ack_tx: crossbeam_channel::Sender<u32>,
    local_job_stamps: Vec<u32>,
    job_queue: Vec<u32>,
    job_queue_pos: usize,
}

impl Runner {
    pub fn new(
        id: u32,
        runner_count: usize,
        coordinator_notify: Arc<Queue<Notification>>,
        param_tx: crossbeam_channel::Sender<ParamMessage>,
        ack_tx: crossbeam_channel::Sender<u32>,
    ) -> (Self, Arc<Queue<Notification>>, Arc<IndexedQueue<JobMessage>>) {
        let notifications = Arc::new(Queue::new());
        let jobs = Arc::new(IndexedQueue::new());
        let runner = Runner {
            id,
            notifications: notifications.clone(),
            jobs: jobs.clone(),
            peers: HashMap::new(),
            coordinator_notify,
            param_tx,
            ack_tx,
            local_job_stamps: vec![UNSET_STAMP; runner_count],
            job_queue: Vec::new(),
            job_queue_pos: 0,
        };
        (runner, notifications, jobs)
    }

    pub fn set_peers(&mut self, peers: HashMap<u32, Arc<Queue<Notification>>>) {
        self.peers = peers;
    }

    /// Consumes whatever is currently queued without blocking; used both by
    /// tests and by a real background thread's outer `loop { ... }`.
    pub fn drain_pending(&mut self, registry: &dyn RefinementRegistry) -> Result<bool> {
        let mut stopped = false;
        while let Some(note) = self.notifications.try_pop() {
            if self.handle(note, registry)? {
                stopped = true;
            }
        }
        Ok(stopped)
    }

    /// Runs the blocking event loop on the calling thread until `LRT_STOP`.
    pub fn run_forever(mut self, registry: Arc<dyn RefinementRegistry>) -> JoinHandle<Result<()>> {
        std::thread::spawn(move || loop {
            let note = self.notifications.pop_blocking();
            if self.handle(note, registry.as_ref())? {
                return Ok(());
            }
        })
    }

    /// Returns true when the runner should stop.
    fn handle(&mut self, note: Notification, registry: &dyn RefinementRegistry) -> Result<bool> {
        match note.kind {
            NotificationKind::LrtStartIteration => {
                self.job_queue.clear();
                self.job_queue_pos = 0;
            }
            NotificationKind::JobNew(index) => self.job_queue.push(index),
            NotificationKind::JobUpdateJobStamp { peer, stamp } => {
                if let Some(slot) = self.local_job_stamps.get_mut(peer as usize) {
                    // UNSET_STAMP is a floor sentinel, not a real value: a
                    // plain `max` against u32::MAX would never move away
                    // from it.
                    *slot = if *slot == UNSET_STAMP { stamp } else { (*slot).max(stamp) };
                }
            }
            NotificationKind::LrtEndIteration => {
                self.drain_runnable(registry)?;
                let _ = self.ack_tx.send(self.id);
            }
            NotificationKind::LrtClear => {
                self.job_queue_pos = 0;
                self.local_job_stamps.iter_mut().for_each(|s| *s = UNSET_STAMP);
            }
            NotificationKind::LrtStop => return Ok(true),
            NotificationKind::Trace(message) => tracing::trace!(runner = self.id, %message, "trace"),
            NotificationKind::ParamUpdate => {}
        }
        Ok(false)
    }

    /// `UNSET_STAMP` means the peer hasn't broadcast anything yet this
    /// iteration and must never satisfy a waiting dependency, even one
    /// waiting on exec index 0 — a plain numeric `>=` against `u32::MAX`
    /// would defeat the sentinel.
    fn is_runnable(&self, sync_list: &[SyncEntry]) -> bool {
        sync_list.iter().all(|entry| {
            if entry.peer_pe == self.id {
                self.job_queue_pos as u32 >= entry.exec_ix
            } else {
                match self.local_job_stamps.get(entry.peer_pe as usize).copied() {
                    Some(stamp) if stamp != UNSET_STAMP => stamp >= entry.exec_ix,
                    _ => false,
                }
            }
        })
    }

    fn drain_runnable(&mut self, registry: &dyn RefinementRegistry) -> Result<()> {
        while self.job_queue_pos < self.job_queue.len() {
            let id = self.job_queue[self.job_queue_pos];
            // Take ownership to run it; a blocked job is put right back so
            // the next LRT_END_ITERATION pass retries from the same spot.
            let Some(job) = self.jobs.take(id) else {
                return Err(Spider2Error::ProtocolError {
                    lrt: self.id,
                    message: format!("job index {id} missing from indexed store"),
                });
            };
            if !self.is_runnable(&job.sync_list) {
                self.jobs.reinsert(id, job);
                return Ok(());
            }
            self.execute(job, registry)?;
            self.job_queue_pos += 1;
        }
        Ok(())
    }

    fn execute(&mut self, job: JobMessage, registry: &dyn RefinementRegistry) -> Result<()> {
        let mut output_params = vec![0i64; job.output_param_count];
        let input_refs: Vec<&[u8]> = job.input_buffers.iter().map(Vec::as_slice).collect();
        let mut output_buffers: Vec<Vec<u8>> = job.output_sizes.iter().map(|&size| vec![0u8; size]).collect();
        let mut output_refs: Vec<&mut [u8]> = output_buffers.iter_mut().map(Vec::as_mut_slice).collect();

        registry.call(job.kernel_index, &job.input_params, &mut output_params, &input_refs, &mut output_refs)?;
        drop(output_refs);

        if job.output_param_count > 0 {
            let _ = self.param_tx.send(ParamMessage { vertex: job.vertex, firing: job.firing, values: output_params });
            self.coordinator_notify.push(Notification::new(NotificationKind::ParamUpdate));
        }

        if job.broadcast {
            let stamp = self.job_queue_pos as u32;
            for (&peer_id, queue) in &self.peers {
                if peer_id != self.id {
                    queue.push(Notification::new(NotificationKind::JobUpdateJobStamp { peer: self.id, stamp }));
                }
            }
        }
        Ok(())
    }
}

/// Drives the per-iteration protocol: start, dispatch, end, collect params,
/// clear (spec.md §4.8's "Coordinator loop").
pub struct Coordinator {
    runner_notify: HashMap<u32, Arc<Queue<Notification>>>,
    runner_jobs: HashMap<u32, Arc<IndexedQueue<JobMessage>>>,
    param_rx: crossbeam_channel::Receiver<ParamMessage>,
    ack_rx: crossbeam_channel::Receiver<u32>,
}

impl Coordinator {
    pub fn new(
        runner_notify: HashMap<u32, Arc<Queue<Notification>>>,
        runner_jobs: HashMap<u32, Arc<IndexedQueue<JobMessage>>>,
        param_rx: crossbeam_channel::Receiver<ParamMessage>,
        ack_rx: crossbeam_channel::Receiver<u32>,
    ) -> Self {
        Coordinator { runner_notify, runner_jobs, param_rx, ack_rx }
    }

    pub fn start_iteration(&self) {
        for queue in self.runner_notify.values() {
            queue.push(Notification::new(NotificationKind::LrtStartIteration));
        }
    }

    /// Stores the job with the target runner's indexed store and notifies
    /// it with `JOB_NEW(index)`.
    pub fn dispatch(&self, runner: u32, job: JobMessage) -> Result<()> {
        let jobs = self.runner_jobs.get(&runner).ok_or_else(|| Spider2Error::ProtocolError {
            lrt: runner,
            message: "dispatch to unknown runner".into(),
        })?;
        let index = jobs.insert(job);
        let notify = self.runner_notify.get(&runner).expect("runner_notify and runner_jobs share keys");
        notify.push(Notification::new(NotificationKind::JobNew(index)));
        Ok(())
    }

    /// Ends the iteration, blocks for every runner's ack, then drains and
    /// returns whatever `ParamMessage`s arrived, and clears all runners for
    /// the next iteration.
    pub fn end_iteration(&self) -> Vec<ParamMessage> {
        for queue in self.runner_notify.values() {
            queue.push(Notification::new(NotificationKind::LrtEndIteration));
        }
        let mut acked = 0usize;
        while acked < self.runner_notify.len() {
            if self.ack_rx.recv().is_err() {
                break;
            }
            acked += 1;
        }
        let mut params = Vec::new();
        while let Ok(p) = self.param_rx.try_recv() {
            params.push(p);
        }
        for queue in self.runner_notify.values() {
            queue.push(Notification::new(NotificationKind::LrtClear));
        }
        params
    }

    pub fn stop(&self) {
        for queue in self.runner_notify.values() {
            queue.push(Notification::new(NotificationKind::LrtStop));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DoublingRegistry;
    impl RefinementRegistry for DoublingRegistry {
        fn call(
            &self,
            _kernel_index: u32,
            input_params: &[i64],
            output_params: &mut [i64],
            input_buffers: &[&[u8]],
            output_buffers: &mut [&mut [u8]],
        ) -> Result<()> {
            if let (Some(&p), Some(out)) = (input_params.first(), output_params.first_mut()) {
                *out = p * 2;
            }
            if let (Some(&src), Some(dst)) = (input_buffers.first(), output_buffers.first_mut()) {
                dst[..src.len().min(dst.len())].copy_from_slice(&src[..src.len().min(dst.len())]);
            }
            Ok(())
        }
    }

    fn job(kernel_index: u32, broadcast: bool) -> JobMessage {
        JobMessage {
            kernel_index,
            vertex: VertexId(0),
            firing: 0,
            input_params: vec![21],
            output_param_count: 1,
            input_buffers: vec![vec![1, 2, 3]],
            output_sizes: vec![3],
            sync_list: Vec::new(),
            broadcast,
        }
    }

    #[test]
    fn queue_push_then_pop_is_fifo() {
        let q: Queue<i32> = Queue::new();
        q.push(1);
        q.push(2);
        assert_eq!(q.pop_blocking(), 1);
        assert_eq!(q.pop_blocking(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn indexed_queue_reuses_freed_slots() {
        let q: IndexedQueue<&str> = IndexedQueue::new();
        let a = q.insert("a");
        let b = q.insert("b");
        assert_ne!(a, b);
        assert_eq!(q.take(a), Some("a"));
        let c = q.insert("c");
        assert_eq!(c, a);
    }

    #[test]
    fn single_runner_executes_a_runnable_job_and_acks() {
        let (param_tx, param_rx) = crossbeam_channel::unbounded();
        let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
        let coordinator_notify = Arc::new(Queue::new());
        let (mut runner, notify, jobs) = Runner::new(0, 1, coordinator_notify, param_tx, ack_tx);
        runner.set_peers(HashMap::new());

        notify.push(Notification::new(NotificationKind::LrtStartIteration));
        runner.drain_pending(&DoublingRegistry).unwrap();

        let index = jobs.insert(job(0, false));
        notify.push(Notification::new(NotificationKind::JobNew(index)));
        runner.drain_pending(&DoublingRegistry).unwrap();

        notify.push(Notification::new(NotificationKind::LrtEndIteration));
        runner.drain_pending(&DoublingRegistry).unwrap();

        assert_eq!(ack_rx.recv().unwrap(), 0);
        let msg = param_rx.recv().unwrap();
        assert_eq!(msg.values, vec![42]);
    }

    #[test]
    fn job_blocked_on_peer_stamp_waits_until_it_arrives() {
        let (param_tx, _param_rx) = crossbeam_channel::unbounded();
        let (ack_tx, _ack_rx) = crossbeam_channel::unbounded();
        let coordinator_notify = Arc::new(Queue::new());
        let (mut runner, notify, jobs) = Runner::new(1, 2, coordinator_notify, param_tx, ack_tx);
        runner.set_peers(HashMap::new());

        let mut blocked = job(0, false);
        blocked.sync_list.push(SyncEntry { peer_pe: 0, exec_ix: 1, rate: 0 });
        let index = jobs.insert(blocked);
        notify.push(Notification::new(NotificationKind::JobNew(index)));
        notify.push(Notification::new(NotificationKind::LrtEndIteration));
        runner.drain_pending(&DoublingRegistry).unwrap();
        assert!(jobs.contains(index));

        notify.push(Notification::new(NotificationKind::JobUpdateJobStamp { peer: 0, stamp: 1 }));
        let index2 = jobs.insert(job(0, false));
        notify.push(Notification::new(NotificationKind::JobNew(index2)));
        notify.push(Notification::new(NotificationKind::LrtEndIteration));
        runner.drain_pending(&DoublingRegistry).unwrap();
        assert!(!jobs.contains(index));
        assert!(!jobs.contains(index2));
    }

    #[test]
    fn coordinator_drives_a_background_runner_thread_through_one_iteration() {
        let (param_tx, param_rx) = crossbeam_channel::unbounded();
        let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
        let coordinator_notify = Arc::new(Queue::new());
        let (mut runner, notify, jobs) = Runner::new(0, 1, coordinator_notify, param_tx, ack_tx);
        runner.set_peers(HashMap::new());

        let mut runner_notify = HashMap::new();
        runner_notify.insert(0u32, notify);
        let mut runner_jobs = HashMap::new();
        runner_jobs.insert(0u32, jobs);

        let handle = runner.run_forever(Arc::new(DoublingRegistry));
        let coordinator = Coordinator::new(runner_notify, runner_jobs, param_rx, ack_rx);

        coordinator.start_iteration();
        coordinator.dispatch(0, job(0, false)).unwrap();
        let params = coordinator.end_iteration();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].values, vec![42]);

        coordinator.stop();
        handle.join().unwrap().unwrap();
    }
}
