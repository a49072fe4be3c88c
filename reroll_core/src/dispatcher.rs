//! Background planning workers.
//!
//! The main loop hands region jobs to a fixed pool over an unbounded
//! channel and never waits on them. Each worker checks the region is loaded,
//! plans a replacement type and pushes the resulting task onto the apply
//! queue. Skips and panics stay inside the worker.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bevy::prelude::Resource;
use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use reroll_schema::RegionKey;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::apply_queue::{ApplyQueueProducer, MutationTask};
use crate::catalog::CellCatalog;
use crate::hashing::planning_seed;
use crate::planner;
use crate::status::{processing_notice, StatusSink};
use crate::world::ChunkLoadView;

/// Why a planning job ended without producing a task. Never an error for
/// the caller; the job is simply dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanSkip {
    #[error("region {0} is not loaded")]
    RegionNotLoaded(RegionKey),
    #[error("no eligible replacement cell type")]
    NoEligibleCellType,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to spawn planning worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanJob {
    pub region: RegionKey,
    pub seed: u64,
}

/// Everything a worker needs; nothing in here is world-mutable.
pub struct PlanContext {
    pub catalog: Arc<CellCatalog>,
    pub loaded: Arc<dyn ChunkLoadView>,
    pub queue: ApplyQueueProducer,
    pub sink: Arc<dyn StatusSink>,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    submitted: AtomicU64,
    planned: AtomicU64,
    skipped: AtomicU64,
    panicked: AtomicU64,
    in_flight: AtomicUsize,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub submitted: u64,
    pub planned: u64,
    pub skipped: u64,
    pub panicked: u64,
    pub in_flight: usize,
}

#[derive(Resource)]
pub struct PlanDispatcher {
    sender: Option<Sender<PlanJob>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<DispatchCounters>,
    world_seed: u64,
    next_sequence: AtomicU64,
}

impl PlanDispatcher {
    pub fn spawn(
        worker_count: usize,
        world_seed: u64,
        context: PlanContext,
    ) -> Result<Self, DispatchError> {
        let (sender, receiver) = unbounded::<PlanJob>();
        let counters = Arc::new(DispatchCounters::default());
        let context = Arc::new(context);

        let mut dispatcher = Self {
            sender: Some(sender),
            workers: Vec::with_capacity(worker_count.max(1)),
            counters: Arc::clone(&counters),
            world_seed,
            next_sequence: AtomicU64::new(0),
        };

        for index in 0..worker_count.max(1) {
            let jobs = receiver.clone();
            let context = Arc::clone(&context);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("region-planner-{index}"))
                .spawn(move || run_worker(jobs, context, counters))
                .map_err(|source| DispatchError::Spawn { index, source })?;
            dispatcher.workers.push(handle);
        }

        Ok(dispatcher)
    }

    /// Queue a planning job for `region` and return immediately.
    pub fn submit(&self, region: RegionKey) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let job = PlanJob {
            region,
            seed: planning_seed(self.world_seed, region, sequence),
        };

        let Some(sender) = self.sender.as_ref() else {
            warn!(target: "reroll::dispatcher", %region, "plan.submit_dropped=shut_down");
            return;
        };

        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        if sender.send(job).is_err() {
            self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
            warn!(target: "reroll::dispatcher", %region, "plan.submit_dropped=workers_gone");
            return;
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            planned: self.counters.planned.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Jobs submitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Poll until every submitted job has finished or `timeout` elapses.
    /// Returns whether the pool went idle. Meant for hosts and tests, never
    /// for the main loop.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Stop accepting jobs, let workers finish the backlog, and join them.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!(target: "reroll::dispatcher", "plan.worker_join_failed");
            }
        }
    }
}

impl Drop for PlanDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(jobs: Receiver<PlanJob>, context: Arc<PlanContext>, counters: Arc<DispatchCounters>) {
    while let Ok(job) = jobs.recv() {
        match panic::catch_unwind(AssertUnwindSafe(|| plan_region(&context, job))) {
            Ok(Ok(task)) => {
                counters.planned.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "reroll::dispatcher",
                    region = %task.region,
                    cell_type = %task.cell_type,
                    "plan.queued"
                );
            }
            Ok(Err(skip)) => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "reroll::dispatcher",
                    region = %job.region,
                    reason = %skip,
                    "plan.skipped"
                );
            }
            Err(_) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(
                    target: "reroll::dispatcher",
                    region = %job.region,
                    "plan.worker_panicked"
                );
            }
        }
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn plan_region(context: &PlanContext, job: PlanJob) -> Result<MutationTask, PlanSkip> {
    if !context.loaded.is_region_loaded(job.region) {
        return Err(PlanSkip::RegionNotLoaded(job.region));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(job.seed);
    let cell_type = planner::plan(&context.catalog, &mut rng).ok_or(PlanSkip::NoEligibleCellType)?;

    context.sink.emit(processing_notice(job.region, &cell_type));
    let task = MutationTask::new(job.region, cell_type);
    context.queue.push(task.clone());
    Ok(task)
}
