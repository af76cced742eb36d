//! Run driver: seeds the scheduler, runs the workers, waits for depletion
//! or the deadline, and settles whatever is left.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cfetch_cas::{AuthorizedGroups, ChunkRegistry, DedupStore, Signature, StoreStats};
use cfetch_config::{log_engine_debug, log_engine_info, log_engine_warn, Config};
use cfetch_pool::{PoolError, PoolOptions, Track, WorkPools};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::field::display;
use tracing::instrument;

use crate::delivery::Delivery;
use crate::error::{EngineError, FatalError, Result};
use crate::fetch::ContainerFetcher;
use crate::job::{step, Job, JobContext, RetryPolicy};
use crate::stats::RunStats;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Workers bound to FETCH (at least one is always started)
    pub fetch_threads: usize,
    /// Workers bound to DECODE_WRITE (at least one is always started)
    pub decode_threads: usize,
    /// Wall-clock limit for the run; `None` waits for depletion
    pub timeout: Option<Duration>,
    pub fair_scheduling: bool,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            // Fetch workers mostly wait on the network
            fetch_threads: (cpus * 2).min(16),
            decode_threads: cpus,
            timeout: Some(Duration::from_secs(3600)),
            fair_scheduling: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Map the `[engine]` and `[retry]` sections; unset thread counts stay automatic.
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            fetch_threads: config
                .engine
                .fetch_threads
                .unwrap_or(defaults.fetch_threads)
                .max(1),
            decode_threads: config
                .engine
                .decode_threads
                .unwrap_or(defaults.decode_threads)
                .max(1),
            timeout: (config.engine.timeout_secs > 0)
                .then(|| Duration::from_secs(config.engine.timeout_secs)),
            fair_scheduling: config.engine.fair_scheduling,
            retry: RetryPolicy {
                max_retries: config.retry.max_retries,
                delay: Duration::from_millis(config.retry.retry_delay_ms),
                max_delay: Duration::from_millis(config.retry.retry_max_delay_ms),
                unauthorized_limit: config.retry.unauthorized_limit,
            },
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// False if the deadline passed before the scheduler depleted
    pub completed_within_timeout: bool,
    pub fatal: Option<FatalError>,
    pub stats: RunStats,
    pub store: StoreStats,
    /// Signatures neither completed nor failed; only non-empty after a timeout
    pub unresolved: Vec<Signature>,
    /// Jobs discarded from the queues by a timeout
    pub dropped_jobs: usize,
}

impl RunReport {
    /// Every signature was delivered and nothing went fatally wrong.
    pub fn is_clean(&self) -> bool {
        self.completed_within_timeout && self.fatal.is_none() && self.unresolved.is_empty()
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate `groups` and run them.
    pub fn run_groups(
        &self,
        groups: &AuthorizedGroups,
        fetcher: Arc<dyn ContainerFetcher>,
        delivery: Arc<dyn Delivery>,
    ) -> Result<RunReport> {
        let registry = ChunkRegistry::from_groups(groups)?;
        self.run(registry, fetcher, delivery)
    }

    /// Fetch, decode and reassemble every signature in `registry`.
    ///
    /// Blocks until the scheduler depletes or the timeout passes. On timeout
    /// the workers still busy are detached and no callback reaches `delivery`
    /// after this returns. After a fatal error every signature not yet
    /// delivered is reported through [`Delivery::failed`].
    #[instrument(skip_all, fields(signatures = registry.len()), level = "debug")]
    pub fn run(
        &self,
        registry: ChunkRegistry,
        fetcher: Arc<dyn ContainerFetcher>,
        delivery: Arc<dyn Delivery>,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let deadline = self.config.timeout.and_then(|t| started.checked_add(t));
        let ctx = Arc::new(JobContext::new(
            DedupStore::new(registry),
            fetcher,
            delivery,
            self.config.retry.clone(),
        ));

        ctx.delivery.complete_with(|| {
            let empty = ctx.store.take_empty();
            ctx.counters.completed(empty.len());
            empty
        });

        let containers = ctx.store.containers();
        log_engine_info!(
            "Run started",
            containers = containers.len(),
            signatures = ctx.store.stats().pending_signatures,
            fetch_threads = self.config.fetch_threads,
            decode_threads = self.config.decode_threads,
        );
        let pools = Arc::new(WorkPools::seed_with(
            containers.into_iter().map(|c| (Track::Fetch, Job::fetch(c))),
            PoolOptions {
                fair: self.config.fair_scheduling,
            },
        ));

        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let mut workers =
            Vec::with_capacity(self.config.fetch_threads + self.config.decode_threads);
        for track in Track::ALL {
            let count = match track {
                Track::Fetch => self.config.fetch_threads,
                Track::DecodeWrite => self.config.decode_threads,
            };
            for i in 0..count.max(1) {
                let worker_pools = pools.clone();
                let worker_ctx = ctx.clone();
                // Each worker holds a sender; the channel disconnects when the last one exits
                let done = done_tx.clone();
                let name = format!("cfetch-{}-{}", track.name().to_ascii_lowercase(), i);
                let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                    let _done = done;
                    worker_loop(track, &worker_pools, &worker_ctx)
                });
                match spawned {
                    Ok(handle) => workers.push((name, handle)),
                    Err(e) => {
                        pools.abort();
                        ctx.delivery.close();
                        return Err(EngineError::Spawn(e));
                    }
                }
            }
        }
        drop(done_tx);

        let finished = wait_for_workers(&done_rx, deadline);
        let mut dropped_jobs = 0;
        if finished {
            join_workers(workers)?;
        } else {
            ctx.delivery.close();
            dropped_jobs = pools.abort();
            log_engine_warn!(
                "Run timed out, detaching workers",
                dropped_jobs = dropped_jobs,
                in_flight = pools.stats().in_flight,
            );
            // Dropping the handles detaches the threads
            drop(workers);
        }

        let fatal = ctx.fatal.get().cloned();
        if finished && fatal.is_some() {
            ctx.delivery.fail_with(|| {
                let abandoned = ctx.store.abandon_all();
                ctx.counters.failed(abandoned.len());
                abandoned
            });
        }
        ctx.delivery.close();

        // Detached workers can no longer resolve anything once the gate is closed
        let unresolved = ctx.store.unresolved();
        let store = ctx.store.stats();
        let stats = ctx.counters.snapshot(started.elapsed());
        log_engine_info!(
            "Run finished",
            completed = stats.signatures_completed,
            failed = stats.signatures_failed,
            unresolved = unresolved.len(),
            containers_fetched = stats.containers_fetched,
            containers_failed = stats.containers_failed,
            bytes_fetched = stats.bytes_fetched,
            fetch_retries = stats.fetch_retries,
            decode_retries = stats.decode_retries,
            peak_bytes_held = store.peak_bytes_held,
            duration_ms = stats.duration.as_millis() as u64,
        );
        if let Some(fatal) = &fatal {
            log_engine_warn!("Run ended on a fatal error", error = display(fatal));
        }

        Ok(RunReport {
            completed_within_timeout: finished,
            fatal,
            stats,
            store,
            unresolved,
            dropped_jobs,
        })
    }
}

fn worker_loop(
    track: Track,
    pools: &WorkPools<Job>,
    ctx: &JobContext,
) -> std::result::Result<(), PoolError> {
    let mut handled = 0u64;
    while !pools.process(track, |job| {
        handled += 1;
        step(job, ctx)
    })? {}
    log_engine_debug!("Worker exiting", track = track.name(), handled = handled);
    Ok(())
}

/// Wait until every worker dropped its sender. Returns false on deadline.
fn wait_for_workers(done: &Receiver<()>, deadline: Option<Instant>) -> bool {
    loop {
        let received = match deadline {
            Some(deadline) => done.recv_deadline(deadline),
            None => done.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(()) => continue,
            Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => return false,
        }
    }
}

type Worker = (String, JoinHandle<std::result::Result<(), PoolError>>);

fn join_workers(workers: Vec<Worker>) -> Result<()> {
    let mut first_error = None;
    for (name, handle) in workers {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                first_error.get_or_insert(EngineError::Scheduler(e));
            }
            Err(_) => {
                first_error.get_or_insert(EngineError::WorkerPanicked(name));
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}
