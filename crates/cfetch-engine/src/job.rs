//! Units of work and their transitions.
//!
//! A container enters as [`Job::Fetch`], becomes [`Job::DecodeWrite`] once its
//! bytes arrive, and leaves the scheduler when it is stored or permanently
//! failed. The retry count travels with the job across tracks, so a budget of
//! `R` allows `R + 1` attempts in total whether fetching or decoding failed.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cfetch_cas::{decrypt_container, ContainerRef, DedupStore};
use cfetch_config::{log_decode_warn, log_engine_error, log_fetch_debug, log_fetch_warn};
use cfetch_pool::{Disposition, Track};
use tracing::field::display;

use crate::delivery::{Delivery, DeliveryGate};
use crate::error::{FatalError, JobError};
use crate::fatal::FatalCell;
use crate::fetch::ContainerFetcher;
use crate::stats::RunCounters;

/// Retry budget and pacing shared by every job of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first re-fetch; doubles per retry
    pub delay: Duration,
    pub max_delay: Duration,
    /// Unauthorized responses tolerated run-wide before the run turns fatal
    pub unauthorized_limit: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            unauthorized_limit: None,
        }
    }
}

impl RetryPolicy {
    /// Sleep before re-fetching after `retries` failed attempts.
    pub fn backoff(&self, retries: u32) -> Duration {
        if retries == 0 || self.delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retries - 1).unwrap_or(u32::MAX);
        self.delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Per-container progress carried through every transition.
#[derive(Debug, Clone)]
pub struct JobState {
    pub container: ContainerRef,
    pub retries: u32,
    pub history: Vec<JobError>,
}

impl JobState {
    pub fn new(container: ContainerRef) -> Self {
        Self {
            container,
            retries: 0,
            history: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum Job {
    Fetch(JobState),
    /// Carries the encrypted payload fetched for the container
    DecodeWrite(JobState, Vec<u8>),
}

impl Job {
    pub fn fetch(container: ContainerRef) -> Self {
        Job::Fetch(JobState::new(container))
    }

    pub fn state(&self) -> &JobState {
        match self {
            Job::Fetch(state) | Job::DecodeWrite(state, _) => state,
        }
    }
}

/// Everything a job touches besides its own state.
pub struct JobContext {
    pub(crate) store: DedupStore,
    pub(crate) fetcher: Arc<dyn ContainerFetcher>,
    pub(crate) delivery: DeliveryGate,
    pub(crate) fatal: FatalCell,
    pub(crate) policy: RetryPolicy,
    pub(crate) counters: RunCounters,
}

impl JobContext {
    pub fn new(
        store: DedupStore,
        fetcher: Arc<dyn ContainerFetcher>,
        delivery: Arc<dyn Delivery>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            fetcher,
            delivery: DeliveryGate::new(delivery),
            fatal: FatalCell::new(),
            policy,
            counters: RunCounters::default(),
        }
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    pub fn fatal(&self) -> &FatalCell {
        &self.fatal
    }
}

/// Run one transition of `job` and say where it goes next.
pub fn step(job: Job, ctx: &JobContext) -> Disposition<Job> {
    match job {
        Job::Fetch(state) => run_fetch(state, ctx),
        Job::DecodeWrite(state, payload) => run_decode_write(state, payload, ctx),
    }
}

fn run_fetch(mut state: JobState, ctx: &JobContext) -> Disposition<Job> {
    if observe_fatal(&mut state, ctx) {
        return Disposition::Dispose;
    }
    let delay = ctx.policy.backoff(state.retries);
    if !delay.is_zero() {
        thread::sleep(delay);
        if observe_fatal(&mut state, ctx) {
            return Disposition::Dispose;
        }
    }

    ctx.counters.fetch_attempt();
    let err = match ctx.fetcher.fetch(&state.container) {
        Ok(bytes) => {
            log_fetch_debug!(
                "Container fetched",
                container = display(state.container.label()),
                bytes = bytes.len(),
                attempt = state.retries + 1,
            );
            ctx.counters.fetched(bytes.len());
            return Disposition::Move(Track::DecodeWrite, Job::DecodeWrite(state, bytes));
        }
        Err(err) => JobError::from_fetch(err, &state.container),
    };

    match err {
        JobError::Unauthorized(_) => {
            let count = ctx.counters.unauthorized();
            state.history.push(err);
            if let Some(limit) = ctx.policy.unauthorized_limit {
                if count >= limit {
                    raise_fatal(ctx, FatalError::UnauthorizedLimit { count, limit });
                }
            }
            fail_permanently(state, ctx)
        }
        JobError::Fatal(fatal) => {
            state.history.push(JobError::Fatal(fatal.clone()));
            raise_fatal(ctx, fatal);
            Disposition::Dispose
        }
        retryable => {
            retry_or_fail(state, retryable, ctx, |s| {
                ctx.counters.fetch_retry();
                Disposition::Requeue(Job::Fetch(s))
            })
        }
    }
}

fn run_decode_write(mut state: JobState, payload: Vec<u8>, ctx: &JobContext) -> Disposition<Job> {
    if observe_fatal(&mut state, ctx) {
        return Disposition::Dispose;
    }
    match decrypt_container(&state.container, &payload) {
        Ok(chunks) => {
            drop(payload);
            ctx.store.put(state.container.clone(), chunks);
            let delivered = ctx.delivery.complete_with(|| {
                let completed = ctx.store.process(&state.container);
                ctx.counters.completed(completed.len());
                completed
            });
            if delivered.is_none() {
                log_decode_warn!(
                    "Run closed before the container was processed",
                    container = display(state.container.label()),
                );
            }
            Disposition::Dispose
        }
        Err(e) => {
            log_decode_warn!(
                "Container failed to decode",
                container = display(state.container.label()),
                error = display(&e),
                attempt = state.retries + 1,
            );
            // The fetched bytes are dropped; the next attempt fetches afresh
            retry_or_fail(state, JobError::Decode(e), ctx, |s| {
                ctx.counters.decode_retry();
                Disposition::Move(Track::Fetch, Job::Fetch(s))
            })
        }
    }
}

fn observe_fatal(state: &mut JobState, ctx: &JobContext) -> bool {
    match ctx.fatal.get() {
        Some(fatal) => {
            state.history.push(JobError::Fatal(fatal.clone()));
            true
        }
        None => false,
    }
}

fn raise_fatal(ctx: &JobContext, fatal: FatalError) {
    let message = fatal.to_string();
    if ctx.fatal.set(fatal) {
        log_engine_error!("Run aborted", error = message.as_str());
    }
}

fn retry_or_fail<F>(
    mut state: JobState,
    err: JobError,
    ctx: &JobContext,
    again: F,
) -> Disposition<Job>
where
    F: FnOnce(JobState) -> Disposition<Job>,
{
    state.retries += 1;
    state.history.push(err);
    if state.retries > ctx.policy.max_retries {
        fail_permanently(state, ctx)
    } else {
        again(state)
    }
}

fn fail_permanently(state: JobState, ctx: &JobContext) -> Disposition<Job> {
    ctx.counters.container_failed();
    let failed = ctx.delivery.fail_with(|| {
        let failed = ctx.store.fail(&state.container);
        ctx.counters.failed(failed.len());
        failed
    });
    let last_error = state
        .history
        .last()
        .map(ToString::to_string)
        .unwrap_or_default();
    log_fetch_warn!(
        "Container permanently failed",
        container = display(state.container.label()),
        attempts = state.history.len(),
        signatures = failed.unwrap_or(0),
        last_error = display(last_error),
    );
    Disposition::Dispose
}
