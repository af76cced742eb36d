use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

use crate::track::Track;

/// What to do with an item when it is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum Disposition<T> {
    /// Enqueue at the tail of the track it was acquired from
    Requeue(T),
    /// Enqueue at the tail of another (or the same) track
    Move(Track, T),
    /// Drop it; may complete depletion
    Dispose,
}

/// Scheduler construction options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolOptions {
    /// Hand the lock to the longest waiting thread on every release
    pub fair: bool,
}

/// Contract violations. Job-level failures never surface here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("release on {track} without a matching acquire")]
    ReleaseWithoutAcquire { track: Track },
}

/// Snapshot of scheduler occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub fetch_queued: usize,
    pub decode_queued: usize,
    pub in_flight: usize,
    pub depleted: bool,
    pub aborted: bool,
}

struct State<T> {
    queues: [VecDeque<T>; 2],
    in_flight: usize,
    depleted: bool,
    aborted: bool,
}

impl<T> State<T> {
    fn all_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }
}

/// Two-track work queue set with blocking acquire and depletion detection.
///
/// Every item returned by [`acquire`](Self::acquire) must be handed back with
/// exactly one [`release`](Self::release). Dropping an acquired item without
/// releasing it leaves the in-flight count raised forever and the set can
/// never deplete.
pub struct WorkPools<T> {
    state: Mutex<State<T>>,
    ready: [Condvar; 2],
    options: PoolOptions,
}

impl<T> WorkPools<T> {
    /// Create a pool set holding `items`, with default options.
    pub fn seed<I>(items: I) -> Self
    where
        I: IntoIterator<Item = (Track, T)>,
    {
        Self::seed_with(items, PoolOptions::default())
    }

    /// Create a pool set holding `items`.
    ///
    /// With no items at all the set starts depleted, so `acquire` never blocks.
    pub fn seed_with<I>(items: I, options: PoolOptions) -> Self
    where
        I: IntoIterator<Item = (Track, T)>,
    {
        let mut queues = [VecDeque::new(), VecDeque::new()];
        for (track, item) in items {
            queues[track.slot()].push_back(item);
        }
        let depleted = queues.iter().all(VecDeque::is_empty);
        if depleted {
            tracing::debug!("work pools seeded empty, depleted from the start");
        } else {
            tracing::debug!(
                fetch = queues[Track::Fetch.slot()].len(),
                decode_write = queues[Track::DecodeWrite.slot()].len(),
                "work pools seeded"
            );
        }
        Self {
            state: Mutex::new(State {
                queues,
                in_flight: 0,
                depleted,
                aborted: false,
            }),
            ready: [Condvar::new(), Condvar::new()],
            options,
        }
    }

    /// Block until an item is available on `track`.
    ///
    /// Returns `None` once the set is depleted, and keeps returning `None`
    /// without blocking from then on.
    pub fn acquire(&self, track: Track) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.depleted {
                return None;
            }
            if let Some(item) = state.queues[track.slot()].pop_front() {
                state.in_flight += 1;
                return Some(item);
            }
            self.ready[track.slot()].wait(&mut state);
        }
    }

    /// Hand back an item acquired from `track`.
    ///
    /// Returns whether the set is depleted after this release.
    pub fn release(&self, track: Track, disposition: Disposition<T>) -> Result<bool, PoolError> {
        let mut state = self.state.lock();
        if state.in_flight == 0 {
            return Err(PoolError::ReleaseWithoutAcquire { track });
        }
        state.in_flight -= 1;

        if state.aborted {
            // Work handed back after a forced stop is dropped
            return Ok(true);
        }

        match disposition {
            Disposition::Requeue(item) => self.enqueue(&mut state, track, item),
            Disposition::Move(target, item) => self.enqueue(&mut state, target, item),
            Disposition::Dispose => {
                if state.in_flight == 0 && state.all_empty() {
                    state.depleted = true;
                    tracing::debug!("work pools depleted");
                    for ready in &self.ready {
                        ready.notify_all();
                    }
                }
            }
        }

        let depleted = state.depleted;
        self.unlock(state);
        Ok(depleted)
    }

    /// Acquire from `track`, apply `f`, and release with its verdict.
    ///
    /// Returns whether the set is depleted; `true` also when there was no work.
    pub fn process<F>(&self, track: Track, f: F) -> Result<bool, PoolError>
    where
        F: FnOnce(T) -> Disposition<T>,
    {
        let Some(item) = self.acquire(track) else {
            return Ok(true);
        };
        let disposition = f(item);
        self.release(track, disposition)
    }

    /// Force the set into the depleted state, dropping everything queued.
    ///
    /// Blocked and future `acquire` calls return `None`. Items still checked
    /// out may be released afterwards; they are dropped. Returns how many
    /// queued items were discarded.
    pub fn abort(&self) -> usize {
        let mut state = self.state.lock();
        let dropped: usize = state.queues.iter().map(VecDeque::len).sum();
        for queue in state.queues.iter_mut() {
            queue.clear();
        }
        state.aborted = true;
        state.depleted = true;
        for ready in &self.ready {
            ready.notify_all();
        }
        tracing::debug!(dropped, in_flight = state.in_flight, "work pools aborted");
        dropped
    }

    pub fn is_depleted(&self) -> bool {
        self.state.lock().depleted
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            fetch_queued: state.queues[Track::Fetch.slot()].len(),
            decode_queued: state.queues[Track::DecodeWrite.slot()].len(),
            in_flight: state.in_flight,
            depleted: state.depleted,
            aborted: state.aborted,
        }
    }

    fn enqueue(&self, state: &mut State<T>, track: Track, item: T) {
        state.queues[track.slot()].push_back(item);
        self.ready[track.slot()].notify_one();
    }

    fn unlock(&self, guard: MutexGuard<'_, State<T>>) {
        if self.options.fair {
            MutexGuard::unlock_fair(guard);
        } else {
            drop(guard);
        }
    }
}
