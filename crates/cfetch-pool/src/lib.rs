//! # cfetch-pool
//!
//! Blocking work scheduler with two FIFO tracks, one per pipeline stage.
//!
//! ```text
//!            acquire(FETCH)                acquire(DECODE_WRITE)
//! FETCH ───► worker ── Move(DECODE_WRITE) ─► DECODE_WRITE ───► worker ── Dispose
//!   ▲                                                            │
//!   └──────────────────── Move(FETCH) on retry ──────────────────┘
//! ```
//!
//! Workers block on a per-track condition variable until work arrives or the
//! whole set is depleted: every queue empty and nothing checked out. Depletion
//! is detected on the release that disposes the last item, which wakes every
//! waiter on every track so idle workers can exit.

mod pools;
mod track;

pub use pools::{Disposition, PoolError, PoolOptions, PoolStats, WorkPools};
pub use track::Track;
