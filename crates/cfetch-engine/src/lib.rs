//! # cfetch-engine
//!
//! Concurrent fetch → decrypt → dedup pipeline.
//!
//! ```text
//!            ┌──────────── FETCH workers ────────────┐
//! seed ────► │ ContainerFetcher::fetch (blocking I/O) │ ── Move ──┐
//!            └────────────────────────────────────────┘          │
//!                 ▲ Requeue / Move(FETCH) on retry               ▼
//!            ┌──────────── DECODE_WRITE workers ─────────────────────┐
//!            │ decrypt_container → DedupStore::put → process         │
//!            │                         │                             │
//!            │                         └─► Delivery::completed       │
//!            └───────────────────────────────────────────────────────┘
//! ```
//!
//! Permanent per-container failures go to [`Delivery::failed`]. A fatal
//! error stops every job at its next transition; the driver then reports all
//! remaining signatures as failed.

mod delivery;
mod engine;
mod error;
mod fatal;
mod fetch;
pub mod job;
mod stats;

pub use delivery::Delivery;
pub use engine::{Engine, EngineConfig, RunReport};
pub use error::{is_retryable_io, EngineError, FatalError, FetchError, JobError, Result};
pub use fatal::FatalCell;
pub use fetch::{ContainerFetcher, MirrorFetcher};
pub use job::RetryPolicy;
pub use stats::RunStats;
