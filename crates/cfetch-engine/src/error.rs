use std::io;

use cfetch_cas::{ContainerId, DecodeError, RegistryError};
use cfetch_pool::PoolError;
use thiserror::Error;

/// What a [`ContainerFetcher`](crate::ContainerFetcher) can report.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Unreachable(_) => true,
            FetchError::Unauthorized(_) => false,
            FetchError::Io(e) => is_retryable_io(e),
        }
    }
}

/// I/O failures that describe a flaky connection rather than a broken request.
pub fn is_retryable_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
    )
}

/// Run-wide failure. The first one recorded stops every job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    #[error("fetching {container} failed: {message}")]
    Fetch { container: String, message: String },

    #[error("{count} unauthorized responses reached the limit of {limit}")]
    UnauthorizedLimit { count: u32, limit: u32 },
}

/// One entry in a job's error history.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    #[error("fatal: {0}")]
    Fatal(FatalError),
}

impl JobError {
    /// Classify a fetch failure for `container`.
    pub fn from_fetch(err: FetchError, container: &ContainerId) -> Self {
        if err.is_transient() {
            return JobError::Transient(err.to_string());
        }
        match err {
            FetchError::Unauthorized(msg) => JobError::Unauthorized(msg),
            other => JobError::Fatal(FatalError::Fetch {
                container: container.label(),
                message: other.to_string(),
            }),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("scheduler contract violated: {0}")]
    Scheduler(#[from] PoolError),

    #[error("invalid authorization result: {0}")]
    Registry(#[from] RegistryError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("worker thread {0} panicked")]
    WorkerPanicked(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
