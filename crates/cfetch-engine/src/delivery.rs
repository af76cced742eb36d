use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cfetch_cas::{Signature, SignatureWriter};
use parking_lot::RwLock;

/// Receiver of run results.
///
/// Called from worker threads, possibly concurrently. Each signature is
/// handed over at most once per run, either completed or failed.
pub trait Delivery: Send + Sync {
    fn completed(&self, writers: HashMap<Signature, SignatureWriter>);
    fn failed(&self, signatures: HashSet<Signature>);
}

/// Forwards to a [`Delivery`] until closed.
///
/// Signatures are resolved inside the gate: the store is only asked to
/// complete or fail signatures while the gate is open, and the result is
/// handed over under the same read guard. Closing waits for those sections,
/// so once [`close`](Self::close) returns the store's pending set is final and
/// nothing more reaches the inner delivery.
pub(crate) struct DeliveryGate {
    inner: Arc<dyn Delivery>,
    open: RwLock<bool>,
}

impl DeliveryGate {
    pub(crate) fn new(inner: Arc<dyn Delivery>) -> Self {
        Self {
            inner,
            open: RwLock::new(true),
        }
    }

    /// Run `resolve` and deliver what it completed.
    ///
    /// Returns `None` without calling `resolve` once the gate is closed.
    pub(crate) fn complete_with<F>(&self, resolve: F) -> Option<usize>
    where
        F: FnOnce() -> HashMap<Signature, SignatureWriter>,
    {
        let open = self.open.read();
        if !*open {
            return None;
        }
        let writers = resolve();
        let count = writers.len();
        if count > 0 {
            self.inner.completed(writers);
        }
        Some(count)
    }

    /// Run `resolve` and deliver what it failed.
    ///
    /// Returns `None` without calling `resolve` once the gate is closed.
    pub(crate) fn fail_with<F>(&self, resolve: F) -> Option<usize>
    where
        F: FnOnce() -> HashSet<Signature>,
    {
        let open = self.open.read();
        if !*open {
            return None;
        }
        let signatures = resolve();
        let count = signatures.len();
        if count > 0 {
            self.inner.failed(signatures);
        }
        Some(count)
    }

    pub(crate) fn close(&self) {
        *self.open.write() = false;
    }
}
