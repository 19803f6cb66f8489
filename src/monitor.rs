//! Observability hooks for seeding and catch-up.
//!
//! The core never counts anything itself; it reports events through these
//! interfaces and the caller decides what to record. Tests use the counting
//! implementations below to prove the two load-bearing properties: a
//! correctly seeded member copies zero files during catch-up, and the number
//! of pull requests is bounded by the gap, not by the transaction count.
//!
//! Monitors are scoped: create them per member or per scenario and read them
//! afterwards. There is no process-wide registry.

use crate::identity::TxId;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Observer of file copy activity during snapshot placement.
pub trait FileCopyMonitor: Send + Sync {
    /// Called once per file actually copied into a store directory.
    ///
    /// Not called for files that were already present with identical
    /// content; the absence of calls during a reseed is the observable
    /// proof that no wasteful copying happened.
    fn copy_file(&self, file: &Path);
}

/// Observer of catch-up pull traffic, from the pulling member's side.
pub trait PullRequestMonitor: Send + Sync {
    /// Called once per pull request issued.
    fn tx_pull_request(&self, tx_id: TxId);

    /// Called once per transaction applied from a pull response.
    fn tx_pull_response(&self, tx_id: TxId);
}

/// Default observer that ignores everything.
struct NoopMonitor;

impl FileCopyMonitor for NoopMonitor {
    fn copy_file(&self, _file: &Path) {}
}

impl PullRequestMonitor for NoopMonitor {
    fn tx_pull_request(&self, _tx_id: TxId) {}
    fn tx_pull_response(&self, _tx_id: TxId) {}
}

/// Injectable bundle of observers, cloned into the components that emit
/// events. Defaults to no-ops.
#[derive(Clone)]
pub struct Monitors {
    file_copy: Arc<dyn FileCopyMonitor>,
    pull: Arc<dyn PullRequestMonitor>,
}

impl Monitors {
    /// Create a monitor bundle with no-op observers.
    pub fn new() -> Self {
        Self {
            file_copy: Arc::new(NoopMonitor),
            pull: Arc::new(NoopMonitor),
        }
    }

    /// Replace the file copy observer.
    pub fn with_file_copy(mut self, monitor: Arc<dyn FileCopyMonitor>) -> Self {
        self.file_copy = monitor;
        self
    }

    /// Replace the pull request observer.
    pub fn with_pull(mut self, monitor: Arc<dyn PullRequestMonitor>) -> Self {
        self.pull = monitor;
        self
    }

    /// Report a file copy.
    pub fn copy_file(&self, file: &Path) {
        self.file_copy.copy_file(file);
    }

    /// Report an issued pull request.
    pub fn tx_pull_request(&self, tx_id: TxId) {
        self.pull.tx_pull_request(tx_id);
    }

    /// Report an applied transaction from a pull response.
    pub fn tx_pull_response(&self, tx_id: TxId) {
        self.pull.tx_pull_response(tx_id);
    }
}

impl Default for Monitors {
    fn default() -> Self {
        Self::new()
    }
}

/// File copy observer that remembers whether any copy happened.
#[derive(Debug, Default)]
pub struct FileCopyDetector {
    detected: AtomicBool,
    copies: AtomicU64,
}

impl FileCopyDetector {
    /// Create a fresh detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether at least one file copy was reported.
    pub fn detected(&self) -> bool {
        self.detected.load(Ordering::SeqCst)
    }

    /// Number of file copies reported.
    pub fn copies(&self) -> u64 {
        self.copies.load(Ordering::SeqCst)
    }
}

impl FileCopyMonitor for FileCopyDetector {
    fn copy_file(&self, _file: &Path) {
        self.detected.store(true, Ordering::SeqCst);
        self.copies.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pull traffic observer backed by atomic counters.
#[derive(Debug, Default)]
pub struct PullRequestCounter {
    requests: AtomicU64,
    last_requested: AtomicU64,
    last_received: AtomicU64,
}

impl PullRequestCounter {
    /// Create a fresh counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pull requests issued.
    pub fn number_of_requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Transaction id of the most recent pull request.
    pub fn last_requested_tx(&self) -> TxId {
        self.last_requested.load(Ordering::SeqCst)
    }

    /// Transaction id of the most recently applied pulled transaction.
    pub fn last_received_tx(&self) -> TxId {
        self.last_received.load(Ordering::SeqCst)
    }
}

impl PullRequestMonitor for PullRequestCounter {
    fn tx_pull_request(&self, tx_id: TxId) {
        self.last_requested.store(tx_id, Ordering::SeqCst);
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn tx_pull_response(&self, tx_id: TxId) {
        self.last_received.store(tx_id, Ordering::SeqCst);
    }
}
