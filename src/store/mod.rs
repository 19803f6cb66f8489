//! A member's store: durable transaction log plus the state derived from it.
//!
//! ## Module Structure
//!
//! - `log`: segmented NDJSON transaction log
//! - `state`: in-memory key-value state and the comparison representation
//! - `applier`: atomic batch application and the durable applied marker

mod applier;
mod log;
mod state;

pub use log::{Transaction, TransactionLog, SEGMENT_MAX_ENTRIES};
pub use state::{DbRepresentation, StoreState};

use crate::command::StoreCommand;
use crate::error::StoreError;
use crate::identity::{MarkerFile, StoreId, StoreIdentity, TxId};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// A store directory opened for serving.
///
/// Writers (the transaction applier) take the write lock for the duration
/// of a batch; readers (the catch-up server, queries) share the read lock
/// and never block each other.
pub struct Store {
    dir: PathBuf,
    inner: RwLock<StoreInner>,
}

/// Mutable store internals, guarded by the store-level lock.
pub(crate) struct StoreInner {
    pub(crate) log: TransactionLog,
    pub(crate) state: StoreState,
    pub(crate) identity: StoreIdentity,
    pub(crate) marker: MarkerFile,
}

impl Store {
    /// Open an existing store directory, or create a fresh empty store with
    /// a new identity when the directory is absent or empty.
    ///
    /// Opening an existing store replays the log into memory. A log tail
    /// beyond the durable applied marker (crash between log append and
    /// marker update) is discarded before replay, so partially applied
    /// batches are never visible.
    pub fn open_or_create(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;

        let identity = match StoreIdentity::load(dir)? {
            Some(identity) => identity,
            None => {
                if fs::read_dir(dir)?.next().is_some() {
                    return Err(StoreError::MissingIdentity {
                        path: dir.to_path_buf(),
                    });
                }
                let store_id = StoreId::new();
                StoreIdentity::create(dir, store_id)?;
                StoreIdentity::new(store_id)
            }
        };

        let mut log = TransactionLog::open(dir)?;

        if log.horizon() > 1 {
            return Err(StoreError::Pruned {
                horizon: log.horizon(),
            });
        }
        if identity.last_applied_tx > log.last_tx() {
            return Err(StoreError::MarkerBeyondLog {
                log_last: log.last_tx(),
                marker: identity.last_applied_tx,
            });
        }
        if identity.last_applied_tx < log.last_tx() {
            tracing::debug!(
                marker = identity.last_applied_tx,
                log_last = log.last_tx(),
                "discarding log tail beyond durable marker"
            );
            log.truncate_after(identity.last_applied_tx)?;
        }

        let mut state = StoreState::default();
        for tx in log.read_from(1, usize::MAX) {
            state.apply(&tx.command);
        }

        let marker = MarkerFile::open(dir)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: RwLock::new(StoreInner {
                log,
                state,
                identity,
                marker,
            }),
        })
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current store identity (id plus last applied transaction).
    pub async fn identity(&self) -> StoreIdentity {
        self.inner.read().await.identity
    }

    /// Highest durably applied transaction id.
    pub async fn last_applied_tx(&self) -> TxId {
        self.inner.read().await.identity.last_applied_tx
    }

    /// Smallest transaction id still retained in the log.
    pub async fn horizon(&self) -> TxId {
        self.inner.read().await.log.horizon()
    }

    /// Read up to `limit` transactions starting at `from`.
    pub async fn read_from(&self, from: TxId, limit: usize) -> Vec<Transaction> {
        self.inner.read().await.log.read_from(from, limit)
    }

    /// Look up a key in the applied state.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.read().await.state.get(key).map(str::to_string)
    }

    /// Canonical representation of the applied data for cross-member
    /// comparison.
    pub async fn representation(&self) -> DbRepresentation {
        let inner = self.inner.read().await;
        inner.state.representation(inner.identity.last_applied_tx)
    }

    /// Drop retained log entries up to and including `up_to`.
    ///
    /// Pure retention: the applied state and marker are untouched. Catch-up
    /// requests below the new horizon are answered with a range-unavailable
    /// error from then on.
    pub async fn prune(&self, up_to: TxId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.log.prune(up_to)?;
        Ok(())
    }

    /// Replay a store directory offline into a comparison representation,
    /// without opening it for serving.
    ///
    /// Works on snapshots as well as stopped members; only transactions
    /// covered by the durable marker are replayed.
    pub fn representation_of(dir: &Path) -> Result<DbRepresentation, StoreError> {
        let identity = StoreIdentity::load(dir)?.ok_or_else(|| StoreError::MissingIdentity {
            path: dir.to_path_buf(),
        })?;

        let log = TransactionLog::open(dir)?;
        let mut state = StoreState::default();
        for tx in log.read_from(1, usize::MAX) {
            if tx.tx_id > identity.last_applied_tx {
                break;
            }
            state.apply(&tx.command);
        }

        Ok(state.representation(identity.last_applied_tx))
    }
}

/// Convenience constructor used by tests and callers that commit locally.
impl Store {
    /// Append and apply a single command as the next transaction.
    pub async fn commit(&self, command: StoreCommand) -> Result<TxId, StoreError> {
        let mut inner = self.inner.write().await;
        let next = inner.identity.last_applied_tx + 1;
        let tx = Transaction {
            tx_id: next,
            command,
        };
        applier::apply_contiguous(&mut inner, &[tx])
    }

    /// Atomically apply a contiguous batch of transactions.
    ///
    /// See [`applier`] for the contiguity and durability contract.
    pub async fn apply_batch(&self, txs: &[Transaction]) -> Result<TxId, StoreError> {
        let mut inner = self.inner.write().await;
        applier::apply_contiguous(&mut inner, txs)
    }
}
