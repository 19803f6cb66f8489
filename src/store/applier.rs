//! Atomic application of transaction batches.
//!
//! A batch is applied all-or-nothing:
//!
//! 1. The batch must continue exactly at `last_applied_tx + 1` with no gaps.
//! 2. The whole batch is appended to the log (rolled back on failure).
//! 3. The advanced marker is durably recorded; only then is the in-memory
//!    state mutated and the identity advanced.
//!
//! On any failure the marker is unchanged and no partial effects are
//! visible, so the caller can safely retry from the same transaction id.
//! A crash between steps 2 and 3 leaves a log tail beyond the marker,
//! which [`super::Store::open_or_create`] discards on the next open.

use super::log::Transaction;
use super::StoreInner;
use crate::error::StoreError;
use crate::identity::TxId;

/// Apply a contiguous batch to the store internals.
///
/// Returns the new last applied transaction id. The caller holds the
/// store's exclusive write lock.
pub(crate) fn apply_contiguous(
    inner: &mut StoreInner,
    txs: &[Transaction],
) -> Result<TxId, StoreError> {
    let previous = inner.identity.last_applied_tx;
    if txs.is_empty() {
        return Ok(previous);
    }

    // Reject any batch that does not continue exactly where we left off.
    let mut expected = previous + 1;
    for tx in txs {
        if tx.tx_id != expected {
            return Err(StoreError::NonContiguous {
                expected,
                found: tx.tx_id,
            });
        }
        expected += 1;
    }

    let last = txs[txs.len() - 1].tx_id;

    inner.log.append_batch(txs)?;

    if let Err(e) = inner.marker.append(last) {
        // The marker did not advance; drop the appended tail so the log
        // matches the durable state again.
        let _ = inner.log.truncate_after(previous);
        return Err(e.into());
    }

    for tx in txs {
        inner.state.apply(&tx.command);
    }
    inner.identity.last_applied_tx = last;

    tracing::debug!(first = txs[0].tx_id, last, "applied transaction batch");
    Ok(last)
}
