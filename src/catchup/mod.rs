//! Transaction catch-up: pulling missing transactions from an upstream peer.
//!
//! The protocol is deliberately small. One unary RPC reports the upstream's
//! identity and last applied transaction, so the puller can compute its gap
//! without issuing a pull. One server-streaming RPC answers a single pull
//! request with every missing transaction, batched, so closing a gap of any
//! size costs exactly one request.
//!
//! ## Module Structure
//!
//! - `client`: the pulling side, with retry and backoff
//! - `server`: the serving side, mounted on a member's listen address

mod client;
mod server;

pub use client::{CatchupClient, CatchupStats};
pub use server::CatchupServer;

use crate::identity::{StoreId, TxId};
use crate::store::Transaction;
use serde::{Deserialize, Serialize};

/// Body of a pull request: which lineage, and from which transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CatchupRequest {
    /// Store lineage the puller belongs to. The server refuses to serve a
    /// different lineage.
    pub store_id: StoreId,
    /// First transaction id the puller is missing.
    pub from_tx: TxId,
}

/// One streamed batch of contiguous transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionBatch {
    /// Transactions in ascending, gap-free id order.
    pub transactions: Vec<Transaction>,
}
