//! Pulling side of the catch-up protocol.

use super::{CatchupRequest, TransactionBatch};
use crate::config::CatchupConfig;
use crate::error::{CatchupError, CatchupResult};
use crate::monitor::Monitors;
use crate::proto::catchup_service_client::CatchupServiceClient;
use crate::proto::{PullRequest, StoreInfoRequest};
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tonic::transport::{Channel, Endpoint};

/// What a completed catch-up run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchupStats {
    /// Pull requests issued. Zero when the store was already current.
    pub rounds: u64,
    /// Transactions pulled and applied.
    pub transactions_applied: u64,
}

/// Pulls missing transactions from a single upstream peer until the local
/// store has caught up with it.
///
/// Each round asks the upstream for its identity, computes the local gap,
/// and closes it with one pull request. Transient failures are retried with
/// exponential backoff; the retry budget resets whenever a round makes
/// progress, so a flaky link fails catch-up only when it stops all progress.
pub struct CatchupClient {
    store: Arc<Store>,
    upstream: String,
    config: CatchupConfig,
    monitors: Monitors,
    channel: Option<Channel>,
}

/// Outcome of one catch-up round.
enum Round {
    /// The local store matches the upstream; nothing was pulled.
    CaughtUp,
    /// One pull request was issued and this many transactions were applied.
    Pulled(u64),
}

impl CatchupClient {
    /// Create a client pulling into `store` from the peer at `upstream`.
    pub fn new(
        store: Arc<Store>,
        upstream: impl Into<String>,
        config: CatchupConfig,
        monitors: Monitors,
    ) -> Self {
        Self {
            store,
            upstream: upstream.into(),
            config,
            monitors,
            channel: None,
        }
    }

    /// Run catch-up to completion.
    ///
    /// Returns once the local store's last applied transaction matches the
    /// upstream's, or with an error when the retry budget is exhausted or a
    /// non-retryable failure occurs. Flipping `shutdown` to `true` aborts
    /// with [`CatchupError::Cancelled`]; durable state stays consistent at
    /// whatever batch boundary the abort landed on.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> CatchupResult<CatchupStats> {
        let mut stats = CatchupStats::default();
        let mut attempts: u32 = 0;
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);

        loop {
            if *shutdown.borrow() {
                return Err(CatchupError::Cancelled);
            }

            match self.round(&mut shutdown).await {
                Ok(Round::CaughtUp) => {
                    tracing::info!(
                        upstream = %self.upstream,
                        rounds = stats.rounds,
                        applied = stats.transactions_applied,
                        "caught up with upstream"
                    );
                    return Ok(stats);
                }
                Ok(Round::Pulled(applied)) => {
                    stats.rounds += 1;
                    stats.transactions_applied += applied;
                    // Progress resets the retry budget.
                    attempts = 0;
                    backoff = Duration::from_millis(self.config.initial_backoff_ms);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    // A stale connection is the most common transient cause;
                    // reconnect on the next attempt.
                    self.channel = None;

                    attempts += 1;
                    if attempts >= self.config.max_retries {
                        return Err(CatchupError::CatchupFailed {
                            attempts,
                            last_error: err.to_string(),
                        });
                    }

                    tracing::debug!(
                        upstream = %self.upstream,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "catch-up round failed, retrying"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return Err(CatchupError::Cancelled);
                            }
                        }
                    }

                    backoff = (backoff * 2).min(Duration::from_millis(self.config.max_backoff_ms));
                }
            }
        }
    }

    /// One round: learn the upstream's position, close the gap with a single
    /// pull request.
    async fn round(&mut self, shutdown: &mut watch::Receiver<bool>) -> CatchupResult<Round> {
        let channel = self.connect().await?;
        let mut rpc = CatchupServiceClient::new(channel);

        let reply = rpc.store_info(StoreInfoRequest {}).await?.into_inner();
        let upstream: crate::identity::StoreIdentity = serde_json::from_slice(&reply.data)?;

        let local = self.store.identity().await;
        if local.store_id != upstream.store_id {
            return Err(CatchupError::StoreMismatch {
                upstream: upstream.store_id,
            });
        }

        if local.last_applied_tx >= upstream.last_applied_tx {
            return Ok(Round::CaughtUp);
        }

        let from_tx = local.last_applied_tx + 1;
        tracing::debug!(
            upstream = %self.upstream,
            from_tx = from_tx,
            upstream_last = upstream.last_applied_tx,
            "pulling transactions"
        );

        self.monitors.tx_pull_request(from_tx);

        let request = CatchupRequest {
            store_id: local.store_id,
            from_tx,
        };
        let data = serde_json::to_vec(&request)?;
        let mut stream = rpc
            .pull_transactions(PullRequest { data })
            .await
            .map_err(|status| at_tx(status, from_tx))?
            .into_inner();

        let mut applied: u64 = 0;
        loop {
            let reply = tokio::select! {
                next = stream.next() => next,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Err(CatchupError::Cancelled);
                    }
                    continue;
                }
            };

            let reply = match reply {
                Some(reply) => reply.map_err(|status| at_tx(status, from_tx))?,
                None => break,
            };

            let batch: TransactionBatch = serde_json::from_slice(&reply.data)?;
            if batch.transactions.is_empty() {
                continue;
            }

            self.store.apply_batch(&batch.transactions).await?;
            for tx in &batch.transactions {
                self.monitors.tx_pull_response(tx.tx_id);
            }
            applied += batch.transactions.len() as u64;
        }

        Ok(Round::Pulled(applied))
    }

    /// Get or create the connection to the upstream.
    async fn connect(&mut self) -> CatchupResult<Channel> {
        if let Some(channel) = &self.channel {
            return Ok(channel.clone());
        }

        let endpoint = Endpoint::from_shared(format!("http://{}", self.upstream))?
            .connect_timeout(Duration::from_secs(5));
        let channel = endpoint.connect().await?;
        self.channel = Some(channel.clone());
        Ok(channel)
    }
}

/// Attach the requested transaction id where the generic status mapping
/// cannot know it.
fn at_tx(status: tonic::Status, from_tx: crate::identity::TxId) -> CatchupError {
    match CatchupError::from(status) {
        CatchupError::RangeUnavailable { .. } => CatchupError::RangeUnavailable {
            requested: from_tx,
        },
        other => other,
    }
}
