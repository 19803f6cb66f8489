//! Serving side of the catch-up protocol.

use super::{CatchupRequest, TransactionBatch};
use crate::proto::catchup_service_server::CatchupService;
use crate::proto::{PullReply, PullRequest, StoreInfoReply, StoreInfoRequest};
use crate::store::Store;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

/// gRPC handler answering catch-up traffic out of a member's store.
///
/// Pull responses are streamed in batches read under short-lived read locks,
/// so serving a large gap never blocks concurrent commits for its full
/// duration. The upper bound of a pull is the store's last applied
/// transaction at request time; anything committed afterwards belongs to the
/// puller's next round.
pub struct CatchupServer {
    store: Arc<Store>,
    max_batch_size: usize,
}

impl CatchupServer {
    /// Create a handler serving from `store`.
    pub fn new(store: Arc<Store>, max_batch_size: usize) -> Self {
        Self {
            store,
            max_batch_size,
        }
    }
}

#[tonic::async_trait]
impl CatchupService for CatchupServer {
    async fn store_info(
        &self,
        _request: Request<StoreInfoRequest>,
    ) -> Result<Response<StoreInfoReply>, Status> {
        let identity = self.store.identity().await;
        let data = serde_json::to_vec(&identity)
            .map_err(|e| Status::internal(format!("Failed to serialize identity: {}", e)))?;
        Ok(Response::new(StoreInfoReply { data }))
    }

    type PullTransactionsStream = ReceiverStream<Result<PullReply, Status>>;

    async fn pull_transactions(
        &self,
        request: Request<PullRequest>,
    ) -> Result<Response<Self::PullTransactionsStream>, Status> {
        let req: CatchupRequest = serde_json::from_slice(&request.into_inner().data)
            .map_err(|e| Status::invalid_argument(format!("Invalid pull request: {}", e)))?;

        let identity = self.store.identity().await;
        if req.store_id != identity.store_id {
            return Err(Status::failed_precondition(format!(
                "store identity mismatch: serving {}, requested {}",
                identity.store_id, req.store_id
            )));
        }

        let horizon = self.store.horizon().await;
        if req.from_tx < horizon {
            return Err(Status::out_of_range(format!(
                "tx {} is below the retention horizon {}",
                req.from_tx, horizon
            )));
        }

        let upper = identity.last_applied_tx;
        if req.from_tx > upper + 1 {
            return Err(Status::invalid_argument(format!(
                "tx {} is beyond the last applied transaction {}",
                req.from_tx, upper
            )));
        }

        tracing::debug!(
            from_tx = req.from_tx,
            upper = upper,
            "serving pull request"
        );

        let (tx, rx) = mpsc::channel(4);
        let store = self.store.clone();
        let max_batch_size = self.max_batch_size;

        tokio::spawn(async move {
            let mut next = req.from_tx;
            while next <= upper {
                let remaining = (upper - next + 1) as usize;
                let limit = remaining.min(max_batch_size);
                let transactions = store.read_from(next, limit).await;
                if transactions.is_empty() {
                    // Pruned out from under the stream.
                    let _ = tx
                        .send(Err(Status::out_of_range(format!(
                            "tx {} no longer retained",
                            next
                        ))))
                        .await;
                    return;
                }

                next = transactions.last().map(|t| t.tx_id + 1).unwrap_or(next);

                let batch = TransactionBatch { transactions };
                let reply = match serde_json::to_vec(&batch) {
                    Ok(data) => Ok(PullReply { data }),
                    Err(e) => Err(Status::internal(format!(
                        "Failed to serialize batch: {}",
                        e
                    ))),
                };

                // Receiver gone means the puller hung up; stop quietly.
                if tx.send(reply).await.is_err() {
                    return;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
