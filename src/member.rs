//! A running cluster member: store, catch-up server, and catch-up driver.

use crate::catchup::{CatchupClient, CatchupServer, CatchupStats};
use crate::cluster::ClusterContext;
use crate::command::StoreCommand;
use crate::config::MemberConfig;
use crate::error::{CatchupError, CatchupResult, SeedError, SeedResult, StoreError};
use crate::identity::{StoreIdentity, TxId};
use crate::monitor::Monitors;
use crate::proto::catchup_service_server::CatchupServiceServer;
use crate::seed;
use crate::store::{DbRepresentation, Store};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

/// The member's position in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    /// Accepts writes; other members catch up from it.
    Leader,
    /// Caught up and serving.
    Follower,
    /// Behind its upstream; not yet serving reads.
    CatchingUp,
}

/// A started member.
///
/// Startup opens (or seeds) the store, gates on identity compatibility with
/// the cluster, and mounts the catch-up server. Catch-up itself is driven
/// explicitly through [`ClusterMember::catch_up`]; a member with no upstream
/// is the leader and never pulls.
pub struct ClusterMember {
    config: MemberConfig,
    store: Arc<Store>,
    monitors: Monitors,
    role: parking_lot::RwLock<MemberRole>,
    server_shutdown: Option<oneshot::Sender<()>>,
    catchup_shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for ClusterMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterMember")
            .field("role", &*self.role.read())
            .finish_non_exhaustive()
    }
}

impl ClusterMember {
    /// Start a member from its store directory.
    ///
    /// The store directory may be empty (a fresh member), seeded from a
    /// snapshot, or left over from a previous run; all three open the same
    /// way. Fails without side effects when the store's identity is
    /// incompatible with the cluster.
    pub async fn start(
        config: MemberConfig,
        cluster: &ClusterContext,
        monitors: Monitors,
    ) -> SeedResult<Self> {
        config.validate().map_err(SeedError::Config)?;

        let store = Arc::new(Store::open_or_create(&config.store_dir)?);
        let identity = store.identity().await;
        seed::verify(&identity, cluster)?;

        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .map_err(|e| SeedError::Config(format!("Invalid listen_addr: {}", e)))?;

        // Bind before spawning so peers connecting right after start never
        // race the listener.
        let listener = TcpListener::bind(addr).await?;

        let service =
            CatchupServer::new(store.clone(), config.catchup.max_batch_size);
        let (server_shutdown, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let result = Server::builder()
                .add_service(CatchupServiceServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    shutdown_rx.await.ok();
                })
                .await;
            if let Err(e) = result {
                tracing::error!("Catch-up server error: {}", e);
            }
        });

        let role = if config.upstream_addr.is_none() {
            MemberRole::Leader
        } else {
            MemberRole::CatchingUp
        };

        tracing::info!(
            member_id = config.member_id,
            listen_addr = %config.listen_addr,
            store_id = %identity.store_id,
            last_applied_tx = identity.last_applied_tx,
            role = ?role,
            "member started"
        );

        let (catchup_shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            monitors,
            role: parking_lot::RwLock::new(role),
            server_shutdown: Some(server_shutdown),
            catchup_shutdown,
        })
    }

    /// Pull missing transactions from the configured upstream until this
    /// member matches it.
    ///
    /// Becomes a follower on success. A member that is already current
    /// issues no pull requests at all.
    pub async fn catch_up(&self) -> CatchupResult<CatchupStats> {
        let upstream = self
            .config
            .upstream_addr
            .clone()
            .ok_or(CatchupError::NoUpstream)?;

        *self.role.write() = MemberRole::CatchingUp;

        let mut client = CatchupClient::new(
            self.store.clone(),
            upstream,
            self.config.catchup.clone(),
            self.monitors.clone(),
        );
        let stats = client.run(self.catchup_shutdown.subscribe()).await?;

        *self.role.write() = MemberRole::Follower;
        Ok(stats)
    }

    /// Append and apply a command as the next transaction.
    pub async fn commit(&self, command: StoreCommand) -> Result<TxId, StoreError> {
        self.store.commit(command).await
    }

    /// The member's store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The member's configuration.
    pub fn config(&self) -> &MemberConfig {
        &self.config
    }

    /// Current role.
    pub fn role(&self) -> MemberRole {
        *self.role.read()
    }

    /// Current store identity.
    pub async fn identity(&self) -> StoreIdentity {
        self.store.identity().await
    }

    /// Highest durably applied transaction id.
    pub async fn last_applied_tx(&self) -> TxId {
        self.store.last_applied_tx().await
    }

    /// Canonical representation of the applied data.
    pub async fn representation(&self) -> DbRepresentation {
        self.store.representation().await
    }

    /// Stop the catch-up server and abort any in-flight catch-up.
    pub fn shutdown(&mut self) {
        let _ = self.catchup_shutdown.send(true);
        if let Some(tx) = self.server_shutdown.take() {
            let _ = tx.send(());
            tracing::info!(member_id = self.config.member_id, "member stopped");
        }
    }
}

impl Drop for ClusterMember {
    fn drop(&mut self) {
        self.shutdown();
    }
}
