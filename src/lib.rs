//! # Seedling
//!
//! Snapshot seeding and transaction catch-up for a replicated key-value
//! store. A new or restored member is seeded offline by placing a snapshot's
//! files into its store directory, then closes the remaining gap by pulling
//! the transactions committed since the snapshot from an upstream peer.
//!
//! Two properties anchor the design: a correctly seeded member never copies
//! store files again during catch-up (file identities are preserved), and
//! closing a gap costs one pull request regardless of how many transactions
//! it spans.
//!
//! ## Modules
//!
//! - [`seed`]: snapshot placement and the startup identity gate
//! - [`store`]: durable transaction log and derived state
//! - [`catchup`]: the pull protocol, client and server side
//! - [`member`]: a running member tying the pieces together
//! - [`monitor`]: observability hooks for copies and pull traffic
//!
//! ## Example
//!
//! ```rust,no_run
//! use seedling::{ClusterContext, ClusterMember, MemberConfig, Monitors};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cluster = ClusterContext::new();
//!
//!     let config = MemberConfig::builder()
//!         .member_id(2)
//!         .listen_addr("127.0.0.1:5002")
//!         .upstream_addr("127.0.0.1:5001")
//!         .store_dir("./member-2")
//!         .build()?;
//!
//!     let member = ClusterMember::start(config, &cluster, Monitors::new()).await?;
//!     let stats = member.catch_up().await?;
//!     println!("caught up in {} round(s)", stats.rounds);
//!     Ok(())
//! }
//! ```

pub mod catchup;
pub mod cluster;
pub mod command;
pub mod config;
pub mod error;
pub mod identity;
pub mod member;
pub mod monitor;
pub mod seed;
pub mod store;

/// Generated gRPC types for the catch-up protocol.
pub mod proto {
    tonic::include_proto!("seedling.catchup");
}

pub use catchup::{CatchupClient, CatchupServer, CatchupStats};
pub use cluster::ClusterContext;
pub use command::StoreCommand;
pub use config::{CatchupConfig, MemberConfig};
pub use error::{CatchupError, CatchupResult, SeedError, SeedResult, StoreError};
pub use identity::{StoreId, StoreIdentity, TxId};
pub use member::{ClusterMember, MemberRole};
pub use monitor::{
    FileCopyDetector, FileCopyMonitor, Monitors, PullRequestCounter, PullRequestMonitor,
};
pub use seed::{file_identities, place, FileIdentity, PlacementReport};
pub use store::{DbRepresentation, Store, Transaction};
