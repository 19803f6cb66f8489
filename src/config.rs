//! Member configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    /// This member's unique ID in the cluster (1-based).
    pub member_id: u64,

    /// Address this member listens on for catch-up RPC (e.g., "0.0.0.0:5000").
    pub listen_addr: String,

    /// Address advertised to other members (e.g., "192.168.1.10:5000").
    /// If not set, uses listen_addr.
    pub advertise_addr: Option<String>,

    /// Upstream peer to catch up from. A member without an upstream is the
    /// cluster's write leader.
    pub upstream_addr: Option<String>,

    /// Directory holding the member's store.
    pub store_dir: PathBuf,

    /// Catch-up protocol configuration.
    pub catchup: CatchupConfig,
}

/// Catch-up protocol tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchupConfig {
    /// Maximum transactions per streamed batch. A pull round is one request
    /// regardless of how many batches answer it, so this bounds memory per
    /// batch, not the number of requests.
    pub max_batch_size: usize,

    /// Consecutive failed attempts before catch-up is surfaced as failed.
    pub max_retries: u32,

    /// Initial retry backoff in milliseconds.
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            member_id: 1,
            listen_addr: "127.0.0.1:5000".to_string(),
            advertise_addr: None,
            upstream_addr: None,
            store_dir: PathBuf::from("./seedling-data"),
            catchup: CatchupConfig::default(),
        }
    }
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            // Up to 256 transactions per streamed batch
            max_batch_size: 256,
            // Five consecutive failures before giving up
            max_retries: 5,
            // Backoff: 50ms doubling up to 1.6s
            initial_backoff_ms: 50,
            max_backoff_ms: 1_600,
        }
    }
}

impl MemberConfig {
    /// Create a new configuration builder.
    pub fn builder() -> MemberConfigBuilder {
        MemberConfigBuilder::default()
    }

    /// Get the advertised address (falls back to listen_addr).
    pub fn advertise_addr(&self) -> &str {
        self.advertise_addr.as_deref().unwrap_or(&self.listen_addr)
    }

    /// Get the initial retry backoff as a Duration.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.catchup.initial_backoff_ms)
    }

    /// Get the backoff ceiling as a Duration.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.catchup.max_backoff_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.member_id == 0 {
            return Err("member_id must be > 0".to_string());
        }

        if self.listen_addr.is_empty() {
            return Err("listen_addr is required".to_string());
        }

        if self.catchup.max_batch_size == 0 {
            return Err("max_batch_size must be > 0".to_string());
        }

        if self.catchup.max_retries == 0 {
            return Err("max_retries must be > 0".to_string());
        }

        if self.catchup.initial_backoff_ms > self.catchup.max_backoff_ms {
            return Err(format!(
                "initial_backoff_ms ({}) must not exceed max_backoff_ms ({})",
                self.catchup.initial_backoff_ms, self.catchup.max_backoff_ms
            ));
        }

        Ok(())
    }
}

/// Builder for MemberConfig.
#[derive(Debug, Default)]
pub struct MemberConfigBuilder {
    config: MemberConfig,
}

impl MemberConfigBuilder {
    /// Set the member ID.
    pub fn member_id(mut self, id: u64) -> Self {
        self.config.member_id = id;
        self
    }

    /// Set the listen address.
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the advertise address.
    pub fn advertise_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.advertise_addr = Some(addr.into());
        self
    }

    /// Set the upstream peer to catch up from.
    pub fn upstream_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.upstream_addr = Some(addr.into());
        self
    }

    /// Set the store directory.
    pub fn store_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_dir = path.into();
        self
    }

    /// Set the maximum transactions per streamed batch.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.catchup.max_batch_size = size;
        self
    }

    /// Set the retry budget.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.catchup.max_retries = retries;
        self
    }

    /// Set the retry backoff range in milliseconds.
    pub fn backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.catchup.initial_backoff_ms = initial;
        self.config.catchup.max_backoff_ms = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<MemberConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(MemberConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_member_id() {
        let result = MemberConfig::builder().member_id(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_inverted_backoff_range() {
        let result = MemberConfig::builder().backoff_ms(2_000, 100).build();
        assert!(result.is_err());
    }

    #[test]
    fn advertise_addr_falls_back_to_listen_addr() {
        let config = MemberConfig::builder()
            .member_id(2)
            .listen_addr("127.0.0.1:7000")
            .build()
            .expect("valid config");
        assert_eq!(config.advertise_addr(), "127.0.0.1:7000");
    }
}
