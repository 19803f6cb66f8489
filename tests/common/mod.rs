//! Common test utilities for seedling tests.

use seedling::{
    ClusterContext, ClusterMember, DbRepresentation, FileCopyDetector, MemberConfig, Monitors,
    PullRequestCounter, Store, StoreCommand,
};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Atomic counter for allocating unique ports.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(15000);

/// Get a unique port for testing.
pub fn get_test_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Per-member monitor bundle, with the counting observers kept readable.
#[allow(dead_code)]
pub struct TestMonitors {
    pub monitors: Monitors,
    pub file_copies: Arc<FileCopyDetector>,
    pub pulls: Arc<PullRequestCounter>,
}

#[allow(dead_code)]
impl TestMonitors {
    pub fn new() -> Self {
        let file_copies = Arc::new(FileCopyDetector::new());
        let pulls = Arc::new(PullRequestCounter::new());
        let monitors = Monitors::new()
            .with_file_copy(file_copies.clone())
            .with_pull(pulls.clone());
        Self {
            monitors,
            file_copies,
            pulls,
        }
    }
}

/// A running member plus everything a scenario needs to assert on it.
#[allow(dead_code)]
pub struct TestMember {
    /// Temp directory backing the store (kept alive for the test duration).
    pub dir: TempDir,
    pub member: ClusterMember,
    pub monitors: TestMonitors,
    pub addr: String,
}

#[allow(dead_code)]
impl TestMember {
    /// Start a member in a fresh temp directory.
    pub async fn start(member_id: u64, upstream: Option<&str>, cluster: &ClusterContext) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        Self::start_in(dir, member_id, upstream, cluster).await
    }

    /// Start a member whose store directory was prepared beforehand, for
    /// instance by seeding a snapshot into `dir`.
    pub async fn start_in(
        dir: TempDir,
        member_id: u64,
        upstream: Option<&str>,
        cluster: &ClusterContext,
    ) -> Self {
        let port = get_test_port();
        let addr = format!("127.0.0.1:{}", port);

        let mut builder = MemberConfig::builder()
            .member_id(member_id)
            .listen_addr(addr.clone())
            .store_dir(dir.path());
        if let Some(upstream) = upstream {
            builder = builder.upstream_addr(upstream);
        }
        let config = builder.build().expect("Invalid config");

        let monitors = TestMonitors::new();
        let member = ClusterMember::start(config, cluster, monitors.monitors.clone())
            .await
            .expect("Failed to start member");

        Self {
            dir,
            member,
            monitors,
            addr,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        self.member.store()
    }
}

/// Commit `count` put transactions through a member.
#[allow(dead_code)]
pub async fn commit_puts(member: &ClusterMember, count: u64) {
    let start = member.last_applied_tx().await;
    for i in 1..=count {
        member
            .commit(StoreCommand::Put {
                key: format!("key-{}", start + i),
                value: format!("value-{}", start + i),
            })
            .await
            .expect("Failed to commit");
    }
}

/// Take a backup of a stopped member's store directory, the way the external
/// backup tool would: a plain recursive file copy.
#[allow(dead_code)]
pub fn run_backup(store_dir: &Path, backup_dir: &Path) -> io::Result<()> {
    copy_recursive(store_dir, backup_dir)
}

fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Assert that every member converges on `expected` within the timeout.
#[allow(dead_code)]
pub async fn data_matches_eventually(expected: &DbRepresentation, members: &[&ClusterMember]) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let mut all_match = true;
        for member in members {
            if &member.representation().await != expected {
                all_match = false;
                break;
            }
        }
        if all_match {
            return;
        }
        if std::time::Instant::now() > deadline {
            for member in members {
                let repr = member.representation().await;
                assert_eq!(
                    &repr, expected,
                    "member did not converge on the expected representation"
                );
            }
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}
