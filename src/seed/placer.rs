//! Snapshot placement: copying a backup's files into a member's store
//! directory before first start.
//!
//! Placement is a pure file operation with no network activity. It is
//! idempotent: files already present with identical content are left
//! untouched (and unreported), so re-placing the same snapshot neither
//! rewrites files nor changes their identity. A target holding conflicting
//! content is never repaired silently; that is an operator problem.

use crate::error::{SeedError, SeedResult};
use crate::monitor::Monitors;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of a placement run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementReport {
    /// Files copied into the target.
    pub files_copied: usize,
    /// Files skipped because they were already present and identical.
    pub files_skipped: usize,
}

/// Copy a snapshot's files into a target store directory.
///
/// Emits one `copy_file` monitor event per file actually copied; identical
/// files produce no event. Fails with [`SeedError::Placement`] when the
/// target holds a file that differs from the snapshot, or a file the
/// snapshot does not contain.
pub fn place(snapshot: &Path, target: &Path, monitors: &Monitors) -> SeedResult<PlacementReport> {
    if !snapshot.is_dir() {
        return Err(SeedError::Placement {
            path: snapshot.to_path_buf(),
            reason: "snapshot directory does not exist".into(),
        });
    }

    fs::create_dir_all(target)?;

    let snapshot_files = relative_files(snapshot)?;

    // A pre-occupied target must already be a prefix of the snapshot;
    // anything else is an operator mistake we refuse to paper over.
    for extra in relative_files(target)? {
        if !snapshot_files.contains(&extra) {
            return Err(SeedError::Placement {
                path: target.join(&extra),
                reason: "target contains a file not present in the snapshot".into(),
            });
        }
    }

    let mut report = PlacementReport::default();

    for rel in &snapshot_files {
        let src = snapshot.join(rel);
        let dst = target.join(rel);

        if dst.exists() {
            if fs::read(&src)? == fs::read(&dst)? {
                report.files_skipped += 1;
                continue;
            }
            return Err(SeedError::Placement {
                path: dst,
                reason: "target file differs from the snapshot".into(),
            });
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, &dst)?;
        monitors.copy_file(&dst);
        report.files_copied += 1;
    }

    tracing::debug!(
        snapshot = %snapshot.display(),
        target = %target.display(),
        copied = report.files_copied,
        skipped = report.files_skipped,
        "snapshot placed"
    );

    Ok(report)
}

/// Stable per-file token used to prove that catch-up never re-materialized
/// a seeded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn identity_of(path: &Path) -> Result<FileIdentity, std::io::Error> {
    use std::os::unix::fs::MetadataExt;
    let meta = fs::metadata(path)?;
    Ok(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn identity_of(path: &Path) -> Result<FileIdentity, std::io::Error> {
    // Best effort where inodes are unavailable: creation time stands in.
    let meta = fs::metadata(path)?;
    let created = meta
        .created()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    Ok(FileIdentity {
        dev: 0,
        ino: created,
    })
}

/// Record the identity of every file under `dir`, keyed by relative path.
pub fn file_identities(dir: &Path) -> Result<BTreeMap<PathBuf, FileIdentity>, std::io::Error> {
    let mut map = BTreeMap::new();
    for rel in relative_files(dir)? {
        let identity = identity_of(&dir.join(&rel))?;
        map.insert(rel, identity);
    }
    Ok(map)
}

/// All regular files under `dir`, as sorted relative paths.
fn relative_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    if dir.is_dir() {
        collect_files(dir, dir, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn collect_files(
    root: &Path,
    dir: &Path,
    files: &mut Vec<PathBuf>,
) -> Result<(), std::io::Error> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, files)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            files.push(rel.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::FileCopyDetector;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn snapshot_fixture() -> TempDir {
        let dir = TempDir::new().expect("create temp dir");
        fs::write(dir.path().join("identity.json"), b"{\"store_id\":\"x\"}").expect("write");
        fs::write(dir.path().join("marker.log"), b"{\"tx\":3}\n").expect("write");
        fs::create_dir_all(dir.path().join("segments")).expect("mkdir");
        fs::write(
            dir.path().join("segments/seg_000000000001.log"),
            b"{\"tx_id\":1}\n",
        )
        .expect("write");
        dir
    }

    fn counting_monitors() -> (Monitors, Arc<FileCopyDetector>) {
        let detector = Arc::new(FileCopyDetector::new());
        let monitors = Monitors::new().with_file_copy(detector.clone());
        (monitors, detector)
    }

    #[test]
    fn fresh_placement_copies_every_file() {
        let snapshot = snapshot_fixture();
        let target = TempDir::new().expect("create temp dir");
        let (monitors, detector) = counting_monitors();

        let report =
            place(snapshot.path(), &target.path().join("store"), &monitors).expect("place");

        assert_eq!(report.files_copied, 3);
        assert_eq!(report.files_skipped, 0);
        assert_eq!(detector.copies(), 3);
    }

    #[test]
    fn second_placement_is_silent() {
        let snapshot = snapshot_fixture();
        let target = TempDir::new().expect("create temp dir");
        let store_dir = target.path().join("store");

        let (monitors, _) = counting_monitors();
        place(snapshot.path(), &store_dir, &monitors).expect("first place");

        let before = file_identities(&store_dir).expect("identities");

        let (monitors, detector) = counting_monitors();
        let report = place(snapshot.path(), &store_dir, &monitors).expect("second place");

        assert_eq!(report.files_copied, 0);
        assert_eq!(report.files_skipped, 3);
        assert!(!detector.detected());
        assert_eq!(file_identities(&store_dir).expect("identities"), before);
    }

    #[test]
    fn conflicting_target_file_is_fatal() {
        let snapshot = snapshot_fixture();
        let target = TempDir::new().expect("create temp dir");
        let store_dir = target.path().join("store");

        fs::create_dir_all(&store_dir).expect("mkdir");
        fs::write(store_dir.join("marker.log"), b"{\"tx\":99}\n").expect("write");

        let err = place(snapshot.path(), &store_dir, &Monitors::new())
            .expect_err("conflict must be fatal");
        assert!(matches!(err, SeedError::Placement { .. }));
    }

    #[test]
    fn unexpected_target_file_is_fatal() {
        let snapshot = snapshot_fixture();
        let target = TempDir::new().expect("create temp dir");
        let store_dir = target.path().join("store");

        fs::create_dir_all(&store_dir).expect("mkdir");
        fs::write(store_dir.join("stray.dat"), b"leftover").expect("write");

        let err = place(snapshot.path(), &store_dir, &Monitors::new())
            .expect_err("stray file must be fatal");
        assert!(matches!(err, SeedError::Placement { .. }));
    }

    #[test]
    fn missing_snapshot_is_fatal() {
        let target = TempDir::new().expect("create temp dir");
        let err = place(
            &target.path().join("no-such-snapshot"),
            &target.path().join("store"),
            &Monitors::new(),
        )
        .expect_err("missing snapshot must be fatal");
        assert!(matches!(err, SeedError::Placement { .. }));
    }
}
