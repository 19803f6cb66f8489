//! Segmented transaction log.
//!
//! Transactions are stored as newline-delimited JSON in segment files:
//!
//! ```text
//! store/
//! ├── identity.json
//! ├── marker.log
//! ├── meta.json             # retention horizon, present once pruned
//! └── segments/
//!     ├── seg_000000000000.log  # txs 1-999 (closed)
//!     └── seg_000000001000.log  # txs 1000+ (active)
//! ```
//!
//! - **Append**: O(1), buffered write to the active segment followed by a
//!   single fsync per batch.
//! - **Prune**: O(1), deletes whole segment files below the horizon.
//!
//! Appends never replace segment files, so the identity (inode) of every
//! file placed from a snapshot survives catch-up.

use crate::command::StoreCommand;
use crate::identity::TxId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write as IoWrite};
use std::path::{Path, PathBuf};

/// Maximum transactions per segment before rotating to a new segment.
pub const SEGMENT_MAX_ENTRIES: usize = 1000;

/// File holding the persisted retention horizon.
const META_FILE: &str = "meta.json";

/// One replicated transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Strictly increasing transaction id, 1-based.
    pub tx_id: TxId,
    /// The replicated operation.
    pub command: StoreCommand,
}

/// Persisted log metadata.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PersistedLogMeta {
    horizon: TxId,
}

/// State of the currently active (writable) segment.
struct ActiveSegment {
    /// First transaction id covered by this segment file.
    first_tx: TxId,
    /// Number of entries written to this segment.
    entry_count: usize,
    /// Path of the segment file.
    path: PathBuf,
    /// File handle for appending.
    writer: BufWriter<File>,
}

/// Append-only transaction log backed by segment files.
pub struct TransactionLog {
    dir: PathBuf,
    segments_dir: PathBuf,
    /// In-memory index of retained transactions.
    entries: BTreeMap<TxId, Transaction>,
    /// Smallest transaction id still retained (1 when nothing was pruned).
    horizon: TxId,
    active: Option<ActiveSegment>,
}

impl TransactionLog {
    /// Create or open the log inside a store directory.
    pub fn open(dir: &Path) -> Result<Self, std::io::Error> {
        let segments_dir = dir.join("segments");
        fs::create_dir_all(&segments_dir)?;

        let mut log = Self {
            dir: dir.to_path_buf(),
            segments_dir,
            entries: BTreeMap::new(),
            horizon: 1,
            active: None,
        };
        log.load_meta()?;
        log.load_segments()?;
        Ok(log)
    }

    /// Highest transaction id in the log, 0 when empty.
    pub fn last_tx(&self) -> TxId {
        let last_entry = self.entries.keys().next_back().copied().unwrap_or(0);
        last_entry.max(self.horizon.saturating_sub(1))
    }

    /// Smallest transaction id still retained.
    pub fn horizon(&self) -> TxId {
        self.horizon
    }

    /// Read up to `limit` transactions starting at `from`.
    pub fn read_from(&self, from: TxId, limit: usize) -> Vec<Transaction> {
        self.entries
            .range(from..)
            .take(limit)
            .map(|(_, tx)| tx.clone())
            .collect()
    }

    /// Append a contiguous batch of transactions.
    ///
    /// All-or-nothing: the in-memory index is only updated after every write
    /// hit disk, and on an IO failure the active segment is truncated back
    /// and segments created during this call are removed, so a failed append
    /// leaves no trace.
    pub fn append_batch(&mut self, txs: &[Transaction]) -> Result<(), std::io::Error> {
        if txs.is_empty() {
            return Ok(());
        }

        let rollback = self.prepare_rollback()?;
        match self.write_batch(txs) {
            Ok(()) => {
                for tx in txs {
                    self.entries.insert(tx.tx_id, tx.clone());
                }
                Ok(())
            }
            Err(e) => {
                self.rollback_to(rollback);
                Err(e)
            }
        }
    }

    /// Drop every transaction with id greater than `tx`.
    ///
    /// Used at startup to discard a log tail the durable marker never
    /// covered (crash between log append and marker update).
    pub fn truncate_after(&mut self, tx: TxId) -> Result<(), std::io::Error> {
        let first_dropped = tx + 1;
        let dropped: Vec<TxId> = self
            .entries
            .range(first_dropped..)
            .map(|(id, _)| *id)
            .collect();
        if dropped.is_empty() {
            return Ok(());
        }

        for id in dropped {
            self.entries.remove(&id);
        }

        for (first_tx, path) in self.list_segments()? {
            if first_tx >= first_dropped {
                if self.is_active_segment(first_tx) {
                    self.active = None;
                }
                fs::remove_file(&path)?;
            } else if first_tx + SEGMENT_MAX_ENTRIES as u64 > first_dropped {
                // Segment straddles the cut point; rewrite the survivors.
                let survivors: Vec<Transaction> = self
                    .entries
                    .range(first_tx..first_dropped)
                    .map(|(_, e)| e.clone())
                    .collect();

                if self.is_active_segment(first_tx) {
                    self.active = None;
                }

                if survivors.is_empty() {
                    fs::remove_file(&path)?;
                } else {
                    self.write_segment_file(first_tx, &survivors)?;
                    let file = OpenOptions::new().create(true).append(true).open(&path)?;
                    self.active = Some(ActiveSegment {
                        first_tx,
                        entry_count: survivors.len(),
                        path,
                        writer: BufWriter::new(file),
                    });
                }
            }
        }

        Ok(())
    }

    /// Drop retained transactions up to and including `up_to` and advance
    /// the horizon. Only whole segment files below the cut are deleted.
    pub fn prune(&mut self, up_to: TxId) -> Result<(), std::io::Error> {
        if up_to < self.horizon {
            return Ok(());
        }

        self.horizon = up_to + 1;
        self.save_meta()?;

        let removed: Vec<TxId> = self.entries.range(..=up_to).map(|(id, _)| *id).collect();
        for id in removed {
            self.entries.remove(&id);
        }

        for (first_tx, path) in self.list_segments()? {
            let last_in_segment = first_tx + SEGMENT_MAX_ENTRIES as u64 - 1;
            if last_in_segment <= up_to {
                if self.is_active_segment(first_tx) {
                    self.active = None;
                }
                fs::remove_file(&path)?;
            }
        }

        Ok(())
    }

    // ---- internal ----

    fn prepare_rollback(&mut self) -> Result<RollbackPoint, std::io::Error> {
        let active = match &mut self.active {
            Some(active) => {
                active.writer.flush()?;
                let len = active.writer.get_ref().metadata()?.len();
                Some((active.path.clone(), len, active.entry_count))
            }
            None => None,
        };
        let existing = self.list_segments()?.into_iter().map(|(_, p)| p).collect();
        Ok(RollbackPoint { active, existing })
    }

    fn rollback_to(&mut self, point: RollbackPoint) {
        // Remove segments created during the failed append.
        if let Ok(segments) = self.list_segments() {
            for (_, path) in segments {
                if !point.existing.contains(&path) {
                    let _ = fs::remove_file(&path);
                }
            }
        }

        match point.active {
            Some((path, len, entry_count)) => {
                self.active = None;
                if let Ok(file) = OpenOptions::new().append(true).open(&path) {
                    let _ = file.set_len(len);
                    if let Some(first_tx) = Self::parse_segment_filename(
                        path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
                    ) {
                        self.active = Some(ActiveSegment {
                            first_tx,
                            entry_count,
                            path,
                            writer: BufWriter::new(file),
                        });
                    }
                }
            }
            None => {
                self.active = None;
            }
        }
    }

    fn write_batch(&mut self, txs: &[Transaction]) -> Result<(), std::io::Error> {
        for tx in txs {
            if self.active.is_none() {
                self.start_new_segment(tx.tx_id)?;
            }

            let needs_rotation = self
                .active
                .as_ref()
                .map(|a| a.entry_count >= SEGMENT_MAX_ENTRIES)
                .unwrap_or(false);
            if needs_rotation {
                if let Some(active) = &mut self.active {
                    active.writer.flush()?;
                    active.writer.get_ref().sync_all()?;
                }
                self.start_new_segment(tx.tx_id)?;
            }

            let active = self
                .active
                .as_mut()
                .expect("active segment must exist after start_new_segment");
            let json = serde_json::to_string(tx)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writeln!(active.writer, "{}", json)?;
            active.entry_count += 1;
        }

        if let Some(active) = &mut self.active {
            active.writer.flush()?;
            active.writer.get_ref().sync_all()?;
        }

        Ok(())
    }

    fn start_new_segment(&mut self, first_tx: TxId) -> Result<(), std::io::Error> {
        let path = self.segments_dir.join(Self::segment_filename(first_tx));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        self.active = Some(ActiveSegment {
            first_tx,
            entry_count: 0,
            path,
            writer: BufWriter::new(file),
        });

        Ok(())
    }

    fn is_active_segment(&self, first_tx: TxId) -> bool {
        self.active
            .as_ref()
            .map(|a| a.first_tx == first_tx)
            .unwrap_or(false)
    }

    fn segment_filename(first_tx: TxId) -> String {
        format!("seg_{:012}.log", first_tx)
    }

    fn parse_segment_filename(filename: &str) -> Option<TxId> {
        if filename.starts_with("seg_") && filename.ends_with(".log") && filename.len() == 20 {
            filename[4..16].parse().ok()
        } else {
            None
        }
    }

    fn list_segments(&self) -> Result<Vec<(TxId, PathBuf)>, std::io::Error> {
        let mut segments = Vec::new();

        if !self.segments_dir.exists() {
            return Ok(segments);
        }

        for entry in fs::read_dir(&self.segments_dir)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
                if let Some(first_tx) = Self::parse_segment_filename(filename) {
                    segments.push((first_tx, path));
                }
            }
        }

        segments.sort_by_key(|(tx, _)| *tx);
        Ok(segments)
    }

    fn load_segments(&mut self) -> Result<(), std::io::Error> {
        let segments = self.list_segments()?;
        let last_index = segments.len().saturating_sub(1);

        for (i, (_, path)) in segments.iter().enumerate() {
            // Only the final segment may carry a torn tail from a crash.
            self.load_segment_file(path, i == last_index)?;
        }

        // Reopen the last segment as active if it has room.
        if let Some((first_tx, path)) = segments.last() {
            let entry_count = self.entries.range(*first_tx..).count();
            if entry_count < SEGMENT_MAX_ENTRIES {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                self.active = Some(ActiveSegment {
                    first_tx: *first_tx,
                    entry_count,
                    path: path.clone(),
                    writer: BufWriter::new(file),
                });
            }
        }

        Ok(())
    }

    fn load_segment_file(&mut self, path: &Path, is_last: bool) -> Result<(), std::io::Error> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Transaction>(&line) {
                Ok(tx) => {
                    self.entries.insert(tx.tx_id, tx);
                }
                Err(e) if is_last => {
                    tracing::debug!(path = %path.display(), "discarding torn log tail: {e}");
                    break;
                }
                Err(e) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e));
                }
            }
        }

        Ok(())
    }

    fn write_segment_file(
        &self,
        first_tx: TxId,
        txs: &[Transaction],
    ) -> Result<(), std::io::Error> {
        let path = self.segments_dir.join(Self::segment_filename(first_tx));
        let temp_path = self
            .segments_dir
            .join(format!("{}.tmp", Self::segment_filename(first_tx)));

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);

        for tx in txs {
            let json = serde_json::to_string(tx)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writeln!(writer, "{}", json)?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;

        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn load_meta(&mut self) -> Result<(), std::io::Error> {
        let meta_path = self.dir.join(META_FILE);
        if !meta_path.exists() {
            return Ok(());
        }

        let file = File::open(&meta_path)?;
        let reader = BufReader::new(file);
        let meta: PersistedLogMeta = serde_json::from_reader(reader)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        self.horizon = meta.horizon;
        Ok(())
    }

    fn save_meta(&self) -> Result<(), std::io::Error> {
        let meta_path = self.dir.join(META_FILE);
        let temp_path = self.dir.join(format!("{}.tmp", META_FILE));

        let meta = PersistedLogMeta {
            horizon: self.horizon,
        };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &meta)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        fs::rename(&temp_path, &meta_path)?;
        Ok(())
    }
}

/// Snapshot of the writable state taken before an append, for rollback.
struct RollbackPoint {
    /// Active segment path, file length, and entry count before the append.
    active: Option<(PathBuf, u64, usize)>,
    /// Segment files that existed before the append.
    existing: std::collections::HashSet<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put(tx_id: TxId) -> Transaction {
        Transaction {
            tx_id,
            command: StoreCommand::Put {
                key: format!("key-{tx_id}"),
                value: format!("value-{tx_id}"),
            },
        }
    }

    fn batch(range: std::ops::RangeInclusive<TxId>) -> Vec<Transaction> {
        range.map(put).collect()
    }

    #[test]
    fn append_and_read_back() {
        let dir = TempDir::new().expect("create temp dir");
        let mut log = TransactionLog::open(dir.path()).expect("open log");

        log.append_batch(&batch(1..=10)).expect("append");

        assert_eq!(log.last_tx(), 10);
        let read = log.read_from(1, 100);
        assert_eq!(read.len(), 10);
        assert_eq!(read[0].tx_id, 1);
        assert_eq!(read[9].tx_id, 10);
    }

    #[test]
    fn read_from_respects_offset_and_limit() {
        let dir = TempDir::new().expect("create temp dir");
        let mut log = TransactionLog::open(dir.path()).expect("open log");
        log.append_batch(&batch(1..=50)).expect("append");

        let read = log.read_from(20, 5);
        assert_eq!(read.len(), 5);
        assert_eq!(read[0].tx_id, 20);
        assert_eq!(read[4].tx_id, 24);
    }

    #[test]
    fn rotates_segments_past_capacity() {
        let dir = TempDir::new().expect("create temp dir");
        let mut log = TransactionLog::open(dir.path()).expect("open log");
        log.append_batch(&batch(1..=1500)).expect("append");

        let segment_count = fs::read_dir(dir.path().join("segments"))
            .expect("read segments dir")
            .count();
        assert!(
            segment_count >= 2,
            "Expected at least 2 segments, got {}",
            segment_count
        );
        assert_eq!(log.read_from(1, 2000).len(), 1500);
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().expect("create temp dir");

        {
            let mut log = TransactionLog::open(dir.path()).expect("open log");
            log.append_batch(&batch(1..=100)).expect("append");
        }

        {
            let mut log = TransactionLog::open(dir.path()).expect("reopen log");
            assert_eq!(log.last_tx(), 100);
            // Appends continue in the same active segment.
            log.append_batch(&batch(101..=120)).expect("append more");
            assert_eq!(log.read_from(1, 200).len(), 120);
        }
    }

    #[test]
    fn prune_advances_horizon_and_deletes_segments() {
        let dir = TempDir::new().expect("create temp dir");
        let mut log = TransactionLog::open(dir.path()).expect("open log");
        log.append_batch(&batch(1..=2500)).expect("append");

        log.prune(1500).expect("prune");

        assert_eq!(log.horizon(), 1501);
        assert!(log.read_from(1, 1500).is_empty() || log.read_from(1, 1500)[0].tx_id > 1500);
        assert_eq!(log.read_from(1501, 2000).len(), 1000);
        assert_eq!(log.last_tx(), 2500);

        // Horizon survives reopen.
        drop(log);
        let log = TransactionLog::open(dir.path()).expect("reopen log");
        assert_eq!(log.horizon(), 1501);
    }

    #[test]
    fn truncate_after_drops_the_tail() {
        let dir = TempDir::new().expect("create temp dir");
        let mut log = TransactionLog::open(dir.path()).expect("open log");
        log.append_batch(&batch(1..=100)).expect("append");

        log.truncate_after(60).expect("truncate");

        assert_eq!(log.last_tx(), 60);
        assert!(log.read_from(61, 100).is_empty());

        // The log accepts appends at the cut point again.
        log.append_batch(&batch(61..=70)).expect("append after truncate");
        assert_eq!(log.last_tx(), 70);
    }

    #[test]
    fn torn_tail_is_discarded_on_open() {
        let dir = TempDir::new().expect("create temp dir");

        {
            let mut log = TransactionLog::open(dir.path()).expect("open log");
            log.append_batch(&batch(1..=5)).expect("append");
        }

        // Simulate a crash mid-write of tx 6.
        let seg = dir.path().join("segments").join("seg_000000000001.log");
        let mut file = OpenOptions::new().append(true).open(&seg).expect("open");
        file.write_all(b"{\"tx_id\":6,\"command\"").expect("write torn tail");

        let log = TransactionLog::open(dir.path()).expect("reopen log");
        assert_eq!(log.last_tx(), 5);
    }
}
