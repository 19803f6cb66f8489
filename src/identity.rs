//! Store identity: the lineage token and last-applied-transaction marker
//! carried by every store directory, whether a live member or a snapshot.
//!
//! Two records back the identity on disk:
//!
//! - `identity.json` — the store id, written once when the store is created
//!   and never rewritten afterwards.
//! - `marker.log` — an append-only NDJSON file of applied-transaction
//!   markers; the last valid line is the durable `last_applied_tx`.
//!
//! The marker is append-only on purpose: advancing it must not replace the
//! file, so the file's identity (inode) survives catch-up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write as IoWrite};
use std::path::Path;
use uuid::Uuid;

/// Transaction identifier. Strictly increasing, 1-based; 0 means the store
/// has never applied a transaction.
pub type TxId = u64;

/// File holding the store id.
pub const IDENTITY_FILE: &str = "identity.json";

/// Append-only file holding applied-transaction markers.
pub const MARKER_FILE: &str = "marker.log";

/// Opaque token identifying a store lineage.
///
/// Two stores with different ids are never compatible for catch-up. The id
/// is stored as raw UUID bytes internally for cheap copying and hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId {
    /// UUID bytes in big-endian format.
    bytes: [u8; 16],
}

impl StoreId {
    /// Create a new random store id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: *Uuid::new_v4().as_bytes(),
        }
    }

    /// Create a store id from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            bytes: *uuid.as_bytes(),
        }
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.bytes)
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store_{}", self.as_uuid())
    }
}

impl Serialize for StoreId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.as_uuid().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StoreId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let uuid = Uuid::deserialize(deserializer)?;
        Ok(Self::from_uuid(uuid))
    }
}

/// Identity carried by every store directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreIdentity {
    /// Lineage token.
    pub store_id: StoreId,
    /// Highest transaction id durably applied to this store.
    pub last_applied_tx: TxId,
}

impl StoreIdentity {
    /// Identity of a freshly created, empty store.
    #[must_use]
    pub fn new(store_id: StoreId) -> Self {
        Self {
            store_id,
            last_applied_tx: 0,
        }
    }

    /// Load the identity from a store directory, if one is recorded.
    pub fn load(dir: &Path) -> Result<Option<StoreIdentity>, std::io::Error> {
        let id_path = dir.join(IDENTITY_FILE);
        if !id_path.exists() {
            return Ok(None);
        }

        let file = File::open(&id_path)?;
        let reader = BufReader::new(file);
        let persisted: PersistedStoreId = serde_json::from_reader(reader)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let last_applied_tx = MarkerFile::load_last(dir)?;
        Ok(Some(StoreIdentity {
            store_id: persisted.store_id,
            last_applied_tx,
        }))
    }

    /// Write the store id record for a freshly created store.
    ///
    /// Written through a temp file and an atomic rename; the record is never
    /// rewritten after creation.
    pub fn create(dir: &Path, store_id: StoreId) -> Result<(), std::io::Error> {
        let id_path = dir.join(IDENTITY_FILE);
        let temp_path = dir.join(format!("{}.tmp", IDENTITY_FILE));

        let persisted = PersistedStoreId { store_id };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &persisted)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        fs::rename(&temp_path, &id_path)?;
        Ok(())
    }
}

/// Persisted form of the store id record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PersistedStoreId {
    store_id: StoreId,
}

/// One line of the marker file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct MarkerRecord {
    tx: TxId,
}

/// Open handle on the append-only applied-transaction marker file.
pub struct MarkerFile {
    file: File,
}

impl MarkerFile {
    /// Open (creating if absent) the marker file in a store directory.
    pub fn open(dir: &Path) -> Result<Self, std::io::Error> {
        let path = dir.join(MARKER_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file })
    }

    /// Durably record that `tx` is the last applied transaction.
    ///
    /// The record is flushed and fsynced before this returns.
    pub fn append(&mut self, tx: TxId) -> Result<(), std::io::Error> {
        let json = serde_json::to_string(&MarkerRecord { tx })
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(self.file, "{}", json)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Read the last durable marker from a store directory.
    ///
    /// Returns 0 when the file is absent or empty. A torn trailing line
    /// (crash mid-append) is ignored; the previous record wins.
    pub fn load_last(dir: &Path) -> Result<TxId, std::io::Error> {
        let path = dir.join(MARKER_FILE);
        if !path.exists() {
            return Ok(0);
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        let mut last = 0;

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<MarkerRecord>(&line) {
                Ok(record) => last = record.tx,
                Err(_) => break,
            }
        }

        Ok(last)
    }
}
