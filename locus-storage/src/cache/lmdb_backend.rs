//! LMDB-backed key-value store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped,
//! persistent stand-in for the networked key-value store.
//!
//! # Layout
//!
//! Two named databases live in one environment:
//! - `geo`: key `[index bytes][0xFF][member bytes]`, value 16 bytes
//!   (`lat` then `lng`, little-endian `f64`)
//! - `json`: key is the cache key, value is the serialized JSON text
//!
//! Radius queries scan the index prefix and compute great-circle distance,
//! so they cost O(members of the index).
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions, every
//! mutation its own write transaction. Counters are atomics.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use locus_core::{GeoPosition, LocusError, LocusResult, StorageError, StoreKind};

use super::traits::{
    finish_radius_hits, GeoIndexBackend, GeoRadiusHit, GeoRadiusOptions, JsonCacheBackend,
    KeyValueStats, WriteStatus,
};

/// Separator byte between the index name and the member name.
const SEPARATOR: u8 = 0xFF;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes could not be decoded.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for LocusError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::EnvOpen(_) | LmdbStoreError::DbOpen(_) | LmdbStoreError::Io(_) => {
                StorageError::unavailable(StoreKind::KeyValue, e.to_string()).into()
            }
            LmdbStoreError::Transaction(_) | LmdbStoreError::Corrupt(_) => {
                StorageError::TransactionFailed {
                    reason: e.to_string(),
                }
                .into()
            }
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

fn geo_key(index: &str, member: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(index.len() + 1 + member.len());
    key.extend_from_slice(index.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(member.as_bytes());
    key
}

fn geo_prefix(index: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(index.len() + 1);
    prefix.extend_from_slice(index.as_bytes());
    prefix.push(SEPARATOR);
    prefix
}

fn encode_position(position: GeoPosition) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&position.lat.to_le_bytes());
    bytes[8..16].copy_from_slice(&position.lng.to_le_bytes());
    bytes
}

fn decode_position(bytes: &[u8]) -> Result<GeoPosition, LmdbStoreError> {
    if bytes.len() != 16 {
        return Err(LmdbStoreError::Corrupt(format!(
            "geo entry has {} bytes, expected 16",
            bytes.len()
        )));
    }
    let mut lat = [0u8; 8];
    let mut lng = [0u8; 8];
    lat.copy_from_slice(&bytes[0..8]);
    lng.copy_from_slice(&bytes[8..16]);
    Ok(GeoPosition::new(f64::from_le_bytes(lat), f64::from_le_bytes(lng)))
}

/// LMDB-backed key-value store.
///
/// # Example
///
/// ```ignore
/// use locus_storage::cache::LmdbKeyValueStore;
///
/// let store = LmdbKeyValueStore::new("/tmp/locus-cache", 64)?;
/// store.geo_add("locations", GeoPosition::new(-8.0, -34.9), "-8_-34.9").await?;
/// ```
pub struct LmdbKeyValueStore {
    env: Env,
    geo: Database<Bytes, Bytes>,
    json: Database<Bytes, Bytes>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl LmdbKeyValueStore {
    /// Open (or create) the store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;

        let geo: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("geo"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let json: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("json"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(txn_error)?;

        Ok(Self {
            env,
            geo,
            json,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        })
    }

    /// Snapshot of the operation counters and entry counts.
    pub fn stats(&self) -> LocusResult<KeyValueStats> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let geo_entries = self.geo.len(&rtxn).map_err(txn_error)?;
        let json_entries = self.json.len(&rtxn).map_err(txn_error)?;
        Ok(KeyValueStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            geo_entries,
            json_entries,
        })
    }

    /// Flush the memory map to disk.
    pub fn sync(&self) -> LocusResult<()> {
        self.env.force_sync().map_err(txn_error)?;
        Ok(())
    }

    fn scan_index(&self, index: &str) -> Result<Vec<(String, GeoPosition)>, LmdbStoreError> {
        let prefix = geo_prefix(index);
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let iter = self
            .geo
            .prefix_iter(&rtxn, prefix.as_slice())
            .map_err(txn_error)?;

        let mut members = Vec::new();
        for result in iter {
            let (key, value) = result.map_err(txn_error)?;
            let member = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            members.push((member, decode_position(value)?));
        }
        Ok(members)
    }

    fn delete_key(&self, db: Database<Bytes, Bytes>, key: &[u8]) -> Result<bool, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = db.delete(&mut wtxn, key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(deleted)
    }
}

#[async_trait]
impl GeoIndexBackend for LmdbKeyValueStore {
    async fn geo_add(&self, index: &str, position: GeoPosition, member: &str) -> LocusResult<u64> {
        if !position.is_indexable() {
            return Err(StorageError::InvalidGeoPosition {
                lat: position.lat,
                lng: position.lng,
            }
            .into());
        }

        let key = geo_key(index, member);
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let existed = self.geo.get(&wtxn, &key).map_err(txn_error)?.is_some();
        self.geo
            .put(&mut wtxn, &key, &encode_position(position))
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(if existed { 0 } else { 1 })
    }

    async fn geo_pos(&self, index: &str, member: &str) -> LocusResult<Option<GeoPosition>> {
        let key = geo_key(index, member);
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        match self.geo.get(&rtxn, &key).map_err(txn_error)? {
            Some(bytes) => Ok(Some(decode_position(bytes)?)),
            None => Ok(None),
        }
    }

    async fn geo_radius(
        &self,
        index: &str,
        center: GeoPosition,
        radius_m: f64,
        options: GeoRadiusOptions,
    ) -> LocusResult<Vec<GeoRadiusHit>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let hits: Vec<(String, GeoPosition, f64)> = self
            .scan_index(index)?
            .into_iter()
            .map(|(member, position)| {
                let distance = center.haversine_meters(&position);
                (member, position, distance)
            })
            .collect();
        Ok(finish_radius_hits(hits, radius_m, options))
    }

    async fn geo_remove(&self, index: &str, member: &str) -> LocusResult<bool> {
        Ok(self.delete_key(self.geo, &geo_key(index, member))?)
    }
}

#[async_trait]
impl JsonCacheBackend for LmdbKeyValueStore {
    async fn json_get(&self, key: &str) -> LocusResult<Option<String>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        match self.json.get(&rtxn, key.as_bytes()).map_err(txn_error)? {
            Some(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| LmdbStoreError::Corrupt(e.to_string()))?;
                Ok(Some(text.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn json_set(&self, key: &str, value: &str) -> LocusResult<WriteStatus> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.json
            .put(&mut wtxn, key.as_bytes(), value.as_bytes())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(WriteStatus::Stored)
    }

    async fn json_del(&self, key: &str) -> LocusResult<bool> {
        Ok(self.delete_key(self.json, key.as_bytes())?)
    }
}
