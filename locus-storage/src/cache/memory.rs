//! In-memory key-value store.
//!
//! Mirrors the semantics of the networked store closely enough for tests
//! and single-process deployments: geo members keep their exact
//! coordinates, radius queries use great-circle distance.
//!
//! Uses tokio::sync::RwLock for safe async access. Two switches simulate
//! store failures: `set_unavailable` makes every call fail, and
//! `set_read_only` makes JSON writes come back as [`WriteStatus::Skipped`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use locus_core::{GeoPosition, LocusResult, StorageError, StoreKind};
use tokio::sync::RwLock;

use super::traits::{
    finish_radius_hits, GeoIndexBackend, GeoRadiusHit, GeoRadiusOptions, JsonCacheBackend,
    KeyValueStats, WriteStatus,
};

#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    /// index name -> member -> position
    geo: RwLock<HashMap<String, HashMap<String, GeoPosition>>>,
    json: RwLock<HashMap<String, String>>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    unavailable: AtomicBool,
    read_only: AtomicBool,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Decline JSON writes without failing.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Snapshot of the operation counters.
    pub async fn stats(&self) -> KeyValueStats {
        let geo_entries = self
            .geo
            .read()
            .await
            .values()
            .map(|members| members.len() as u64)
            .sum();
        let json_entries = self.json.read().await.len() as u64;
        KeyValueStats {
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
            geo_entries,
            json_entries,
        }
    }

    /// Drop every entry (counters are kept).
    pub async fn clear(&self) {
        self.geo.write().await.clear();
        self.json.write().await.clear();
    }

    fn check_available(&self) -> LocusResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(StoreKind::KeyValue, "connection refused").into());
        }
        Ok(())
    }

    fn count(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GeoIndexBackend for InMemoryKeyValueStore {
    async fn geo_add(&self, index: &str, position: GeoPosition, member: &str) -> LocusResult<u64> {
        self.check_available()?;
        if !position.is_indexable() {
            return Err(StorageError::InvalidGeoPosition {
                lat: position.lat,
                lng: position.lng,
            }
            .into());
        }
        Self::count(&self.writes);

        let mut geo = self.geo.write().await;
        let previous = geo
            .entry(index.to_string())
            .or_default()
            .insert(member.to_string(), position);
        Ok(if previous.is_none() { 1 } else { 0 })
    }

    async fn geo_pos(&self, index: &str, member: &str) -> LocusResult<Option<GeoPosition>> {
        self.check_available()?;
        Self::count(&self.reads);

        let geo = self.geo.read().await;
        Ok(geo.get(index).and_then(|members| members.get(member)).copied())
    }

    async fn geo_radius(
        &self,
        index: &str,
        center: GeoPosition,
        radius_m: f64,
        options: GeoRadiusOptions,
    ) -> LocusResult<Vec<GeoRadiusHit>> {
        self.check_available()?;
        Self::count(&self.reads);

        let geo = self.geo.read().await;
        let hits: Vec<(String, GeoPosition, f64)> = geo
            .get(index)
            .map(|members| {
                members
                    .iter()
                    .map(|(member, position)| {
                        (member.clone(), *position, center.haversine_meters(position))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(finish_radius_hits(hits, radius_m, options))
    }

    async fn geo_remove(&self, index: &str, member: &str) -> LocusResult<bool> {
        self.check_available()?;
        Self::count(&self.deletes);

        let mut geo = self.geo.write().await;
        Ok(geo
            .get_mut(index)
            .map(|members| members.remove(member).is_some())
            .unwrap_or(false))
    }
}

#[async_trait]
impl JsonCacheBackend for InMemoryKeyValueStore {
    async fn json_get(&self, key: &str) -> LocusResult<Option<String>> {
        self.check_available()?;
        Self::count(&self.reads);
        Ok(self.json.read().await.get(key).cloned())
    }

    async fn json_set(&self, key: &str, value: &str) -> LocusResult<WriteStatus> {
        self.check_available()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Ok(WriteStatus::Skipped);
        }
        Self::count(&self.writes);
        self.json
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(WriteStatus::Stored)
    }

    async fn json_del(&self, key: &str) -> LocusResult<bool> {
        self.check_available()?;
        Self::count(&self.deletes);
        Ok(self.json.write().await.remove(key).is_some())
    }
}
