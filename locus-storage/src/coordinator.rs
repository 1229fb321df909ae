//! Address cache coordinator
//!
//! Cache-aside reads and writes across the key-value store and the document
//! store. A nearest lookup walks these states:
//!
//! ```text
//! START -> INDEX_LOOKUP -> CACHE_HIT                          -> DONE
//!                       -> CACHE_MISS_REPAIR -> DB_FALLBACK -> POPULATE -> DONE
//!                       -> INDEX_MISS        -> DB_FALLBACK -> POPULATE -> DONE
//! ```
//!
//! Nothing spans both stores atomically. A concurrent writer can leave the
//! index pointing at a missing snapshot; the next lookup that lands on that
//! key removes it. Concurrent populations of the same key are
//! last-writer-wins.
//!
//! Store failures are logged with the operation, position and radius, then
//! returned. A failed lookup is never reported as "not found".

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use locus_core::{
    cache_key_for_location_key, Address, LocusConfig, LocusError, LocusResult, PositionInput,
    StorageError,
};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cache::{decode_cache_entry, decode_cache_value, encode_cache_value, KeyValueStore, WriteStatus};
use crate::repository::AddressRepository;
use crate::spatial_index::SpatialIndexStore;

// ============================================================================
// LOOKUP OUTCOMES
// ============================================================================

/// How a nearest lookup was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupOutcome {
    /// The index had a key and its snapshot was cached.
    CacheHit,
    /// The index had a key without a usable snapshot; the key was removed.
    CacheMissRepair,
    /// Nothing registered within the radius.
    IndexMiss,
    /// The document store had a record, now cached.
    DbFallback,
    /// Neither tier had a record within the radius.
    NotFound,
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOutcome::CacheHit => "cache_hit",
            LookupOutcome::CacheMissRepair => "cache_miss_repair",
            LookupOutcome::IndexMiss => "index_miss",
            LookupOutcome::DbFallback => "db_fallback",
            LookupOutcome::NotFound => "not_found",
        }
    }
}

impl fmt::Display for LookupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a nearest lookup along with the path it took.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestLookup {
    pub outcome: LookupOutcome,
    pub address: Option<Address>,
}

/// Counters of the coordinator's lookups and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub hits: u64,
    pub index_misses: u64,
    pub repairs: u64,
    pub fallbacks: u64,
    pub not_found: u64,
    /// Snapshots written and registered in the index.
    pub populated: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    index_misses: AtomicU64,
    repairs: AtomicU64,
    fallbacks: AtomicU64,
    not_found: AtomicU64,
    populated: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: LookupOutcome) {
        let counter = match outcome {
            LookupOutcome::CacheHit => &self.hits,
            LookupOutcome::CacheMissRepair => &self.repairs,
            LookupOutcome::IndexMiss => &self.index_misses,
            LookupOutcome::DbFallback => &self.fallbacks,
            LookupOutcome::NotFound => &self.not_found,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            hits: self.hits.load(Ordering::Relaxed),
            index_misses: self.index_misses.load(Ordering::Relaxed),
            repairs: self.repairs.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            populated: self.populated.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Cache-aside coordinator over a key-value store `S` and a repository `R`.
pub struct AddressCacheCoordinator<S, R>
where
    S: KeyValueStore + ?Sized,
    R: AddressRepository + ?Sized,
{
    store: Arc<S>,
    index: SpatialIndexStore<S>,
    repository: Arc<R>,
    counters: Counters,
}

impl<S, R> AddressCacheCoordinator<S, R>
where
    S: KeyValueStore + ?Sized,
    R: AddressRepository + ?Sized,
{
    /// Coordinator over the `locations` index.
    pub fn new(store: Arc<S>, repository: Arc<R>, default_radius_m: f64) -> Self {
        let index = SpatialIndexStore::new(Arc::clone(&store), default_radius_m);
        Self::with_index(store, repository, index)
    }

    /// Coordinator using the configured index name and default radius.
    pub fn from_config(store: Arc<S>, repository: Arc<R>, config: &LocusConfig) -> Self {
        let index = SpatialIndexStore::with_index(
            Arc::clone(&store),
            config.locations_index.clone(),
            config.max_distance_m,
        );
        Self::with_index(store, repository, index)
    }

    pub fn with_index(store: Arc<S>, repository: Arc<R>, index: SpatialIndexStore<S>) -> Self {
        Self {
            store,
            index,
            repository,
            counters: Counters::default(),
        }
    }

    pub fn index(&self) -> &SpatialIndexStore<S> {
        &self.index
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.counters.snapshot()
    }

    // ------------------------------------------------------------------------
    // Cache reads
    // ------------------------------------------------------------------------

    /// Cached snapshot at the exact position. Never consults the document
    /// store.
    pub async fn get_cache(&self, input: &PositionInput) -> LocusResult<Option<Address>> {
        let Some(key) = input.address_cache_key() else {
            return Ok(None);
        };
        match self.read_raw("get_cache", &key).await? {
            Some(raw) => Ok(Some(decode_cache_value(&key, &raw)?)),
            None => Ok(None),
        }
    }

    /// Cached entry at the exact position, decoded without assuming its
    /// shape.
    pub async fn get_cache_entry(&self, input: &PositionInput) -> LocusResult<Option<JsonValue>> {
        let Some(key) = input.address_cache_key() else {
            return Ok(None);
        };
        match self.read_raw("get_cache_entry", &key).await? {
            Some(raw) => Ok(Some(decode_cache_entry(&key, &raw)?)),
            None => Ok(None),
        }
    }

    /// Only the requested top-level attributes of the cached entry.
    ///
    /// An empty `attrs` returns the whole entry. Attributes the entry does
    /// not carry are left out; non-object entries are returned as they are.
    pub async fn get_cache_attrs(
        &self,
        input: &PositionInput,
        attrs: &[&str],
    ) -> LocusResult<Option<JsonValue>> {
        let entry = self.get_cache_entry(input).await?;
        if attrs.is_empty() {
            return Ok(entry);
        }
        Ok(entry.map(|entry| match entry {
            JsonValue::Object(mut fields) => {
                fields.retain(|name, _| attrs.contains(&name.as_str()));
                JsonValue::Object(fields)
            }
            other => other,
        }))
    }

    /// Nearest cached snapshot within the radius.
    ///
    /// When the index holds a key whose snapshot is gone or undecodable,
    /// the snapshot and the key are removed and `None` is returned.
    pub async fn get_nearest_cache(
        &self,
        input: &PositionInput,
        radius_m: Option<f64>,
    ) -> LocusResult<Option<Address>> {
        let lookup = self.lookup_cache(input, radius_m).await?;
        self.counters.record(lookup.outcome);
        Ok(lookup.address)
    }

    async fn lookup_cache(
        &self,
        input: &PositionInput,
        radius_m: Option<f64>,
    ) -> LocusResult<NearestLookup> {
        let Some(member) = self.index.nearest_key(input, radius_m).await? else {
            return Ok(NearestLookup {
                outcome: LookupOutcome::IndexMiss,
                address: None,
            });
        };

        let key = cache_key_for_location_key(&member);
        let Some(raw) = self.read_raw("get_nearest_cache", &key).await? else {
            // The raw member is removed: re-rendering parsed
            // coordinates may not give back the same text.
            self.index.remove_key(&member).await?;
            tracing::debug!(
                operation = "get_nearest_cache",
                key = %member,
                "Removed index entry without cached snapshot"
            );
            return Ok(Self::repaired());
        };

        match decode_cache_value(&key, &raw) {
            Ok(address) => Ok(NearestLookup {
                outcome: LookupOutcome::CacheHit,
                address: Some(address),
            }),
            Err(LocusError::Storage(StorageError::Serialization { reason, .. })) => {
                tracing::warn!(
                    operation = "get_nearest_cache",
                    key = %key,
                    error = %reason,
                    "Dropping undecodable cached snapshot"
                );
                self.store.json_del(&key).await?;
                self.index.remove_key(&member).await?;
                Ok(Self::repaired())
            }
            Err(e) => Err(e),
        }
    }

    fn repaired() -> NearestLookup {
        NearestLookup {
            outcome: LookupOutcome::CacheMissRepair,
            address: None,
        }
    }

    // ------------------------------------------------------------------------
    // Cache-aside read path
    // ------------------------------------------------------------------------

    /// Nearest address within the radius, from the cache or, failing that,
    /// from the document store (which then populates the cache).
    pub async fn get_nearest(
        &self,
        input: &PositionInput,
        radius_m: Option<f64>,
    ) -> LocusResult<Option<Address>> {
        Ok(self.lookup_nearest(input, radius_m).await?.address)
    }

    /// Same as [`get_nearest`](Self::get_nearest), reporting the path taken.
    pub async fn lookup_nearest(
        &self,
        input: &PositionInput,
        radius_m: Option<f64>,
    ) -> LocusResult<NearestLookup> {
        let cached = self.lookup_cache(input, radius_m).await?;
        self.counters.record(cached.outcome);
        if cached.outcome == LookupOutcome::CacheHit {
            tracing::debug!(position = %input, outcome = %cached.outcome, "Nearest lookup");
            return Ok(cached);
        }

        let address = self.set_nearest(input, radius_m).await?;
        let outcome = if address.is_some() {
            LookupOutcome::DbFallback
        } else {
            LookupOutcome::NotFound
        };
        self.counters.record(outcome);
        tracing::debug!(
            position = %input,
            cache = %cached.outcome,
            outcome = %outcome,
            "Nearest lookup"
        );

        Ok(NearestLookup { outcome, address })
    }

    /// Load the nearest record from the document store and cache it.
    ///
    /// The only read path that touches the document store.
    pub async fn set_nearest(
        &self,
        input: &PositionInput,
        radius_m: Option<f64>,
    ) -> LocusResult<Option<Address>> {
        let Some((center, radius_m)) = input.nearest_params(radius_m, self.index.default_radius_m())
        else {
            return Ok(None);
        };

        let found = self
            .repository
            .find_nearest(center, radius_m)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    operation = "set_nearest",
                    position = %center,
                    radius_m = radius_m,
                    error = %e,
                    "Document store query failed"
                );
            })?;

        let Some(address) = found else {
            return Ok(None);
        };
        self.set_cache(Some(&address)).await?;
        Ok(Some(address))
    }

    // ------------------------------------------------------------------------
    // Cache writes
    // ------------------------------------------------------------------------

    /// Write the snapshot under its location, then register the location.
    ///
    /// Unconditional, last write wins. Returns `None` without touching the
    /// store when there is no address or it has no location.
    pub async fn set_cache(&self, address: Option<&Address>) -> LocusResult<Option<WriteStatus>> {
        let Some(address) = address else {
            return Ok(None);
        };
        let Some(location) = address.location else {
            tracing::debug!(address_id = %address.address_id, "Address has no location, not cached");
            return Ok(None);
        };

        let key = location.address_cache_key();
        let value = encode_cache_value(&key, address)?;
        let status = self.store.json_set(&key, &value).await.inspect_err(|e| {
            tracing::error!(
                operation = "set_cache",
                position = %location,
                key = %key,
                error = %e,
                "Failed to write cached snapshot"
            );
        })?;

        if status.is_stored() {
            self.index.add(&PositionInput::from(location)).await?;
            self.counters.populated.fetch_add(1, Ordering::Relaxed);
        }

        Ok(Some(status))
    }

    /// Drop the snapshot and the index entry at the exact position.
    ///
    /// Returns whether either existed.
    pub async fn evict(&self, input: &PositionInput) -> LocusResult<bool> {
        let Some(key) = input.address_cache_key() else {
            return Ok(false);
        };
        let deleted = self.store.json_del(&key).await.inspect_err(|e| {
            tracing::error!(
                operation = "evict",
                position = %input,
                key = %key,
                error = %e,
                "Failed to delete cached snapshot"
            );
        })?;
        let unindexed = self.index.remove(input).await?.is_some();
        Ok(deleted || unindexed)
    }

    /// Write a freshly saved record through to the cache.
    pub async fn handle_saved(&self, address: &Address) -> LocusResult<Option<WriteStatus>> {
        self.set_cache(Some(address)).await
    }

    async fn read_raw(&self, operation: &'static str, key: &str) -> LocusResult<Option<String>> {
        self.store.json_get(key).await.inspect_err(|e: &LocusError| {
            tracing::error!(
                operation = operation,
                key = %key,
                error = %e,
                "Failed to read cached snapshot"
            );
        })
    }
}

impl<S, R> AddressCacheCoordinator<S, R>
where
    S: KeyValueStore + ?Sized + 'static,
    R: AddressRepository + ?Sized + 'static,
{
    /// Write every record the repository saves through to the cache.
    ///
    /// The subscription is taken before this returns, so saves that follow
    /// are never missed. The task holds a weak reference and stops once the
    /// coordinator is dropped or the repository's channel closes.
    pub fn spawn_write_through(self: &Arc<Self>) -> JoinHandle<()> {
        let rx = self.repository.subscribe();
        let coordinator = Arc::downgrade(self);
        tokio::spawn(run_write_through(coordinator, rx))
    }
}

async fn run_write_through<S, R>(
    coordinator: Weak<AddressCacheCoordinator<S, R>>,
    mut rx: broadcast::Receiver<Address>,
) where
    S: KeyValueStore + ?Sized + 'static,
    R: AddressRepository + ?Sized + 'static,
{
    loop {
        match rx.recv().await {
            Ok(address) => {
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                if let Err(e) = coordinator.handle_saved(&address).await {
                    tracing::error!(
                        operation = "write_through",
                        address_id = %address.address_id,
                        error = %e,
                        "Failed to write saved address through"
                    );
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped = skipped, "Write-through lagged, some saves were not cached");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("Save channel closed, write-through stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{GeoIndexBackend, InMemoryKeyValueStore, JsonCacheBackend};
    use crate::repository::InMemoryAddressRepository;
    use locus_core::{Geometry, GeoPosition, DEFAULT_LOCATIONS_INDEX};
    use std::time::Duration;

    type TestCoordinator = AddressCacheCoordinator<InMemoryKeyValueStore, InMemoryAddressRepository>;

    fn make_coordinator() -> (
        Arc<TestCoordinator>,
        Arc<InMemoryKeyValueStore>,
        Arc<InMemoryAddressRepository>,
    ) {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let repo = Arc::new(InMemoryAddressRepository::new());
        let coordinator = Arc::new(AddressCacheCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&repo),
            20.0,
        ));
        (coordinator, store, repo)
    }

    fn address_at(lat: f64, lng: f64) -> Address {
        Address::new("Rua da Aurora", "Recife", "Pernambuco", "Brasil", "Rua da Aurora, Recife")
            .with_geometry(Geometry::at(lat, lng))
    }

    fn located(lat: f64, lng: f64) -> Address {
        let mut address = address_at(lat, lng);
        address.set_location();
        address
    }

    #[tokio::test]
    async fn test_get_nearest_falls_back_and_populates() {
        let (coordinator, _store, repo) = make_coordinator();
        let saved = repo.save(address_at(-8.00128, -34.87363)).await.unwrap();

        let lookup = coordinator
            .lookup_nearest(&PositionInput::scalars(-8.00128, -34.8735), Some(20.0))
            .await
            .unwrap();
        assert_eq!(lookup.outcome, LookupOutcome::DbFallback);
        assert_eq!(lookup.address.as_ref(), Some(&saved));

        let cached = coordinator
            .get_cache(&PositionInput::from(GeoPosition::new(-8.00128, -34.87363)))
            .await
            .unwrap();
        assert_eq!(cached, Some(saved.clone()));

        let again = coordinator
            .lookup_nearest(&PositionInput::scalars(-8.00128, -34.8735), None)
            .await
            .unwrap();
        assert_eq!(again.outcome, LookupOutcome::CacheHit);
        assert_eq!(again.address, Some(saved));
    }

    #[tokio::test]
    async fn test_index_without_snapshot_is_miss() {
        let (coordinator, store, _repo) = make_coordinator();
        let address = located(-8.00292, -34.8725);
        coordinator.set_cache(Some(&address)).await.unwrap();

        store
            .geo_remove(DEFAULT_LOCATIONS_INDEX, "-8.00292_-34.8725")
            .await
            .unwrap();

        let found = coordinator
            .get_nearest_cache(&PositionInput::scalars(-8.00292, -34.8725), None)
            .await
            .unwrap();
        assert!(found.is_none());
        assert_eq!(coordinator.stats().index_misses, 1);
    }

    #[tokio::test]
    async fn test_missing_snapshot_repairs_index() {
        let (coordinator, store, _repo) = make_coordinator();
        let address = located(-8.00194, -34.8731);
        coordinator.set_cache(Some(&address)).await.unwrap();
        let input = PositionInput::scalars(-8.00194, -34.8731);

        assert!(coordinator.get_nearest_cache(&input, None).await.unwrap().is_some());

        store.json_del("addresses:-8.00194_-34.8731").await.unwrap();

        assert!(coordinator.get_nearest_cache(&input, None).await.unwrap().is_none());
        assert!(coordinator.index().get(&input).await.unwrap().is_none());
        assert_eq!(coordinator.stats().repairs, 1);
    }

    #[tokio::test]
    async fn test_not_found_in_either_tier() {
        let (coordinator, _store, _repo) = make_coordinator();
        let lookup = coordinator
            .lookup_nearest(&PositionInput::scalars(-8.0, -34.0), None)
            .await
            .unwrap();
        assert_eq!(lookup.outcome, LookupOutcome::NotFound);
        assert!(lookup.address.is_none());
    }

    #[tokio::test]
    async fn test_set_cache_none_writes_nothing() {
        let (coordinator, store, _repo) = make_coordinator();
        assert_eq!(coordinator.set_cache(None).await.unwrap(), None);

        let unlocated = Address::new("a", "b", "c", "d", "e");
        assert_eq!(coordinator.set_cache(Some(&unlocated)).await.unwrap(), None);

        let stats = store.stats().await;
        assert_eq!(stats.writes, 0);
        assert_eq!(stats.json_entries, 0);
    }

    #[tokio::test]
    async fn test_set_cache_roundtrip() {
        let (coordinator, _store, _repo) = make_coordinator();
        let address = located(-8.00292, -34.8725).with_types(["bus_station"]);

        let status = coordinator.set_cache(Some(&address)).await.unwrap();
        assert_eq!(status, Some(WriteStatus::Stored));

        let input = PositionInput::located(&address);
        assert_eq!(coordinator.get_cache(&input).await.unwrap(), Some(address.clone()));
        assert_eq!(
            coordinator.index().get(&input).await.unwrap(),
            Some(GeoPosition::new(-8.00292, -34.8725))
        );
        assert_eq!(coordinator.stats().populated, 1);
    }

    #[tokio::test]
    async fn test_skipped_write_does_not_register() {
        let (coordinator, store, _repo) = make_coordinator();
        store.set_read_only(true);
        let address = located(-8.0, -34.0);

        let status = coordinator.set_cache(Some(&address)).await.unwrap();
        assert_eq!(status, Some(WriteStatus::Skipped));
        assert!(coordinator
            .index()
            .get(&PositionInput::located(&address))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_get_cache_entry_unwraps_quoted_scalar() {
        let (coordinator, store, _repo) = make_coordinator();
        store.json_set("addresses:1_2", "\"plain\"").await.unwrap();
        let entry = coordinator
            .get_cache_entry(&PositionInput::scalars(1.0, 2.0))
            .await
            .unwrap();
        assert_eq!(entry, Some(JsonValue::String("plain".to_string())));
    }

    #[tokio::test]
    async fn test_get_cache_attrs_keeps_requested_fields() {
        let (coordinator, _store, _repo) = make_coordinator();
        let address = located(-8.00128, -34.87363);
        coordinator.set_cache(Some(&address)).await.unwrap();
        let input = PositionInput::located(&address);

        let entry = coordinator
            .get_cache_attrs(&input, &["street_name", "city", "not_a_field"])
            .await
            .unwrap()
            .unwrap();
        let fields = entry.as_object().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["street_name"], "Rua da Aurora");
        assert_eq!(fields["city"], "Recife");

        let whole = coordinator.get_cache_attrs(&input, &[]).await.unwrap();
        assert_eq!(whole, coordinator.get_cache_entry(&input).await.unwrap());
        assert!(coordinator
            .get_cache_attrs(&PositionInput::scalars(1.0, 2.0), &["city"])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_undecodable_snapshot_is_dropped_and_falls_back() {
        let (coordinator, store, repo) = make_coordinator();
        let position = GeoPosition::new(-8.00128, -34.87363);
        store
            .geo_add(DEFAULT_LOCATIONS_INDEX, position, &position.location_key())
            .await
            .unwrap();
        store
            .json_set(&position.address_cache_key(), "{truncated")
            .await
            .unwrap();
        let saved = repo.save(address_at(-8.00128, -34.87363)).await.unwrap();

        let lookup = coordinator
            .lookup_nearest(&PositionInput::from(position), None)
            .await
            .unwrap();
        assert_eq!(lookup.outcome, LookupOutcome::DbFallback);
        assert_eq!(lookup.address.as_ref(), Some(&saved));
        assert_eq!(coordinator.stats().repairs, 1);
        assert_eq!(
            coordinator.get_cache(&PositionInput::from(position)).await.unwrap(),
            Some(saved)
        );
    }

    #[tokio::test]
    async fn test_malformed_input_returns_none() {
        let (coordinator, _store, repo) = make_coordinator();
        repo.save(address_at(-8.0, -34.0)).await.unwrap();
        let input = PositionInput::pair(vec![-8.0]);

        assert!(coordinator.get_cache(&input).await.unwrap().is_none());
        assert!(coordinator.get_nearest(&input, None).await.unwrap().is_none());
        assert!(!coordinator.evict(&input).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_unavailable_is_not_a_miss() {
        let (coordinator, store, repo) = make_coordinator();
        repo.save(address_at(-8.0, -34.0)).await.unwrap();
        store.set_unavailable(true);

        let err = coordinator
            .get_nearest(&PositionInput::scalars(-8.0, -34.0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LocusError::Storage(ref e) if e.is_unavailable()));
    }

    #[tokio::test]
    async fn test_document_store_unavailable_propagates() {
        let (coordinator, _store, repo) = make_coordinator();
        repo.set_unavailable(true);

        let err = coordinator
            .get_nearest(&PositionInput::scalars(-8.0, -34.0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LocusError::Storage(ref e) if e.is_unavailable()));
    }

    #[tokio::test]
    async fn test_evict_removes_both_entries() {
        let (coordinator, store, _repo) = make_coordinator();
        let address = located(-8.00128, -34.87363);
        coordinator.set_cache(Some(&address)).await.unwrap();

        let input = PositionInput::located(&address);
        assert!(coordinator.evict(&input).await.unwrap());
        assert!(!coordinator.evict(&input).await.unwrap());

        let stats = store.stats().await;
        assert_eq!(stats.json_entries, 0);
        assert_eq!(stats.geo_entries, 0);
    }

    #[tokio::test]
    async fn test_write_through_caches_saved_records() {
        let (coordinator, _store, repo) = make_coordinator();
        let handle = coordinator.spawn_write_through();

        let saved = repo.save(address_at(-8.00292, -34.8725)).await.unwrap();
        let input = PositionInput::located(&saved);

        let mut cached = None;
        for _ in 0..50 {
            cached = coordinator.get_cache(&input).await.unwrap();
            if cached.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cached, Some(saved));

        handle.abort();
    }

    #[tokio::test]
    async fn test_write_through_stops_with_coordinator() {
        let (coordinator, store, repo) = make_coordinator();
        let handle = coordinator.spawn_write_through();
        drop(coordinator);

        repo.save(address_at(-8.0, -34.0)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("write-through task should stop")
            .unwrap();
        assert_eq!(store.stats().await.json_entries, 0);
    }

    #[tokio::test]
    async fn test_from_config_uses_configured_index() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let repo = Arc::new(InMemoryAddressRepository::new());
        let config = LocusConfig {
            locations_index: "stops".to_string(),
            max_distance_m: 50.0,
            ..LocusConfig::default()
        };
        let coordinator = AddressCacheCoordinator::from_config(Arc::clone(&store), repo, &config);
        assert_eq!(coordinator.index().index_name(), "stops");
        assert_eq!(coordinator.index().default_radius_m(), 50.0);

        coordinator.set_cache(Some(&located(-8.0, -34.0))).await.unwrap();
        assert!(store
            .geo_pos("stops", "-8_-34")
            .await
            .unwrap()
            .is_some());
    }
}
