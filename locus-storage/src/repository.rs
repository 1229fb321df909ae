//! Address repository
//!
//! The document store holds the records of truth. Its only read used by the
//! cache layer is a nearest-within-radius query, consulted on cache miss.
//!
//! Every successful save is announced on a broadcast channel so the cache
//! coordinator can write the fresh record through (see [`SaveNotifier`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use locus_core::{
    meters_to_query_degrees, Address, AddressId, GeoPosition, LocusResult, StorageError,
    StoreKind,
};
use tokio::sync::{broadcast, RwLock};

/// Default capacity of the save-notification channel.
pub const DEFAULT_SAVE_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// SAVE NOTIFICATIONS
// ============================================================================

/// Broadcasts every committed record to its subscribers.
///
/// A subscriber that falls more than `capacity` records behind misses the
/// oldest ones and is told how many it skipped.
#[derive(Debug, Clone)]
pub struct SaveNotifier {
    tx: broadcast::Sender<Address>,
}

impl SaveNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Announce a committed record. Having no subscriber is not an error.
    pub fn notify(&self, address: &Address) {
        match self.tx.send(address.clone()) {
            Ok(receivers) => {
                tracing::debug!(
                    address_id = %address.address_id,
                    receivers = receivers,
                    "Announced saved address"
                );
            }
            Err(_) => {
                tracing::debug!(address_id = %address.address_id, "No subscribers for saved address");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Address> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SaveNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_SAVE_CHANNEL_CAPACITY)
    }
}

// ============================================================================
// REPOSITORY TRAIT
// ============================================================================

/// Persistence of address records.
#[async_trait]
pub trait AddressRepository: Send + Sync {
    /// Validate, derive `location` and `is_bus_station`, persist, then
    /// announce the saved record. Returns the record as stored.
    ///
    /// A record whose `address_id` already exists is replaced.
    async fn save(&self, address: Address) -> LocusResult<Address>;

    /// Closest record within `radius_m` of `center`.
    ///
    /// The radius goes through [`meters_to_query_degrees`] and distances are
    /// planar, in degrees, like a legacy-pair `2d` index.
    async fn find_nearest(&self, center: GeoPosition, radius_m: f64) -> LocusResult<Option<Address>>;

    async fn get(&self, id: AddressId) -> LocusResult<Option<Address>>;

    /// Returns whether the record existed.
    async fn delete(&self, id: AddressId) -> LocusResult<bool>;

    /// Receive every record saved from now on.
    fn subscribe(&self) -> broadcast::Receiver<Address>;
}

/// Pick the planar nearest of `candidates` within `radius_m`.
pub fn planar_nearest<'a, I>(candidates: I, center: GeoPosition, radius_m: f64) -> Option<&'a Address>
where
    I: IntoIterator<Item = &'a Address>,
{
    let max_degrees = meters_to_query_degrees(radius_m);
    candidates
        .into_iter()
        .filter_map(|address| {
            let location = address.location?;
            let distance = center.planar_degrees(&location);
            (distance <= max_degrees).then_some((distance, address))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, address)| address)
}

// ============================================================================
// IN-MEMORY REPOSITORY
// ============================================================================

/// Process-local document store.
///
/// Uses tokio::sync::RwLock for safe async access.
#[derive(Debug)]
pub struct InMemoryAddressRepository {
    records: RwLock<HashMap<AddressId, Address>>,
    notifier: SaveNotifier,
    unavailable: AtomicBool,
}

impl Default for InMemoryAddressRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAddressRepository {
    pub fn new() -> Self {
        Self::with_notifier(SaveNotifier::default())
    }

    pub fn with_notifier(notifier: SaveNotifier) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            notifier,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    fn check_available(&self) -> LocusResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(StoreKind::Document, "connection refused").into());
        }
        Ok(())
    }
}

#[async_trait]
impl AddressRepository for InMemoryAddressRepository {
    async fn save(&self, mut address: Address) -> LocusResult<Address> {
        self.check_available()?;
        address.validate()?;

        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&address.address_id) {
            address.created_at = existing.created_at;
        }
        address.prepare_for_save(Utc::now());
        records.insert(address.address_id, address.clone());
        drop(records);

        self.notifier.notify(&address);
        Ok(address)
    }

    async fn find_nearest(&self, center: GeoPosition, radius_m: f64) -> LocusResult<Option<Address>> {
        self.check_available()?;
        let records = self.records.read().await;
        Ok(planar_nearest(records.values(), center, radius_m).cloned())
    }

    async fn get(&self, id: AddressId) -> LocusResult<Option<Address>> {
        self.check_available()?;
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: AddressId) -> LocusResult<bool> {
        self.check_available()?;
        Ok(self.records.write().await.remove(&id).is_some())
    }

    fn subscribe(&self) -> broadcast::Receiver<Address> {
        self.notifier.subscribe()
    }
}
