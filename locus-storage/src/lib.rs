//! Locus Storage - Cache-Aside Address Lookup
//!
//! Store abstractions and the cache-aside protocol on top of them:
//! - [`cache`]: key-value store traits plus in-memory and LMDB backends
//! - [`spatial_index`]: one named geo index of position keys
//! - [`repository`]: the document store of record and its save notifications
//! - [`coordinator`]: nearest lookups with fallback, population, repair and
//!   write-through
//!
//! The PostgreSQL repository lives in locus-db.

pub mod cache;
pub mod coordinator;
pub mod repository;
pub mod spatial_index;

pub use cache::{
    decode_cache_entry, GeoIndexBackend, GeoRadiusHit, GeoRadiusOptions, InMemoryKeyValueStore,
    JsonCacheBackend, KeyValueStats, KeyValueStore, LmdbKeyValueStore, LmdbStoreError,
    WriteStatus,
};
pub use coordinator::{AddressCacheCoordinator, CoordinatorStats, LookupOutcome, NearestLookup};
pub use repository::{
    planar_nearest, AddressRepository, InMemoryAddressRepository, SaveNotifier,
    DEFAULT_SAVE_CHANNEL_CAPACITY,
};
pub use spatial_index::SpatialIndexStore;
