//! Key-value store layer.
//!
//! The key-value store holds two things side by side: a sorted geo index
//! mapping position keys to coordinates, and JSON snapshots of addresses
//! keyed by `addresses:{lat}_{lng}`. Neither is authoritative.
//!
//! # Backends
//!
//! - [`InMemoryKeyValueStore`]: process-local maps, with failure switches
//!   for tests
//! - [`LmdbKeyValueStore`]: persistent, memory-mapped LMDB environment
//!
//! # Example
//!
//! ```ignore
//! let store = LmdbKeyValueStore::new(&config.cache_path, config.cache_max_size_mb)?;
//! store.json_set("addresses:-8.00292_-34.8725", &snapshot).await?;
//! store.geo_add("locations", position, "-8.00292_-34.8725").await?;
//! ```

pub mod entry;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use entry::{decode_cache_entry, decode_cache_value, encode_cache_value};
pub use lmdb_backend::{LmdbKeyValueStore, LmdbStoreError};
pub use memory::InMemoryKeyValueStore;
pub use traits::{
    GeoIndexBackend, GeoRadiusHit, GeoRadiusOptions, JsonCacheBackend, KeyValueStats,
    KeyValueStore, WriteStatus,
};
