//! Key-value store traits.
//!
//! The key-value store exposes two independent structures: a sorted geo
//! index (points tagged with a member name) and a JSON value store keyed by
//! plain strings. Backends implement both traits; the coordinator only sees
//! the traits.

use async_trait::async_trait;
use locus_core::{GeoPosition, LocusResult};

/// Outcome of a JSON write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The value was stored.
    Stored,
    /// The backend declined the write (conditional set not met).
    Skipped,
}

impl WriteStatus {
    pub fn is_stored(&self) -> bool {
        matches!(self, WriteStatus::Stored)
    }
}

/// Options of a radius query.
///
/// Distances are always expressed in meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoRadiusOptions {
    /// Return the stored coordinates of each hit.
    pub with_coord: bool,
    /// Return the distance from the center of each hit.
    pub with_dist: bool,
    /// Sort hits nearest first.
    pub ascending: bool,
    /// Maximum number of hits.
    pub count: Option<usize>,
}

impl Default for GeoRadiusOptions {
    fn default() -> Self {
        Self {
            with_coord: true,
            with_dist: true,
            ascending: true,
            count: None,
        }
    }
}

impl GeoRadiusOptions {
    /// Options of a single-winner nearest query.
    pub fn nearest() -> Self {
        Self {
            count: Some(1),
            ..Self::default()
        }
    }
}

/// A member returned by a radius query.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRadiusHit {
    pub member: String,
    pub distance_m: Option<f64>,
    pub position: Option<GeoPosition>,
}

/// Sorted geo structure of the key-value store.
#[async_trait]
pub trait GeoIndexBackend: Send + Sync {
    /// Add or update a member. Returns the number of newly added members
    /// (0 when the member already existed and only moved).
    async fn geo_add(&self, index: &str, position: GeoPosition, member: &str) -> LocusResult<u64>;

    /// Stored coordinates of a member.
    async fn geo_pos(&self, index: &str, member: &str) -> LocusResult<Option<GeoPosition>>;

    /// Members within `radius_m` meters of `center`.
    async fn geo_radius(
        &self,
        index: &str,
        center: GeoPosition,
        radius_m: f64,
        options: GeoRadiusOptions,
    ) -> LocusResult<Vec<GeoRadiusHit>>;

    /// Remove a member. Returns whether it existed.
    async fn geo_remove(&self, index: &str, member: &str) -> LocusResult<bool>;
}

/// Structured value store of the key-value store.
#[async_trait]
pub trait JsonCacheBackend: Send + Sync {
    /// Raw serialized value stored under `key`.
    async fn json_get(&self, key: &str) -> LocusResult<Option<String>>;

    /// Store `value` under `key`, unconditionally.
    async fn json_set(&self, key: &str, value: &str) -> LocusResult<WriteStatus>;

    /// Delete `key`. Returns whether it existed.
    async fn json_del(&self, key: &str) -> LocusResult<bool>;
}

/// A backend providing both structures.
pub trait KeyValueStore: GeoIndexBackend + JsonCacheBackend {}

impl<T: GeoIndexBackend + JsonCacheBackend> KeyValueStore for T {}

/// Operation counters kept by the backends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueStats {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub geo_entries: u64,
    pub json_entries: u64,
}

/// Sort, filter and truncate radius hits according to `options`.
pub(crate) fn finish_radius_hits(
    mut hits: Vec<(String, GeoPosition, f64)>,
    radius_m: f64,
    options: GeoRadiusOptions,
) -> Vec<GeoRadiusHit> {
    hits.retain(|(_, _, distance)| *distance <= radius_m);
    if options.ascending {
        hits.sort_by(|a, b| a.2.total_cmp(&b.2));
    }
    if let Some(count) = options.count {
        hits.truncate(count);
    }
    hits.into_iter()
        .map(|(member, position, distance)| GeoRadiusHit {
            member,
            distance_m: options.with_dist.then_some(distance),
            position: options.with_coord.then_some(position),
        })
        .collect()
}
