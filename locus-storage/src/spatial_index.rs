//! Spatial index store
//!
//! Thin façade over one named geo index of the key-value store. Members are
//! position keys (`{lat}_{lng}`), so a member found by a radius query leads
//! straight to the cached snapshot under `addresses:{lat}_{lng}`.
//!
//! Malformed positions never reach the backend: every operation answers
//! `None` for them instead of failing.

use std::sync::Arc;

use locus_core::{GeoPosition, LocusResult, PositionInput, DEFAULT_LOCATIONS_INDEX};

use crate::cache::{GeoIndexBackend, GeoRadiusHit, GeoRadiusOptions};

/// One named geo index.
pub struct SpatialIndexStore<B: GeoIndexBackend + ?Sized> {
    backend: Arc<B>,
    index: String,
    default_radius_m: f64,
}

impl<B: GeoIndexBackend + ?Sized> Clone for SpatialIndexStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            index: self.index.clone(),
            default_radius_m: self.default_radius_m,
        }
    }
}

impl<B: GeoIndexBackend + ?Sized> SpatialIndexStore<B> {
    /// Index named `locations` with the given default radius.
    pub fn new(backend: Arc<B>, default_radius_m: f64) -> Self {
        Self::with_index(backend, DEFAULT_LOCATIONS_INDEX, default_radius_m)
    }

    pub fn with_index(backend: Arc<B>, index: impl Into<String>, default_radius_m: f64) -> Self {
        Self {
            backend,
            index: index.into(),
            default_radius_m,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    pub fn default_radius_m(&self) -> f64 {
        self.default_radius_m
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Register a position under its key.
    ///
    /// Returns the number of newly added members (0 when the key was
    /// already present), or `None` when the input is malformed.
    pub async fn add(&self, input: &PositionInput) -> LocusResult<Option<u64>> {
        let Some(position) = input.canonicalize() else {
            return Ok(None);
        };
        let key = position.location_key();
        match self.backend.geo_add(&self.index, position, &key).await {
            Ok(added) => Ok(Some(added)),
            Err(e) => {
                tracing::error!(
                    operation = "spatial_index.add",
                    index = %self.index,
                    position = %position,
                    error = %e,
                    "Failed to register position"
                );
                Err(e)
            }
        }
    }

    /// Stored coordinates of the position's key.
    pub async fn get(&self, input: &PositionInput) -> LocusResult<Option<GeoPosition>> {
        let Some(key) = input.location_key() else {
            return Ok(None);
        };
        self.backend.geo_pos(&self.index, &key).await.inspect_err(|e| {
            tracing::error!(
                operation = "spatial_index.get",
                index = %self.index,
                key = %key,
                error = %e,
                "Failed to read position"
            );
        })
    }

    /// Closest registered key within the radius, nearest first.
    ///
    /// `radius_m` of `None` falls back to the default radius; a radius
    /// carried by a pair input wins over both.
    pub async fn nearest_key(
        &self,
        input: &PositionInput,
        radius_m: Option<f64>,
    ) -> LocusResult<Option<String>> {
        Ok(self.nearest(input, radius_m).await?.map(|hit| hit.member))
    }

    /// Closest registered member with its distance and coordinates.
    pub async fn nearest(
        &self,
        input: &PositionInput,
        radius_m: Option<f64>,
    ) -> LocusResult<Option<GeoRadiusHit>> {
        let Some((center, radius_m)) = input.nearest_params(radius_m, self.default_radius_m) else {
            return Ok(None);
        };

        let hits = self
            .backend
            .geo_radius(&self.index, center, radius_m, GeoRadiusOptions::nearest())
            .await
            .inspect_err(|e| {
                tracing::error!(
                    operation = "spatial_index.nearest",
                    index = %self.index,
                    position = %center,
                    radius_m = radius_m,
                    error = %e,
                    "Radius query failed"
                );
            })?;

        Ok(hits.into_iter().next())
    }

    /// Remove the position's key. Returns the removed coordinates, or
    /// `None` when the key was not registered.
    pub async fn remove(&self, input: &PositionInput) -> LocusResult<Option<GeoPosition>> {
        let Some(key) = input.location_key() else {
            return Ok(None);
        };
        self.remove_key(&key).await
    }

    /// Remove a member by its raw key.
    ///
    /// Used when the key came out of a radius query: re-deriving it from
    /// parsed coordinates could render differently.
    pub async fn remove_key(&self, key: &str) -> LocusResult<Option<GeoPosition>> {
        self.remove_member(key).await.inspect_err(|e| {
            tracing::error!(
                operation = "spatial_index.remove",
                index = %self.index,
                key = %key,
                error = %e,
                "Failed to remove position"
            );
        })
    }

    async fn remove_member(&self, key: &str) -> LocusResult<Option<GeoPosition>> {
        let Some(position) = self.backend.geo_pos(&self.index, key).await? else {
            return Ok(None);
        };
        let removed = self.backend.geo_remove(&self.index, key).await?;
        Ok(removed.then_some(position))
    }
}
