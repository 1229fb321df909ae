//! Locus Test Utilities
//!
//! Centralized test infrastructure for the locus workspace:
//! - Proptest generators for positions, position inputs and addresses
//! - Fixtures for common scenarios (Recife street corners, in-memory stacks)
//! - Harness helpers that edit the key-value store out-of-band
//! - Custom assertions for locus-specific validation

// Re-export core types for convenience
pub use locus_core::{
    Address, AddressId, ConfigError, Environment, GeoPosition, Geometry, LocusConfig, LocusError,
    LocusResult, PositionInput, StorageError, StoreKind, Timestamp, ValidationError,
    BUS_STATION_TYPES, DEFAULT_LOCATIONS_INDEX,
};
pub use locus_storage::{
    AddressCacheCoordinator, AddressRepository, GeoIndexBackend, InMemoryAddressRepository,
    InMemoryKeyValueStore, JsonCacheBackend, KeyValueStore, LookupOutcome, SpatialIndexStore,
    WriteStatus,
};

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for locus types.

    use super::*;
    use proptest::prelude::*;

    /// Latitude the geo index accepts.
    pub fn arb_latitude() -> impl Strategy<Value = f64> {
        -85.0f64..85.0
    }

    pub fn arb_longitude() -> impl Strategy<Value = f64> {
        -180.0f64..180.0
    }

    /// An indexable position.
    pub fn arb_position() -> impl Strategy<Value = GeoPosition> {
        (arb_latitude(), arb_longitude()).prop_map(|(lat, lng)| GeoPosition::new(lat, lng))
    }

    /// A position around central Recife, where the fixtures live.
    pub fn arb_recife_position() -> impl Strategy<Value = GeoPosition> {
        (-8.01f64..-7.99, -34.89f64..-34.86).prop_map(|(lat, lng)| GeoPosition::new(lat, lng))
    }

    /// Any of the three input shapes, always well formed.
    pub fn arb_position_input() -> impl Strategy<Value = PositionInput> {
        prop_oneof![
            arb_position().prop_map(|p| PositionInput::pair(vec![p.lat, p.lng])),
            arb_position().prop_map(|p| PositionInput::scalars(p.lat, p.lng)),
            arb_position().prop_map(PositionInput::from),
        ]
    }

    /// Pairs that do not hold exactly two coordinates.
    pub fn arb_malformed_input() -> impl Strategy<Value = PositionInput> {
        prop_oneof![
            Just(PositionInput::pair(Vec::new())),
            arb_latitude().prop_map(|lat| PositionInput::pair(vec![lat])),
            prop::collection::vec(arb_longitude(), 3..6).prop_map(PositionInput::pair),
            Just(PositionInput::Located { location: None }),
        ]
    }

    /// Place types, sometimes including a station type.
    pub fn arb_types() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(
            prop_oneof![
                Just("bus_station"),
                Just("transit_station"),
                Just("restaurant"),
                Just("route"),
                Just("street_address"),
                Just("point_of_interest"),
            ],
            0..4,
        )
        .prop_map(|types| types.into_iter().map(String::from).collect())
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // 2020-2030
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// An unsaved, valid address with geometry at `position`.
    pub fn arb_address_at(position: GeoPosition) -> impl Strategy<Value = Address> {
        (
            "[A-Z][a-z]{3,12}( [A-Z][a-z]{3,12})?",
            "[A-Z][a-z]{3,10}",
            proptest::option::of("[0-9]{1,4}"),
            proptest::option::of("[0-9]{5}-[0-9]{3}"),
            arb_types(),
        )
            .prop_map(move |(street, city, number, postal_code, types)| {
                let formatted = format!("{}, {}", street, city);
                let mut address = Address::new(street, city, "Pernambuco", "Brasil", formatted)
                    .with_geometry(Geometry::at(position.lat, position.lng))
                    .with_types(types);
                address.street_number = number;
                address.postal_code = postal_code;
                address
            })
    }

    /// An unsaved, valid address anywhere indexable.
    pub fn arb_address() -> impl Strategy<Value = Address> {
        arb_position().prop_flat_map(arb_address_at)
    }

    /// An address as it looks after a save: derived fields computed.
    pub fn arb_saved_address() -> impl Strategy<Value = Address> {
        (arb_address(), arb_timestamp()).prop_map(|(mut address, now)| {
            address.prepare_for_save(now);
            address
        })
    }

    pub fn arb_address_id() -> impl Strategy<Value = AddressId> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures and out-of-band store edits.

    use super::*;

    /// Rua da Aurora, near the Boa Vista bridge.
    pub const AURORA: (f64, f64) = (-8.00128, -34.87363);
    /// Bus stop by the Santa Isabel theatre.
    pub const SANTA_ISABEL: (f64, f64) = (-8.00292, -34.8725);
    pub const PRACA_REPUBLICA: (f64, f64) = (-8.00194, -34.8731);

    /// Every fixture position.
    pub const POSITIONS: [(f64, f64); 3] = [AURORA, SANTA_ISABEL, PRACA_REPUBLICA];

    pub type MemoryCoordinator = AddressCacheCoordinator<InMemoryKeyValueStore, InMemoryAddressRepository>;

    /// An in-memory stack with the default 20m radius.
    pub struct MemoryStack {
        pub coordinator: Arc<MemoryCoordinator>,
        pub store: Arc<InMemoryKeyValueStore>,
        pub repository: Arc<InMemoryAddressRepository>,
    }

    pub fn memory_stack() -> MemoryStack {
        memory_stack_with(&LocusConfig::default())
    }

    pub fn memory_stack_with(config: &LocusConfig) -> MemoryStack {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let repository = Arc::new(InMemoryAddressRepository::new());
        let coordinator = Arc::new(AddressCacheCoordinator::from_config(
            Arc::clone(&store),
            Arc::clone(&repository),
            config,
        ));
        MemoryStack {
            coordinator,
            store,
            repository,
        }
    }

    pub fn position(point: (f64, f64)) -> GeoPosition {
        GeoPosition::new(point.0, point.1)
    }

    /// Unsaved address whose geometry sits at `point`.
    pub fn address_at(point: (f64, f64)) -> Address {
        Address::new(
            "Rua da Aurora",
            "Recife",
            "Pernambuco",
            "Brasil",
            "Rua da Aurora, Boa Vista, Recife - PE, Brasil",
        )
        .with_geometry(Geometry::at(point.0, point.1))
    }

    /// Address with derived fields already computed, as a save would leave it.
    pub fn located_address_at(point: (f64, f64)) -> Address {
        let mut address = address_at(point);
        address.prepare_for_save(Utc::now());
        address
    }

    pub fn bus_station_at(point: (f64, f64)) -> Address {
        address_at(point).with_types(["bus_station", "point_of_interest"])
    }

    pub fn restaurant_at(point: (f64, f64)) -> Address {
        address_at(point).with_types(["restaurant", "food"])
    }

    /// Write a snapshot straight into the JSON store, bypassing the index.
    pub async fn seed_snapshot<S: JsonCacheBackend + ?Sized>(
        store: &S,
        address: &Address,
    ) -> LocusResult<()> {
        let Some(location) = address.location else {
            return Err(ValidationError::RequiredFieldMissing {
                field: "location".to_string(),
            }
            .into());
        };
        let value = serde_json::to_string(address).map_err(|e| StorageError::Serialization {
            key: location.address_cache_key(),
            reason: e.to_string(),
        })?;
        store.json_set(&location.address_cache_key(), &value).await?;
        Ok(())
    }

    /// Delete a snapshot without touching the index.
    pub async fn evict_snapshot<S: JsonCacheBackend + ?Sized>(
        store: &S,
        position: GeoPosition,
    ) -> LocusResult<bool> {
        store.json_del(&position.address_cache_key()).await
    }

    /// Delete an index entry without touching the snapshot.
    pub async fn evict_index_entry<S: GeoIndexBackend + ?Sized>(
        store: &S,
        position: GeoPosition,
    ) -> LocusResult<bool> {
        store
            .geo_remove(DEFAULT_LOCATIONS_INDEX, &position.location_key())
            .await
    }

    /// A configuration for the `test` environment.
    pub fn test_config() -> LocusConfig {
        LocusConfig {
            environment: Environment::Test,
            ..LocusConfig::default()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for locus-specific validation.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &LocusResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &LocusResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a LocusResult failed because `store` was unreachable.
    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &LocusResult<T>, store: StoreKind) {
        match result {
            Err(LocusError::Storage(StorageError::Unavailable { store: s, .. })) => {
                assert_eq!(*s, store, "Wrong store in Unavailable error");
            }
            other => panic!("Expected {} unavailable, got: {:?}", store, other),
        }
    }

    /// Assert that a LocusResult is a missing-field validation error.
    #[track_caller]
    pub fn assert_missing_field<T: std::fmt::Debug>(result: &LocusResult<T>, field: &str) {
        match result {
            Err(LocusError::Validation(ValidationError::RequiredFieldMissing { field: f })) => {
                assert_eq!(f, field, "Wrong field in RequiredFieldMissing error");
            }
            other => panic!("Expected missing {}, got: {:?}", field, other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &LocusResult<T>) {
        match result {
            Err(LocusError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert the derived fields of a saved address are consistent.
    #[track_caller]
    pub fn assert_derived_fields(address: &Address) {
        if let Some(geometry) = &address.geometry {
            assert_eq!(
                address.location,
                Some(GeoPosition::new(geometry.location.lat, geometry.location.lng)),
                "location must mirror geometry.location"
            );
        }
        assert_eq!(
            address.is_bus_station,
            Address::is_bus_station_type(&address.types),
            "is_bus_station must follow types {:?}",
            address.types
        );
    }

    /// Assert that the snapshot and the index entry at `position` are both
    /// present or both absent.
    pub async fn assert_cache_coherent<S: KeyValueStore + ?Sized>(store: &S, position: GeoPosition) {
        let snapshot = store
            .json_get(&position.address_cache_key())
            .await
            .unwrap_or_else(|e| panic!("snapshot read failed: {}", e));
        let indexed = store
            .geo_pos(DEFAULT_LOCATIONS_INDEX, &position.location_key())
            .await
            .unwrap_or_else(|e| panic!("index read failed: {}", e));
        assert_eq!(
            snapshot.is_some(),
            indexed.is_some(),
            "snapshot present: {}, index entry present: {} at {}",
            snapshot.is_some(),
            indexed.is_some(),
            position
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
