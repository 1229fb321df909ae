//! Property-Based Tests for the Cache-Aside Protocol
//!
//! **Property 1: Round-trip** - `set_cache(A)` then `get_cache(A.location)`
//! returns a record equal to `A`.
//!
//! **Property 2: Self-healing** - once a snapshot is evicted behind the
//! index's back, the next nearest-cache lookup returns nothing and removes
//! the dangling index entry.
//!
//! **Property 3: Miss is not an error** - a lookup with nothing in either
//! tier resolves to `None`.
//!
//! **Property 4: Malformed input is silent** - degenerate inputs yield
//! `None` and write nothing.

use locus_test_utils::{
    assertions, fixtures, generators, AddressRepository, GeoPosition, LookupOutcome,
    PositionInput, WriteStatus,
};
use proptest::prelude::*;
use tokio::runtime::{Builder, Runtime};

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_set_cache_then_get_cache_roundtrips(address in generators::arb_saved_address()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let stack = fixtures::memory_stack();
            let status = stack
                .coordinator
                .set_cache(Some(&address))
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(status, Some(WriteStatus::Stored));

            let cached = stack
                .coordinator
                .get_cache(&PositionInput::located(&address))
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(cached, Some(address.clone()));

            let location = address.location.ok_or_else(|| TestCaseError::fail("no location"))?;
            assertions::assert_cache_coherent(stack.store.as_ref(), location).await;
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_evicted_snapshot_heals_index(address in generators::arb_saved_address()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let stack = fixtures::memory_stack();
            let location = address.location.ok_or_else(|| TestCaseError::fail("no location"))?;
            let input = PositionInput::from(location);

            stack
                .coordinator
                .set_cache(Some(&address))
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let first = stack
                .coordinator
                .get_nearest_cache(&input, None)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(first.is_some());

            fixtures::evict_snapshot(stack.store.as_ref(), location)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let second = stack
                .coordinator
                .get_nearest_cache(&input, None)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(second.is_none());

            let indexed = stack
                .coordinator
                .index()
                .get(&input)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(indexed.is_none());
            prop_assert_eq!(stack.coordinator.stats().repairs, 1);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_empty_tiers_resolve_to_none(position in generators::arb_position()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let stack = fixtures::memory_stack();
            let lookup = stack
                .coordinator
                .lookup_nearest(&PositionInput::from(position), None)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(lookup.outcome, LookupOutcome::NotFound);
            prop_assert!(lookup.address.is_none());
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_malformed_input_writes_nothing(input in generators::arb_malformed_input()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let stack = fixtures::memory_stack();
            stack
                .repository
                .save(fixtures::address_at(fixtures::AURORA))
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let found = stack
                .coordinator
                .get_nearest(&input, None)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(found.is_none());
            prop_assert_eq!(stack.store.stats().await.writes, 0);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_position_keys_are_canonical(input in generators::arb_position_input()) {
        let canonical = input.canonicalize().ok_or_else(|| TestCaseError::fail("absent"))?;
        prop_assert_eq!(
            input.address_cache_key(),
            PositionInput::from(canonical).address_cache_key()
        );
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_db_fallback_populates_cache() {
    let stack = fixtures::memory_stack();
    let saved = stack
        .repository
        .save(fixtures::address_at(fixtures::AURORA))
        .await
        .unwrap();

    let found = stack
        .coordinator
        .get_nearest(&PositionInput::scalars(-8.00128, -34.87350), Some(20.0))
        .await
        .unwrap();
    assert_eq!(found.as_ref(), Some(&saved));

    let cached = stack
        .coordinator
        .get_cache(&PositionInput::from(fixtures::position(fixtures::AURORA)))
        .await
        .unwrap();
    assert_eq!(cached, Some(saved));
    assertions::assert_cache_coherent(stack.store.as_ref(), fixtures::position(fixtures::AURORA))
        .await;
}

#[tokio::test]
async fn scenario_snapshot_without_index_entry_is_invisible() {
    let stack = fixtures::memory_stack();
    let address = fixtures::located_address_at(fixtures::SANTA_ISABEL);
    fixtures::seed_snapshot(stack.store.as_ref(), &address).await.unwrap();

    let found = stack
        .coordinator
        .get_nearest_cache(&PositionInput::scalars(-8.00292, -34.87250), None)
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn scenario_bus_station_flag_follows_types() {
    let stack = fixtures::memory_stack();

    let station = stack
        .repository
        .save(fixtures::bus_station_at(fixtures::SANTA_ISABEL))
        .await
        .unwrap();
    assert!(station.is_bus_station);

    let restaurant = stack
        .repository
        .save(fixtures::restaurant_at(fixtures::PRACA_REPUBLICA))
        .await
        .unwrap();
    assert!(!restaurant.is_bus_station);
}

#[tokio::test]
async fn scenario_set_cache_none_writes_nothing() {
    let stack = fixtures::memory_stack();
    assert_eq!(stack.coordinator.set_cache(None).await.unwrap(), None);
    let stats = stack.store.stats().await;
    assert_eq!(stats.writes, 0);
    assert_eq!(stats.json_entries, 0);
    assert_eq!(stats.geo_entries, 0);
}

#[tokio::test]
async fn scenario_invalid_save_leaves_cache_untouched() {
    let stack = fixtures::memory_stack();
    let handle = stack.coordinator.spawn_write_through();

    let mut address = fixtures::address_at(fixtures::AURORA);
    address.country = String::new();
    let result = stack.repository.save(address).await;
    assertions::assert_missing_field(&result, "country");

    tokio::task::yield_now().await;
    assert_eq!(stack.store.stats().await.writes, 0);
    handle.abort();
}

#[tokio::test]
async fn scenario_write_through_refreshes_cached_snapshot() {
    let stack = fixtures::memory_stack();
    let handle = stack.coordinator.spawn_write_through();
    let input = PositionInput::from(GeoPosition::new(fixtures::AURORA.0, fixtures::AURORA.1));

    let saved = stack
        .repository
        .save(fixtures::address_at(fixtures::AURORA))
        .await
        .unwrap();
    let mut update = saved.clone();
    update.street_number = Some("235".to_string());
    let updated = stack.repository.save(update).await.unwrap();

    let mut cached = None;
    for _ in 0..50 {
        cached = stack.coordinator.get_cache(&input).await.unwrap();
        if cached.as_ref() == Some(&updated) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(cached, Some(updated));
    handle.abort();
}
