//! Locus Core - Entity Types
//!
//! Pure data structures shared by every other crate: the address record,
//! the geo position codec, errors and configuration. No I/O lives here.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod address;
pub mod config;
pub mod error;
pub mod position;

pub use address::{Address, Geometry, LatLngLiteral, BUS_STATION_TYPES};
pub use config::{Environment, LocusConfig, DEFAULT_LOCATIONS_INDEX, DEFAULT_MAX_DISTANCE_METERS};
pub use error::{
    ConfigError, LocusError, LocusResult, StorageError, StoreKind, ValidationError,
};
pub use position::{
    cache_key_for_location_key, location_key_of_cache_key, meters_to_query_degrees,
    parse_location_key, GeoPosition, HasLocation, PositionInput, ADDRESS_KEY_PREFIX,
    EARTH_RADIUS_METERS,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Address identifier using UUIDv7 for timestamp-sortable IDs.
pub type AddressId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 AddressId.
pub fn new_address_id() -> AddressId {
    Uuid::now_v7()
}
