//! Geo position codec
//!
//! Normalizes the three accepted input shapes (coordinate pair, discrete
//! latitude/longitude, or an object carrying a location) into a canonical
//! [`GeoPosition`], and derives the textual keys shared by the address cache
//! and the spatial index.
//!
//! Keys are built from the `Display` form of the raw `f64` values. Nothing is
//! rounded: two positions only share a key when their coordinates render to
//! the same text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every cached address key.
pub const ADDRESS_KEY_PREFIX: &str = "addresses:";

/// Separator between latitude and longitude inside a position key.
pub const POSITION_KEY_SEPARATOR: char = '_';

/// Earth radius used by the key-value store's geo commands, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_372_797.560_856;

/// Latitude bound accepted by the geo index (Web Mercator limit).
pub const GEO_LAT_LIMIT: f64 = 85.051_128_78;

/// Longitude bound accepted by the geo index.
pub const GEO_LNG_LIMIT: f64 = 180.0;

/// A canonical `(lat, lng)` pair.
///
/// Serialized as a two-element array `[lat, lng]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct GeoPosition {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPosition {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// `{lat}_{lng}`, the member name inside the spatial index.
    pub fn location_key(&self) -> String {
        format!("{}{}{}", self.lat, POSITION_KEY_SEPARATOR, self.lng)
    }

    /// `addresses:{lat}_{lng}`, the key of the cached address snapshot.
    pub fn address_cache_key(&self) -> String {
        format!("{}{}", ADDRESS_KEY_PREFIX, self.location_key())
    }

    /// Whether the geo index can store this point.
    pub fn is_indexable(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat.abs() <= GEO_LAT_LIMIT
            && self.lng.abs() <= GEO_LNG_LIMIT
    }

    /// Great-circle distance in meters.
    pub fn haversine_meters(&self, other: &GeoPosition) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let u = ((lat2 - lat1) / 2.0).sin();
        let v = ((other.lng - self.lng).to_radians() / 2.0).sin();
        let a = u * u + lat1.cos() * lat2.cos() * v * v;
        2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
    }

    /// Flat distance in degrees, as computed by a legacy-pair `2d` index.
    pub fn planar_degrees(&self, other: &GeoPosition) -> f64 {
        ((self.lat - other.lat).powi(2) + (self.lng - other.lng).powi(2)).sqrt()
    }
}

impl From<[f64; 2]> for GeoPosition {
    fn from(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

impl From<GeoPosition> for [f64; 2] {
    fn from(position: GeoPosition) -> Self {
        [position.lat, position.lng]
    }
}

impl fmt::Display for GeoPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.lat, self.lng)
    }
}

/// Anything that exposes an embedded location pair.
pub trait HasLocation {
    fn location(&self) -> Option<GeoPosition>;
}

impl HasLocation for GeoPosition {
    fn location(&self) -> Option<GeoPosition> {
        Some(*self)
    }
}

/// The three accepted position shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionInput {
    /// A coordinate pair, optionally followed by a radius in meters.
    Pair {
        coordinates: Vec<f64>,
        radius: Option<f64>,
    },
    /// Discrete latitude and longitude.
    Scalars { latitude: f64, longitude: f64 },
    /// The location embedded in an object, used verbatim.
    Located { location: Option<GeoPosition> },
}

impl PositionInput {
    pub fn pair(coordinates: impl Into<Vec<f64>>) -> Self {
        Self::Pair {
            coordinates: coordinates.into(),
            radius: None,
        }
    }

    /// A pair whose trailing scalar is a radius, not a longitude.
    pub fn pair_with_radius(coordinates: impl Into<Vec<f64>>, radius: f64) -> Self {
        Self::Pair {
            coordinates: coordinates.into(),
            radius: Some(radius),
        }
    }

    pub fn scalars(latitude: f64, longitude: f64) -> Self {
        Self::Scalars {
            latitude,
            longitude,
        }
    }

    pub fn located<L: HasLocation + ?Sized>(source: &L) -> Self {
        Self::Located {
            location: source.location(),
        }
    }

    /// Canonical `[lat, lng]`, or `None` when the input is absent or does
    /// not hold exactly two coordinates.
    pub fn canonicalize(&self) -> Option<GeoPosition> {
        match self {
            Self::Pair { coordinates, .. } => match coordinates.as_slice() {
                [lat, lng] => Some(GeoPosition::new(*lat, *lng)),
                _ => None,
            },
            Self::Scalars {
                latitude,
                longitude,
            } => Some(GeoPosition::new(*latitude, *longitude)),
            Self::Located { location } => *location,
        }
    }

    /// Radius carried by a pair input.
    pub fn radius_override(&self) -> Option<f64> {
        match self {
            Self::Pair { radius, .. } => *radius,
            _ => None,
        }
    }

    /// Center and radius of a nearest query.
    ///
    /// Precedence: radius carried by a pair, then the explicit radius, then
    /// the default.
    pub fn nearest_params(&self, radius: Option<f64>, default_radius: f64) -> Option<(GeoPosition, f64)> {
        let center = self.canonicalize()?;
        let radius = self.radius_override().or(radius).unwrap_or(default_radius);
        Some((center, radius))
    }

    pub fn location_key(&self) -> Option<String> {
        self.canonicalize().map(|p| p.location_key())
    }

    pub fn address_cache_key(&self) -> Option<String> {
        self.canonicalize().map(|p| p.address_cache_key())
    }
}

impl From<GeoPosition> for PositionInput {
    fn from(position: GeoPosition) -> Self {
        Self::Located {
            location: Some(position),
        }
    }
}

impl From<[f64; 2]> for PositionInput {
    fn from(pair: [f64; 2]) -> Self {
        Self::pair(pair.to_vec())
    }
}

impl fmt::Display for PositionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pair {
                coordinates,
                radius: Some(radius),
            } => write!(f, "{:?} r={}", coordinates, radius),
            Self::Pair { coordinates, .. } => write!(f, "{:?}", coordinates),
            Self::Scalars {
                latitude,
                longitude,
            } => write!(f, "{}, {}", latitude, longitude),
            Self::Located {
                location: Some(location),
            } => write!(f, "{}", location),
            Self::Located { location: None } => f.write_str("<no location>"),
        }
    }
}

/// Inverse of [`GeoPosition::location_key`].
pub fn parse_location_key(key: &str) -> Option<GeoPosition> {
    let (lat, lng) = key.split_once(POSITION_KEY_SEPARATOR)?;
    Some(GeoPosition::new(lat.parse().ok()?, lng.parse().ok()?))
}

/// Member key of an address cache key (`addresses:{lat}_{lng}` -> `{lat}_{lng}`).
pub fn location_key_of_cache_key(cache_key: &str) -> Option<&str> {
    cache_key.strip_prefix(ADDRESS_KEY_PREFIX)
}

/// Cache key for an index member (`{lat}_{lng}` -> `addresses:{lat}_{lng}`).
pub fn cache_key_for_location_key(location_key: &str) -> String {
    format!("{}{}", ADDRESS_KEY_PREFIX, location_key)
}

/// Meters to the document store's `2d` distance unit.
///
/// Empirical factor, rounded to five decimals. Kept bit-for-bit with the
/// deployed queries; it is not a geodesic conversion.
pub fn meters_to_query_degrees(meters: f64) -> f64 {
    let degrees = meters / 100.0 / 111.12;
    format!("{:.5}", degrees).parse().unwrap_or(degrees)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stop {
        location: Option<GeoPosition>,
    }

    impl HasLocation for Stop {
        fn location(&self) -> Option<GeoPosition> {
            self.location
        }
    }

    #[test]
    fn test_key_from_scalars() {
        let input = PositionInput::scalars(-8.00292, -34.8726);
        assert_eq!(input.address_cache_key().unwrap(), "addresses:-8.00292_-34.8726");
        assert_eq!(input.location_key().unwrap(), "-8.00292_-34.8726");
    }

    #[test]
    fn test_key_from_pair_and_object_match() {
        let pair = PositionInput::pair(vec![-8.00292, -34.8726]);
        let stop = Stop {
            location: Some(GeoPosition::new(-8.00292, -34.8726)),
        };
        let located = PositionInput::located(&stop);
        assert_eq!(pair.address_cache_key(), located.address_cache_key());
    }

    #[test]
    fn test_whole_numbers_render_without_fraction() {
        assert_eq!(GeoPosition::new(-10.0, -20.0).address_cache_key(), "addresses:-10_-20");
    }

    #[test]
    fn test_keys_are_not_rounded() {
        let a = GeoPosition::new(-8.00128, -34.87363);
        let b = GeoPosition::new(-8.00128, -34.873630000000006);
        assert_ne!(a.location_key(), b.location_key());
    }

    #[test]
    fn test_malformed_pairs_are_absent() {
        assert!(PositionInput::pair(Vec::new()).canonicalize().is_none());
        assert!(PositionInput::pair(vec![1.0]).canonicalize().is_none());
        assert!(PositionInput::pair(vec![1.0, 2.0, 3.0]).canonicalize().is_none());
        assert!(PositionInput::located(&Stop { location: None })
            .canonicalize()
            .is_none());
    }

    #[test]
    fn test_pair_radius_takes_precedence() {
        let input = PositionInput::pair_with_radius(vec![-8.0, -34.0], 50.0);
        let (_, radius) = input.nearest_params(Some(10.0), 20.0).unwrap();
        assert_eq!(radius, 50.0);

        let input = PositionInput::scalars(-8.0, -34.0);
        assert_eq!(input.nearest_params(Some(10.0), 20.0).unwrap().1, 10.0);
        assert_eq!(input.nearest_params(None, 20.0).unwrap().1, 20.0);
    }

    #[test]
    fn test_parse_location_key_roundtrip() {
        let position = GeoPosition::new(-8.00292, -34.8725);
        assert_eq!(parse_location_key(&position.location_key()), Some(position));
        assert!(parse_location_key("garbage").is_none());
        assert!(parse_location_key("1_x").is_none());
    }

    #[test]
    fn test_cache_key_conversions() {
        assert_eq!(location_key_of_cache_key("addresses:-1_2"), Some("-1_2"));
        assert_eq!(location_key_of_cache_key("locations"), None);
        assert_eq!(cache_key_for_location_key("-1_2"), "addresses:-1_2");
    }

    #[test]
    fn test_meters_to_query_degrees() {
        assert_eq!(meters_to_query_degrees(20.0), 0.0018);
        assert_eq!(meters_to_query_degrees(100.0), 0.009);
    }

    #[test]
    fn test_haversine_short_distance() {
        let a = GeoPosition::new(-8.00128, -34.87363);
        let b = GeoPosition::new(-8.00128, -34.8735);
        let d = a.haversine_meters(&b);
        // 0.00013 degrees of longitude near the equator
        assert!(d > 13.0 && d < 15.0, "distance was {}", d);
        assert_eq!(a.haversine_meters(&a), 0.0);
    }

    #[test]
    fn test_indexable_bounds() {
        assert!(GeoPosition::new(-8.0, -34.0).is_indexable());
        assert!(!GeoPosition::new(89.0, 0.0).is_indexable());
        assert!(!GeoPosition::new(0.0, 181.0).is_indexable());
        assert!(!GeoPosition::new(f64::NAN, 0.0).is_indexable());
    }

    proptest::proptest! {
        #[test]
        fn prop_canonicalize_is_idempotent(lat in -90.0f64..90.0, lng in -180.0f64..180.0) {
            let input = PositionInput::pair(vec![lat, lng]);
            let canonical = input.canonicalize().unwrap();
            let again = PositionInput::from(canonical);
            proptest::prop_assert_eq!(input.address_cache_key(), again.address_cache_key());
            proptest::prop_assert_eq!(again.canonicalize(), Some(canonical));
        }

        #[test]
        fn prop_location_key_parses_back(lat in -90.0f64..90.0, lng in -180.0f64..180.0) {
            let position = GeoPosition::new(lat, lng);
            proptest::prop_assert_eq!(parse_location_key(&position.location_key()), Some(position));
        }
    }

    #[test]
    fn test_serializes_as_array() {
        let json = serde_json::to_string(&GeoPosition::new(-8.5, -34.25)).unwrap();
        assert_eq!(json, "[-8.5,-34.25]");
        let back: GeoPosition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GeoPosition::new(-8.5, -34.25));
    }
}
