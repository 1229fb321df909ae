//! Address records
//!
//! `Address` is the record of truth persisted in the document store and
//! mirrored, as a JSON snapshot, in the key-value cache. Two fields are
//! derived and recomputed on every save: `location` (from `geometry`) and
//! `is_bus_station` (from `types`).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ValidationError;
use crate::position::{GeoPosition, HasLocation};
use crate::{new_address_id, AddressId, Timestamp};

/// Place types that mark an address as a bus station.
pub const BUS_STATION_TYPES: [&str; 2] = ["bus_station", "transit_station"];

/// `{lat, lng}` literal inside a geocoder geometry.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLngLiteral {
    pub lat: f64,
    pub lng: f64,
}

/// Geometry payload returned by the geocoder.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub location: LatLngLiteral,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<JsonValue>,
}

impl Geometry {
    pub fn at(lat: f64, lng: f64) -> Self {
        Self {
            location: LatLngLiteral { lat, lng },
            ..Default::default()
        }
    }
}

/// A geocoded postal address.
///
/// Every field has a serde default so partial cache snapshots still decode;
/// required fields are enforced by [`Address::validate`] on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub address_id: AddressId,
    pub street_name: String,
    pub street_number: Option<String>,
    pub postal_code: Option<String>,
    pub neighborhood: Option<String>,
    pub city: String,
    pub state: String,
    pub state_short: Option<String>,
    pub country: String,
    pub country_short: Option<String>,
    pub formatted_address: String,
    pub place_id: Option<String>,
    pub geometry: Option<Geometry>,
    pub location: Option<GeoPosition>,
    pub is_bus_station: bool,
    pub types: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Default for Address {
    fn default() -> Self {
        Self {
            address_id: AddressId::nil(),
            street_name: String::new(),
            street_number: None,
            postal_code: None,
            neighborhood: None,
            city: String::new(),
            state: String::new(),
            state_short: None,
            country: String::new(),
            country_short: None,
            formatted_address: String::new(),
            place_id: None,
            geometry: None,
            location: None,
            is_bus_station: false,
            types: Vec::new(),
            created_at: Timestamp::UNIX_EPOCH,
            updated_at: Timestamp::UNIX_EPOCH,
        }
    }
}

impl Address {
    /// A new, unsaved address with the required fields filled in.
    pub fn new(
        street_name: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        country: impl Into<String>,
        formatted_address: impl Into<String>,
    ) -> Self {
        Self {
            address_id: new_address_id(),
            street_name: street_name.into(),
            city: city.into(),
            state: state.into(),
            country: country.into(),
            formatted_address: formatted_address.into(),
            ..Default::default()
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_location(mut self, location: GeoPosition) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Check required fields. Empty strings count as missing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("street_name", &self.street_name),
            ("city", &self.city),
            ("state", &self.state),
            ("country", &self.country),
            ("formatted_address", &self.formatted_address),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::RequiredFieldMissing {
                    field: field.to_string(),
                });
            }
        }

        if self.address_id.is_nil() {
            return Err(ValidationError::InvalidValue {
                field: "address_id".to_string(),
                reason: "must not be nil".to_string(),
            });
        }

        Ok(())
    }

    /// Whether any of `types` is a station type.
    pub fn is_bus_station_type<S: AsRef<str>>(types: &[S]) -> bool {
        types
            .iter()
            .any(|t| BUS_STATION_TYPES.contains(&t.as_ref()))
    }

    /// Copy `geometry.location` into `location`. No-op without geometry.
    pub fn set_location(&mut self) -> &mut Self {
        if let Some(geometry) = &self.geometry {
            self.location = Some(GeoPosition::new(
                geometry.location.lat,
                geometry.location.lng,
            ));
        }
        self
    }

    pub fn set_is_bus_station(&mut self) -> &mut Self {
        self.is_bus_station = Self::is_bus_station_type(&self.types);
        self
    }

    /// Recompute derived fields and stamp timestamps before a write.
    ///
    /// `created_at` is only set the first time a record is saved.
    pub fn prepare_for_save(&mut self, now: Timestamp) -> &mut Self {
        self.set_location().set_is_bus_station();
        if self.created_at == Timestamp::UNIX_EPOCH {
            self.created_at = now;
        }
        self.updated_at = now;
        self
    }
}

impl HasLocation for Address {
    fn location(&self) -> Option<GeoPosition> {
        self.location
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_address() -> Address {
        Address::new("Rua da Aurora", "Recife", "Pernambuco", "Brasil", "Rua da Aurora, Recife")
    }

    #[test]
    fn test_validate_accepts_complete_address() {
        assert!(make_address().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut address = make_address();
        address.city = String::new();
        assert_eq!(
            address.validate(),
            Err(ValidationError::RequiredFieldMissing {
                field: "city".to_string()
            })
        );

        let mut address = make_address();
        address.formatted_address = "   ".to_string();
        assert!(matches!(
            address.validate(),
            Err(ValidationError::RequiredFieldMissing { field }) if field == "formatted_address"
        ));
    }

    #[test]
    fn test_bus_station_derivation() {
        let mut address = make_address().with_types(["bus_station"]);
        address.set_is_bus_station();
        assert!(address.is_bus_station);

        let mut address = make_address().with_types(["transit_station", "point_of_interest"]);
        address.set_is_bus_station();
        assert!(address.is_bus_station);

        let mut address = make_address().with_types(["restaurant"]);
        address.is_bus_station = true;
        address.set_is_bus_station();
        assert!(!address.is_bus_station);
    }

    #[test]
    fn test_location_derived_from_geometry() {
        let mut address = make_address()
            .with_location(GeoPosition::new(1.0, 1.0))
            .with_geometry(Geometry::at(-8.00128, -34.87363));
        address.set_location();
        assert_eq!(address.location, Some(GeoPosition::new(-8.00128, -34.87363)));
    }

    #[test]
    fn test_location_kept_without_geometry() {
        let mut address = make_address().with_location(GeoPosition::new(-8.0, -34.0));
        address.set_location();
        assert_eq!(address.location, Some(GeoPosition::new(-8.0, -34.0)));
    }

    #[test]
    fn test_prepare_for_save_preserves_created_at() {
        let mut address = make_address();
        let first = Utc::now();
        address.prepare_for_save(first);
        assert_eq!(address.created_at, first);

        let second = first + chrono::Duration::seconds(5);
        address.prepare_for_save(second);
        assert_eq!(address.created_at, first);
        assert_eq!(address.updated_at, second);
    }

    #[test]
    fn test_partial_snapshot_decodes() {
        let address: Address =
            serde_json::from_str(r#"{"location":[-8.00194,-34.8731]}"#).unwrap();
        assert_eq!(address.location, Some(GeoPosition::new(-8.00194, -34.8731)));
        assert!(address.street_name.is_empty());
    }

    #[test]
    fn test_json_roundtrip_is_lossless() {
        let mut address = make_address()
            .with_geometry(Geometry::at(-8.00292, -34.8725))
            .with_types(["bus_station"]);
        address.prepare_for_save(Utc::now());

        let json = serde_json::to_string(&address).unwrap();
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
