//! Configuration types
//!
//! Everything is env-overridable. The `test` environment switches the store
//! locations to their `_TEST` variants so test runs never touch the
//! development or production stores.

use crate::error::{ConfigError, LocusResult};

/// Default search radius for nearest lookups, in meters.
pub const DEFAULT_MAX_DISTANCE_METERS: f64 = 20.0;

/// Name of the sorted geo structure holding indexed positions.
pub const DEFAULT_LOCATIONS_INDEX: &str = "locations";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "test" => Some(Self::Test),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn is_test(&self) -> bool {
        matches!(self, Self::Test)
    }
}

/// Master configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LocusConfig {
    pub environment: Environment,
    /// Radius used when callers omit one.
    pub max_distance_m: f64,
    /// Name of the geo index inside the key-value store.
    pub locations_index: String,
    /// Document store connection URL.
    pub database_url: String,
    /// Directory of the LMDB key-value store.
    pub cache_path: String,
    pub cache_max_size_mb: usize,
    pub db_pool_size: usize,
    /// Buffer of the save-notification channel.
    pub save_channel_capacity: usize,
}

impl Default for LocusConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            max_distance_m: DEFAULT_MAX_DISTANCE_METERS,
            locations_index: DEFAULT_LOCATIONS_INDEX.to_string(),
            database_url: "postgres://postgres@localhost:5432/locus".to_string(),
            cache_path: "./data/locus-cache".to_string(),
            cache_max_size_mb: 64,
            db_pool_size: 16,
            save_channel_capacity: 1024,
        }
    }
}

impl LocusConfig {
    /// Build the configuration from process environment variables.
    ///
    /// Environment variables:
    /// - `LOCUS_ENV`: `development`, `test` or `production` (default: development)
    /// - `LOCUS_MAX_DISTANCE`: default search radius in meters (default: 20)
    /// - `LOCUS_LOCATIONS_INDEX`: geo index name (default: locations)
    /// - `LOCUS_DATABASE_URL` / `LOCUS_DATABASE_URL_TEST`
    /// - `LOCUS_CACHE_PATH` / `LOCUS_CACHE_PATH_TEST`
    /// - `LOCUS_CACHE_MAX_SIZE_MB` (default: 64)
    /// - `LOCUS_DB_POOL_SIZE` (default: 16)
    /// - `LOCUS_SAVE_CHANNEL_CAPACITY` (default: 1024)
    pub fn from_env() -> LocusResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> LocusResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let environment = match lookup("LOCUS_ENV") {
            Some(value) => Environment::parse(&value).ok_or_else(|| ConfigError::InvalidValue {
                field: "LOCUS_ENV".to_string(),
                value: value.clone(),
                reason: "expected development, test or production".to_string(),
            })?,
            None => defaults.environment,
        };

        let (url_key, path_key) = if environment.is_test() {
            ("LOCUS_DATABASE_URL_TEST", "LOCUS_CACHE_PATH_TEST")
        } else {
            ("LOCUS_DATABASE_URL", "LOCUS_CACHE_PATH")
        };

        let config = Self {
            environment,
            max_distance_m: parse_or(&lookup, "LOCUS_MAX_DISTANCE", defaults.max_distance_m)?,
            locations_index: lookup("LOCUS_LOCATIONS_INDEX").unwrap_or(defaults.locations_index),
            database_url: lookup(url_key).unwrap_or(defaults.database_url),
            cache_path: lookup(path_key).unwrap_or(defaults.cache_path),
            cache_max_size_mb: parse_or(&lookup, "LOCUS_CACHE_MAX_SIZE_MB", defaults.cache_max_size_mb)?,
            db_pool_size: parse_or(&lookup, "LOCUS_DB_POOL_SIZE", defaults.db_pool_size)?,
            save_channel_capacity: parse_or(
                &lookup,
                "LOCUS_SAVE_CHANNEL_CAPACITY",
                defaults.save_channel_capacity,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LocusResult<()> {
        if !(self.max_distance_m.is_finite() && self.max_distance_m > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "max_distance_m".to_string(),
                value: self.max_distance_m.to_string(),
                reason: "must be a positive number of meters".to_string(),
            }
            .into());
        }

        for (field, value) in [
            ("locations_index", &self.locations_index),
            ("database_url", &self.database_url),
            ("cache_path", &self.cache_path),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: field.to_string(),
                }
                .into());
            }
        }

        for (field, value) in [
            ("cache_max_size_mb", self.cache_max_size_mb),
            ("db_pool_size", self.db_pool_size),
            ("save_channel_capacity", self.save_channel_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> LocusResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: "could not be parsed".to_string(),
            }
            .into()
        }),
        None => Ok(default),
    }
}
