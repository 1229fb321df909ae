//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, and the address
//! repository stored on top of it.
//!
//! Each address is kept as a JSONB document next to a `point` column
//! (`x = lat`, `y = lng`) carrying a GiST index. Nearest queries use the
//! planar `<->` operator with the radius converted to degrees, which matches
//! the behavior of a legacy-pair `2d` index.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use locus_core::{
    meters_to_query_degrees, Address, AddressId, ConfigError, GeoPosition, LocusConfig, LocusError,
    LocusResult, StorageError, StoreKind,
};
use locus_storage::{AddressRepository, SaveNotifier};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_postgres::NoTls;

/// Table holding the address documents.
pub const ADDRESSES_TABLE: &str = "addresses";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS addresses (
    address_id     UUID PRIMARY KEY,
    document       JSONB NOT NULL,
    location       POINT,
    is_bus_station BOOLEAN NOT NULL DEFAULT FALSE,
    created_at     TIMESTAMPTZ NOT NULL,
    updated_at     TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS addresses_location_idx ON addresses USING GIST (location);
"#;

// created_at of an existing row wins over the incoming one.
const UPSERT_SQL: &str = r#"
INSERT INTO addresses (address_id, document, location, is_bus_station, created_at, updated_at)
VALUES ($1, $2, point($3::float8, $4::float8), $5, $6, $7)
ON CONFLICT (address_id) DO UPDATE SET
    document = EXCLUDED.document || jsonb_build_object('created_at', addresses.document -> 'created_at'),
    location = EXCLUDED.location,
    is_bus_station = EXCLUDED.is_bus_station,
    updated_at = EXCLUDED.updated_at
RETURNING document
"#;

const NEAREST_SQL: &str = r#"
SELECT document FROM addresses
WHERE location IS NOT NULL
  AND location <-> point($1::float8, $2::float8) <= $3::float8
ORDER BY location <-> point($1::float8, $2::float8)
LIMIT 1
"#;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long to wait for a free connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_locus(&LocusConfig::default())
    }
}

impl DbConfig {
    /// Pool settings for the configured environment.
    pub fn from_locus(config: &LocusConfig) -> Self {
        Self {
            url: config.database_url.clone(),
            max_size: config.db_pool_size,
            timeout: Duration::from_secs(30),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// Connections are opened lazily, on first use.
    pub fn create_pool(&self) -> LocusResult<Pool> {
        let mut cfg = Config::new();
        cfg.url = Some(self.url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            ConfigError::InvalidValue {
                field: "database_url".to_string(),
                value: self.url.clone(),
                reason: format!("Failed to create pool: {}", e),
            }
            .into()
        })
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

/// Map a pool error. Every pool failure means the database is unreachable.
pub fn pool_error(err: deadpool_postgres::PoolError) -> LocusError {
    let reason = match &err {
        deadpool_postgres::PoolError::Timeout(_) => "connection pool exhausted".to_string(),
        deadpool_postgres::PoolError::Closed => "connection pool is closed".to_string(),
        other => other.to_string(),
    };
    StorageError::unavailable(StoreKind::Document, reason).into()
}

/// Map a query error. Errors reported by the server fail the statement;
/// anything else means the connection is gone.
pub fn query_error(err: tokio_postgres::Error) -> LocusError {
    match err.as_db_error() {
        Some(db_error) => StorageError::TransactionFailed {
            reason: db_error.message().to_string(),
        }
        .into(),
        None => StorageError::unavailable(StoreKind::Document, err.to_string()).into(),
    }
}

fn decode_document(id: &str, document: JsonValue) -> LocusResult<Address> {
    serde_json::from_value(document).map_err(|e| {
        StorageError::Serialization {
            key: id.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

// ============================================================================
// ADDRESS REPOSITORY
// ============================================================================

/// Address repository over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgAddressRepository {
    pool: Pool,
    notifier: SaveNotifier,
}

impl PgAddressRepository {
    pub fn new(pool: Pool, notifier: SaveNotifier) -> Self {
        Self { pool, notifier }
    }

    /// Create a repository from configuration.
    pub fn from_config(config: &DbConfig, notifier: SaveNotifier) -> LocusResult<Self> {
        Ok(Self::new(config.create_pool()?, notifier))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Create the table and its spatial index if they do not exist.
    pub async fn ensure_schema(&self) -> LocusResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA_SQL).await.map_err(query_error)?;
        tracing::debug!(table = ADDRESSES_TABLE, "Address schema ready");
        Ok(())
    }

    /// Close the pool. Connections in use are dropped when returned.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> LocusResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            let err = pool_error(e);
            tracing::error!(error = %err, "Failed to acquire database connection");
            err
        })
    }
}

#[async_trait]
impl AddressRepository for PgAddressRepository {
    async fn save(&self, mut address: Address) -> LocusResult<Address> {
        address.validate()?;
        address.prepare_for_save(Utc::now());

        let id = address.address_id.to_string();
        let document = serde_json::to_value(&address).map_err(|e| StorageError::Serialization {
            key: id.clone(),
            reason: e.to_string(),
        })?;
        let lat = address.location.map(|p| p.lat);
        let lng = address.location.map(|p| p.lng);

        let conn = self.get_conn().await?;
        let row = conn
            .query_one(
                UPSERT_SQL,
                &[
                    &address.address_id,
                    &document,
                    &lat,
                    &lng,
                    &address.is_bus_station,
                    &address.created_at,
                    &address.updated_at,
                ],
            )
            .await
            .map_err(query_error)?;

        let saved = decode_document(&id, row.get(0))?;
        self.notifier.notify(&saved);
        Ok(saved)
    }

    async fn find_nearest(&self, center: GeoPosition, radius_m: f64) -> LocusResult<Option<Address>> {
        let max_degrees = meters_to_query_degrees(radius_m);
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(NEAREST_SQL, &[&center.lat, &center.lng, &max_degrees])
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(decode_document(&center.location_key(), row.get(0))?)),
            None => Ok(None),
        }
    }

    async fn get(&self, id: AddressId) -> LocusResult<Option<Address>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt("SELECT document FROM addresses WHERE address_id = $1", &[&id])
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(decode_document(&id.to_string(), row.get(0))?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: AddressId) -> LocusResult<bool> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute("DELETE FROM addresses WHERE address_id = $1", &[&id])
            .await
            .map_err(query_error)?;
        Ok(deleted > 0)
    }

    fn subscribe(&self) -> broadcast::Receiver<Address> {
        self.notifier.subscribe()
    }
}
