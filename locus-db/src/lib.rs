//! Locus DB - PostgreSQL Store and Runtime
//!
//! - [`db`]: connection pool and the PostgreSQL address repository
//! - [`telemetry`]: tracing subscriber setup
//! - [`runtime`]: explicit connect/close lifecycle wiring every component

pub mod db;
pub mod runtime;
pub mod telemetry;

pub use db::{pool_error, query_error, DbConfig, PgAddressRepository, ADDRESSES_TABLE};
pub use runtime::{LocusCoordinator, LocusRuntime};
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError, DEFAULT_LOG_FILTER};
