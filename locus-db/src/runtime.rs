//! Runtime wiring
//!
//! Owns the store handles and the write-through task. Nothing is global:
//! build a [`LocusRuntime`] with [`LocusRuntime::connect`], pass the
//! coordinator down, and call [`LocusRuntime::close`] at shutdown.

use std::sync::Arc;

use locus_core::{LocusConfig, LocusResult};
use locus_storage::{AddressCacheCoordinator, LmdbKeyValueStore, SaveNotifier};
use tokio::task::JoinHandle;

use crate::db::{DbConfig, PgAddressRepository};

/// Coordinator over the LMDB cache and the PostgreSQL repository.
pub type LocusCoordinator = AddressCacheCoordinator<LmdbKeyValueStore, PgAddressRepository>;

pub struct LocusRuntime {
    config: LocusConfig,
    coordinator: Arc<LocusCoordinator>,
    write_through: JoinHandle<()>,
}

impl LocusRuntime {
    /// Open the cache, create the pool, make sure the schema exists and
    /// start the write-through task.
    pub async fn connect(config: LocusConfig) -> LocusResult<Self> {
        config.validate()?;

        let store = Arc::new(LmdbKeyValueStore::new(
            &config.cache_path,
            config.cache_max_size_mb,
        )?);
        let repository = Arc::new(PgAddressRepository::from_config(
            &DbConfig::from_locus(&config),
            SaveNotifier::new(config.save_channel_capacity),
        )?);
        repository.ensure_schema().await?;

        let coordinator = Arc::new(AddressCacheCoordinator::from_config(
            store, repository, &config,
        ));
        let write_through = coordinator.spawn_write_through();

        tracing::info!(
            environment = ?config.environment,
            cache_path = %config.cache_path,
            max_distance_m = config.max_distance_m,
            "Locus runtime connected"
        );

        Ok(Self {
            config,
            coordinator,
            write_through,
        })
    }

    pub fn config(&self) -> &LocusConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<LocusCoordinator> {
        &self.coordinator
    }

    pub fn repository(&self) -> &Arc<PgAddressRepository> {
        self.coordinator.repository()
    }

    /// Stop the write-through task, flush the cache and close the pool.
    pub async fn close(self) -> LocusResult<()> {
        self.write_through.abort();
        if let Err(e) = self.write_through.await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "Write-through task failed");
            }
        }

        self.coordinator.store().sync()?;
        self.coordinator.repository().close();

        tracing::info!("Locus runtime closed");
        Ok(())
    }
}
