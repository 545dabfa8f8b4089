//! File record store selection

use anyhow::{Context, Result};
use facevault_core::{Config, StoreBackend};
use facevault_db::{FileRecordStore, InMemoryFileRecordStore, PgFileRecordStore};
use std::sync::Arc;

use super::database;

pub async fn setup_store(config: &Config) -> Result<Arc<dyn FileRecordStore>> {
    match config.store.backend {
        StoreBackend::Postgres => {
            let url = config
                .store
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres store")?;
            let pool = database::setup_database(config, url).await?;
            Ok(Arc::new(PgFileRecordStore::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory file record store; records are lost on restart");
            Ok(Arc::new(InMemoryFileRecordStore::new()))
        }
    }
}
