//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use bronzeline_core::LineageError;
use bronzeline_engine::{CatalogAdapter, LineagePipeline, StaticCatalog};
use bronzeline_llm::{build_analyzer, UsageTracker};
use bronzeline_storage::{InMemoryLineageStore, InMemoryMappingStore, LineageStore, LmdbStore, MappingStore};

use crate::config::{ServerConfig, StorageBackend};
use crate::error::{ApiError, ApiResult};

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<LineagePipeline>,
    /// Token and fallback counters of the configured analyzer.
    pub usage: Arc<UsageTracker>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<LineagePipeline>, usage: Arc<UsageTracker>) -> Self {
        Self {
            pipeline,
            usage,
            start_time: Instant::now(),
        }
    }

    /// Wire the catalog, stores and analyzer named by `config`.
    pub fn from_config(config: &ServerConfig) -> ApiResult<Self> {
        let catalog: Arc<dyn CatalogAdapter> = match &config.catalog.snapshot {
            Some(path) => Arc::new(StaticCatalog::load(path)?),
            None => {
                tracing::warn!("No catalog snapshot configured; every connection reports as unavailable");
                Arc::new(StaticCatalog::new())
            }
        };

        let (mappings, lineage): (Arc<dyn MappingStore>, Arc<dyn LineageStore>) = match config.storage.backend {
            StorageBackend::Memory => {
                let mappings: Arc<dyn MappingStore> = Arc::new(InMemoryMappingStore::new());
                let lineage: Arc<dyn LineageStore> = Arc::new(InMemoryLineageStore::new());
                (mappings, lineage)
            }
            StorageBackend::Lmdb => {
                let path = config
                    .storage
                    .path
                    .as_ref()
                    .ok_or_else(|| ApiError::missing_field("storage.path"))?;
                let store = Arc::new(
                    LmdbStore::open(path, config.storage.max_size_mb).map_err(LineageError::from)?,
                );
                let mappings: Arc<dyn MappingStore> = store.clone();
                let lineage: Arc<dyn LineageStore> = store;
                (mappings, lineage)
            }
        };

        let usage = Arc::new(UsageTracker::new());
        let analyzer = build_analyzer(&config.analyzer, usage.clone())?;
        let registry = config
            .registry()
            .map_err(|e| ApiError::invalid_input(e.to_string()))?;

        let pipeline = LineagePipeline::new(
            catalog,
            mappings,
            lineage,
            analyzer,
            registry,
            config.engine.clone(),
        )?;

        tracing::info!(
            connections = pipeline.registry().len(),
            backend = ?config.storage.backend,
            provider = ?config.analyzer.provider,
            "Pipeline ready"
        );
        Ok(Self::new(Arc::new(pipeline), usage))
    }
}
