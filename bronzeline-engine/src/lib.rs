//! Bronzeline Engine - Mapping Resolution and Lineage Staleness
//!
//! Proposes and persists table mappings across the Source, Stage and Bronze
//! tiers, and keeps AI-derived procedure lineage fresh against the current
//! procedure text.
//!
//! - `catalog`: the catalog adapter boundary and a static snapshot catalog
//! - `matcher`: name normalization, similarity scoring and ranking
//! - `resolver`: candidate discovery, auto-mapping and confirmation
//! - `tracker`: hash-keyed lineage cache with per-procedure single flight
//! - `pipeline`: the orchestrator callers use

pub mod catalog;
pub mod matcher;
pub mod pipeline;
pub mod resolver;
pub mod tracker;

pub use catalog::{CatalogAdapter, CatalogSnapshot, StaticCatalog, TimedCatalog};
pub use pipeline::{BulkAnalyzeReport, LineagePipeline, ProcedureResult};
pub use resolver::{AutoMapReport, ConfirmRequest, MappingResolver, SuggestReport};
pub use tracker::{LineageTracker, ProcedureStatus};

use bronzeline_core::LineageError;
use serde::{Deserialize, Serialize};

/// A failure attached to one item of a batch (a connection or a procedure)
/// that did not stop the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub target: String,
    pub status: u16,
    pub retryable: bool,
    pub message: String,
}

impl ItemFailure {
    pub fn from_error(target: impl Into<String>, error: &LineageError) -> Self {
        Self {
            target: target.into(),
            status: error.status_class(),
            retryable: error.is_retryable(),
            message: error.to_string(),
        }
    }
}
