//! Bronzeline Storage - Mapping and Lineage Stores
//!
//! The two stores are the only shared mutable state in the engine. Both
//! backends give per-key atomic compare-and-swap: the in-memory backend
//! through DashMap shard locks, the LMDB backend through write transactions.

mod lmdb;
mod memory;
mod slot;

pub use lmdb::{LmdbError, LmdbStore};
pub use memory::{InMemoryLineageStore, InMemoryMappingStore};
pub use slot::MappingSlot;

use async_trait::async_trait;
use bronzeline_core::{
    LineageRecord, LineageResult, Mapping, MappingTier, ProcedureIdentity, TableRef,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// CONFIRMATION TYPES
// ============================================================================

/// How a confirm call treats an existing confirmed mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    /// Compare-and-swap on "no confirmed mapping for `from`". Re-confirming
    /// the same target is a no-op; a different target is a conflict.
    IfAbsent,
    /// Replace whatever is confirmed.
    Overwrite,
    /// Insert when absent, or refresh an existing auto-provenance mapping to
    /// the same target. User-owned mappings and different targets are left
    /// alone.
    RefreshAuto,
}

/// What a confirm call did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Created { mapping: Mapping },
    Replaced { previous: Mapping, mapping: Mapping },
    Unchanged { mapping: Mapping },
}

impl ConfirmOutcome {
    /// The mapping confirmed after the call.
    pub fn mapping(&self) -> &Mapping {
        match self {
            ConfirmOutcome::Created { mapping }
            | ConfirmOutcome::Replaced { mapping, .. }
            | ConfirmOutcome::Unchanged { mapping } => mapping,
        }
    }
}

/// Counts from a bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkUpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

// ============================================================================
// STORE TRAITS
// ============================================================================

/// Persistence for candidate and confirmed mappings, keyed by
/// `(tier, from)`.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Atomically confirm `mapping` for its `(tier, from)` key.
    async fn confirm(&self, mapping: Mapping, mode: ConfirmMode) -> LineageResult<ConfirmOutcome>;

    /// Upsert confirmed mappings by key. Callers validate the batch first.
    async fn bulk_upsert(&self, mappings: Vec<Mapping>) -> LineageResult<BulkUpsertSummary>;

    async fn get_confirmed(&self, tier: MappingTier, from: &TableRef) -> LineageResult<Option<Mapping>>;

    /// Confirmed mappings of a tier, ordered by `from`.
    async fn list_confirmed(&self, tier: MappingTier) -> LineageResult<Vec<Mapping>>;

    /// Replace the recorded candidate list for one `from`, atomically with
    /// respect to `confirm`. Returns false, recording nothing, when a
    /// mapping is already confirmed for the key.
    async fn record_candidates(
        &self,
        tier: MappingTier,
        from: &TableRef,
        candidates: Vec<Mapping>,
    ) -> LineageResult<bool>;

    /// Recorded candidates of a tier, ordered by `from`.
    async fn list_candidates(&self, tier: MappingTier) -> LineageResult<Vec<Mapping>>;

    /// Remove the confirmed mapping for `from`. Returns whether one existed.
    async fn delete_confirmed(&self, tier: MappingTier, from: &TableRef) -> LineageResult<bool>;
}

/// Persistence for lineage records, one per procedure identity.
#[async_trait]
pub trait LineageStore: Send + Sync {
    async fn get(&self, identity: &ProcedureIdentity) -> LineageResult<Option<LineageRecord>>;

    /// Store `record`, replacing any previous record for its identity.
    async fn put(&self, record: LineageRecord) -> LineageResult<()>;

    /// Stored definition hash per procedure name, for one connection.
    async fn hashes_for(&self, alias: &str) -> LineageResult<HashMap<String, String>>;

    /// Stored records for one connection, ordered by procedure name.
    async fn list(&self, alias: &str) -> LineageResult<Vec<LineageRecord>>;

    async fn delete(&self, identity: &ProcedureIdentity) -> LineageResult<bool>;
}
