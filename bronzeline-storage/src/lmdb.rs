//! LMDB-backed stores.
//!
//! Uses the heed crate (Rust bindings for LMDB). Mapping slots and lineage
//! records share one unnamed database under distinct key prefixes:
//!
//! - `map\0{tier}\0{alias}\0{database}\0{schema}\0{table}` → JSON `MappingSlot`
//! - `lin\0{alias}\0{procedure}` → JSON `LineageRecord`
//!
//! LMDB allows one writer at a time, so every read-modify-write below runs
//! inside a single write transaction and is atomic per call.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bronzeline_core::{
    LineageError, LineageRecord, LineageResult, Mapping, MappingTier,
    ProcedureIdentity, StorageError, TableRef,
};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::slot::{MappingSlot, UpsertEffect};
use crate::{BulkUpsertSummary, ConfirmMode, ConfirmOutcome, LineageStore, MappingStore};

const SEP: u8 = 0;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbError> for LineageError {
    fn from(e: LmdbError) -> Self {
        match e {
            LmdbError::Serialization(reason) | LmdbError::Deserialization(reason) => {
                LineageError::Storage(StorageError::Serialization { reason })
            }
            other => LineageError::Storage(StorageError::TransactionFailed {
                reason: other.to_string(),
            }),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbError {
    LmdbError::Transaction(e.to_string())
}

/// Durable mapping and lineage store.
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbStore {
    /// Open (or create) a store.
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB store");
        Ok(Self { env, db })
    }

    fn read<T: DeserializeOwned>(&self, txn: &RoTxn, key: &[u8]) -> Result<Option<T>, LmdbError> {
        match self.db.get(txn, key).map_err(txn_err)? {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| LmdbError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, T)>, LmdbError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut out = Vec::new();
        for item in self.db.prefix_iter(&rtxn, prefix).map_err(txn_err)? {
            let (key, bytes) = item.map_err(txn_err)?;
            let value: T = serde_json::from_slice(bytes)
                .map_err(|e| LmdbError::Deserialization(e.to_string()))?;
            out.push((key.to_vec(), value));
        }
        Ok(out)
    }

    /// Read-modify-write one mapping slot inside a single write transaction.
    fn update_slot<R>(
        &self,
        tier: MappingTier,
        from: &TableRef,
        apply: impl FnOnce(&mut MappingSlot) -> LineageResult<R>,
    ) -> LineageResult<R> {
        let key = slot_key(tier, from);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut slot: MappingSlot = self.read(&wtxn, &key)?.unwrap_or_default();
        // Dropping wtxn without commit aborts it.
        let result = apply(&mut slot)?;
        self.write_slot(&mut wtxn, &key, &slot)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(result)
    }

    fn write_slot(&self, wtxn: &mut heed::RwTxn, key: &[u8], slot: &MappingSlot) -> Result<(), LmdbError> {
        if slot.is_empty() {
            self.db.delete(wtxn, key).map_err(txn_err)?;
        } else {
            self.db.put(wtxn, key, &encode(slot)?).map_err(txn_err)?;
        }
        Ok(())
    }

    fn list_slots(&self, tier: MappingTier) -> Result<Vec<MappingSlot>, LmdbError> {
        let mut slots: Vec<MappingSlot> = self
            .scan(&tier_prefix(tier))?
            .into_iter()
            .map(|(_, slot)| slot)
            .collect();
        slots.sort_by(|a, b| slot_from(a).cmp(&slot_from(b)));
        Ok(slots)
    }
}

fn slot_from(slot: &MappingSlot) -> Option<&TableRef> {
    slot.confirmed
        .as_ref()
        .or_else(|| slot.candidates.first())
        .map(|m| &m.from)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LmdbError> {
    serde_json::to_vec(value).map_err(|e| LmdbError::Serialization(e.to_string()))
}

fn join_key(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(SEP);
        }
        key.extend_from_slice(part.as_bytes());
    }
    key
}

fn tier_prefix(tier: MappingTier) -> Vec<u8> {
    let mut key = join_key(&["map", tier.as_db_str()]);
    key.push(SEP);
    key
}

fn slot_key(tier: MappingTier, from: &TableRef) -> Vec<u8> {
    join_key(&[
        "map",
        tier.as_db_str(),
        from.connection_alias.as_str(),
        &from.database,
        &from.schema,
        &from.table,
    ])
}

fn alias_prefix(alias: &str) -> Vec<u8> {
    let mut key = join_key(&["lin", alias]);
    key.push(SEP);
    key
}

fn lineage_key(identity: &ProcedureIdentity) -> Vec<u8> {
    join_key(&[
        "lin",
        identity.connection_alias.as_str(),
        &identity.procedure_name,
    ])
}

#[async_trait]
impl MappingStore for LmdbStore {
    async fn confirm(&self, mapping: Mapping, mode: ConfirmMode) -> LineageResult<ConfirmOutcome> {
        let tier = mapping.tier;
        let from = mapping.from.clone();
        self.update_slot(tier, &from, |slot| slot.confirm(mapping, mode))
    }

    async fn bulk_upsert(&self, mappings: Vec<Mapping>) -> LineageResult<BulkUpsertSummary> {
        let mut summary = BulkUpsertSummary::default();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        for mapping in mappings {
            let key = slot_key(mapping.tier, &mapping.from);
            let mut slot: MappingSlot = self.read(&wtxn, &key)?.unwrap_or_default();
            match slot.upsert(mapping) {
                UpsertEffect::Inserted => summary.inserted += 1,
                UpsertEffect::Updated => summary.updated += 1,
                UpsertEffect::Unchanged => summary.unchanged += 1,
            }
            self.write_slot(&mut wtxn, &key, &slot)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(summary)
    }

    async fn get_confirmed(&self, tier: MappingTier, from: &TableRef) -> LineageResult<Option<Mapping>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let slot: Option<MappingSlot> = self.read(&rtxn, &slot_key(tier, from))?;
        Ok(slot.and_then(|s| s.confirmed))
    }

    async fn list_confirmed(&self, tier: MappingTier) -> LineageResult<Vec<Mapping>> {
        Ok(self
            .list_slots(tier)?
            .into_iter()
            .filter_map(|slot| slot.confirmed)
            .collect())
    }

    async fn record_candidates(
        &self,
        tier: MappingTier,
        from: &TableRef,
        candidates: Vec<Mapping>,
    ) -> LineageResult<bool> {
        self.update_slot(tier, from, |slot| Ok(slot.record_candidates(candidates)))
    }

    async fn list_candidates(&self, tier: MappingTier) -> LineageResult<Vec<Mapping>> {
        Ok(self
            .list_slots(tier)?
            .into_iter()
            .flat_map(|slot| slot.candidates)
            .collect())
    }

    async fn delete_confirmed(&self, tier: MappingTier, from: &TableRef) -> LineageResult<bool> {
        self.update_slot(tier, from, |slot| Ok(slot.confirmed.take().is_some()))
    }
}

#[async_trait]
impl LineageStore for LmdbStore {
    async fn get(&self, identity: &ProcedureIdentity) -> LineageResult<Option<LineageRecord>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.read(&rtxn, &lineage_key(identity))?)
    }

    async fn put(&self, record: LineageRecord) -> LineageResult<()> {
        let key = lineage_key(&record.procedure_identity);
        let bytes = encode(&record)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.put(&mut wtxn, &key, &bytes).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn hashes_for(&self, alias: &str) -> LineageResult<HashMap<String, String>> {
        Ok(self
            .scan::<LineageRecord>(&alias_prefix(alias))?
            .into_iter()
            .map(|(_, r)| (r.procedure_identity.procedure_name, r.source_definition_hash))
            .collect())
    }

    async fn list(&self, alias: &str) -> LineageResult<Vec<LineageRecord>> {
        // Keys sort by procedure name within the alias prefix.
        Ok(self
            .scan::<LineageRecord>(&alias_prefix(alias))?
            .into_iter()
            .map(|(_, r)| r)
            .collect())
    }

    async fn delete(&self, identity: &ProcedureIdentity) -> LineageResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self
            .db
            .delete(&mut wtxn, &lineage_key(identity))
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bronzeline_core::{content_hash, ConnectionAlias, Provenance};
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    fn alias(s: &str) -> ConnectionAlias {
        ConnectionAlias::new(s).unwrap()
    }

    fn confirmed(from: &str, to: &str) -> Mapping {
        Mapping::confirmed(
            MappingTier::StageToBronze,
            TableRef::new(alias("stage"), "", "stg", from),
            TableRef::new(alias("lake"), "bronze_db", "brz", to),
            1.0,
            Provenance::Manual,
        )
    }

    fn record(alias_name: &str, proc_name: &str, text: &str) -> LineageRecord {
        LineageRecord {
            procedure_identity: ProcedureIdentity::new(alias(alias_name), proc_name),
            source_definition_hash: content_hash(text),
            summary: "summary".to_string(),
            target_table: None,
            column_mappings: vec![],
            computed_at: Utc::now(),
            parse_fallback: false,
        }
    }

    #[tokio::test]
    async fn test_confirm_conflict_and_persistence() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = LmdbStore::open(temp_dir.path(), 10).unwrap();
            let outcome = store
                .confirm(confirmed("customer", "customer"), ConfirmMode::IfAbsent)
                .await
                .unwrap();
            assert!(matches!(outcome, ConfirmOutcome::Created { .. }));

            let err = store
                .confirm(confirmed("customer", "client"), ConfirmMode::IfAbsent)
                .await
                .unwrap_err();
            assert_eq!(err.status_class(), 409);
        }

        let reopened = LmdbStore::open(temp_dir.path(), 10).unwrap();
        let listed = reopened.list_confirmed(MappingTier::StageToBronze).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].to.table, "customer");
    }

    #[tokio::test]
    async fn test_tiers_are_isolated() {
        let (store, _dir) = create_test_store();
        store
            .confirm(confirmed("orders", "orders"), ConfirmMode::IfAbsent)
            .await
            .unwrap();
        assert!(store
            .list_confirmed(MappingTier::SourceToStage)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_bulk_upsert_and_delete() {
        let (store, _dir) = create_test_store();
        let summary = store
            .bulk_upsert(vec![confirmed("a", "a"), confirmed("b", "b")])
            .await
            .unwrap();
        assert_eq!(summary.inserted, 2);

        let summary = store
            .bulk_upsert(vec![confirmed("a", "a"), confirmed("b", "b2")])
            .await
            .unwrap();
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.updated, 1);

        let from = confirmed("a", "a").from;
        assert!(store.delete_confirmed(MappingTier::StageToBronze, &from).await.unwrap());
        assert!(store
            .get_confirmed(MappingTier::StageToBronze, &from)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lineage_alias_prefix_does_not_leak() {
        let (store, _dir) = create_test_store();
        store.put(record("conn1", "p1", "v1")).await.unwrap();
        store.put(record("conn10", "p1", "v1")).await.unwrap();
        store.put(record("conn1", "p2", "v1")).await.unwrap();
        store.put(record("conn1", "p1", "v2")).await.unwrap();

        let hashes = store.hashes_for("conn1").await.unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes["p1"], content_hash("v2"));

        let names: Vec<String> = store
            .list("conn1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.procedure_identity.procedure_name)
            .collect();
        assert_eq!(names, vec!["p1", "p2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirms_leave_one_winner() {
        let (store, _dir) = create_test_store();
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .confirm(confirmed("orders", &format!("orders_{}", i)), ConfirmMode::IfAbsent)
                    .await
            }));
        }
        let mut created = 0;
        for handle in handles {
            if let Ok(ConfirmOutcome::Created { .. }) = handle.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }
}
