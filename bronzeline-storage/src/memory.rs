//! In-memory stores backed by DashMap.

use crate::slot::{MappingSlot, UpsertEffect};
use crate::{BulkUpsertSummary, ConfirmMode, ConfirmOutcome, LineageStore, MappingStore};
use async_trait::async_trait;
use bronzeline_core::{
    ConnectionAlias, LineageRecord, LineageResult, Mapping, MappingTier,
    ProcedureIdentity, TableRef,
};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};

type SlotKey = (MappingTier, TableRef);

/// Mapping store held in process memory.
///
/// Each `(tier, from)` key lives in one DashMap entry; the entry's shard
/// lock makes confirm a compare-and-swap.
#[derive(Debug, Default)]
pub struct InMemoryMappingStore {
    slots: DashMap<SlotKey, MappingSlot>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect(&self, tier: MappingTier, pick: impl Fn(&MappingSlot) -> Vec<Mapping>) -> Vec<Mapping> {
        let mut ordered: BTreeMap<TableRef, Vec<Mapping>> = BTreeMap::new();
        for entry in self.slots.iter().filter(|e| e.key().0 == tier) {
            let picked = pick(entry.value());
            if !picked.is_empty() {
                ordered.insert(entry.key().1.clone(), picked);
            }
        }
        ordered.into_values().flatten().collect()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn confirm(&self, mapping: Mapping, mode: ConfirmMode) -> LineageResult<ConfirmOutcome> {
        let key = (mapping.tier, mapping.from.clone());
        let mut slot = self.slots.entry(key).or_default();
        slot.confirm(mapping, mode)
    }

    async fn bulk_upsert(&self, mappings: Vec<Mapping>) -> LineageResult<BulkUpsertSummary> {
        let mut summary = BulkUpsertSummary::default();
        for mapping in mappings {
            let key = (mapping.tier, mapping.from.clone());
            let effect = self.slots.entry(key).or_default().upsert(mapping);
            match effect {
                UpsertEffect::Inserted => summary.inserted += 1,
                UpsertEffect::Updated => summary.updated += 1,
                UpsertEffect::Unchanged => summary.unchanged += 1,
            }
        }
        Ok(summary)
    }

    async fn get_confirmed(&self, tier: MappingTier, from: &TableRef) -> LineageResult<Option<Mapping>> {
        Ok(self
            .slots
            .get(&(tier, from.clone()))
            .and_then(|slot| slot.confirmed.clone()))
    }

    async fn list_confirmed(&self, tier: MappingTier) -> LineageResult<Vec<Mapping>> {
        Ok(self.collect(tier, |slot| slot.confirmed.iter().cloned().collect()))
    }

    async fn record_candidates(
        &self,
        tier: MappingTier,
        from: &TableRef,
        candidates: Vec<Mapping>,
    ) -> LineageResult<bool> {
        let mut slot = self.slots.entry((tier, from.clone())).or_default();
        Ok(slot.record_candidates(candidates))
    }

    async fn list_candidates(&self, tier: MappingTier) -> LineageResult<Vec<Mapping>> {
        Ok(self.collect(tier, |slot| slot.candidates.clone()))
    }

    async fn delete_confirmed(&self, tier: MappingTier, from: &TableRef) -> LineageResult<bool> {
        let key = (tier, from.clone());
        let removed = match self.slots.get_mut(&key) {
            Some(mut slot) => slot.confirmed.take().is_some(),
            None => false,
        };
        self.slots.remove_if(&key, |_, slot| slot.is_empty());
        Ok(removed)
    }
}

/// Lineage store held in process memory, sharded by connection.
#[derive(Debug, Default)]
pub struct InMemoryLineageStore {
    records: DashMap<ConnectionAlias, HashMap<String, LineageRecord>>,
}

impl InMemoryLineageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LineageStore for InMemoryLineageStore {
    async fn get(&self, identity: &ProcedureIdentity) -> LineageResult<Option<LineageRecord>> {
        Ok(self
            .records
            .get(&identity.connection_alias)
            .and_then(|procs| procs.get(&identity.procedure_name).cloned()))
    }

    async fn put(&self, record: LineageRecord) -> LineageResult<()> {
        let identity = record.procedure_identity.clone();
        self.records
            .entry(identity.connection_alias)
            .or_default()
            .insert(identity.procedure_name, record);
        Ok(())
    }

    async fn hashes_for(&self, alias: &str) -> LineageResult<HashMap<String, String>> {
        Ok(self
            .records
            .get(alias)
            .map(|procs| {
                procs
                    .iter()
                    .map(|(name, record)| (name.clone(), record.source_definition_hash.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list(&self, alias: &str) -> LineageResult<Vec<LineageRecord>> {
        let mut records: Vec<LineageRecord> = self
            .records
            .get(alias)
            .map(|procs| procs.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| {
            a.procedure_identity
                .procedure_name
                .cmp(&b.procedure_identity.procedure_name)
        });
        Ok(records)
    }

    async fn delete(&self, identity: &ProcedureIdentity) -> LineageResult<bool> {
        Ok(self
            .records
            .get_mut(&identity.connection_alias)
            .map(|mut procs| procs.remove(&identity.procedure_name).is_some())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bronzeline_core::{content_hash, Provenance};
    use chrono::Utc;
    use std::sync::Arc;

    fn alias(s: &str) -> ConnectionAlias {
        ConnectionAlias::new(s).unwrap()
    }

    fn table(a: &str, schema: &str, name: &str) -> TableRef {
        TableRef::new(alias(a), "", schema, name)
    }

    fn confirmed(from: &str, to: &str, provenance: Provenance) -> Mapping {
        Mapping::confirmed(
            MappingTier::SourceToStage,
            table("erp", "dbo", from),
            table("stage", "stg", to),
            1.0,
            provenance,
        )
    }

    fn record(proc_name: &str, text: &str) -> LineageRecord {
        LineageRecord {
            procedure_identity: ProcedureIdentity::new(alias("conn1"), proc_name),
            source_definition_hash: content_hash(text),
            summary: format!("loads {}", proc_name),
            target_table: None,
            column_mappings: vec![],
            computed_at: Utc::now(),
            parse_fallback: false,
        }
    }

    #[tokio::test]
    async fn test_confirm_and_list() {
        let store = InMemoryMappingStore::new();
        store
            .confirm(confirmed("orders", "orders", Provenance::Manual), ConfirmMode::IfAbsent)
            .await
            .unwrap();
        store
            .confirm(confirmed("customer", "customer", Provenance::Auto), ConfirmMode::IfAbsent)
            .await
            .unwrap();

        let listed = store.list_confirmed(MappingTier::SourceToStage).await.unwrap();
        let froms: Vec<&str> = listed.iter().map(|m| m.from.table.as_str()).collect();
        assert_eq!(froms, vec!["customer", "orders"]);
        assert!(store
            .list_confirmed(MappingTier::StageToBronze)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_candidates_recorded_and_cleared_on_confirm() {
        let store = InMemoryMappingStore::new();
        let from = table("erp", "dbo", "orders");
        let candidate = Mapping::candidate(
            MappingTier::SourceToStage,
            from.clone(),
            table("stage", "stg", "orders"),
            0.6,
        );
        assert!(store
            .record_candidates(MappingTier::SourceToStage, &from, vec![candidate.clone()])
            .await
            .unwrap());
        assert_eq!(
            store.list_candidates(MappingTier::SourceToStage).await.unwrap().len(),
            1
        );

        store
            .confirm(confirmed("orders", "orders", Provenance::Promoted), ConfirmMode::IfAbsent)
            .await
            .unwrap();
        assert!(store
            .list_candidates(MappingTier::SourceToStage)
            .await
            .unwrap()
            .is_empty());

        // A late candidate write does not resurrect candidates next to the confirmed mapping.
        assert!(!store
            .record_candidates(MappingTier::SourceToStage, &from, vec![candidate])
            .await
            .unwrap());
        assert!(store
            .list_candidates(MappingTier::SourceToStage)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_confirmed() {
        let store = InMemoryMappingStore::new();
        let m = confirmed("orders", "orders", Provenance::Manual);
        let from = m.from.clone();
        store.confirm(m, ConfirmMode::IfAbsent).await.unwrap();

        assert!(store.delete_confirmed(MappingTier::SourceToStage, &from).await.unwrap());
        assert!(!store.delete_confirmed(MappingTier::SourceToStage, &from).await.unwrap());
        assert!(store
            .get_confirmed(MappingTier::SourceToStage, &from)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_bulk_upsert_counts() {
        let store = InMemoryMappingStore::new();
        store
            .confirm(confirmed("orders", "orders", Provenance::Manual), ConfirmMode::IfAbsent)
            .await
            .unwrap();

        let summary = store
            .bulk_upsert(vec![
                confirmed("orders", "orders", Provenance::Manual),
                confirmed("customer", "customer", Provenance::Manual),
                confirmed("invoice", "invoice", Provenance::Manual),
            ])
            .await
            .unwrap();
        assert_eq!(
            summary,
            BulkUpsertSummary {
                inserted: 2,
                updated: 0,
                unchanged: 1
            }
        );

        let summary = store
            .bulk_upsert(vec![confirmed("orders", "order_hdr", Provenance::Manual)])
            .await
            .unwrap();
        assert_eq!(summary.updated, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirms_leave_one_winner() {
        let store = Arc::new(InMemoryMappingStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let target = format!("orders_{}", i);
                store
                    .confirm(confirmed("orders", &target, Provenance::Manual), ConfirmMode::IfAbsent)
                    .await
            }));
        }

        let mut created = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(ConfirmOutcome::Created { .. }) => created += 1,
                Err(e) if e.status_class() == 409 => conflicts += 1,
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(conflicts, 15);
        assert_eq!(
            store.list_confirmed(MappingTier::SourceToStage).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_lineage_put_replaces_and_hashes() {
        let store = InMemoryLineageStore::new();
        store.put(record("p1", "v1")).await.unwrap();
        store.put(record("p2", "v1")).await.unwrap();
        store.put(record("p1", "v2")).await.unwrap();

        let hashes = store.hashes_for("conn1").await.unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes["p1"], content_hash("v2"));
        assert!(store.hashes_for("other").await.unwrap().is_empty());

        let names: Vec<String> = store
            .list("conn1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.procedure_identity.procedure_name)
            .collect();
        assert_eq!(names, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_lineage_delete() {
        let store = InMemoryLineageStore::new();
        let r = record("p1", "v1");
        let identity = r.procedure_identity.clone();
        store.put(r).await.unwrap();
        assert!(store.delete(&identity).await.unwrap());
        assert!(store.get(&identity).await.unwrap().is_none());
    }
}
