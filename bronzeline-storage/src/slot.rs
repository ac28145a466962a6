//! Per-key mapping state shared by both backends.

use crate::{ConfirmMode, ConfirmOutcome};
use bronzeline_core::{ConflictError, LineageResult, Mapping, MappingState, Provenance};
use serde::{Deserialize, Serialize};

/// Everything stored for one `(tier, from)` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingSlot {
    pub confirmed: Option<Mapping>,
    #[serde(default)]
    pub candidates: Vec<Mapping>,
}

/// Effect of an upsert on one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpsertEffect {
    Inserted,
    Updated,
    Unchanged,
}

impl MappingSlot {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_none() && self.candidates.is_empty()
    }

    /// Apply a confirm under `mode`. Must run under the key's lock.
    pub(crate) fn confirm(&mut self, mut mapping: Mapping, mode: ConfirmMode) -> LineageResult<ConfirmOutcome> {
        mapping.state = MappingState::Confirmed;

        let Some(existing) = self.confirmed.clone() else {
            self.candidates.clear();
            self.confirmed = Some(mapping.clone());
            return Ok(ConfirmOutcome::Created { mapping });
        };

        let same_target = existing.to == mapping.to;
        match mode {
            ConfirmMode::IfAbsent if same_target => Ok(ConfirmOutcome::Unchanged { mapping: existing }),
            ConfirmMode::IfAbsent => Err(ConflictError::MappingAlreadyConfirmed {
                tier: existing.tier,
                from: existing.from.to_string(),
                existing_to: existing.to.to_string(),
            }
            .into()),
            ConfirmMode::RefreshAuto => {
                let refreshable = existing.provenance == Provenance::Auto
                    && mapping.provenance == Provenance::Auto
                    && same_target
                    && !existing.same_content(&mapping);
                if refreshable {
                    Ok(self.replace(existing, mapping))
                } else {
                    Ok(ConfirmOutcome::Unchanged { mapping: existing })
                }
            }
            ConfirmMode::Overwrite => Ok(self.overwrite(mapping)),
        }
    }

    /// Replace the candidate list unless a mapping is confirmed. Must run
    /// under the key's lock.
    pub(crate) fn record_candidates(&mut self, candidates: Vec<Mapping>) -> bool {
        if self.confirmed.is_some() {
            return false;
        }
        self.candidates = candidates
            .into_iter()
            .map(|mut m| {
                m.state = MappingState::Candidate;
                m
            })
            .collect();
        true
    }

    pub(crate) fn upsert(&mut self, mapping: Mapping) -> UpsertEffect {
        match self.overwrite(mapping) {
            ConfirmOutcome::Created { .. } => UpsertEffect::Inserted,
            ConfirmOutcome::Replaced { .. } => UpsertEffect::Updated,
            ConfirmOutcome::Unchanged { .. } => UpsertEffect::Unchanged,
        }
    }

    fn overwrite(&mut self, mut mapping: Mapping) -> ConfirmOutcome {
        mapping.state = MappingState::Confirmed;
        match self.confirmed.clone() {
            None => {
                self.candidates.clear();
                self.confirmed = Some(mapping.clone());
                ConfirmOutcome::Created { mapping }
            }
            Some(existing) if existing.same_content(&mapping) => {
                ConfirmOutcome::Unchanged { mapping: existing }
            }
            Some(existing) => self.replace(existing, mapping),
        }
    }

    fn replace(&mut self, previous: Mapping, mut mapping: Mapping) -> ConfirmOutcome {
        if previous.to == mapping.to {
            mapping.mapping_id = previous.mapping_id;
        }
        self.candidates.clear();
        self.confirmed = Some(mapping.clone());
        ConfirmOutcome::Replaced { previous, mapping }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bronzeline_core::{ConnectionAlias, LineageError, MappingTier, TableRef};

    fn table(alias: &str, schema: &str, name: &str) -> TableRef {
        TableRef::new(ConnectionAlias::new(alias).unwrap(), "", schema, name)
    }

    fn mapping(to: &str, confidence: f32, provenance: Provenance) -> Mapping {
        Mapping::confirmed(
            MappingTier::SourceToStage,
            table("erp", "dbo", "orders"),
            table("stage", "stg", to),
            confidence,
            provenance,
        )
    }

    #[test]
    fn test_candidates_refused_once_confirmed() {
        let candidate = Mapping::candidate(
            MappingTier::SourceToStage,
            table("erp", "dbo", "orders"),
            table("stage", "stg", "order_lines"),
            0.7,
        );
        let mut slot = MappingSlot::default();
        assert!(slot.record_candidates(vec![candidate.clone()]));
        assert_eq!(slot.candidates.len(), 1);
        assert_eq!(slot.candidates[0].state, MappingState::Candidate);

        slot.confirm(mapping("orders", 1.0, Provenance::Manual), ConfirmMode::IfAbsent)
            .unwrap();
        assert!(slot.candidates.is_empty());
        assert!(!slot.record_candidates(vec![candidate]));
        assert!(slot.candidates.is_empty());
    }

    #[test]
    fn test_if_absent_creates_then_conflicts() {
        let mut slot = MappingSlot::default();
        let first = slot
            .confirm(mapping("orders", 1.0, Provenance::Manual), ConfirmMode::IfAbsent)
            .unwrap();
        assert!(matches!(first, ConfirmOutcome::Created { .. }));

        let same = slot
            .confirm(mapping("orders", 0.9, Provenance::Manual), ConfirmMode::IfAbsent)
            .unwrap();
        assert!(matches!(same, ConfirmOutcome::Unchanged { .. }));

        let err = slot
            .confirm(mapping("order_lines", 1.0, Provenance::Manual), ConfirmMode::IfAbsent)
            .unwrap_err();
        assert!(matches!(err, LineageError::Conflict(_)));
        assert_eq!(slot.confirmed.as_ref().unwrap().to.table, "orders");
    }

    #[test]
    fn test_overwrite_replaces_and_keeps_id_for_same_target() {
        let mut slot = MappingSlot::default();
        slot.confirm(mapping("orders", 0.9, Provenance::Auto), ConfirmMode::IfAbsent)
            .unwrap();
        let original_id = slot.confirmed.as_ref().unwrap().mapping_id;

        let outcome = slot
            .confirm(mapping("orders", 1.0, Provenance::Manual), ConfirmMode::Overwrite)
            .unwrap();
        match outcome {
            ConfirmOutcome::Replaced { previous, mapping } => {
                assert_eq!(previous.provenance, Provenance::Auto);
                assert_eq!(mapping.mapping_id, original_id);
            }
            other => panic!("expected Replaced, got {:?}", other),
        }
    }

    #[test]
    fn test_refresh_auto_leaves_user_owned_alone() {
        let mut slot = MappingSlot::default();
        slot.confirm(mapping("orders", 1.0, Provenance::Manual), ConfirmMode::IfAbsent)
            .unwrap();

        let outcome = slot
            .confirm(mapping("orders", 0.9, Provenance::Auto), ConfirmMode::RefreshAuto)
            .unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Unchanged { .. }));
        assert_eq!(
            slot.confirmed.as_ref().unwrap().provenance,
            Provenance::Manual
        );
    }

    #[test]
    fn test_refresh_auto_updates_confidence_only_for_same_target() {
        let mut slot = MappingSlot::default();
        slot.confirm(mapping("orders", 0.90, Provenance::Auto), ConfirmMode::RefreshAuto)
            .unwrap();

        let refreshed = slot
            .confirm(mapping("orders", 0.95, Provenance::Auto), ConfirmMode::RefreshAuto)
            .unwrap();
        assert!(matches!(refreshed, ConfirmOutcome::Replaced { .. }));

        let elsewhere = slot
            .confirm(mapping("order_hdr", 0.99, Provenance::Auto), ConfirmMode::RefreshAuto)
            .unwrap();
        assert!(matches!(elsewhere, ConfirmOutcome::Unchanged { .. }));
        assert_eq!(slot.confirmed.as_ref().unwrap().to.table, "orders");
    }

    #[test]
    fn test_confirm_clears_candidates() {
        let mut slot = MappingSlot {
            confirmed: None,
            candidates: vec![Mapping::candidate(
                MappingTier::SourceToStage,
                table("erp", "dbo", "orders"),
                table("stage", "stg", "orders"),
                0.7,
            )],
        };
        slot.confirm(mapping("orders", 1.0, Provenance::Promoted), ConfirmMode::IfAbsent)
            .unwrap();
        assert!(slot.candidates.is_empty());
    }

    #[test]
    fn test_upsert_effects() {
        let mut slot = MappingSlot::default();
        let m = mapping("orders", 1.0, Provenance::Manual);
        assert_eq!(slot.upsert(m.clone()), UpsertEffect::Inserted);
        assert_eq!(slot.upsert(m), UpsertEffect::Unchanged);
        assert_eq!(
            slot.upsert(mapping("order_hdr", 1.0, Provenance::Manual)),
            UpsertEffect::Updated
        );
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use bronzeline_core::{ConnectionAlias, MappingTier, TableRef};
    use proptest::prelude::*;

    fn mode_strategy() -> impl Strategy<Value = ConfirmMode> {
        prop_oneof![
            Just(ConfirmMode::IfAbsent),
            Just(ConfirmMode::Overwrite),
            Just(ConfirmMode::RefreshAuto),
        ]
    }

    fn provenance_strategy() -> impl Strategy<Value = Provenance> {
        prop_oneof![
            Just(Provenance::Manual),
            Just(Provenance::Auto),
            Just(Provenance::Promoted),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_user_owned_survives_if_absent_and_refresh(
            ops in prop::collection::vec((0usize..4, provenance_strategy(), mode_strategy()), 1..20)
        ) {
            let from = TableRef::new(ConnectionAlias::new("erp").unwrap(), "", "dbo", "orders");
            let mut slot = MappingSlot::default();
            for (target, provenance, mode) in ops {
                let to = TableRef::new(
                    ConnectionAlias::new("stage").unwrap(),
                    "",
                    "stg",
                    format!("orders_{}", target),
                );
                let before = slot.confirmed.clone();
                let mapping = Mapping::confirmed(MappingTier::SourceToStage, from.clone(), to, 0.9, provenance);
                let _ = slot.confirm(mapping, mode);

                prop_assert!(slot.confirmed.is_some());
                if let Some(prev) = before {
                    if prev.provenance.is_user_owned() && mode != ConfirmMode::Overwrite {
                        prop_assert_eq!(slot.confirmed.as_ref().unwrap(), &prev);
                    }
                }
            }
        }
    }
}
