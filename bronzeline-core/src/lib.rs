//! Bronzeline Core - Entity Types
//!
//! Data types shared by every Bronzeline crate: tables and mappings across
//! the Source, Stage and Bronze tiers, stored-procedure lineage records,
//! configuration, and the error taxonomy.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

mod config;
mod entities;
mod enums;
mod error;

pub use config::*;
pub use entities::*;
pub use enums::*;
pub use error::*;

// ============================================================================
// TYPE ALIASES
// ============================================================================

/// Entity identifier (UUIDv7, timestamp-sortable).
pub type EntityId = Uuid;

/// Timestamp type (UTC).
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// UTILITY FUNCTIONS
// ============================================================================

/// Generate a new UUIDv7 entity ID.
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Lowercase hex SHA-256 of a procedure definition.
///
/// The text is hashed exactly as given; whitespace and comment edits
/// change the hash.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_known_value() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_content_hash_sensitive_to_whitespace() {
        let a = content_hash("CREATE PROCEDURE p AS SELECT 1");
        let b = content_hash("CREATE PROCEDURE p AS  SELECT 1");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_new_entity_id_is_v7() {
        let id = new_entity_id();
        assert_eq!(id.get_version_num(), 7);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_content_hash_deterministic(text in ".*") {
            prop_assert_eq!(content_hash(&text), content_hash(&text));
        }

        #[test]
        fn prop_status_up_to_date_iff_same_text(a in ".{0,64}", b in ".{0,64}") {
            let stored = content_hash(&a);
            let status = LineageStatus::derive(Some(&stored), &content_hash(&b));
            if a == b {
                prop_assert_eq!(status, LineageStatus::UpToDate);
            } else {
                prop_assert_eq!(status, LineageStatus::Outdated);
            }
        }

        #[test]
        fn prop_never_analyzed_without_record(text in ".{0,64}") {
            prop_assert_eq!(
                LineageStatus::derive(None, &content_hash(&text)),
                LineageStatus::NotAnalyzed
            );
        }
    }
}
