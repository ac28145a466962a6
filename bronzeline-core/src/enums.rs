//! Enum types for Bronzeline entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TIERS
// ============================================================================

/// Warehouse tier a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Source,
    Stage,
    Bronze,
}

impl Tier {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Tier::Source => "source",
            Tier::Stage => "stage",
            Tier::Bronze => "bronze",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "source" => Ok(Tier::Source),
            "stage" => Ok(Tier::Stage),
            "bronze" => Ok(Tier::Bronze),
            _ => Err(EnumParseError::new("tier", s)),
        }
    }
}

/// A mapping hop between two adjacent tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingTier {
    SourceToStage,
    StageToBronze,
}

impl MappingTier {
    pub const ALL: [MappingTier; 2] = [MappingTier::SourceToStage, MappingTier::StageToBronze];

    pub fn from_tier(&self) -> Tier {
        match self {
            MappingTier::SourceToStage => Tier::Source,
            MappingTier::StageToBronze => Tier::Stage,
        }
    }

    pub fn to_tier(&self) -> Tier {
        match self {
            MappingTier::SourceToStage => Tier::Stage,
            MappingTier::StageToBronze => Tier::Bronze,
        }
    }

    /// The hop from `from` to `to`, if the two tiers are adjacent.
    pub fn between(from: Tier, to: Tier) -> Option<Self> {
        match (from, to) {
            (Tier::Source, Tier::Stage) => Some(MappingTier::SourceToStage),
            (Tier::Stage, Tier::Bronze) => Some(MappingTier::StageToBronze),
            _ => None,
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            MappingTier::SourceToStage => "source_to_stage",
            MappingTier::StageToBronze => "stage_to_bronze",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "source_to_stage" => Ok(MappingTier::SourceToStage),
            "stage_to_bronze" => Ok(MappingTier::StageToBronze),
            _ => Err(EnumParseError::new("mapping tier", s)),
        }
    }
}

// ============================================================================
// MAPPING LIFECYCLE
// ============================================================================

/// Where a mapping came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Entered by a user
    #[default]
    Manual,
    /// Accepted by the resolver above the acceptance threshold
    Auto,
    /// A discovered candidate accepted by a user
    Promoted,
}

impl Provenance {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Provenance::Manual => "manual",
            Provenance::Auto => "auto",
            Provenance::Promoted => "promoted",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Provenance::Manual),
            "auto" => Ok(Provenance::Auto),
            "promoted" => Ok(Provenance::Promoted),
            _ => Err(EnumParseError::new("provenance", s)),
        }
    }

    /// Whether a human stood behind this mapping.
    pub fn is_user_owned(&self) -> bool {
        !matches!(self, Provenance::Auto)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingState {
    Candidate,
    Confirmed,
}

impl MappingState {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MappingState::Candidate => "candidate",
            MappingState::Confirmed => "confirmed",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "candidate" => Ok(MappingState::Candidate),
            "confirmed" => Ok(MappingState::Confirmed),
            _ => Err(EnumParseError::new("mapping state", s)),
        }
    }
}

// ============================================================================
// LINEAGE
// ============================================================================

/// Freshness of a procedure's stored lineage relative to its current text.
///
/// Derived on read from the stored hash and the current hash; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageStatus {
    NotAnalyzed,
    UpToDate,
    Outdated,
}

impl LineageStatus {
    /// Derive the status from an optional stored hash and the current hash.
    pub fn derive(stored_hash: Option<&str>, current_hash: &str) -> Self {
        match stored_hash {
            None => LineageStatus::NotAnalyzed,
            Some(stored) if stored == current_hash => LineageStatus::UpToDate,
            Some(_) => LineageStatus::Outdated,
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            LineageStatus::NotAnalyzed => "not_analyzed",
            LineageStatus::UpToDate => "up_to_date",
            LineageStatus::Outdated => "outdated",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "not_analyzed" => Ok(LineageStatus::NotAnalyzed),
            "up_to_date" => Ok(LineageStatus::UpToDate),
            "outdated" => Ok(LineageStatus::Outdated),
            _ => Err(EnumParseError::new("lineage status", s)),
        }
    }
}

/// How a target column is derived from its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransformationKind {
    /// Same column name, copied as-is
    Direct,
    /// Copied as-is under a different name
    Rename,
    /// Type conversion (CAST/CONVERT/TRY_CAST)
    Cast,
    /// Aggregate function over the source
    Aggregate,
    /// Literal value, no source column
    Constant,
    /// Anything else
    #[default]
    Expression,
}

impl TransformationKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TransformationKind::Direct => "direct",
            TransformationKind::Rename => "rename",
            TransformationKind::Cast => "cast",
            TransformationKind::Aggregate => "aggregate",
            TransformationKind::Constant => "constant",
            TransformationKind::Expression => "expression",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(TransformationKind::Direct),
            "rename" => Ok(TransformationKind::Rename),
            "cast" => Ok(TransformationKind::Cast),
            "aggregate" => Ok(TransformationKind::Aggregate),
            "constant" => Ok(TransformationKind::Constant),
            "expression" => Ok(TransformationKind::Expression),
            _ => Err(EnumParseError::new("transformation kind", s)),
        }
    }
}

/// Database engine behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    SqlServer,
    Oracle,
}

impl SourceKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SourceKind::SqlServer => "sql_server",
            SourceKind::Oracle => "oracle",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "sql_server" | "sqlserver" | "mssql" => Ok(SourceKind::SqlServer),
            "oracle" => Ok(SourceKind::Oracle),
            _ => Err(EnumParseError::new("source kind", s)),
        }
    }
}

// ============================================================================
// DISPLAY / FROMSTR
// ============================================================================

macro_rules! impl_db_str_traits {
    ($($ty:ty),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.as_db_str())
                }
            }

            impl FromStr for $ty {
                type Err = EnumParseError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Self::from_db_str(s)
                }
            }
        )*
    };
}

impl_db_str_traits!(
    Tier,
    MappingTier,
    Provenance,
    MappingState,
    LineageStatus,
    TransformationKind,
    SourceKind,
);

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub type_name: &'static str,
    pub value: String,
}

impl EnumParseError {
    fn new(type_name: &'static str, value: &str) -> Self {
        Self {
            type_name,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.type_name, self.value)
    }
}

impl std::error::Error for EnumParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_tier_between() {
        assert_eq!(
            MappingTier::between(Tier::Source, Tier::Stage),
            Some(MappingTier::SourceToStage)
        );
        assert_eq!(
            MappingTier::between(Tier::Stage, Tier::Bronze),
            Some(MappingTier::StageToBronze)
        );
        assert_eq!(MappingTier::between(Tier::Source, Tier::Bronze), None);
        assert_eq!(MappingTier::between(Tier::Stage, Tier::Source), None);
    }

    #[test]
    fn test_mapping_tier_sides() {
        for tier in MappingTier::ALL {
            assert_eq!(
                MappingTier::between(tier.from_tier(), tier.to_tier()),
                Some(tier)
            );
        }
    }

    #[test]
    fn test_lineage_status_derive() {
        assert_eq!(LineageStatus::derive(None, "abc"), LineageStatus::NotAnalyzed);
        assert_eq!(LineageStatus::derive(Some("abc"), "abc"), LineageStatus::UpToDate);
        assert_eq!(LineageStatus::derive(Some("abc"), "def"), LineageStatus::Outdated);
    }

    #[test]
    fn test_lineage_status_serializes_snake_case() {
        let json = serde_json::to_string(&LineageStatus::NotAnalyzed).unwrap();
        assert_eq!(json, "\"not_analyzed\"");
        let parsed: LineageStatus = serde_json::from_str("\"up_to_date\"").unwrap();
        assert_eq!(parsed, LineageStatus::UpToDate);
    }

    #[test]
    fn test_db_str_round_trip_and_case() {
        assert_eq!("BRONZE".parse::<Tier>().unwrap(), Tier::Bronze);
        assert_eq!(
            "stage-to-bronze".parse::<MappingTier>().unwrap(),
            MappingTier::StageToBronze
        );
        assert_eq!("mssql".parse::<SourceKind>().unwrap(), SourceKind::SqlServer);
        assert_eq!(Provenance::Promoted.to_string(), "promoted");
    }

    #[test]
    fn test_parse_error_names_type() {
        let err = "gold".parse::<Tier>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid tier: gold");
    }

    #[test]
    fn test_provenance_user_owned() {
        assert!(Provenance::Manual.is_user_owned());
        assert!(Provenance::Promoted.is_user_owned());
        assert!(!Provenance::Auto.is_user_owned());
    }
}
