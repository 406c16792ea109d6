use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    // Product structure
    HasBuild,
    Contains,

    // Anomaly observations
    ObservedIn,
    Affects,
    HasSymptom,

    // Diagnosis
    HasRootcause,
    ResolvedBy,

    // Test coverage
    BelongsTo,
    Tests,
}

impl RelationType {
    pub const ALL: [Self; 9] = [
        Self::HasBuild,
        Self::Contains,
        Self::ObservedIn,
        Self::Affects,
        Self::HasSymptom,
        Self::HasRootcause,
        Self::ResolvedBy,
        Self::BelongsTo,
        Self::Tests,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HasBuild => "HAS_BUILD",
            Self::Contains => "CONTAINS",
            Self::ObservedIn => "OBSERVED_IN",
            Self::Affects => "AFFECTS",
            Self::HasSymptom => "HAS_SYMPTOM",
            Self::HasRootcause => "HAS_ROOTCAUSE",
            Self::ResolvedBy => "RESOLVED_BY",
            Self::BelongsTo => "BELONGS_TO",
            Self::Tests => "TESTS",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|rel| rel.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidRelationType(s.to_string()))
    }
}

/// Where a derived relationship was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_file: String,
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_key: Option<String>,
}

impl Provenance {
    #[must_use]
    pub fn new(source_file: impl Into<String>, row: usize) -> Self {
        Self {
            source_file: source_file.into(),
            row,
            anomaly_key: None,
        }
    }

    #[must_use]
    pub fn with_anomaly_key(mut self, key: impl Into<String>) -> Self {
        self.anomaly_key = Some(key.into());
        self
    }
}

/// An edge as stored in the graph. Identity is `(source_key, target_key, relation_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_key: String,
    pub target_key: String,
    pub relation_type: RelationType,
    pub confidence: Option<f64>,
    pub provenance: Option<Provenance>,
    pub evidence_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
