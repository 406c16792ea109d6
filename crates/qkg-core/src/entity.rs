use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generic tag carried by every node next to its type label.
pub const ENTITY_TAG: &str = "Entity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Product,
    Build,
    Component,
    Symptom,
    RootCause,
    Countermeasure,
    Anomaly,
    TestCase,
    TestStep,
    TestResult,
    Owner,
    Supplier,
    Doc,
}

impl NodeLabel {
    pub const ALL: [Self; 13] = [
        Self::Product,
        Self::Build,
        Self::Component,
        Self::Symptom,
        Self::RootCause,
        Self::Countermeasure,
        Self::Anomaly,
        Self::TestCase,
        Self::TestStep,
        Self::TestResult,
        Self::Owner,
        Self::Supplier,
        Self::Doc,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "Product",
            Self::Build => "Build",
            Self::Component => "Component",
            Self::Symptom => "Symptom",
            Self::RootCause => "RootCause",
            Self::Countermeasure => "Countermeasure",
            Self::Anomaly => "Anomaly",
            Self::TestCase => "TestCase",
            Self::TestStep => "TestStep",
            Self::TestResult => "TestResult",
            Self::Owner => "Owner",
            Self::Supplier => "Supplier",
            Self::Doc => "Doc",
        }
    }
}

impl std::fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeLabel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidLabel(s.to_string()))
    }
}

/// Labels are spliced into Cypher and used as table values, so they are
/// restricted to ASCII identifiers.
#[must_use]
pub fn is_valid_label(label: &str) -> bool {
    let mut chars = label.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A node as stored in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub key: String,
    pub label: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip_through_str() {
        for label in NodeLabel::ALL {
            assert_eq!(label.as_str().parse::<NodeLabel>().unwrap(), label);
        }
        assert!("Factory".parse::<NodeLabel>().is_err());
    }

    #[test]
    fn test_valid_label() {
        assert!(is_valid_label("RootCause"));
        assert!(is_valid_label("Factory"));
        assert!(!is_valid_label(""));
        assert!(!is_valid_label("Bad Label"));
        assert!(!is_valid_label("x`) DETACH DELETE n //"));
    }
}
