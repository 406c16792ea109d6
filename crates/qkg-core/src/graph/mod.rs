//! Graph store seam.
//!
//! Writers describe what they want merged as a [`MergeBatch`]; a store applies a
//! whole batch atomically. Nodes are merged by `key`, edges by
//! `(source, target, type)`.

mod neo4j;
mod sqlite;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GraphConfig;
use crate::relationship::{Provenance, RelationType};
use crate::source::ImportLog;

pub use neo4j::Neo4jGraph;
pub use sqlite::SqliteGraph;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Neo4j error: {0}")]
    Neo4j(#[from] neo4rs::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid graph URI: {0}")]
    InvalidUri(String),
    #[error("Invalid node label: {0}")]
    InvalidLabel(String),
    #[error("Invalid property name: {0}")]
    InvalidProperty(String),
    #[error("Corrupt stored value: {0}")]
    Decode(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// A node to merge by key. `props` overwrite same-named stored properties.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMerge {
    pub label: String,
    pub key: String,
    pub name: String,
    pub props: BTreeMap<String, String>,
}

impl NodeMerge {
    #[must_use]
    pub fn new(label: impl Into<String>, key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            name: name.into(),
            props: BTreeMap::new(),
        }
    }

    /// Adds a property; `None` leaves any stored value untouched.
    #[must_use]
    pub fn prop(mut self, name: &str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.props.insert(name.to_string(), value.to_string());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMerge {
    pub source: String,
    pub target: String,
    pub rel: RelationType,
    pub confidence: Option<f64>,
    pub provenance: Option<Provenance>,
}

impl EdgeMerge {
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>, rel: RelationType) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            rel,
            confidence: None,
            provenance: None,
        }
    }

    #[must_use]
    pub const fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    #[must_use]
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }
}

/// Nodes and edges applied in one transaction. Nodes go first, so edges may
/// reference nodes of the same batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeBatch {
    pub nodes: Vec<NodeMerge>,
    pub edges: Vec<EdgeMerge>,
}

impl MergeBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&mut self, node: NodeMerge) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(&mut self, edge: EdgeMerge) -> &mut Self {
        self.edges.push(edge);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Applies the batch in a single transaction. On error nothing is written.
    async fn apply(&self, batch: &MergeBatch) -> GraphResult<()>;

    /// Node count per type label, sorted by label.
    async fn label_counts(&self) -> GraphResult<Vec<LabelCount>>;

    /// Edge count per relationship type, sorted by type.
    async fn relation_counts(&self) -> GraphResult<Vec<LabelCount>>;

    async fn record_import(&self, log: &ImportLog) -> GraphResult<()>;
}

/// Opens the store selected by the URI scheme.
pub async fn connect(config: &GraphConfig) -> GraphResult<Arc<dyn GraphStore>> {
    let uri = config.uri.trim();

    if let Some(path) = uri.strip_prefix("sqlite:") {
        let path = path.trim_start_matches("//");
        let store = if path.is_empty() || path == ":memory:" {
            SqliteGraph::open_memory().await?
        } else {
            SqliteGraph::open(path).await?
        };
        tracing::info!("Using SQLite graph store at {}", uri);
        return Ok(Arc::new(store));
    }

    if ["bolt://", "bolt+s://", "neo4j://", "neo4j+s://"]
        .iter()
        .any(|scheme| uri.starts_with(scheme))
    {
        let store = Neo4jGraph::connect(uri, &config.user, &config.password).await?;
        tracing::info!("Using Neo4j graph store at {}", uri);
        return Ok(Arc::new(store));
    }

    Err(GraphError::InvalidUri(uri.to_string()))
}

pub(crate) fn check_label(label: &str) -> GraphResult<()> {
    if crate::entity::is_valid_label(label) {
        Ok(())
    } else {
        Err(GraphError::InvalidLabel(label.to_string()))
    }
}

pub(crate) fn check_property(name: &str) -> GraphResult<()> {
    if crate::entity::is_valid_label(name) {
        Ok(())
    } else {
        Err(GraphError::InvalidProperty(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_sqlite_memory() {
        let config = GraphConfig::new("sqlite::memory:");
        let store = connect(&config).await.unwrap();
        assert_eq!(store.backend(), "sqlite");
        assert!(store.label_counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let config = GraphConfig::new("redis://localhost:6379");
        let err = connect(&config).await.err().unwrap();
        assert!(matches!(err, GraphError::InvalidUri(_)));
    }

    #[test]
    fn test_node_merge_skips_missing_props() {
        let node = NodeMerge::new("Anomaly", "Anomaly:A1", "A1")
            .prop("severity", Some("High"))
            .prop("title", None);
        assert_eq!(node.props.len(), 1);
        assert_eq!(node.props["severity"], "High");
    }

    #[test]
    fn test_label_checks() {
        assert!(check_label("Factory").is_ok());
        assert!(check_label("Bad Label").is_err());
        assert!(check_property("created_at").is_ok());
        assert!(check_property("n.x = 1").is_err());
    }
}
