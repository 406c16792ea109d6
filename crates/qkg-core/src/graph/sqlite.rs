use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite, Transaction};

use super::{check_label, check_property, EdgeMerge, GraphError, GraphResult, GraphStore, LabelCount, MergeBatch, NodeMerge};
use crate::entity::{Node, ENTITY_TAG};
use crate::relationship::Edge;
use crate::source::ImportLog;

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    key TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    tag TEXT NOT NULL DEFAULT 'Entity',
    name TEXT NOT NULL,
    props TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_label_key ON nodes(label, key);
CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes(label);
CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name);

CREATE TABLE IF NOT EXISTS edges (
    source_key TEXT NOT NULL REFERENCES nodes(key),
    target_key TEXT NOT NULL REFERENCES nodes(key),
    rel_type TEXT NOT NULL,
    confidence REAL,
    provenance TEXT,
    evidence_count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (source_key, target_key, rel_type)
);

CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_key);
CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(rel_type);

CREATE TABLE IF NOT EXISTS import_log (
    id TEXT PRIMARY KEY,
    source_path TEXT NOT NULL,
    kind TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    parsed INTEGER NOT NULL,
    skipped INTEGER NOT NULL,
    success INTEGER NOT NULL,
    failed INTEGER NOT NULL,
    error TEXT,
    imported_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_import_log_path ON import_log(source_path);
"#;

const MERGE_NODE_SQL: &str = r#"
INSERT INTO nodes (key, label, tag, name, props, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(key) DO UPDATE SET
    name = excluded.name,
    props = json_patch(nodes.props, excluded.props),
    created_at = COALESCE(nodes.created_at, excluded.created_at),
    updated_at = excluded.updated_at
"#;

const MERGE_EDGE_SQL: &str = r#"
INSERT INTO edges (source_key, target_key, rel_type, confidence, provenance, evidence_count, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, 1, ?, ?)
ON CONFLICT(source_key, target_key, rel_type) DO UPDATE SET
    confidence = COALESCE(excluded.confidence, edges.confidence),
    provenance = COALESCE(edges.provenance, excluded.provenance),
    evidence_count = edges.evidence_count + 1,
    updated_at = excluded.updated_at
"#;

type NodeRow = (String, String, String, String, String, String);
type EdgeRow = (String, String, String, Option<f64>, Option<String>, i64, String, String);

/// SQLite-backed graph: a `nodes` table keyed by canonical key and an `edges`
/// table keyed by `(source_key, target_key, rel_type)`.
pub struct SqliteGraph {
    pool: Pool<Sqlite>,
}

impl SqliteGraph {
    pub async fn open(path: &str) -> GraphResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{path}?mode=rwc"))
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn open_memory() -> GraphResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    async fn merge_node(tx: &mut Transaction<'_, Sqlite>, node: &NodeMerge, now: &str) -> GraphResult<()> {
        check_label(&node.label)?;
        for prop in node.props.keys() {
            check_property(prop)?;
        }
        let props = serde_json::to_string(&node.props)?;

        sqlx::query(MERGE_NODE_SQL)
            .bind(&node.key)
            .bind(&node.label)
            .bind(ENTITY_TAG)
            .bind(&node.name)
            .bind(props)
            .bind(now)
            .bind(now)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    async fn merge_edge(tx: &mut Transaction<'_, Sqlite>, edge: &EdgeMerge, now: &str) -> GraphResult<()> {
        let provenance = edge
            .provenance
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(MERGE_EDGE_SQL)
            .bind(&edge.source)
            .bind(&edge.target)
            .bind(edge.rel.as_str())
            .bind(edge.confidence)
            .bind(provenance)
            .bind(now)
            .bind(now)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    pub async fn get_node(&self, key: &str) -> GraphResult<Option<Node>> {
        let row: Option<NodeRow> = sqlx::query_as(
            r#"
            SELECT key, label, name, props, created_at, updated_at
            FROM nodes WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(parse_node_row).transpose()
    }

    pub async fn edges_from(&self, source_key: &str) -> GraphResult<Vec<Edge>> {
        let rows: Vec<EdgeRow> = sqlx::query_as(
            r#"
            SELECT source_key, target_key, rel_type, confidence, provenance, evidence_count, created_at, updated_at
            FROM edges WHERE source_key = ?
            ORDER BY rel_type, target_key
            "#,
        )
        .bind(source_key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_edge_row).collect()
    }

    pub async fn count_nodes(&self) -> GraphResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_edges(&self) -> GraphResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM edges")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// `(source_path, status)` of every recorded import, oldest first.
    pub async fn import_statuses(&self) -> GraphResult<Vec<(String, String)>> {
        let rows = sqlx::query_as("SELECT source_path, status FROM import_log ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl GraphStore for SqliteGraph {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn apply(&self, batch: &MergeBatch) -> GraphResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for node in &batch.nodes {
            Self::merge_node(&mut tx, node, &now).await?;
        }
        for edge in &batch.edges {
            Self::merge_edge(&mut tx, edge, &now).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn label_counts(&self) -> GraphResult<Vec<LabelCount>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT label, COUNT(*) FROM nodes GROUP BY label ORDER BY label")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(label, count)| LabelCount { label, count })
            .collect())
    }

    async fn relation_counts(&self) -> GraphResult<Vec<LabelCount>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT rel_type, COUNT(*) FROM edges GROUP BY rel_type ORDER BY rel_type")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(label, count)| LabelCount { label, count })
            .collect())
    }

    async fn record_import(&self, log: &ImportLog) -> GraphResult<()> {
        sqlx::query(
            r#"
            INSERT INTO import_log (id, source_path, kind, content_hash, status, parsed, skipped, success, failed, error, imported_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.id.to_string())
        .bind(&log.source_path)
        .bind(log.kind.as_str())
        .bind(&log.content_hash)
        .bind(log.status.as_str())
        .bind(i64::from(log.parsed))
        .bind(i64::from(log.skipped))
        .bind(i64::from(log.success))
        .bind(i64::from(log.failed))
        .bind(&log.error)
        .bind(log.imported_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_timestamp(value: &str) -> GraphResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| GraphError::Decode(format!("timestamp '{value}'")))
}

fn parse_node_row(row: NodeRow) -> GraphResult<Node> {
    let (key, label, name, props, created_at, updated_at) = row;
    let props: BTreeMap<String, String> = serde_json::from_str(&props)?;

    Ok(Node {
        key,
        label,
        name,
        props,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_edge_row(row: EdgeRow) -> GraphResult<Edge> {
    let (source_key, target_key, rel_type, confidence, provenance, evidence_count, created_at, updated_at) =
        row;

    Ok(Edge {
        source_key,
        target_key,
        relation_type: rel_type
            .parse()
            .map_err(|_| GraphError::Decode(format!("relationship type '{rel_type}'")))?,
        confidence,
        provenance: provenance.as_deref().map(serde_json::from_str).transpose()?,
        evidence_count,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
