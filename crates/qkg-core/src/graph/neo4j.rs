use async_trait::async_trait;
use neo4rs::{query, Graph, Query, Row, Txn};

use super::{check_label, check_property, EdgeMerge, GraphError, GraphResult, GraphStore, LabelCount, MergeBatch, NodeMerge};
use crate::entity::ENTITY_TAG;
use crate::source::ImportLog;

/// Neo4j-backed store. Every node carries the `Entity` tag plus its type label.
pub struct Neo4jGraph {
    graph: Graph,
}

impl Neo4jGraph {
    pub async fn connect(uri: &str, user: &str, password: &str) -> GraphResult<Self> {
        let graph = Graph::new(uri, user, password).await?;
        let store = Self { graph };
        store.init_schema().await;
        Ok(store)
    }

    async fn init_schema(&self) {
        let statements = [
            "CREATE CONSTRAINT entity_key IF NOT EXISTS FOR (n:Entity) REQUIRE n.key IS UNIQUE",
            "CREATE INDEX entity_name IF NOT EXISTS FOR (n:Entity) ON (n.name)",
            "CREATE CONSTRAINT import_log_id IF NOT EXISTS FOR (l:ImportLog) REQUIRE l.id IS UNIQUE",
        ];

        for statement in statements {
            if let Err(e) = self.graph.run(query(statement)).await {
                tracing::warn!("Schema statement skipped: {}", e);
            }
        }
    }

    async fn count_rows(&self, q: Query) -> GraphResult<Vec<LabelCount>> {
        let mut stream = self.graph.execute(q).await?;
        let mut counts = Vec::new();
        while let Some(row) = stream.next().await? {
            counts.push(decode_count(&row)?);
        }
        Ok(counts)
    }
}

fn decode_count(row: &Row) -> GraphResult<LabelCount> {
    let decode = |column: &str, e: neo4rs::DeError| GraphError::Decode(format!("{column}: {e}"));
    Ok(LabelCount {
        label: row.get("label").map_err(|e| decode("label", e))?,
        count: row.get("count").map_err(|e| decode("count", e))?,
    })
}

fn node_query(node: &NodeMerge) -> GraphResult<Query> {
    check_label(&node.label)?;

    let mut sets = vec![
        "n.name = $name".to_string(),
        "n.created_at = coalesce(n.created_at, datetime())".to_string(),
        "n.updated_at = datetime()".to_string(),
    ];
    for (i, prop) in node.props.keys().enumerate() {
        check_property(prop)?;
        sets.push(format!("n.{prop} = $p{i}"));
    }

    let cypher = format!(
        "MERGE (n:{ENTITY_TAG}:{label} {{key: $key}}) SET {sets}",
        label = node.label,
        sets = sets.join(", ")
    );

    let mut q = query(&cypher)
        .param("key", node.key.clone())
        .param("name", node.name.clone());
    for (i, value) in node.props.values().enumerate() {
        q = q.param(&format!("p{i}"), value.clone());
    }
    Ok(q)
}

/// Later merges keep the first provenance.
fn edge_cypher(edge: &EdgeMerge) -> String {
    let mut sets = vec![
        "r.evidence_count = coalesce(r.evidence_count, 0) + 1".to_string(),
        "r.created_at = coalesce(r.created_at, datetime())".to_string(),
        "r.updated_at = datetime()".to_string(),
    ];
    if edge.confidence.is_some() {
        sets.push("r.confidence = $confidence".to_string());
    }
    if edge.provenance.is_some() {
        sets.push("r.provenance = coalesce(r.provenance, $provenance)".to_string());
    }

    format!(
        "MATCH (s:{ENTITY_TAG} {{key: $source}}), (t:{ENTITY_TAG} {{key: $target}}) \
         MERGE (s)-[r:{rel}]->(t) SET {sets}",
        rel = edge.rel.as_str(),
        sets = sets.join(", ")
    )
}

fn edge_query(edge: &EdgeMerge) -> GraphResult<Query> {
    let mut q = query(&edge_cypher(edge))
        .param("source", edge.source.clone())
        .param("target", edge.target.clone());
    if let Some(confidence) = edge.confidence {
        q = q.param("confidence", confidence);
    }
    if let Some(provenance) = &edge.provenance {
        q = q.param("provenance", serde_json::to_string(provenance)?);
    }
    Ok(q)
}

async fn run_batch(txn: &mut Txn, batch: &MergeBatch) -> GraphResult<()> {
    for node in &batch.nodes {
        txn.run(node_query(node)?).await?;
    }
    for edge in &batch.edges {
        txn.run(edge_query(edge)?).await?;
    }
    Ok(())
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    fn backend(&self) -> &'static str {
        "neo4j"
    }

    async fn apply(&self, batch: &MergeBatch) -> GraphResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut txn = self.graph.start_txn().await?;
        match run_batch(&mut txn, batch).await {
            Ok(()) => {
                txn.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    tracing::warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn label_counts(&self) -> GraphResult<Vec<LabelCount>> {
        self.count_rows(query(
            "MATCH (n:Entity) UNWIND labels(n) AS label \
             WITH label WHERE label <> 'Entity' \
             RETURN label, count(*) AS count ORDER BY label",
        ))
        .await
    }

    async fn relation_counts(&self) -> GraphResult<Vec<LabelCount>> {
        self.count_rows(query(
            "MATCH (:Entity)-[r]->(:Entity) \
             RETURN type(r) AS label, count(r) AS count ORDER BY label",
        ))
        .await
    }

    async fn record_import(&self, log: &ImportLog) -> GraphResult<()> {
        let q = query(
            "CREATE (l:ImportLog {
                id: $id, source_path: $source_path, kind: $kind, content_hash: $content_hash,
                status: $status, parsed: $parsed, skipped: $skipped, success: $success,
                failed: $failed, error: $error, imported_at: datetime($imported_at)
            })",
        )
        .param("id", log.id.to_string())
        .param("source_path", log.source_path.clone())
        .param("kind", log.kind.as_str())
        .param("content_hash", log.content_hash.clone())
        .param("status", log.status.as_str())
        .param("parsed", i64::from(log.parsed))
        .param("skipped", i64::from(log.skipped))
        .param("success", i64::from(log.success))
        .param("failed", i64::from(log.failed))
        .param("error", log.error.clone().unwrap_or_default())
        .param("imported_at", log.imported_at.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }
}
