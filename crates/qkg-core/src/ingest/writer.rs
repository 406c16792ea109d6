use std::sync::Arc;

use super::extractor::ExtractionOutput;
use super::keys::KeyExtra;
use super::normalizer::Normalizer;
use super::record::{AnomalyRecord, TestCaseRecord};
use crate::entity::NodeLabel;
use crate::graph::{EdgeMerge, GraphResult, GraphStore, MergeBatch, NodeMerge};
use crate::relationship::RelationType;

/// Nodes and edges touched by one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowWrite {
    pub nodes: usize,
    pub edges: usize,
}

impl RowWrite {
    fn of(batch: &MergeBatch) -> Self {
        Self {
            nodes: batch.nodes.len(),
            edges: batch.edges.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionWrite {
    pub nodes: usize,
    pub edges: usize,
    pub failed_edges: usize,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Turns typed records into merge batches and applies them, one transaction
/// per row.
pub struct GraphUpsertWriter {
    store: Arc<dyn GraphStore>,
    normalizer: Normalizer,
}

impl GraphUpsertWriter {
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, normalizer: Normalizer) -> Self {
        Self { store, normalizer }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    fn key(&self, label: NodeLabel, name: &str, extra: &KeyExtra) -> String {
        self.normalizer.make_key(label.as_str(), name, extra)
    }

    /// Batch for one anomaly row. Empty optional fields produce no node and
    /// no edge touching it.
    #[must_use]
    pub fn anomaly_batch(&self, row: &AnomalyRecord) -> MergeBatch {
        let mut batch = MergeBatch::new();

        let anomaly_key = self.key(NodeLabel::Anomaly, &row.anomaly_id, &KeyExtra::code(&row.anomaly_id));
        batch.node(
            NodeMerge::new(NodeLabel::Anomaly.as_str(), &anomaly_key, &row.anomaly_id)
                .prop("title", row.title.as_deref())
                .prop("severity", row.severity.as_deref())
                .prop("date", row.date.as_deref()),
        );

        let product_key = non_empty(row.product.as_ref()).map(|product| {
            let key = self.key(NodeLabel::Product, product, &KeyExtra::default());
            batch.node(NodeMerge::new(NodeLabel::Product.as_str(), &key, product));
            key
        });

        let build_key = non_empty(row.build.as_ref()).map(|build| {
            let key = self.key(NodeLabel::Build, build, &KeyExtra::version(build));
            batch.node(NodeMerge::new(NodeLabel::Build.as_str(), &key, build).prop("version", Some(build)));
            key
        });

        let component = non_empty(row.component.as_ref()).map(|c| self.normalizer.norm_component(c));
        let component_key = component.map(|component| {
            let key = self.key(NodeLabel::Component, &component, &KeyExtra::default());
            batch.node(NodeMerge::new(NodeLabel::Component.as_str(), &key, component));
            key
        });

        let symptom = non_empty(row.symptom.as_ref()).map(|s| self.normalizer.norm_symptom(s));
        let symptom_key = symptom.map(|symptom| {
            let key = self.key(NodeLabel::Symptom, &symptom, &KeyExtra::default());
            batch.node(NodeMerge::new(NodeLabel::Symptom.as_str(), &key, symptom));
            key
        });

        if let (Some(product), Some(build)) = (&product_key, &build_key) {
            batch.edge(EdgeMerge::new(product, build, RelationType::HasBuild));
        }
        if let Some(build) = &build_key {
            batch.edge(EdgeMerge::new(&anomaly_key, build, RelationType::ObservedIn));
        }
        if let Some(component) = &component_key {
            batch.edge(EdgeMerge::new(&anomaly_key, component, RelationType::Affects));
        }
        if let Some(symptom) = &symptom_key {
            batch.edge(EdgeMerge::new(&anomaly_key, symptom, RelationType::HasSymptom));
        }

        batch
    }

    #[must_use]
    pub fn testcase_batch(&self, row: &TestCaseRecord) -> MergeBatch {
        let mut batch = MergeBatch::new();

        let case_key = self.key(NodeLabel::TestCase, &row.case_id, &KeyExtra::default());
        let name = non_empty(row.title.as_ref()).unwrap_or(&row.case_id);
        batch.node(
            NodeMerge::new(NodeLabel::TestCase.as_str(), &case_key, name)
                .prop("case_id", Some(row.case_id.as_str()))
                .prop("title", row.title.as_deref())
                .prop("priority", row.priority.as_deref()),
        );

        if let Some(module) = non_empty(row.module.as_ref()) {
            let component = self.normalizer.norm_component(module);
            let component_key = self.key(NodeLabel::Component, &component, &KeyExtra::default());
            batch
                .node(NodeMerge::new(NodeLabel::Component.as_str(), &component_key, component))
                .edge(EdgeMerge::new(&case_key, component_key, RelationType::BelongsTo));
        }

        batch
    }

    pub async fn upsert_anomaly_row(&self, row: &AnomalyRecord) -> GraphResult<RowWrite> {
        let batch = self.anomaly_batch(row);
        self.store.apply(&batch).await?;
        tracing::debug!("Merged anomaly {} (row {})", row.anomaly_id, row.row);
        Ok(RowWrite::of(&batch))
    }

    pub async fn upsert_testcase_row(&self, row: &TestCaseRecord) -> GraphResult<RowWrite> {
        let batch = self.testcase_batch(row);
        self.store.apply(&batch).await?;
        tracing::debug!("Merged test case {} (row {})", row.case_id, row.row);
        Ok(RowWrite::of(&batch))
    }

    /// Entities go in one transaction, then each relation in its own, so a
    /// bad relation does not sink the rest.
    pub async fn write_extraction(&self, extraction: &ExtractionOutput) -> GraphResult<ExtractionWrite> {
        let mut result = ExtractionWrite::default();
        if extraction.is_empty() {
            return Ok(result);
        }

        let mut entities = MergeBatch::new();
        for entity in &extraction.entities {
            entities.node(NodeMerge::new(entity.kind.label(), &entity.key, &entity.name));
        }
        self.store.apply(&entities).await?;
        result.nodes = entities.nodes.len();

        for relation in &extraction.relations {
            let mut batch = MergeBatch::new();
            batch.edge(
                EdgeMerge::new(&relation.source_key, &relation.target_key, relation.rel)
                    .with_confidence(relation.confidence)
                    .with_provenance(relation.provenance.clone()),
            );

            match self.store.apply(&batch).await {
                Ok(()) => result.edges += 1,
                Err(e) => {
                    tracing::error!(
                        "Failed to merge {} {} -> {}: {}",
                        relation.rel,
                        relation.source_key,
                        relation.target_key,
                        e
                    );
                    result.failed_edges += 1;
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SqliteGraph;
    use crate::ingest::extractor::EntityRelationExtractor;
    use crate::vocab::{VocabKind, Vocabulary};

    fn normalizer() -> Normalizer {
        let vocab = Vocabulary::new().with_entry(VocabKind::Component, "VCM马达", "vcm");
        Normalizer::new(Arc::new(vocab))
    }

    async fn setup() -> (Arc<SqliteGraph>, GraphUpsertWriter) {
        let graph = Arc::new(SqliteGraph::open_memory().await.unwrap());
        let writer = GraphUpsertWriter::new(graph.clone(), normalizer());
        (graph, writer)
    }

    fn example_row() -> AnomalyRecord {
        let mut row = AnomalyRecord::new("A1", 2);
        row.title = Some("对焦失败".into());
        row.severity = Some("High".into());
        row.product = Some("PhoneX".into());
        row.build = Some("1.0".into());
        row.component = Some("vcm".into());
        row.symptom = Some("对焦失败".into());
        row
    }

    #[tokio::test]
    async fn test_anomaly_row_end_to_end() {
        let (graph, writer) = setup().await;

        let write = writer.upsert_anomaly_row(&example_row()).await.unwrap();
        assert_eq!(write, RowWrite { nodes: 5, edges: 4 });

        for key in [
            "Anomaly:A1",
            "Product:PhoneX",
            "Build:1.0",
            "Component:VCM马达",
            "Symptom:对焦失败",
        ] {
            assert!(graph.get_node(key).await.unwrap().is_some(), "missing {key}");
        }

        let edges: Vec<(RelationType, String)> = graph
            .edges_from("Anomaly:A1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.relation_type, e.target_key))
            .collect();
        assert_eq!(
            edges,
            vec![
                (RelationType::Affects, "Component:VCM马达".to_string()),
                (RelationType::HasSymptom, "Symptom:对焦失败".to_string()),
                (RelationType::ObservedIn, "Build:1.0".to_string()),
            ]
        );

        let product_edges = graph.edges_from("Product:PhoneX").await.unwrap();
        assert_eq!(product_edges.len(), 1);
        assert_eq!(product_edges[0].relation_type, RelationType::HasBuild);
    }

    #[tokio::test]
    async fn test_anomaly_row_is_idempotent() {
        let (graph, writer) = setup().await;

        for _ in 0..3 {
            writer.upsert_anomaly_row(&example_row()).await.unwrap();
        }

        assert_eq!(graph.count_nodes().await.unwrap(), 5);
        assert_eq!(graph.count_edges().await.unwrap(), 4);

        let edges = graph.edges_from("Anomaly:A1").await.unwrap();
        assert!(edges.iter().all(|e| e.evidence_count == 3));
    }

    #[tokio::test]
    async fn test_empty_optional_fields_are_skipped() {
        let (graph, writer) = setup().await;

        let mut row = AnomalyRecord::new("A2", 3);
        row.symptom = Some("黑屏".into());
        row.component = Some("  ".into());

        let write = writer.upsert_anomaly_row(&row).await.unwrap();
        assert_eq!(write, RowWrite { nodes: 2, edges: 1 });
        assert!(graph.get_node("Component:").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_build_without_product() {
        let (graph, writer) = setup().await;

        let mut row = AnomalyRecord::new("A3", 4);
        row.build = Some("EVT".into());
        writer.upsert_anomaly_row(&row).await.unwrap();

        let edges = graph.edges_from("Anomaly:A3").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relation_type, RelationType::ObservedIn);
        let build = graph.get_node("Build:EVT").await.unwrap().unwrap();
        assert_eq!(build.props["version"], "EVT");
    }

    #[tokio::test]
    async fn test_testcase_row() {
        let (graph, writer) = setup().await;

        let mut row = TestCaseRecord::new("TC-001", 2);
        row.title = Some("AF accuracy".into());
        row.module = Some("VCM".into());
        row.priority = Some("P1".into());

        let write = writer.upsert_testcase_row(&row).await.unwrap();
        assert_eq!(write, RowWrite { nodes: 2, edges: 1 });

        let node = graph.get_node("TestCase:TC-001").await.unwrap().unwrap();
        assert_eq!(node.name, "AF accuracy");
        assert_eq!(node.props["priority"], "P1");

        let edges = graph.edges_from("TestCase:TC-001").await.unwrap();
        assert_eq!(edges[0].relation_type, RelationType::BelongsTo);
        assert_eq!(edges[0].target_key, "Component:VCM马达");
    }

    #[tokio::test]
    async fn test_write_extraction() {
        let (graph, writer) = setup().await;

        let mut record = AnomalyRecord::new("A1", 2);
        record.symptom = Some("对焦失败".into());
        record.root_cause = Some("来料不良".into());
        record.countermeasure = Some("加强IQC".into());

        let extraction = EntityRelationExtractor::new(normalizer()).extract(&[record], "a.csv");
        let write = writer.write_extraction(&extraction).await.unwrap();
        assert_eq!(
            write,
            ExtractionWrite {
                nodes: 3,
                edges: 2,
                failed_edges: 0,
            }
        );

        let edges = graph.edges_from("Symptom:对焦失败").await.unwrap();
        assert_eq!(edges[0].relation_type, RelationType::HasRootcause);
        assert_eq!(edges[0].confidence, Some(1.0));
        let provenance = edges[0].provenance.as_ref().unwrap();
        assert_eq!(provenance.source_file, "a.csv");
        assert_eq!(provenance.anomaly_key.as_deref(), Some("Anomaly:A1"));

        writer.write_extraction(&extraction).await.unwrap();
        assert_eq!(graph.count_edges().await.unwrap(), 2);
    }
}
