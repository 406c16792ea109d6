use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::extractor::EntityRelationExtractor;
use super::normalizer::Normalizer;
use super::parser::{ParseError, ParseOutput, RecordParser, SheetFormat};
use super::record::Record;
use super::writer::{ExtractionWrite, GraphUpsertWriter};
use crate::config::{ConfigError, PipelineConfig};
use crate::graph::{GraphError, GraphStore, LabelCount};
use crate::source::{FileKind, ImportLog, ImportStatus, InputKind};
use crate::vocab::{VocabError, Vocabulary};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Vocabulary error: {0}")]
    Vocab(#[from] VocabError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Input not found: {0}")]
    NotFound(PathBuf),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Lifecycle of one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Discovered,
    Parsing,
    Parsed,
    Committed,
    Failed,
}

impl FileState {
    #[must_use]
    pub const fn can_advance(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Discovered, Self::Parsing)
                | (Self::Parsing, Self::Parsed | Self::Failed)
                | (Self::Parsed, Self::Committed | Self::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCounts {
    /// Non-blank data rows.
    pub parsed: usize,
    /// Rows that became typed records and went through normalization.
    pub normalized: usize,
    /// Rows dropped for a missing key field.
    pub skipped: usize,
    pub success: usize,
    pub failed: usize,
}

impl FileCounts {
    fn add(&mut self, other: &Self) {
        self.parsed += other.parsed;
        self.normalized += other.normalized;
        self.skipped += other.skipped;
        self.success += other.success;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Committed,
    ParseFailure(String),
    /// Every row failed to write.
    WriteFailure,
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub kind: FileKind,
    pub state: FileState,
    pub outcome: FileOutcome,
    pub counts: FileCounts,
    pub extraction: Option<ExtractionWrite>,
}

impl FileReport {
    fn new(path: &Path, kind: FileKind) -> Self {
        Self {
            path: path.to_path_buf(),
            kind,
            state: FileState::Discovered,
            outcome: FileOutcome::Committed,
            counts: FileCounts::default(),
            extraction: None,
        }
    }

    fn advance(&mut self, next: FileState) {
        debug_assert!(self.state.can_advance(next), "{:?} -> {:?}", self.state, next);
        tracing::debug!("{}: {:?} -> {:?}", self.path.display(), self.state, next);
        self.state = next;
    }

    fn import_status(&self) -> (ImportStatus, Option<String>) {
        match &self.outcome {
            FileOutcome::Committed => (ImportStatus::Committed, None),
            FileOutcome::ParseFailure(e) => (ImportStatus::ParseFailed, Some(e.clone())),
            FileOutcome::WriteFailure => (ImportStatus::WriteFailed, None),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub files: Vec<FileReport>,
    pub totals: FileCounts,
    pub committed: usize,
    pub parse_failures: usize,
    pub write_failures: usize,
    /// Graph-wide node counts per label, taken after the run.
    pub label_counts: Vec<LabelCount>,
}

impl BatchSummary {
    pub fn record(&mut self, report: FileReport) {
        self.totals.add(&report.counts);
        match report.outcome {
            FileOutcome::Committed => self.committed += 1,
            FileOutcome::ParseFailure(_) => self.parse_failures += 1,
            FileOutcome::WriteFailure => self.write_failures += 1,
        }
        self.files.push(report);
    }

    #[must_use]
    pub fn failed_files(&self) -> usize {
        self.parse_failures + self.write_failures
    }
}

fn content_hash(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Parses, normalizes and writes every input file in order, one row at a time.
/// A failing file never stops the batch.
pub struct BatchPipeline {
    parser: RecordParser,
    writer: GraphUpsertWriter,
    extractor: EntityRelationExtractor,
}

impl BatchPipeline {
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, normalizer: Normalizer, parser: RecordParser) -> Self {
        Self {
            parser,
            writer: GraphUpsertWriter::new(store, normalizer.clone()),
            extractor: EntityRelationExtractor::new(normalizer),
        }
    }

    /// Loads the vocabulary named by `config` and wires the stages together.
    pub fn from_config(config: &PipelineConfig, store: Arc<dyn GraphStore>) -> IngestResult<Self> {
        let vocab = Vocabulary::load_dir(&config.vocab_dir)?;
        if vocab.is_empty() {
            tracing::warn!(
                "No vocabulary entries under {}, names pass through unchanged",
                config.vocab_dir.display()
            );
        }

        let parser = RecordParser::new(config.anomaly_mapping.clone(), config.testcase_mapping.clone());
        Ok(Self::new(store, Normalizer::new(Arc::new(vocab)), parser))
    }

    /// Input files in processing order. A directory yields its supported
    /// spreadsheets sorted by name; a file is taken as-is.
    pub async fn discover(&self, input: &Path) -> IngestResult<Vec<PathBuf>> {
        let metadata = tokio::fs::metadata(input)
            .await
            .map_err(|_| IngestError::NotFound(input.to_path_buf()))?;

        if metadata.is_file() {
            return Ok(vec![input.to_path_buf()]);
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(input).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("~$"))
            {
                tracing::warn!("Skipping lock file {}", path.display());
                continue;
            }
            if SheetFormat::from_path(&path).is_some() {
                files.push(path);
            } else {
                tracing::debug!("Skipping unsupported file {}", path.display());
            }
        }

        files.sort();
        Ok(files)
    }

    pub async fn run(&self, input: &Path, kind: InputKind) -> IngestResult<BatchSummary> {
        let files = self.discover(input).await?;
        tracing::info!("Discovered {} file(s) under {}", files.len(), input.display());

        let mut summary = BatchSummary::default();
        for path in files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let file_kind = kind.resolve(&file_name);

            let report = self.process_file(&path, file_kind).await;
            summary.record(report);
        }

        summary.label_counts = self.writer.store().label_counts().await?;
        Ok(summary)
    }

    pub async fn process_file(&self, path: &Path, kind: FileKind) -> FileReport {
        let mut report = FileReport::new(path, kind);
        tracing::info!("Processing {} as {}", path.display(), kind);

        report.advance(FileState::Parsing);
        let (parsed, hash) = match self.read_and_parse(path, kind).await {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!("Failed to parse {}: {}", path.display(), e);
                report.advance(FileState::Failed);
                report.outcome = FileOutcome::ParseFailure(e.to_string());
                self.log_import(&report, String::new()).await;
                return report;
            }
        };
        report.advance(FileState::Parsed);

        report.counts.parsed = parsed.records.len() + parsed.skipped.len();
        report.counts.normalized = parsed.records.len();
        report.counts.skipped = parsed.skipped.len();

        for record in &parsed.records {
            let written = match record {
                Record::Anomaly(row) => self.writer.upsert_anomaly_row(row).await,
                Record::TestCase(row) => self.writer.upsert_testcase_row(row).await,
            };
            match written {
                Ok(_) => report.counts.success += 1,
                Err(e) => {
                    tracing::error!("{} row {}: write failed: {}", path.display(), record.row(), e);
                    report.counts.failed += 1;
                }
            }
        }

        if kind == FileKind::Anomalies {
            report.extraction = self.extract_relations(path, &parsed).await;
        }

        if report.counts.normalized > 0 && report.counts.success == 0 {
            report.advance(FileState::Failed);
            report.outcome = FileOutcome::WriteFailure;
        } else {
            report.advance(FileState::Committed);
        }

        tracing::info!(
            "{}: {} parsed, {} skipped, {} written, {} failed",
            path.display(),
            report.counts.parsed,
            report.counts.skipped,
            report.counts.success,
            report.counts.failed
        );

        self.log_import(&report, hash).await;
        report
    }

    async fn read_and_parse(&self, path: &Path, kind: FileKind) -> IngestResult<(ParseOutput, String)> {
        let format = SheetFormat::from_path(path)
            .ok_or_else(|| ParseError::UnsupportedFormat(path.display().to_string()))?;
        let data = tokio::fs::read(path).await.map_err(ParseError::from)?;
        let hash = content_hash(&data);
        let parsed = self.parser.parse_bytes(&data, format, kind)?;
        Ok((parsed, hash))
    }

    async fn extract_relations(&self, path: &Path, parsed: &ParseOutput) -> Option<ExtractionWrite> {
        let records: Vec<_> = parsed
            .records
            .iter()
            .filter_map(Record::as_anomaly)
            .cloned()
            .collect();
        let source_file = path.display().to_string();
        let extraction = self.extractor.extract(&records, &source_file);

        match self.writer.write_extraction(&extraction).await {
            Ok(written) => Some(written),
            Err(e) => {
                tracing::error!("{}: failed to write extracted entities: {}", path.display(), e);
                None
            }
        }
    }

    async fn log_import(&self, report: &FileReport, hash: String) {
        let (status, error) = report.import_status();
        let log = ImportLog::new(report.path.display().to_string(), report.kind, hash)
            .with_counts(
                to_u32(report.counts.parsed),
                to_u32(report.counts.skipped),
                to_u32(report.counts.success),
                to_u32(report.counts.failed),
            )
            .with_status(status, error);

        if let Err(e) = self.writer.store().record_import(&log).await {
            tracing::warn!("Failed to record import of {}: {}", report.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::graph::SqliteGraph;
    use crate::vocab::COMPONENTS_FILE;

    const ANOMALIES: &str = "AnomalyID,Title,Severity,Product,Build,Component,Symptom\n\
                             A1,Focus fail,High,PhoneX,1.0,vcm,对焦失败\n";

    async fn pipeline(vocab_dir: &Path) -> (Arc<SqliteGraph>, BatchPipeline) {
        fs::write(vocab_dir.join(COMPONENTS_FILE), "name,alias\nVCM马达,vcm\n").unwrap();
        let graph = Arc::new(SqliteGraph::open_memory().await.unwrap());
        let config = PipelineConfig::default().with_vocab_dir(vocab_dir);
        let pipeline = BatchPipeline::from_config(&config, graph.clone()).unwrap();
        (graph, pipeline)
    }

    #[test]
    fn test_state_transitions() {
        assert!(FileState::Discovered.can_advance(FileState::Parsing));
        assert!(FileState::Parsing.can_advance(FileState::Failed));
        assert!(FileState::Parsed.can_advance(FileState::Committed));
        assert!(!FileState::Discovered.can_advance(FileState::Committed));
        assert!(!FileState::Committed.can_advance(FileState::Parsing));
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
        assert_eq!(content_hash(b"hello").len(), 64);
    }

    #[test]
    fn test_summary_record() {
        let mut summary = BatchSummary::default();

        let mut ok = FileReport::new(Path::new("a.csv"), FileKind::Anomalies);
        ok.counts = FileCounts {
            parsed: 3,
            normalized: 3,
            skipped: 0,
            success: 2,
            failed: 1,
        };
        summary.record(ok);

        let mut bad = FileReport::new(Path::new("b.csv"), FileKind::TestCases);
        bad.outcome = FileOutcome::ParseFailure("boom".into());
        summary.record(bad);

        assert_eq!(summary.committed, 1);
        assert_eq!(summary.parse_failures, 1);
        assert_eq!(summary.failed_files(), 1);
        assert_eq!(summary.totals.success, 2);
        assert_eq!(summary.totals.failed, 1);
    }

    #[tokio::test]
    async fn test_run_directory_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        fs::create_dir(&input).unwrap();
        fs::write(input.join("anomalies.csv"), ANOMALIES).unwrap();
        fs::write(
            input.join("testcases.csv"),
            "CaseID,Title,Module,Priority\nTC-1,AF check,vcm,P1\n,orphan,,\n",
        )
        .unwrap();
        fs::write(input.join("readme.txt"), "ignored").unwrap();

        let (graph, pipeline) = pipeline(dir.path()).await;

        let first = pipeline.run(&input, InputKind::Auto).await.unwrap();
        assert_eq!(first.files.len(), 2);
        assert_eq!(first.committed, 2);
        assert_eq!(first.files[0].kind, FileKind::Anomalies);
        assert_eq!(first.files[1].kind, FileKind::TestCases);
        assert_eq!(first.totals.success, 2);
        assert_eq!(first.totals.skipped, 1);

        let nodes = graph.count_nodes().await.unwrap();
        let edges = graph.count_edges().await.unwrap();
        assert_eq!(nodes, 6);
        assert_eq!(edges, 7);

        let second = pipeline.run(&input, InputKind::Auto).await.unwrap();
        assert_eq!(second.committed, 2);
        assert_eq!(graph.count_nodes().await.unwrap(), nodes);
        assert_eq!(graph.count_edges().await.unwrap(), edges);

        let component = second
            .label_counts
            .iter()
            .find(|c| c.label == "Component")
            .unwrap();
        assert_eq!(component.count, 1);
        assert_eq!(graph.import_statuses().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_parse_failure_does_not_stop_batch() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        fs::create_dir(&input).unwrap();
        fs::write(input.join("a_broken.xlsx"), "not a workbook").unwrap();
        fs::write(input.join("b_anomalies.csv"), ANOMALIES).unwrap();

        let (_graph, pipeline) = pipeline(dir.path()).await;
        let summary = pipeline.run(&input, InputKind::Auto).await.unwrap();

        assert_eq!(summary.files.len(), 2);
        assert!(matches!(summary.files[0].outcome, FileOutcome::ParseFailure(_)));
        assert_eq!(summary.files[0].state, FileState::Failed);
        assert_eq!(summary.files[1].outcome, FileOutcome::Committed);
        assert_eq!(summary.files[1].state, FileState::Committed);
        assert_eq!(summary.parse_failures, 1);
    }

    #[tokio::test]
    async fn test_test_case_sheet_without_id_column_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("testcases.csv");
        fs::write(&file, "Title,Module,Priority\nBoot,vcm,P1\nSleep,vcm,P2\n").unwrap();

        let (graph, pipeline) = pipeline(dir.path()).await;
        let summary = pipeline.run(&file, InputKind::Auto).await.unwrap();

        let report = &summary.files[0];
        assert!(matches!(&report.outcome, FileOutcome::ParseFailure(e) if e.contains("case_id")));
        assert_eq!(report.state, FileState::Failed);
        assert_eq!(summary.parse_failures, 1);
        assert_eq!(graph.count_nodes().await.unwrap(), 0);
        assert_eq!(
            graph.import_statuses().await.unwrap()[0].1,
            "parse_failed"
        );
    }

    #[tokio::test]
    async fn test_explicit_kind_overrides_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("anomalies_export.csv");
        fs::write(&file, "CaseID,Title\nTC-9,Boot\n").unwrap();

        let (graph, pipeline) = pipeline(dir.path()).await;
        let summary = pipeline.run(&file, InputKind::TestCases).await.unwrap();

        assert_eq!(summary.files[0].kind, FileKind::TestCases);
        assert!(graph.get_node("TestCase:TC-9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_extraction_runs_for_anomaly_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("issues.csv");
        fs::write(
            &file,
            "AnomalyID,Symptom,RootCause,Countermeasure\nA9,对焦失败,来料不良,加强IQC\n",
        )
        .unwrap();

        let (graph, pipeline) = pipeline(dir.path()).await;
        let summary = pipeline.run(&file, InputKind::Auto).await.unwrap();

        let extraction = summary.files[0].extraction.unwrap();
        assert_eq!(extraction.edges, 2);
        let edges = graph.edges_from("RootCause:来料不良").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_key, "Countermeasure:加强IQC");
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let (_graph, pipeline) = pipeline(dir.path()).await;

        let result = pipeline.run(&dir.path().join("nope"), InputKind::Auto).await;
        assert!(matches!(result, Err(IngestError::NotFound(_))));
    }
}
