mod extractor;
mod keys;
mod normalizer;
mod parser;
mod pipeline;
mod record;
mod writer;

pub use extractor::{
    EntityKind, EntityRelationExtractor, ExtractedEntity, ExtractedRelation, ExtractionOutput,
    RelationRule, RELATION_RULES,
};
pub use keys::{KeyBuilder, KeyExtra, KeyRegistry};
pub use normalizer::Normalizer;
pub use parser::{
    normalize_cell, parse_date_text, Cell, ColumnMapping, FieldColumns, ParseError, ParseOutput,
    ParseResult, RecordParser, SheetFormat, SkipReason, SkippedRow,
};
pub use pipeline::{
    BatchPipeline, BatchSummary, FileCounts, FileOutcome, FileReport, FileState, IngestError,
    IngestResult,
};
pub use record::{fallback_anomaly_key, fields, AnomalyRecord, Record, RowValues, TestCaseRecord};
pub use writer::{ExtractionWrite, GraphUpsertWriter, RowWrite};
