pub mod config;
pub mod entity;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod relationship;
pub mod source;
pub mod vocab;

pub use config::{ConfigError, GraphConfig, PipelineConfig};
pub use entity::{is_valid_label, Node, NodeLabel, ENTITY_TAG};
pub use error::{Error, Result};
pub use graph::{connect, GraphError, GraphStore, LabelCount, Neo4jGraph, SqliteGraph};
pub use relationship::{Edge, Provenance, RelationType};
pub use source::{FileKind, ImportLog, ImportStatus, InputKind};
pub use vocab::{VocabError, VocabFiles, VocabKind, Vocabulary};
