use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingest::ColumnMapping;
use crate::source::InputKind;

pub const DEFAULT_GRAPH_URI: &str = "sqlite:qkg.db";
pub const DEFAULT_GRAPH_USER: &str = "neo4j";
pub const DEFAULT_VOCAB_DIR: &str = "data/vocab";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid column mapping in {path}: {source}")]
    Mapping {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where the graph lives and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub uri: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

fn default_user() -> String {
    DEFAULT_GRAPH_USER.to_string()
}

impl GraphConfig {
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            user: default_user(),
            password: String::new(),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn from_env() -> Self {
        Self {
            uri: std::env::var("QKG_GRAPH_URI").unwrap_or_else(|_| DEFAULT_GRAPH_URI.to_string()),
            user: std::env::var("QKG_GRAPH_USER").unwrap_or_else(|_| default_user()),
            password: std::env::var("QKG_GRAPH_PASSWORD").unwrap_or_default(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self::new(DEFAULT_GRAPH_URI)
    }
}

/// Column mapping overrides as read from a JSON file. Absent sections keep
/// the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
struct MappingFile {
    #[serde(default)]
    anomalies: Option<ColumnMapping>,
    #[serde(default)]
    testcases: Option<ColumnMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub vocab_dir: PathBuf,
    pub anomaly_mapping: ColumnMapping,
    pub testcase_mapping: ColumnMapping,
    #[serde(default)]
    pub input_kind: InputKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vocab_dir: PathBuf::from(DEFAULT_VOCAB_DIR),
            anomaly_mapping: ColumnMapping::anomalies(),
            testcase_mapping: ColumnMapping::test_cases(),
            input_kind: InputKind::Auto,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn with_vocab_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.vocab_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn with_input_kind(mut self, kind: InputKind) -> Self {
        self.input_kind = kind;
        self
    }

    /// Replaces the mappings named in `path`, a JSON object with optional
    /// `anomalies` and `testcases` sections.
    pub fn with_mapping_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: MappingFile = serde_json::from_str(&text).map_err(|source| ConfigError::Mapping {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(mapping) = file.anomalies {
            self.anomaly_mapping = mapping;
        }
        if let Some(mapping) = file.testcases {
            self.testcase_mapping = mapping;
        }
        Ok(self)
    }
}
