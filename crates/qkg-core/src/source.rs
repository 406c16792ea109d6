use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a source spreadsheet contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Anomalies,
    TestCases,
}

impl FileKind {
    const ANOMALY_HINTS: [&'static str; 4] = ["anomal", "异常", "问题", "issue"];
    const TEST_CASE_HINTS: [&'static str; 4] = ["testcase", "测试", "用例", "case"];

    /// Guesses the kind from a file name. Anomaly hints win over test-case
    /// hints, and anything unrecognized is treated as anomalies.
    #[must_use]
    pub fn detect(file_name: &str) -> Self {
        let name = file_name.to_lowercase();
        if Self::ANOMALY_HINTS.iter().any(|hint| name.contains(hint)) {
            Self::Anomalies
        } else if Self::TEST_CASE_HINTS.iter().any(|hint| name.contains(hint)) {
            Self::TestCases
        } else {
            Self::Anomalies
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Anomalies => "anomalies",
            Self::TestCases => "testcases",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `--type` choice: a fixed kind, or detection per file name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Anomalies,
    TestCases,
    #[default]
    Auto,
}

impl InputKind {
    #[must_use]
    pub fn resolve(&self, file_name: &str) -> FileKind {
        match self {
            Self::Anomalies => FileKind::Anomalies,
            Self::TestCases => FileKind::TestCases,
            Self::Auto => FileKind::detect(file_name),
        }
    }
}

impl std::str::FromStr for InputKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anomalies" | "anomaly" => Ok(Self::Anomalies),
            "testcases" | "testcase" => Ok(Self::TestCases),
            "auto" => Ok(Self::Auto),
            _ => Err(crate::Error::InvalidInputKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Committed,
    ParseFailed,
    WriteFailed,
}

impl ImportStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::ParseFailed => "parse_failed",
            Self::WriteFailed => "write_failed",
        }
    }
}

/// Audit record written once per processed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportLog {
    pub id: Uuid,
    pub source_path: String,
    pub kind: FileKind,
    pub content_hash: String,
    pub status: ImportStatus,
    pub parsed: u32,
    pub skipped: u32,
    pub success: u32,
    pub failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub imported_at: DateTime<Utc>,
}

impl ImportLog {
    #[must_use]
    pub fn new(source_path: String, kind: FileKind, content_hash: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            source_path,
            kind,
            content_hash,
            status: ImportStatus::Committed,
            parsed: 0,
            skipped: 0,
            success: 0,
            failed: 0,
            error: None,
            imported_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn with_counts(mut self, parsed: u32, skipped: u32, success: u32, failed: u32) -> Self {
        self.parsed = parsed;
        self.skipped = skipped;
        self.success = success;
        self.failed = failed;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ImportStatus, error: Option<String>) -> Self {
        self.status = status;
        self.error = error;
        self
    }
}
