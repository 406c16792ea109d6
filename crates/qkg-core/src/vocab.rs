//! Controlled vocabularies used to canonicalize free-text names.
//!
//! Each vocabulary is a CSV file with a `name` column and an optional `alias`
//! column. Lookups are case-insensitive on the trimmed input. A vocabulary is
//! built once at startup and only read afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const COMPONENTS_FILE: &str = "components.csv";
pub const SYMPTOMS_FILE: &str = "symptoms.csv";
pub const CAUSES_FILE: &str = "causes.csv";

#[derive(Debug, Error)]
pub enum VocabError {
    #[error("Failed to read vocabulary {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Vocabulary {path} has no `{column}` column")]
    MissingColumn { path: PathBuf, column: &'static str },
}

pub type VocabResult<T> = Result<T, VocabError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VocabKind {
    Component,
    Symptom,
    Cause,
}

impl VocabKind {
    #[must_use]
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::Component => COMPONENTS_FILE,
            Self::Symptom => SYMPTOMS_FILE,
            Self::Cause => CAUSES_FILE,
        }
    }
}

/// Paths of the vocabulary files. Absent entries are treated as empty vocabularies.
#[derive(Debug, Clone, Default)]
pub struct VocabFiles {
    pub components: Option<PathBuf>,
    pub symptoms: Option<PathBuf>,
    pub causes: Option<PathBuf>,
}

impl VocabFiles {
    /// Standard file names inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            components: Some(dir.join(COMPONENTS_FILE)),
            symptoms: Some(dir.join(SYMPTOMS_FILE)),
            causes: Some(dir.join(CAUSES_FILE)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    components: HashMap<String, String>,
    symptoms: HashMap<String, String>,
    causes: HashMap<String, String>,
}

impl Vocabulary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(files: &VocabFiles) -> VocabResult<Self> {
        let mut vocab = Self::new();

        let sources = [
            (VocabKind::Component, files.components.as_deref()),
            (VocabKind::Symptom, files.symptoms.as_deref()),
            (VocabKind::Cause, files.causes.as_deref()),
        ];

        for (kind, path) in sources {
            let Some(path) = path else { continue };
            if !path.exists() {
                tracing::warn!("Vocabulary file {} not found, skipping", path.display());
                continue;
            }
            vocab.load_file(kind, path)?;
            tracing::info!(
                "Loaded {} {:?} vocabulary entries from {}",
                vocab.len(kind),
                kind,
                path.display()
            );
        }

        Ok(vocab)
    }

    pub fn load_dir(dir: &Path) -> VocabResult<Self> {
        Self::load(&VocabFiles::in_dir(dir))
    }

    fn load_file(&mut self, kind: VocabKind, path: &Path) -> VocabResult<()> {
        let csv_err = |source| VocabError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;

        let headers = reader.headers().map_err(csv_err)?.clone();
        let column = |wanted: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case(wanted))
        };

        let name_idx = column("name").ok_or_else(|| VocabError::MissingColumn {
            path: path.to_path_buf(),
            column: "name",
        })?;
        let alias_idx = column("alias");

        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            let name = record.get(name_idx).unwrap_or_default();
            let alias = alias_idx.and_then(|i| record.get(i)).unwrap_or_default();
            self.insert(kind, name, alias);
        }

        Ok(())
    }

    /// Register `name` as canonical and `alias` (if non-empty) as pointing at it.
    /// A row with only an alias maps the alias onto itself.
    pub fn insert(&mut self, kind: VocabKind, name: &str, alias: &str) {
        let name = name.trim();
        let alias = alias.trim();
        let map = self.map_mut(kind);

        if !name.is_empty() {
            map.insert(name.to_lowercase(), name.to_string());
        }
        if !alias.is_empty() {
            let canonical = if name.is_empty() { alias } else { name };
            map.insert(alias.to_lowercase(), canonical.to_string());
        }
    }

    #[must_use]
    pub fn with_entry(mut self, kind: VocabKind, name: &str, alias: &str) -> Self {
        self.insert(kind, name, alias);
        self
    }

    /// Canonical form of `raw`, if the vocabulary knows it.
    #[must_use]
    pub fn lookup(&self, kind: VocabKind, raw: &str) -> Option<&str> {
        self.map(kind)
            .get(&raw.trim().to_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn len(&self, kind: VocabKind) -> usize {
        self.map(kind).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.symptoms.is_empty() && self.causes.is_empty()
    }

    const fn map(&self, kind: VocabKind) -> &HashMap<String, String> {
        match kind {
            VocabKind::Component => &self.components,
            VocabKind::Symptom => &self.symptoms,
            VocabKind::Cause => &self.causes,
        }
    }

    fn map_mut(&mut self, kind: VocabKind) -> &mut HashMap<String, String> {
        match kind {
            VocabKind::Component => &mut self.components,
            VocabKind::Symptom => &mut self.symptoms,
            VocabKind::Cause => &mut self.causes,
        }
    }
}
