use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::source::FileKind;

/// Semantic field names used by column mappings.
pub mod fields {
    pub const ANOMALY_ID: &str = "anomaly_id";
    pub const TITLE: &str = "title";
    pub const SEVERITY: &str = "severity";
    pub const PRODUCT: &str = "product";
    pub const BUILD: &str = "build";
    pub const COMPONENT: &str = "component";
    pub const SYMPTOM: &str = "symptom";
    pub const ROOT_CAUSE: &str = "root_cause";
    pub const COUNTERMEASURE: &str = "countermeasure";
    pub const FACTORY: &str = "factory";
    pub const DATE: &str = "date";

    pub const CASE_ID: &str = "case_id";
    pub const MODULE: &str = "module";
    pub const PRIORITY: &str = "priority";
}

pub const FALLBACK_KEY_PREFIX: &str = "ANOM-";
const FALLBACK_KEY_HEX_LEN: usize = 10;

/// Non-empty cell values of one row, by semantic field.
pub type RowValues = BTreeMap<String, String>;

/// Identifier for an anomaly row without a natural id. Deterministic over
/// `title + product + date`, truncated to 10 hex chars.
#[must_use]
pub fn fallback_anomaly_key(title: Option<&str>, product: Option<&str>, date: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.unwrap_or_default().as_bytes());
    hasher.update(product.unwrap_or_default().as_bytes());
    hasher.update(date.unwrap_or_default().as_bytes());
    let digest = hasher.finalize();

    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{FALLBACK_KEY_PREFIX}{}", &hex[..FALLBACK_KEY_HEX_LEN])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub anomaly_id: String,
    pub title: Option<String>,
    pub severity: Option<String>,
    pub product: Option<String>,
    pub build: Option<String>,
    pub component: Option<String>,
    pub symptom: Option<String>,
    pub root_cause: Option<String>,
    pub countermeasure: Option<String>,
    pub factory: Option<String>,
    pub date: Option<String>,
    /// Spreadsheet row number, header is row 1.
    pub row: usize,
}

impl AnomalyRecord {
    #[must_use]
    pub fn new(anomaly_id: impl Into<String>, row: usize) -> Self {
        Self {
            anomaly_id: anomaly_id.into(),
            title: None,
            severity: None,
            product: None,
            build: None,
            component: None,
            symptom: None,
            root_cause: None,
            countermeasure: None,
            factory: None,
            date: None,
            row,
        }
    }

    #[must_use]
    pub fn from_values(mut values: RowValues, row: usize) -> Self {
        let mut take = |field: &str| values.remove(field);

        let title = take(fields::TITLE);
        let product = take(fields::PRODUCT);
        let date = take(fields::DATE);
        let anomaly_id = take(fields::ANOMALY_ID).unwrap_or_else(|| {
            fallback_anomaly_key(title.as_deref(), product.as_deref(), date.as_deref())
        });

        Self {
            anomaly_id,
            title,
            severity: take(fields::SEVERITY),
            product,
            build: take(fields::BUILD),
            component: take(fields::COMPONENT),
            symptom: take(fields::SYMPTOM),
            root_cause: take(fields::ROOT_CAUSE),
            countermeasure: take(fields::COUNTERMEASURE),
            factory: take(fields::FACTORY),
            date,
            row,
        }
    }

    /// Value of a semantic field, for rule-driven extraction.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            fields::ANOMALY_ID => return Some(&self.anomaly_id),
            fields::TITLE => &self.title,
            fields::SEVERITY => &self.severity,
            fields::PRODUCT => &self.product,
            fields::BUILD => &self.build,
            fields::COMPONENT => &self.component,
            fields::SYMPTOM => &self.symptom,
            fields::ROOT_CAUSE => &self.root_cause,
            fields::COUNTERMEASURE => &self.countermeasure,
            fields::FACTORY => &self.factory,
            fields::DATE => &self.date,
            _ => return None,
        };
        value.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseRecord {
    pub case_id: String,
    pub title: Option<String>,
    pub module: Option<String>,
    pub priority: Option<String>,
    pub row: usize,
}

impl TestCaseRecord {
    #[must_use]
    pub fn new(case_id: impl Into<String>, row: usize) -> Self {
        Self {
            case_id: case_id.into(),
            title: None,
            module: None,
            priority: None,
            row,
        }
    }

    /// `None` when the row has no case id.
    #[must_use]
    pub fn from_values(mut values: RowValues, row: usize) -> Option<Self> {
        let case_id = values.remove(fields::CASE_ID)?;
        Some(Self {
            case_id,
            title: values.remove(fields::TITLE),
            module: values.remove(fields::MODULE),
            priority: values.remove(fields::PRIORITY),
            row,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Anomaly(AnomalyRecord),
    TestCase(TestCaseRecord),
}

impl Record {
    #[must_use]
    pub const fn row(&self) -> usize {
        match self {
            Self::Anomaly(r) => r.row,
            Self::TestCase(r) => r.row,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> FileKind {
        match self {
            Self::Anomaly(_) => FileKind::Anomalies,
            Self::TestCase(_) => FileKind::TestCases,
        }
    }

    #[must_use]
    pub const fn as_anomaly(&self) -> Option<&AnomalyRecord> {
        match self {
            Self::Anomaly(r) => Some(r),
            Self::TestCase(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> RowValues {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_fallback_key_shape() {
        let key = fallback_anomaly_key(Some("No image"), Some("PhoneX"), Some("2024-03-01"));
        assert!(key.starts_with("ANOM-"));
        assert_eq!(key.len(), 15);
        assert!(key[5..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            key,
            fallback_anomaly_key(Some("No image"), Some("PhoneX"), Some("2024-03-01"))
        );
        assert_ne!(key, fallback_anomaly_key(Some("No image"), Some("PhoneY"), Some("2024-03-01")));
    }

    #[test]
    fn test_anomaly_natural_id_wins() {
        let record = AnomalyRecord::from_values(
            values(&[("anomaly_id", "A1"), ("title", "t"), ("component", "vcm")]),
            2,
        );
        assert_eq!(record.anomaly_id, "A1");
        assert_eq!(record.component.as_deref(), Some("vcm"));
        assert_eq!(record.field("component"), Some("vcm"));
        assert_eq!(record.field("symptom"), None);
        assert_eq!(record.field("unknown"), None);
    }

    #[test]
    fn test_anomaly_without_id_gets_fallback() {
        let record = AnomalyRecord::from_values(values(&[("title", "黑屏"), ("product", "PhoneX")]), 5);
        assert_eq!(
            record.anomaly_id,
            fallback_anomaly_key(Some("黑屏"), Some("PhoneX"), None)
        );
        assert_eq!(record.row, 5);
    }

    #[test]
    fn test_test_case_requires_case_id() {
        assert!(TestCaseRecord::from_values(values(&[("title", "Boot")]), 3).is_none());

        let record = TestCaseRecord::from_values(values(&[("case_id", "TC-1"), ("module", "Camera")]), 3)
            .unwrap();
        assert_eq!(record.case_id, "TC-1");
        assert_eq!(record.module.as_deref(), Some("Camera"));
        assert_eq!(Record::TestCase(record).kind(), FileKind::TestCases);
    }
}
