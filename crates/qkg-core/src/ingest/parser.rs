//! Spreadsheet rows to typed records.
//!
//! Workbooks (xlsx, xls, ods) are read with `calamine`, csv with `csv`. The first
//! row of the first sheet is the header row. Each semantic field is bound to a
//! column through [`ColumnMapping`], then every data row becomes an
//! [`AnomalyRecord`] or a [`TestCaseRecord`].

use std::io::Cursor;
use std::path::Path;
use std::sync::LazyLock;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::{fields, AnomalyRecord, Record, RowValues, TestCaseRecord};
use crate::source::FileKind;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Workbook error: {0}")]
    Workbook(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Sheet is empty")]
    EmptySheet,
    #[error("No column found for required field '{0}'")]
    MissingColumn(&'static str),
}

pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetFormat {
    Xlsx,
    Xls,
    Ods,
    Csv,
}

impl SheetFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "xlsx" | "xlsm" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            "ods" => Some(Self::Ods),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// A raw cell before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Self::Empty,
            Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Self::Text(s.clone()),
            Data::Int(i) => Self::Int(*i),
            Data::Float(f) => Self::Float(*f),
            Data::Bool(b) => Self::Bool(*b),
            Data::DateTime(dt) => dt
                .as_datetime()
                .map_or_else(|| Self::Float(dt.as_f64()), Self::DateTime),
        }
    }
}

const NULL_MARKERS: [&str; 10] = [
    "nan", "NaN", "NaT", "None", "null", "NULL", "N/A", "n/a", "#N/A", "<NA>",
];

static DATE_TEXT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})(?:[ T](\d{1,2}):(\d{2})(?::(\d{2}))?(?:\.\d+)?)?$",
    )
    .ok()
});

fn format_datetime(dt: NaiveDateTime) -> String {
    if dt.time() == NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

/// Date-looking text to ISO-8601; `None` if it is not a valid date.
#[must_use]
pub fn parse_date_text(text: &str) -> Option<String> {
    let caps = DATE_TEXT.as_ref()?.captures(text)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let year = i32::try_from(num(1)?).ok()?;
    let date = NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)?;

    match num(4) {
        Some(hour) => {
            let time = NaiveTime::from_hms_opt(hour, num(5)?, num(6).unwrap_or(0))?;
            Some(date.and_time(time).format("%Y-%m-%dT%H:%M:%S").to_string())
        }
        None => Some(date.format("%Y-%m-%d").to_string()),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn format_float(f: f64) -> Option<String> {
    if f.is_nan() {
        None
    } else if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        Some((f as i64).to_string())
    } else {
        Some(f.to_string())
    }
}

/// Cell to its canonical string form. Empty, whitespace and NaN-like values
/// become `None`. Text is kept as written; see [`parse_date_text`] for date
/// columns.
#[must_use]
pub fn normalize_cell(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Empty => None,
        Cell::Int(i) => Some(i.to_string()),
        Cell::Float(f) => format_float(*f),
        Cell::Bool(b) => Some(b.to_string()),
        Cell::DateTime(dt) => Some(format_datetime(*dt)),
        Cell::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || NULL_MARKERS.contains(&trimmed) {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldColumns {
    pub field: String,
    pub headers: Vec<String>,
}

/// Ordered semantic field to candidate header names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub columns: Vec<FieldColumns>,
}

const SIMILARITY_THRESHOLD: f64 = 0.85;

/// Shorter candidates only match exactly or after normalization.
const MIN_CONTAINED_LEN: usize = 3;

fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

impl ColumnMapping {
    #[must_use]
    pub fn new(columns: &[(&str, &[&str])]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(field, headers)| FieldColumns {
                    field: (*field).to_string(),
                    headers: headers.iter().map(|h| (*h).to_string()).collect(),
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn anomalies() -> Self {
        Self::new(&[
            (fields::ANOMALY_ID, &["AnomalyID", "Anomaly ID", "ID", "问题编号", "异常编号", "编号"]),
            (fields::TITLE, &["Title", "标题", "问题描述"]),
            (fields::SEVERITY, &["Severity", "严重度", "严重等级", "等级"]),
            (fields::PRODUCT, &["Product", "机型", "产品", "产品型号", "项目名称"]),
            (fields::BUILD, &["Build", "版本", "项目阶段"]),
            (fields::COMPONENT, &["Component", "Module", "部件", "组件", "零件", "器件"]),
            (fields::SYMPTOM, &["Symptom", "不良现象", "症状", "问题现象"]),
            (fields::ROOT_CAUSE, &["RootCause", "Root Cause", "原因分析", "根因", "根本原因"]),
            (fields::COUNTERMEASURE, &["Countermeasure", "改善对策", "对策", "解决方案"]),
            (fields::FACTORY, &["Factory", "工厂", "工厂名称", "厂区"]),
            (fields::DATE, &["Date", "发生日期", "日期", "创建日期"]),
        ])
    }

    #[must_use]
    pub fn test_cases() -> Self {
        Self::new(&[
            (fields::CASE_ID, &["CaseID", "Case ID", "TestCaseID", "ID", "用例编号", "用例ID"]),
            (fields::TITLE, &["Title", "用例名称", "标题", "名称"]),
            (fields::MODULE, &["Module", "Component", "模块", "功能模块"]),
            (fields::PRIORITY, &["Priority", "优先级"]),
        ])
    }

    #[must_use]
    pub fn for_kind(kind: FileKind) -> Self {
        match kind {
            FileKind::Anomalies => Self::anomalies(),
            FileKind::TestCases => Self::test_cases(),
        }
    }

    /// Column index for every field, `None` where no header matches.
    ///
    /// Tiers are tried in order across all candidates of a field: exact,
    /// normalized, containment, then string similarity.
    #[must_use]
    pub fn resolve(&self, headers: &[String]) -> Vec<(String, Option<usize>)> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();

        self.columns
            .iter()
            .map(|column| {
                let index = resolve_field(&column.headers, headers, &normalized);
                match index {
                    Some(i) => tracing::debug!("Field '{}' -> column '{}'", column.field, headers[i]),
                    None => tracing::warn!(
                        "No column found for '{}' (tried {:?})",
                        column.field,
                        column.headers
                    ),
                }
                (column.field.clone(), index)
            })
            .collect()
    }
}

fn resolve_field(candidates: &[String], headers: &[String], normalized: &[String]) -> Option<usize> {
    let wanted: Vec<String> = candidates
        .iter()
        .map(|c| normalize_header(c))
        .filter(|c| !c.is_empty())
        .collect();

    let exact = || {
        candidates
            .iter()
            .find_map(|c| headers.iter().position(|h| h.trim() == c.trim()))
    };
    let normal = || {
        wanted
            .iter()
            .find_map(|c| normalized.iter().position(|h| h == c))
    };
    let contains = || {
        wanted
            .iter()
            .filter(|c| c.chars().count() >= MIN_CONTAINED_LEN)
            .find_map(|c| normalized.iter().position(|h| !h.is_empty() && h.contains(c.as_str())))
    };
    let similar = || {
        normalized
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.is_empty())
            .flat_map(|(i, h)| {
                wanted
                    .iter()
                    .map(move |c| (i, strsim::normalized_levenshtein(h, c)))
            })
            .filter(|(_, score)| *score >= SIMILARITY_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    };

    exact()
        .or_else(normal)
        .or_else(contains)
        .or_else(similar)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    MissingKeyField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub records: Vec<Record>,
    pub skipped: Vec<SkippedRow>,
    /// Rows where every mapped field was empty.
    pub blank: usize,
    /// Data rows below the header, blank ones included.
    pub total_rows: usize,
    pub unmatched_fields: Vec<String>,
}

pub struct RecordParser {
    anomalies: ColumnMapping,
    test_cases: ColumnMapping,
}

impl RecordParser {
    #[must_use]
    pub const fn new(anomalies: ColumnMapping, test_cases: ColumnMapping) -> Self {
        Self {
            anomalies,
            test_cases,
        }
    }

    const fn mapping(&self, kind: FileKind) -> &ColumnMapping {
        match kind {
            FileKind::Anomalies => &self.anomalies,
            FileKind::TestCases => &self.test_cases,
        }
    }

    pub async fn parse_file(&self, path: &Path, kind: FileKind) -> ParseResult<ParseOutput> {
        let format = SheetFormat::from_path(path)
            .ok_or_else(|| ParseError::UnsupportedFormat(path.display().to_string()))?;

        let data = tokio::fs::read(path).await?;
        self.parse_bytes(&data, format, kind)
    }

    pub fn parse_bytes(&self, data: &[u8], format: SheetFormat, kind: FileKind) -> ParseResult<ParseOutput> {
        let rows = match format {
            SheetFormat::Csv => read_csv(data)?,
            SheetFormat::Xlsx | SheetFormat::Xls | SheetFormat::Ods => read_workbook(data)?,
        };
        self.parse_rows(rows, kind)
    }

    /// Header row first, then data rows.
    pub fn parse_rows(&self, rows: Vec<Vec<Cell>>, kind: FileKind) -> ParseResult<ParseOutput> {
        let mut rows = rows.into_iter();
        let header_row = rows.next().ok_or(ParseError::EmptySheet)?;
        let headers: Vec<String> = header_row
            .iter()
            .map(|cell| normalize_cell(cell).unwrap_or_default())
            .collect();
        if headers.iter().all(String::is_empty) {
            return Err(ParseError::EmptySheet);
        }

        let columns = self.mapping(kind).resolve(&headers);
        if kind == FileKind::TestCases
            && !columns
                .iter()
                .any(|(field, index)| field == fields::CASE_ID && index.is_some())
        {
            return Err(ParseError::MissingColumn(fields::CASE_ID));
        }

        let mut output = ParseOutput {
            unmatched_fields: columns
                .iter()
                .filter(|(_, index)| index.is_none())
                .map(|(field, _)| field.clone())
                .collect(),
            ..ParseOutput::default()
        };

        for (i, cells) in rows.enumerate() {
            let row = i + 2;
            output.total_rows += 1;

            let values: RowValues = columns
                .iter()
                .filter_map(|(field, index)| {
                    let cell = cells.get((*index)?)?;
                    let value = normalize_cell(cell)?;
                    let value = if field == fields::DATE {
                        parse_date_text(&value).unwrap_or(value)
                    } else {
                        value
                    };
                    Some((field.clone(), value))
                })
                .collect();

            if values.is_empty() {
                output.blank += 1;
                continue;
            }

            match kind {
                FileKind::Anomalies => {
                    output
                        .records
                        .push(Record::Anomaly(AnomalyRecord::from_values(values, row)));
                }
                FileKind::TestCases => match TestCaseRecord::from_values(values, row) {
                    Some(record) => output.records.push(Record::TestCase(record)),
                    None => {
                        tracing::debug!("Row {} has no case id, skipping", row);
                        output.skipped.push(SkippedRow {
                            row,
                            reason: SkipReason::MissingKeyField(fields::CASE_ID),
                        });
                    }
                },
            }
        }

        Ok(output)
    }
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new(ColumnMapping::anomalies(), ColumnMapping::test_cases())
    }
}

fn read_csv(data: &[u8]) -> ParseResult<Vec<Vec<Cell>>> {
    let data = data.strip_prefix(b"\xef\xbb\xbf").unwrap_or(data);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|v| Cell::Text(v.to_string())).collect());
    }
    Ok(rows)
}

fn read_workbook(data: &[u8]) -> ParseResult<Vec<Vec<Cell>>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(data.to_vec()))
        .map_err(|e| ParseError::Workbook(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ParseError::EmptySheet)?
        .map_err(|e| ParseError::Workbook(e.to_string()))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(Cell::from).collect())
        .collect())
}
