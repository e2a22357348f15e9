//! CSV report export and test-case import.
//!
//! Reports use a comma delimiter and double-quote quoting: a field is quoted
//! when it contains a comma, a quote, or a line break, and embedded quotes
//! are doubled. [`parse_csv`] reads the same dialect back.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::run::RunDetail;
use crate::storage::RunStore;
use crate::suite::{NewTestCase, TaskType};
use crate::types::RunId;

/// Header row of a run report.
pub const REPORT_HEADER: [&str; 5] = ["test_id", "prompt", "expected", "output", "verdict"];

/// Quote a field if it needs it.
pub fn escape_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn push_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    let line = fields
        .into_iter()
        .map(escape_field)
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push('\n');
}

/// Render a run's details as a CSV report, in ascending test id order.
pub fn write_run_csv(details: &[RunDetail]) -> String {
    let mut sorted: Vec<&RunDetail> = details.iter().collect();
    sorted.sort_by_key(|d| d.test_id);

    let mut out = String::new();
    push_record(&mut out, REPORT_HEADER);
    for detail in sorted {
        let test_id = detail.test_id.to_string();
        push_record(
            &mut out,
            [
                test_id.as_str(),
                detail.prompt.as_str(),
                detail.expected.as_deref().unwrap_or_default(),
                detail.output.as_str(),
                detail.score.label(),
            ],
        );
    }
    out
}

/// One parsed CSV record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRecord {
    /// Line on which the record starts, 1-based.
    pub line: usize,
    pub fields: Vec<String>,
}

/// Parse a CSV document.
///
/// Accepts `\n` and `\r\n` record terminators and quoted fields spanning
/// several lines.
pub fn parse_csv(input: &str) -> Result<Vec<CsvRecord>> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() && !quoted => {
                in_quotes = true;
                quoted = true;
            }
            '"' => {
                return Err(Error::Csv {
                    line,
                    message: "unexpected quote in field".to_string(),
                });
            }
            ',' => {
                fields.push(std::mem::take(&mut field));
                quoted = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                records.push(CsvRecord {
                    line: record_line,
                    fields: std::mem::take(&mut fields),
                });
                quoted = false;
                line += 1;
                record_line = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(Error::Csv {
            line: record_line,
            message: "unterminated quoted field".to_string(),
        });
    }
    if quoted || !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push(CsvRecord {
            line: record_line,
            fields,
        });
    }
    Ok(records)
}

/// Parse test cases from CSV with a header row.
///
/// Recognised columns are `prompt` (required), `expected`, `task_type` and
/// `context`; others are ignored. Blank lines are skipped.
pub fn parse_test_cases_csv(input: &str) -> Result<Vec<NewTestCase>> {
    let mut records = parse_csv(input)?
        .into_iter()
        .filter(|r| !(r.fields.len() == 1 && r.fields[0].trim().is_empty()));

    let Some(header) = records.next() else {
        return Err(Error::Csv {
            line: 1,
            message: "missing header row".to_string(),
        });
    };
    let column = |name: &str| {
        header
            .fields
            .iter()
            .position(|f| f.trim().eq_ignore_ascii_case(name))
    };
    let prompt_col = column("prompt").ok_or_else(|| Error::Csv {
        line: header.line,
        message: "missing 'prompt' column".to_string(),
    })?;
    let expected_col = column("expected");
    let task_type_col = column("task_type");
    let context_col = column("context");

    let mut cases = Vec::new();
    for record in records {
        if record.fields.len() != header.fields.len() {
            return Err(Error::Csv {
                line: record.line,
                message: format!(
                    "expected {} fields, found {}",
                    header.fields.len(),
                    record.fields.len()
                ),
            });
        }
        let optional = |col: Option<usize>| {
            col.map(|i| record.fields[i].trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let prompt = record.fields[prompt_col].trim();
        if prompt.is_empty() {
            return Err(Error::Csv {
                line: record.line,
                message: "prompt is empty".to_string(),
            });
        }
        let task_type = match optional(task_type_col) {
            Some(raw) => TaskType::parse(&raw).ok_or_else(|| Error::Csv {
                line: record.line,
                message: format!("unknown task type '{raw}'"),
            })?,
            None => TaskType::default(),
        };

        cases.push(NewTestCase {
            prompt: prompt.to_string(),
            expected: optional(expected_col),
            task_type,
            context: optional(context_col),
        });
    }
    Ok(cases)
}

/// Serializes stored runs as CSV reports.
pub struct ReportExporter {
    runs: Arc<dyn RunStore>,
}

impl ReportExporter {
    pub fn new(runs: Arc<dyn RunStore>) -> Self {
        Self { runs }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn export_csv(&self, run_id: RunId) -> Result<Vec<u8>> {
        if self.runs.get_run(run_id).await?.is_none() {
            return Err(Error::RunNotFound(run_id));
        }
        let details = self.runs.get_details(run_id).await?;
        debug!(%run_id, rows = details.len(), "exporting run");
        Ok(write_run_csv(&details).into_bytes())
    }
}
