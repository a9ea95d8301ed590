//! Structured JSONL records for harness runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes records to a file, buffer or any writer.
//! - [`validate_log_line`]: checks a single line against the schema.
//! - [`validate_log_file`]: checks an entire JSONL file.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    /// Harness scenario (`stress`, `classify`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            scenario: None,
            thread: None,
            outcome: None,
            duration_ms: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    #[must_use]
    pub fn with_thread(mut self, thread: usize) -> Self {
        self.thread = Some(thread);
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// Writes entries as JSONL, numbering trace ids `<scenario>::<run_id>::<seq>`.
pub struct LogEmitter<W: Write = Box<dyn Write>> {
    writer: W,
    seq: u64,
    scenario: String,
    run_id: String,
}

impl LogEmitter {
    pub fn to_file(path: &Path, scenario: &str, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(LogEmitter::new(
            Box::new(std::io::BufWriter::new(file)) as Box<dyn Write>,
            scenario,
            run_id,
        ))
    }
}

impl LogEmitter<Vec<u8>> {
    /// Emitter collecting into memory (for tests).
    #[must_use]
    pub fn to_buffer(scenario: &str, run_id: &str) -> Self {
        LogEmitter::new(Vec::new(), scenario, run_id)
    }
}

impl<W: Write> LogEmitter<W> {
    pub fn new(writer: W, scenario: &str, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            scenario: scenario.to_string(),
            run_id: run_id.to_string(),
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{}::{:03}", self.scenario, self.run_id, self.seq)
    }

    fn write_entry(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    /// Writes a new entry under the next trace id and returns it.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let entry = LogEntry::new(self.next_trace_id(), level, event).with_scenario(&self.scenario);
        self.write_entry(&entry)?;
        Ok(entry)
    }

    /// Writes a prepared entry. An empty trace id gets the next one and a
    /// missing scenario gets the emitter's.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        entry.scenario.get_or_insert_with(|| self.scenario.clone());
        self.write_entry(&entry)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// One problem found in a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line_number, self.field, self.message)
    }
}

const REQUIRED_FIELDS: [&str; 4] = ["timestamp", "trace_id", "level", "event"];

/// Message for a present field that does not parse as `T`.
fn invalid_value<T: DeserializeOwned>(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &str,
) -> Option<String> {
    let raw = obj.get(field)?;
    serde_json::from_value::<T>(raw.clone())
        .err()
        .map(|_| format!("unexpected value {raw}"))
}

/// Parses one JSONL line into a [`LogEntry`], or lists everything wrong
/// with it.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let at = |field: &str, message: String| LogValidationError {
        line_number,
        field: field.to_string(),
        message,
    };

    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| vec![at("<json>", format!("not JSON: {e}"))])?;
    let Some(obj) = value.as_object() else {
        return Err(vec![at("<root>", "not a JSON object".to_string())]);
    };

    let mut errors: Vec<_> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !obj.contains_key(**field))
        .map(|field| at(*field, "missing".to_string()))
        .collect();
    if let Some(message) = invalid_value::<LogLevel>(obj, "level") {
        errors.push(at("level", message));
    }
    if let Some(message) = invalid_value::<Outcome>(obj, "outcome") {
        errors.push(at("outcome", message));
    }
    if let Some(id) = obj.get("trace_id").and_then(serde_json::Value::as_str)
        && id.split("::").count() != 3
    {
        errors.push(at(
            "trace_id",
            format!("expected <scenario>::<run_id>::<seq>, got '{id}'"),
        ));
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value(value).map_err(|e| vec![at("<entry>", e.to_string())])
}

/// Validates every non-empty line of a JSONL file.
///
/// Returns how many lines were checked and the problems found, with
/// 1-based line numbers.
pub fn validate_log_file(path: &Path) -> std::io::Result<(usize, Vec<LogValidationError>)> {
    let content = std::fs::read_to_string(path)?;
    let mut checked = 0;
    let mut errors = Vec::new();
    for (line_number, line) in (1..).zip(content.lines()) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        checked += 1;
        if let Err(found) = validate_log_line(line, line_number) {
            errors.extend(found);
        }
    }
    Ok((checked, errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// RFC 3339 UTC timestamp with millisecond precision.
fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z % 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new("stress::run-1::001", LogLevel::Info, "run_start");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "stress::run-1::001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "run_start");
        assert!(parsed.get("scenario").is_none());
        assert!(parsed.get("outcome").is_none());
    }

    #[test]
    fn emitter_numbers_trace_ids() {
        let mut emitter = LogEmitter::to_buffer("stress", "r1");
        let first = emitter.emit(LogLevel::Info, "a").unwrap();
        let second = emitter.emit(LogLevel::Debug, "b").unwrap();
        assert_eq!(first.trace_id, "stress::r1::001");
        assert_eq!(second.trace_id, "stress::r1::002");

        let out = String::from_utf8(emitter.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        for (i, line) in lines.iter().enumerate() {
            assert!(validate_log_line(line, i + 1).is_ok(), "{line}");
        }
    }

    #[test]
    fn emit_entry_fills_missing_fields() {
        let mut emitter = LogEmitter::to_buffer("classify", "r2");
        let entry = LogEntry::new("", LogLevel::Warn, "odd").with_outcome(Outcome::Fail);
        emitter.emit_entry(entry).unwrap();
        let out = String::from_utf8(emitter.into_inner()).unwrap();
        let parsed = validate_log_line(out.trim(), 1).unwrap();
        assert_eq!(parsed.trace_id, "classify::r2::001");
        assert_eq!(parsed.scenario.as_deref(), Some("classify"));
    }

    #[test]
    fn validation_reports_every_problem() {
        let errs = validate_log_line(r#"{"level":"loud","trace_id":"x","outcome":"meh"}"#, 4)
            .unwrap_err();
        let fields: Vec<&str> = errs.iter().map(|e| e.field.as_str()).collect();
        for expected in ["timestamp", "event", "level", "outcome", "trace_id"] {
            assert!(fields.contains(&expected), "missing {expected}: {fields:?}");
        }
        assert!(errs.iter().all(|e| e.line_number == 4));
    }

    #[test]
    fn validation_rejects_non_objects() {
        assert_eq!(validate_log_line("[1,2]", 1).unwrap_err()[0].field, "<root>");
        assert_eq!(validate_log_line("{nope", 1).unwrap_err()[0].field, "<json>");
    }

    #[test]
    fn utc_formatting() {
        assert_eq!(format_utc(0, 0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_utc(951_782_400, 5), "2000-02-29T00:00:00.005Z");
        assert_eq!(format_utc(1_700_000_000, 123), "2023-11-14T22:13:20.123Z");
    }
}
