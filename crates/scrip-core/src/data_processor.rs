//! Raw catalog ingest and record shape normalization.

use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{Metadata, Record};

/// Normalize one stored entry to `{content, metadata}`.
///
/// Accepted shapes:
/// - `{"content": .., "metadata": {..}}`
/// - `{"metadata": {..}}`
/// - `{"metadata": {"content": .., "metadata": {..}}}` (redundant envelope)
/// - a bare metadata object
pub fn normalize_entry(entry: Value) -> std::result::Result<Record, String> {
    let mut obj = match entry {
        Value::Object(obj) => obj,
        other => return Err(format!("expected an object, got {other}")),
    };
    let (mut content, mut meta) = match obj.remove("metadata") {
        Some(Value::Object(inner)) => (take_content(&mut obj), inner),
        Some(other) => return Err(format!("'metadata' must be an object, got {other}")),
        None => (take_content(&mut obj), obj),
    };
    // Unwrap a redundant envelope; the inner content wins when the outer is empty.
    if let Some(Value::Object(nested)) = meta.get("metadata") {
        let nested = nested.clone();
        let inner_content = take_content(&mut meta);
        if content.is_empty() {
            content = inner_content;
        }
        meta = nested;
    }
    let metadata: Metadata = serde_json::from_value(Value::Object(meta)).map_err(|e| e.to_string())?;
    Ok(Record { content, metadata })
}

fn take_content(obj: &mut serde_json::Map<String, Value>) -> String {
    match obj.remove("content") {
        Some(Value::String(s)) => s,
        _ => String::new(),
    }
}

#[derive(Default)]
pub struct DataProcessor;

impl DataProcessor {
    pub fn new() -> Self { Self }

    /// Read a JSONL file: one entry per line, blank lines skipped.
    pub fn process_file(&self, path: &Path) -> Result<Vec<Record>> {
        let file = fs::File::open(path)?;
        let records = self.process_reader(file)?;
        info!(path = %path.display(), records = records.len(), "read catalog source");
        Ok(records)
    }

    pub fn process_file_limited(&self, path: &Path, limit: usize) -> Result<Vec<Record>> {
        let mut records = self.process_file(path)?;
        if records.len() > limit {
            records.truncate(limit);
            info!(limit, "limited catalog source");
        }
        Ok(records)
    }

    pub fn process_reader<R: Read>(&self, reader: R) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for (idx, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let line_no = idx + 1;
            if line.trim().is_empty() {
                debug!(line = line_no, "skipping blank line");
                continue;
            }
            let value: Value = serde_json::from_str(&line)
                .map_err(|e| Error::Source { line: line_no, reason: e.to_string() })?;
            let record = normalize_entry(value).map_err(|reason| Error::Source { line: line_no, reason })?;
            records.push(record);
        }
        Ok(records)
    }
}
