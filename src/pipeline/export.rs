//! Consolidated batch export: one CSV row per document, next to `summary.json`.
//!
//! Columns are the document identity and status followed by one column per
//! schema field, named as in the remote table. Failed documents still get a
//! row (identity, status and reason only) so the sheet accounts for every
//! input.

use crate::error::MinerError;
use crate::output::DocumentOutcome;
use crate::record::FIELDS;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Columns written before the schema fields.
pub const LEADING_COLUMNS: [&str; 5] = ["source_file", "document_id", "property_key", "status", "reason"];

/// Full header row.
pub fn header() -> Vec<&'static str> {
    LEADING_COLUMNS
        .iter()
        .copied()
        .chain(FIELDS.iter().map(|f| f.column))
        .collect()
}

/// One CSV row for `outcome`, aligned with [`header`].
pub fn row(outcome: &DocumentOutcome) -> Vec<String> {
    let document_id = outcome
        .record
        .as_ref()
        .map(|r| r.metadata.document_id.clone())
        .unwrap_or_default();
    let key = outcome
        .persistence
        .as_ref()
        .map(|p| p.record_key.clone())
        .unwrap_or_default();

    let mut cells = vec![
        outcome.source_file.clone(),
        document_id,
        key,
        outcome.status.to_string(),
        outcome.reason().unwrap_or_default(),
    ];
    match &outcome.record {
        Some(record) => {
            let values = record.to_row();
            cells.extend(FIELDS.iter().map(|f| values.get(f.column).map(cell).unwrap_or_default()));
        }
        None => cells.extend(FIELDS.iter().map(|_| String::new())),
    }
    cells
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => if *b { "Yes" } else { "No" }.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Write the export to `path` through a temp file in the same directory.
pub fn write_csv_atomic(path: &Path, outcomes: &[DocumentOutcome]) -> Result<(), MinerError> {
    let io_err = |source| MinerError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(io_err)?;

    let tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
    let mut writer = csv::Writer::from_writer(tmp);
    writer
        .write_record(header())
        .map_err(|e| io_err(e.into()))?;
    for outcome in outcomes {
        writer.write_record(row(outcome)).map_err(|e| io_err(e.into()))?;
    }
    let tmp = writer.into_inner().map_err(|e| io_err(e.into_error()))?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    debug!("Wrote {} rows to {}", outcomes.len(), path.display());
    Ok(())
}

/// [`write_csv_atomic`] on the blocking pool.
pub async fn write_batch_csv(path: PathBuf, outcomes: Vec<DocumentOutcome>) -> Result<PathBuf, MinerError> {
    tokio::task::spawn_blocking(move || write_csv_atomic(&path, &outcomes).map(|_| path))
        .await
        .map_err(|e| MinerError::Internal(format!("export task panicked: {e}")))?
}
