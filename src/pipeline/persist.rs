//! Persistence: atomic local JSON artefacts and the remote upsert.
//!
//! Every file is written to a temp file in its destination directory and
//! renamed into place, so a crash never leaves a half-written record and
//! re-running overwrites deterministically. Local and remote results are
//! recorded independently: a record can be on disk while the upload failed.

use crate::error::{MinerError, StageIssue, StoreError};
use crate::output::{PersistenceOutcome, RemoteStatus};
use crate::pipeline::acquire::{AcquiredText, PageText};
use crate::pipeline::store::RecordStore;
use crate::record::CanonicalRecord;
use crate::retry::RetryPolicy;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Serialise `value` as pretty JSON and move it into `path` atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), MinerError> {
    let io_err = |source| MinerError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(io_err)?;

    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');

    let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
    tmp.write_all(&bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// [`write_json_atomic`] on the blocking pool.
pub async fn write_json<T>(path: PathBuf, value: T) -> Result<PathBuf, MinerError>
where
    T: Serialize + Send + 'static,
{
    tokio::task::spawn_blocking(move || write_json_atomic(&path, &value).map(|_| path))
        .await
        .map_err(|e| MinerError::Internal(format!("write task panicked: {e}")))?
}

/// File stem used for a document's artefacts (`reports/Plot 7.pdf` → `Plot 7`).
pub fn artefact_stem(source_file: &str) -> String {
    let stem = Path::new(source_file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.trim().is_empty() {
        "document".to_string()
    } else {
        stem
    }
}

/// Artefact key for one input: `<stem>-<8 hex>` where the hex is a hash of
/// the canonical path, so `a/report.pdf` and `b/report.pdf` never share files.
/// Falls back to the path as given when it cannot be canonicalised.
pub fn document_id(path: &Path) -> String {
    let full = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let digest = Sha256::digest(full.to_string_lossy().as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    format!("{}-{hex}", artefact_stem(&name))
}

/// Debug/audit dump of the acquired text.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDump<'a> {
    pub source_file: &'a str,
    pub document_id: &'a str,
    pub total_pages: usize,
    pub pages: &'a [PageText],
}

/// Write `text/<document id>.json`. Failure is logged; the text dump never blocks a record.
pub async fn write_text_dump(
    text_dir: &Path,
    document_id: &str,
    source_file: &str,
    acquired: &AcquiredText,
) -> Option<PathBuf> {
    let path = text_dir.join(format!("{document_id}.json"));
    let dump = serde_json::to_value(TextDump {
        source_file,
        document_id,
        total_pages: acquired.total_pages,
        pages: &acquired.pages,
    });
    let result = match dump {
        Ok(v) => write_json(path, v).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(p) => Some(p),
        Err(e) => {
            warn!("Could not write text dump for {}: {}", source_file, e);
            None
        }
    }
}

/// Where and how to upload.
pub struct RemoteTarget<'a> {
    pub store: &'a dyn RecordStore,
    pub table: &'a str,
    pub policy: &'a RetryPolicy,
}

/// Write the record locally, then upsert it remotely when a target is given.
///
/// Never fails; problems are reported in the outcome and as issues.
pub async fn persist(
    record: &CanonicalRecord,
    records_dir: &Path,
    remote: Option<RemoteTarget<'_>>,
) -> (PersistenceOutcome, Vec<StageIssue>) {
    let key = record
        .metadata
        .record_key
        .clone()
        .unwrap_or_else(|| record.natural_key());
    let mut issues = Vec::new();

    let stem = match record.metadata.document_id.as_str() {
        "" => artefact_stem(&record.metadata.source_file),
        id => id.to_string(),
    };
    let path = records_dir.join(format!("{stem}.json"));
    let (local_path, local_error) = match write_json(path, record.clone()).await {
        Ok(p) => (Some(p), None),
        Err(e) => {
            warn!("Local write failed for {}: {}", record.metadata.source_file, e);
            (None, Some(e.to_string()))
        }
    };

    let remote_status = match remote {
        None => RemoteStatus::Skipped,
        Some(target) => {
            let row = Value::Object(record.to_row());
            let outcome = target
                .policy
                .run(&format!("upsert {key}"), |_| target.store.upsert(target.table, &key, &row))
                .await;
            match outcome.result {
                Ok(()) => {
                    info!("Upserted {} (attempt {})", key, outcome.attempts);
                    RemoteStatus::Uploaded {
                        attempts: outcome.attempts,
                    }
                }
                Err(StoreError::Transient(detail)) => {
                    warn!("Upsert of {} gave up after {} attempts: {}", key, outcome.attempts, detail);
                    issues.push(StageIssue::PersistenceTransientFailure {
                        attempts: outcome.attempts,
                        detail: detail.clone(),
                    });
                    RemoteStatus::Failed {
                        reason: detail,
                        attempts: outcome.attempts,
                        transient: true,
                    }
                }
                Err(StoreError::Rejected { reason }) => {
                    warn!("Store rejected {}: {}", key, reason);
                    issues.push(StageIssue::PersistenceRejected {
                        reason: reason.clone(),
                    });
                    RemoteStatus::Failed {
                        reason,
                        attempts: outcome.attempts,
                        transient: false,
                    }
                }
            }
        }
    };

    (
        PersistenceOutcome {
            record_key: key,
            local_path,
            local_error,
            remote: remote_status,
        },
        issues,
    )
}
