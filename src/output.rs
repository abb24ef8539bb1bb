//! Output types: per-document outcomes and the batch run summary.
//!
//! Outcomes are plain values returned up the call chain; the summary is a
//! fold over them. Nothing here mutates pipeline state.

use crate::error::StageIssue;
use crate::record::CanonicalRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// What happened to a record at the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RemoteStatus {
    /// Upserted; `attempts` counts the first try.
    Uploaded { attempts: u32 },
    /// No remote store configured, or upload disabled.
    Skipped,
    Failed {
        reason: String,
        attempts: u32,
        /// True when retries ran out; false when the store rejected the row.
        transient: bool,
    },
}

/// Local and remote persistence results for one record, kept independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceOutcome {
    /// Natural key used for the upsert.
    pub record_key: String,
    pub local_path: Option<PathBuf>,
    pub local_error: Option<String>,
    pub remote: RemoteStatus,
}

impl PersistenceOutcome {
    pub fn local_ok(&self) -> bool {
        self.local_path.is_some() && self.local_error.is_none()
    }

    pub fn remote_failed(&self) -> bool {
        matches!(self.remote, RemoteStatus::Failed { .. })
    }

    /// First reason this outcome counts as a failure, if any.
    pub fn failure_reason(&self) -> Option<String> {
        if let Some(e) = &self.local_error {
            return Some(format!("local write failed: {e}"));
        }
        match &self.remote {
            RemoteStatus::Failed {
                reason,
                attempts,
                transient: true,
            } => Some(format!("remote upsert failed after {attempts} attempts: {reason}")),
            RemoteStatus::Failed { reason, .. } => {
                Some(format!("remote store rejected the record: {reason}"))
            }
            _ => None,
        }
    }
}

/// Terminal status of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Success,
    Partial,
    Failed,
}

impl DocumentStatus {
    /// Failed when persistence failed on either side, otherwise partial or success
    /// depending on the record.
    pub fn decide(partial: bool, persistence: &PersistenceOutcome) -> Self {
        if persistence.failure_reason().is_some() {
            DocumentStatus::Failed
        } else if partial {
            DocumentStatus::Partial
        } else {
            DocumentStatus::Success
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentStatus::Success => "success",
            DocumentStatus::Partial => "partial",
            DocumentStatus::Failed => "failed",
        })
    }
}

/// Everything the pipeline knows about one document once it is done.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOutcome {
    /// File name of the source PDF.
    pub source_file: String,
    pub path: PathBuf,
    pub status: DocumentStatus,
    /// The canonical record, when one was produced. Not part of the summary.
    #[serde(skip)]
    pub record: Option<CanonicalRecord>,
    pub persistence: Option<PersistenceOutcome>,
    pub issues: Vec<StageIssue>,
    /// Fatal error that stopped the document before a record was produced.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl DocumentOutcome {
    /// Outcome for a document that never produced a record.
    pub fn failed(
        source_file: impl Into<String>,
        path: PathBuf,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            path,
            status: DocumentStatus::Failed,
            record: None,
            persistence: None,
            issues: Vec::new(),
            error: Some(error.into()),
            duration_ms,
        }
    }

    /// Human-readable reason for a failed or partial document.
    pub fn reason(&self) -> Option<String> {
        if let Some(e) = &self.error {
            return Some(e.clone());
        }
        if let Some(r) = self.persistence.as_ref().and_then(|p| p.failure_reason()) {
            return Some(r);
        }
        if self.status == DocumentStatus::Partial {
            let passes: Vec<String> = self
                .issues
                .iter()
                .filter_map(|i| match i {
                    StageIssue::ExtractionPassFailed { .. } => Some(i.to_string()),
                    _ => None,
                })
                .collect();
            return Some(if passes.is_empty() {
                "an extraction pass returned no usable field".to_string()
            } else {
                passes.join("; ")
            });
        }
        None
    }
}

/// One line of the summary's error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentError {
    pub source_file: String,
    pub status: DocumentStatus,
    pub reason: String,
}

/// Compact per-document line in the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLine {
    pub source_file: String,
    pub status: DocumentStatus,
    pub record_key: Option<String>,
    pub local_path: Option<PathBuf>,
    pub remote: Option<RemoteStatus>,
    pub issue_count: usize,
    pub duration_ms: u64,
}

/// Batch report written to `summary.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub total_documents: usize,
    pub success: usize,
    pub partial: usize,
    pub failed: usize,
    pub local_written: usize,
    pub uploaded: usize,
    pub upload_failed: usize,
    pub total_duration_ms: u64,
    pub errors: Vec<DocumentError>,
    pub documents: Vec<DocumentLine>,
}

impl RunSummary {
    /// Fold a batch of outcomes into a summary.
    pub fn from_outcomes(outcomes: &[DocumentOutcome], total_duration_ms: u64) -> Self {
        let mut summary = outcomes.iter().fold(Self::default(), |mut acc, o| {
            acc.record(o);
            acc
        });
        summary.total_duration_ms = total_duration_ms;
        summary
    }

    /// Add one outcome.
    pub fn record(&mut self, outcome: &DocumentOutcome) {
        self.total_documents += 1;
        match outcome.status {
            DocumentStatus::Success => self.success += 1,
            DocumentStatus::Partial => self.partial += 1,
            DocumentStatus::Failed => self.failed += 1,
        }
        if let Some(p) = &outcome.persistence {
            if p.local_ok() {
                self.local_written += 1;
            }
            match p.remote {
                RemoteStatus::Uploaded { .. } => self.uploaded += 1,
                RemoteStatus::Failed { .. } => self.upload_failed += 1,
                RemoteStatus::Skipped => {}
            }
        }
        if outcome.status != DocumentStatus::Success {
            if let Some(reason) = outcome.reason() {
                self.errors.push(DocumentError {
                    source_file: outcome.source_file.clone(),
                    status: outcome.status,
                    reason,
                });
            }
        }
        self.documents.push(DocumentLine {
            source_file: outcome.source_file.clone(),
            status: outcome.status,
            record_key: outcome.persistence.as_ref().map(|p| p.record_key.clone()),
            local_path: outcome.persistence.as_ref().and_then(|p| p.local_path.clone()),
            remote: outcome.persistence.as_ref().map(|p| p.remote.clone()),
            issue_count: outcome.issues.len(),
            duration_ms: outcome.duration_ms,
        });
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persisted(remote: RemoteStatus) -> PersistenceOutcome {
        PersistenceOutcome {
            record_key: "KEY-1".into(),
            local_path: Some(PathBuf::from("output/records/a.json")),
            local_error: None,
            remote,
        }
    }

    fn outcome(status: DocumentStatus, persistence: PersistenceOutcome) -> DocumentOutcome {
        DocumentOutcome {
            source_file: "a.pdf".into(),
            path: PathBuf::from("in/a.pdf"),
            status,
            record: None,
            persistence: Some(persistence),
            issues: Vec::new(),
            error: None,
            duration_ms: 12,
        }
    }

    #[test]
    fn status_rules() {
        let ok = persisted(RemoteStatus::Uploaded { attempts: 1 });
        assert_eq!(DocumentStatus::decide(false, &ok), DocumentStatus::Success);
        assert_eq!(DocumentStatus::decide(true, &ok), DocumentStatus::Partial);

        let skipped = persisted(RemoteStatus::Skipped);
        assert_eq!(DocumentStatus::decide(false, &skipped), DocumentStatus::Success);

        let rejected = persisted(RemoteStatus::Failed {
            reason: "bad column".into(),
            attempts: 1,
            transient: false,
        });
        assert_eq!(DocumentStatus::decide(false, &rejected), DocumentStatus::Failed);

        let mut local_broken = persisted(RemoteStatus::Skipped);
        local_broken.local_path = None;
        local_broken.local_error = Some("disk full".into());
        assert_eq!(DocumentStatus::decide(true, &local_broken), DocumentStatus::Failed);
    }

    #[test]
    fn failure_reason_distinguishes_exhaustion_from_rejection() {
        let exhausted = persisted(RemoteStatus::Failed {
            reason: "HTTP 503".into(),
            attempts: 4,
            transient: true,
        });
        assert!(exhausted.failure_reason().unwrap().contains("after 4 attempts"));
        let rejected = persisted(RemoteStatus::Failed {
            reason: "null value in column".into(),
            attempts: 1,
            transient: false,
        });
        assert!(rejected.failure_reason().unwrap().contains("rejected"));
    }

    #[test]
    fn summary_counts() {
        let outcomes = vec![
            outcome(DocumentStatus::Success, persisted(RemoteStatus::Uploaded { attempts: 1 })),
            outcome(DocumentStatus::Partial, persisted(RemoteStatus::Uploaded { attempts: 2 })),
            outcome(
                DocumentStatus::Failed,
                persisted(RemoteStatus::Failed {
                    reason: "HTTP 503".into(),
                    attempts: 4,
                    transient: true,
                }),
            ),
            DocumentOutcome::failed("b.pdf", PathBuf::from("in/b.pdf"), "not a PDF", 1),
        ];
        let summary = RunSummary::from_outcomes(&outcomes, 500);
        assert_eq!(summary.total_documents, 4);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.upload_failed, 1);
        assert_eq!(summary.local_written, 3);
        assert_eq!(summary.total_duration_ms, 500);
        assert_eq!(summary.errors.len(), 3);
        assert_eq!(summary.documents.len(), 4);
        assert!(summary.has_failures());
    }

    #[test]
    fn summary_serialises_camel_case() {
        let summary = RunSummary::from_outcomes(&[], 0);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["totalDocuments"], 0);
        assert!(json.get("uploadFailed").is_some());
        assert!(!summary.has_failures());
    }

    #[test]
    fn record_is_not_serialised() {
        let mut o = DocumentOutcome::failed("a.pdf", PathBuf::from("a.pdf"), "x", 0);
        o.record = Some(CanonicalRecord::default());
        let json = serde_json::to_value(&o).unwrap();
        assert!(json.get("record").is_none());
        assert_eq!(json["status"], "failed");
    }
}
