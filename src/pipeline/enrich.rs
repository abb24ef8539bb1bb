//! Metadata enrichment: attach provenance to a validated record.
//!
//! Pure function; the caller supplies the clock reading and the duration so
//! the result is fully determined by its inputs.

use crate::pipeline::acquire::AcquiredText;
use crate::pipeline::merge::MergedRecord;
use crate::pipeline::validate::Validated;
use crate::record::{CanonicalRecord, Pass, RecordMetadata};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Everything enrichment needs besides the record itself.
#[derive(Debug, Clone)]
pub struct Provenance<'a> {
    pub source_file: &'a str,
    pub document_id: &'a str,
    pub acquired: &'a AcquiredText,
    /// Pass → failure reason, for passes that produced nothing.
    pub pass_failures: BTreeMap<Pass, String>,
    pub processing_duration_ms: u64,
    pub extracted_at: DateTime<Utc>,
}

/// Fill `metadata` on the validated record.
pub fn enrich(validated: Validated, merged: &MergedRecord, provenance: Provenance<'_>) -> CanonicalRecord {
    let Validated { mut record, notes } = validated;
    let acquired = provenance.acquired;

    record.metadata = RecordMetadata {
        source_file: provenance.source_file.to_string(),
        document_id: provenance.document_id.to_string(),
        page_count: acquired.total_pages,
        used_ocr: acquired.used_ocr(),
        ocr_pages: acquired.ocr_pages(),
        degraded_pages: acquired.degraded_pages(),
        processing_duration_ms: provenance.processing_duration_ms,
        extracted_at: Some(provenance.extracted_at),
        partial: merged.partial || !provenance.pass_failures.is_empty(),
        pass_failures: provenance.pass_failures,
        merge_conflicts: merged.conflicts.clone(),
        validation_notes: notes,
        missing_fields: Vec::new(),
        record_key: None,
    };
    record.metadata.missing_fields = record.missing_fields();
    // The derived key hashes the document id, so it is computed after that is set.
    record.metadata.record_key = Some(record.natural_key());
    record
}
