//! End-to-end pipeline tests with in-process collaborators.
//!
//! Page text, the extraction model and the remote store are replaced by
//! scripted fakes, so these run without pdfium, network or API keys. Input
//! files only need the `%PDF` magic to get past validation.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use valuation_miner::{
    BatchProgressCallback, DocumentOutcome, DocumentStatus, FieldExtractor, InferError,
    InferRequest, MemoryStore, MinerError, PageTextSource, Pass, Pipeline, PipelineConfig,
    RecordStore, RemoteStatus, RetryPolicy, RunSummary, StageIssue, StoreError, TextSourceError,
};

// ── Fakes ────────────────────────────────────────────────────────────────────

const PAGE_ONE: &str = "VALUATION REPORT\nOur Ref: VAL/2023/0142\nClient: Equity Bank Kenya Ltd\n\
Title Number: NAIROBI/BLOCK 82/1234  L.R. No. 209/12345";

/// Three-page report: page 1 has a text layer, pages 2 and 3 are scans.
struct ScriptedPages {
    native: HashMap<usize, String>,
    ocr: HashMap<usize, String>,
    pages: usize,
    ocr_calls: AtomicUsize,
}

impl ScriptedPages {
    fn report() -> Self {
        Self {
            native: HashMap::from([
                (1, PAGE_ONE.to_string()),
                (2, String::new()),
                (3, "  \n ".to_string()),
            ]),
            ocr: HashMap::from([
                (2, "LOCATION: Karen, Nairobi County. Plot area 0.5 ha".to_string()),
                (3, "OPINION OF VALUE: Market value KES 12,500,000".to_string()),
            ]),
            pages: 3,
            ocr_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PageTextSource for ScriptedPages {
    async fn page_count(&self, _path: &Path) -> Result<usize, MinerError> {
        Ok(self.pages)
    }

    async fn native_text(&self, _path: &Path, page: usize) -> Result<String, TextSourceError> {
        Ok(self.native.get(&page).cloned().unwrap_or_default())
    }

    async fn ocr_text(&self, _path: &Path, page: usize) -> Result<String, TextSourceError> {
        self.ocr_calls.fetch_add(1, Ordering::SeqCst);
        self.ocr.get(&page).cloned().ok_or(TextSourceError::Page {
            page,
            detail: "no OCR output".into(),
        })
    }
}

fn pass_one_answer() -> Value {
    json!({
        "property_id": "VAL/2023/0142",
        "title_number": "NAIROBI/BLOCK 82/1234",
        "lr_number": "209/12345",
        "ir_number": "IR 98765",
        "report_reference": "VAL/2023/0142",
        "client_name": "Equity Bank Kenya Ltd",
        "valuer_name": "Jane Wanjiku",
        "valuer_qualifications": "BA (Land Econ), MISK, Registered Valuer",
        "valuer_company": "Acme Valuers Ltd",
        "inspection_date": "2023-03-10",
        "report_date": "14th March 2023",
        "transfer_date": "Sept 5, 2019",
        "consent_to_transfer_date": "21st August 2019",
        "unit": {
            "apartment_no": "C-12",
            "unit_type": "Maisonette",
            "block": "C",
            "floor_level": "Ground",
            "estate_name": "Karen Green Villas"
        },
        "tenure": {
            "tenure_type": "Leasehold",
            "proprietor": "John Kamau",
            "ownership_type": "Sole",
            "encumbrances": "Charge to Equity Bank",
            "lease_term_years": "99 years",
            "lease_start_date": "1990-01-01",
            "lease_term_remaining": "99 years from 1st January 1990"
        }
    })
}

fn pass_two_answer() -> Value {
    json!({
        "location": {
            "county": "Nairobi",
            "description": "Karen, off Langata Road",
            "coordinates": "-1.3190, 36.7073",
            "road_access": "Along Karen Road, tarmacked",
            "distance_to_landmark": "300 metres to The Hub Karen"
        },
        "land": {
            "plot_area_hectares": "0.5 ha",
            "plot_area_acres": "1.2355 acres",
            "built_up_area_sqft": "2,400",
            "land_use": "Residential",
            "shape": "Rectangular",
            "soil": "Red soil",
            "gradient": "Gentle slope",
            "drainage": "Good",
            "vegetation": "Grass and trees"
        },
        "improvements": {
            "bedrooms": "4 bedroomed",
            "master_en_suite": "yes",
            "parking_spaces": 2,
            "balcony_present": "no",
            "accommodation_summary": "Lounge, dining, kitchen, 4 bedrooms",
            "condition": "Good",
            "occupancy_status": "Owner-occupied",
            "internal_finishes": "Ceramic tiles, timber wardrobes"
        },
        "valuation": {
            "market_value": "KES 12,500,000",
            "forced_sale_value": "KES 9,375,000",
            "insurance_value": "KES 8,000,000",
            "land_value": "KES 6,000,000",
            "open_market_rental_value": "KES 85,000",
            "currency": "KES"
        }
    })
}

/// Answers per pass; a pass with no script returns prose instead of JSON.
struct ScriptedModel {
    answers: HashMap<Pass, String>,
    calls: Mutex<Vec<(Pass, bool)>>,
}

impl ScriptedModel {
    fn new(answers: impl IntoIterator<Item = (Pass, Value)>) -> Self {
        Self {
            answers: answers
                .into_iter()
                .map(|(p, v)| (p, format!("```json\n{v}\n```")))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn complete() -> Self {
        Self::new([(Pass::One, pass_one_answer()), (Pass::Two, pass_two_answer())])
    }

    fn calls(&self) -> Vec<(Pass, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FieldExtractor for ScriptedModel {
    async fn infer(&self, request: &InferRequest<'_>) -> Result<String, InferError> {
        self.calls.lock().unwrap().push((request.pass, request.strict));
        assert!(request.document_text.contains("VALUATION REPORT"));
        Ok(self
            .answers
            .get(&request.pass)
            .cloned()
            .unwrap_or_else(|| "Sorry, I could not find the requested fields.".to_string()))
    }
}

/// Takes `delay` per call; answers prose until asked strictly.
struct SluggishModel {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl FieldExtractor for SluggishModel {
    async fn infer(&self, request: &InferRequest<'_>) -> Result<String, InferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if request.strict {
            Ok(pass_one_answer().to_string())
        } else {
            Ok("Let me look at that report for you.".to_string())
        }
    }
}

/// Fails transiently `failures` times, then stores into an inner `MemoryStore`.
struct FlakyStore {
    failures: usize,
    calls: AtomicUsize,
    inner: MemoryStore,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            inner: MemoryStore::new(),
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn upsert(&self, table: &str, key: &str, row: &Value) -> Result<(), StoreError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(StoreError::Transient("HTTP 503: upstream unavailable".into()));
        }
        self.inner.upsert(table, key, row).await
    }
}

struct RejectingStore;

#[async_trait]
impl RecordStore for RejectingStore {
    async fn upsert(&self, _table: &str, _key: &str, _row: &Value) -> Result<(), StoreError> {
        Err(StoreError::Rejected {
            reason: "HTTP 400: column \"county\" does not exist".into(),
        })
    }
}

#[derive(Default)]
struct CountingProgress {
    started: AtomicUsize,
    completed: AtomicUsize,
    batch_total: AtomicUsize,
    finished: AtomicUsize,
}

impl BatchProgressCallback for CountingProgress {
    fn on_batch_start(&self, total_documents: usize) {
        self.batch_total.store(total_documents, Ordering::SeqCst);
    }
    fn on_document_start(&self, _source_file: &str, _index: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_complete(&self, _outcome: &DocumentOutcome) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _summary: &RunSummary) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        multiplier: 2,
        max_backoff: Duration::from_millis(4),
    }
}

fn config(out: &Path) -> PipelineConfig {
    PipelineConfig::builder()
        .output_dir(out)
        .store_retry(fast_retry(3))
        .api_timeout_secs(5)
        .build()
        .unwrap()
}

fn write_pdf(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.7\n% fake body\n%%EOF\n").unwrap();
    path
}

fn pipeline(out: &Path, model: Arc<ScriptedModel>) -> Pipeline {
    Pipeline::new(config(out), Arc::new(ScriptedPages::report()), model)
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

/// Where the outcome says its record was written.
fn record_path(outcome: &DocumentOutcome) -> PathBuf {
    outcome
        .persistence
        .as_ref()
        .and_then(|p| p.local_path.clone())
        .expect("record written locally")
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.flatten().count()).unwrap_or(0)
}

/// The record file minus the fields that change on every run.
fn stable_record(path: &Path) -> Value {
    let mut v = read_json(path);
    let meta = v["metadata"].as_object_mut().unwrap();
    meta.remove("extractedAt");
    meta.remove("processingDurationMs");
    v
}

// ── End to end ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn mixed_native_and_scanned_report_produces_full_record() {
    let dir = TempDir::new().unwrap();
    let pdf = write_pdf(dir.path(), "karen.pdf");
    let out = dir.path().join("out");
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(ScriptedModel::complete());

    let p = pipeline(&out, Arc::clone(&model)).with_store(store.clone());
    let outcome = p.process_document(&pdf).await;

    assert_eq!(outcome.status, DocumentStatus::Success, "{:?}", outcome.issues);
    let record = outcome.record.as_ref().unwrap();
    let meta = &record.metadata;
    assert_eq!(meta.source_file, "karen.pdf");
    assert_eq!(meta.page_count, 3);
    assert!(meta.used_ocr);
    assert_eq!(meta.ocr_pages, vec![2, 3]);
    assert!(meta.degraded_pages.is_empty());
    assert!(!meta.partial);
    assert!(meta.missing_fields.is_empty(), "{:?}", meta.missing_fields);
    assert!(meta.validation_notes.is_empty(), "{:?}", meta.validation_notes);
    assert!(meta.merge_conflicts.is_empty());
    assert!(meta.extracted_at.is_some());

    assert_eq!(record.property_id.as_deref(), Some("VAL/2023/0142"));
    assert_eq!(record.valuation.market_value, Some(12_500_000.0));
    assert_eq!(record.valuation.currency.as_deref(), Some("KES"));
    assert_eq!(record.tenure.lease_term_years, Some(99));
    assert_eq!(record.report_date.unwrap().to_string(), "2023-03-14");
    assert_eq!(record.land.plot_area_hectares, Some(0.5));
    assert_eq!(record.transfer_date.unwrap().to_string(), "2019-09-05");
    assert_eq!(record.unit.apartment_no.as_deref(), Some("C-12"));
    assert_eq!(record.improvements.bedrooms, Some(4));
    assert_eq!(record.improvements.balcony_present, Some(false));
    assert_eq!(record.valuation.open_market_rental_value, Some(85_000.0));

    // One normal call per pass, no strict retries.
    let mut calls = model.calls();
    calls.sort();
    assert_eq!(calls, vec![(Pass::One, false), (Pass::Two, false)]);

    let persistence = outcome.persistence.as_ref().unwrap();
    assert_eq!(persistence.record_key, "VAL/2023/0142");
    assert_eq!(persistence.remote, RemoteStatus::Uploaded { attempts: 1 });
    let row = store.get("valuation_records", "VAL/2023/0142").unwrap();
    assert_eq!(row["county"], "Nairobi");
    assert_eq!(row["source_file"], "karen.pdf");
    assert_eq!(row["property_key"], "VAL/2023/0142");

    // Local artefacts, named after the input plus a short path hash.
    assert!(meta.document_id.starts_with("karen-"), "{}", meta.document_id);
    let record_file = out.join("records").join(format!("{}.json", meta.document_id));
    assert_eq!(persistence.local_path.as_deref(), Some(record_file.as_path()));
    let on_disk = read_json(&record_file);
    assert_eq!(on_disk["metadata"]["usedOCR"], true);
    assert_eq!(on_disk["location"]["county"], "Nairobi");

    let dump = read_json(&out.join("text").join(format!("{}.json", meta.document_id)));
    assert_eq!(dump["totalPages"], 3);
    assert_eq!(dump["pages"][0]["usedOCR"], false);
    assert_eq!(dump["pages"][1]["usedOCR"], true);
}

#[tokio::test]
async fn malformed_second_pass_is_retried_strictly_then_degrades_to_partial() {
    let dir = TempDir::new().unwrap();
    let pdf = write_pdf(dir.path(), "half.pdf");
    let out = dir.path().join("out");
    let model = Arc::new(ScriptedModel::new([(Pass::One, pass_one_answer())]));

    let outcome = pipeline(&out, Arc::clone(&model))
        .process_document(&pdf)
        .await;

    assert_eq!(outcome.status, DocumentStatus::Partial);
    let record = outcome.record.as_ref().unwrap();
    assert!(record.metadata.partial);
    assert!(record.metadata.pass_failures.contains_key(&Pass::Two));
    assert!(!record.metadata.pass_failures.contains_key(&Pass::One));

    // Pass 1 fields survive; every pass 2 field is null and reported missing.
    assert_eq!(record.client_name.as_deref(), Some("Equity Bank Kenya Ltd"));
    assert!(record.location.county.is_none());
    assert!(record.valuation.market_value.is_none());
    assert!(record
        .metadata
        .missing_fields
        .contains(&"valuation.market_value".to_string()));
    assert!(!record
        .metadata
        .missing_fields
        .contains(&"client_name".to_string()));

    let pass_two_calls: Vec<bool> = model
        .calls()
        .into_iter()
        .filter(|(p, _)| *p == Pass::Two)
        .map(|(_, strict)| strict)
        .collect();
    assert_eq!(pass_two_calls, vec![false, true]);

    assert!(outcome
        .issues
        .iter()
        .any(|i| matches!(i, StageIssue::ExtractionPassFailed { pass: 2, .. })));
    assert!(outcome.reason().is_some());
    // The record is still written locally.
    assert!(record_path(&outcome).is_file());
}

#[tokio::test]
async fn home_pass_wins_and_the_other_value_is_audited() {
    let dir = TempDir::new().unwrap();
    let pdf = write_pdf(dir.path(), "conflict.pdf");
    let out = dir.path().join("out");

    let mut second = pass_two_answer();
    second["client_name"] = json!("Kenya Commercial Bank");
    second["lr_number"] = json!("209/12345");
    let model = Arc::new(ScriptedModel::new([
        (Pass::One, pass_one_answer()),
        (Pass::Two, second),
    ]));

    let outcome = pipeline(&out, model).process_document(&pdf).await;
    let record = outcome.record.as_ref().unwrap();

    assert_eq!(record.client_name.as_deref(), Some("Equity Bank Kenya Ltd"));
    let conflicts = &record.metadata.merge_conflicts;
    assert_eq!(conflicts.len(), 1, "{conflicts:?}");
    assert_eq!(conflicts[0].field, "client_name");
    assert_eq!(conflicts[0].home_pass, Pass::One);
    assert_eq!(conflicts[0].discarded, json!("Kenya Commercial Bank"));
    assert!(outcome
        .issues
        .iter()
        .any(|i| matches!(i, StageIssue::MergeConflict { field } if field == "client_name")));
    // A conflict alone does not degrade the document.
    assert_eq!(outcome.status, DocumentStatus::Success);
}

#[tokio::test]
async fn unreadable_values_are_nulled_with_notes() {
    let dir = TempDir::new().unwrap();
    let pdf = write_pdf(dir.path(), "messy.pdf");
    let out = dir.path().join("out");

    let mut first = pass_one_answer();
    first["inspection_date"] = json!("sometime last spring");
    first["valuer_name"] = json!("N/A");
    let model = Arc::new(ScriptedModel::new([
        (Pass::One, first),
        (Pass::Two, pass_two_answer()),
    ]));

    let outcome = pipeline(&out, model).process_document(&pdf).await;
    let record = outcome.record.as_ref().unwrap();

    assert!(record.inspection_date.is_none());
    assert!(record.valuer_name.is_none());
    let noted: Vec<&str> = record
        .metadata
        .validation_notes
        .iter()
        .map(|n| n.field.as_str())
        .collect();
    assert!(noted.contains(&"inspection_date"));
    assert!(noted.contains(&"valuer_name"));
    assert!(record
        .metadata
        .missing_fields
        .contains(&"inspection_date".to_string()));
    // Other fields are unaffected.
    assert_eq!(record.report_date.unwrap().to_string(), "2023-03-14");
}

#[tokio::test]
async fn strict_retries_do_not_outlast_the_document_timeout() {
    let dir = TempDir::new().unwrap();
    let pdf = write_pdf(dir.path(), "slow.pdf");
    let out = dir.path().join("out");
    let model = Arc::new(SluggishModel {
        delay: Duration::from_millis(700),
        calls: AtomicUsize::new(0),
    });

    let config = PipelineConfig::builder()
        .output_dir(&out)
        .api_timeout_secs(5)
        .document_timeout_secs(1)
        .build()
        .unwrap();
    let started = std::time::Instant::now();
    let outcome = Pipeline::new(config, Arc::new(ScriptedPages::report()), model.clone())
        .process_document(&pdf)
        .await;
    let extraction_done = started.elapsed();

    // Both passes: a prose answer, then a strict retry cut short by the deadline.
    assert_eq!(model.calls.load(Ordering::SeqCst), 4);
    assert!(extraction_done < Duration::from_millis(1300), "{extraction_done:?}");
    assert_eq!(outcome.status, DocumentStatus::Partial);
    let failures = &outcome.record.as_ref().unwrap().metadata.pass_failures;
    assert!(failures.values().all(|d| d.contains("timed out")), "{failures:?}");
}

// ── Idempotence ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn reprocessing_overwrites_file_and_row_in_place() {
    let dir = TempDir::new().unwrap();
    let pdf = write_pdf(dir.path(), "twice.pdf");
    let out = dir.path().join("out");
    let store = Arc::new(MemoryStore::new());

    let p = pipeline(&out, Arc::new(ScriptedModel::complete())).with_store(store.clone());
    let first = p.process_document(&pdf).await;
    let record_file = record_path(&first);
    let before = stable_record(&record_file);

    let second = p.process_document(&pdf).await;
    assert_eq!(record_path(&second), record_file);
    let after = stable_record(&record_file);

    assert_eq!(first.status, DocumentStatus::Success);
    assert_eq!(second.status, DocumentStatus::Success);
    assert_eq!(before, after);
    assert_eq!(store.len(), 1);

    assert_eq!(files_in(&out.join("records")), 1, "no stray temp files");
}

#[tokio::test]
async fn same_named_reports_in_different_folders_keep_separate_records() {
    let dir = TempDir::new().unwrap();
    for sub in ["a", "b"] {
        std::fs::create_dir(dir.path().join(sub)).unwrap();
        write_pdf(&dir.path().join(sub), "report.pdf");
    }
    let out = dir.path().join("out");
    let store = Arc::new(MemoryStore::new());

    // No property_id, so the remote key is derived.
    let mut first = pass_one_answer();
    first.as_object_mut().unwrap().remove("property_id");
    let model = Arc::new(ScriptedModel::new([
        (Pass::One, first),
        (Pass::Two, pass_two_answer()),
    ]));
    let p = pipeline(&out, model).with_store(store.clone());
    let inputs = valuation_miner::discover_pdfs(&[dir.path().join("a"), dir.path().join("b")]);
    assert_eq!(inputs.len(), 2);

    let report = p.process_batch(&inputs).await.unwrap();
    let a = &report.outcomes[0];
    let b = &report.outcomes[1];
    assert_eq!(a.source_file, b.source_file);
    assert_ne!(record_path(a), record_path(b));

    let key = |o: &DocumentOutcome| o.persistence.as_ref().unwrap().record_key.clone();
    assert!(key(a).starts_with("derived-"));
    assert_ne!(key(a), key(b));

    assert_eq!(files_in(&out.join("records")), 2);
    assert_eq!(files_in(&out.join("text")), 2);
    assert_eq!(store.len(), 2);
}

// ── Remote failures ──────────────────────────────────────────────────────────

#[tokio::test]
async fn transient_store_errors_are_retried() {
    let dir = TempDir::new().unwrap();
    let pdf = write_pdf(dir.path(), "flaky.pdf");
    let out = dir.path().join("out");
    let store = Arc::new(FlakyStore::new(2));

    let outcome = pipeline(&out, Arc::new(ScriptedModel::complete()))
        .with_store(store.clone())
        .process_document(&pdf)
        .await;

    assert_eq!(outcome.status, DocumentStatus::Success);
    assert_eq!(
        outcome.persistence.as_ref().unwrap().remote,
        RemoteStatus::Uploaded { attempts: 3 }
    );
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.inner.len(), 1);
}

#[tokio::test]
async fn exhausted_retries_fail_the_document_but_keep_the_local_record() {
    let dir = TempDir::new().unwrap();
    let pdf = write_pdf(dir.path(), "down.pdf");
    let out = dir.path().join("out");
    let store = Arc::new(FlakyStore::new(usize::MAX));

    let outcome = pipeline(&out, Arc::new(ScriptedModel::complete()))
        .with_store(store.clone())
        .process_document(&pdf)
        .await;

    assert_eq!(outcome.status, DocumentStatus::Failed);
    let persistence = outcome.persistence.as_ref().unwrap();
    assert!(persistence.local_ok());
    assert!(matches!(
        persistence.remote,
        RemoteStatus::Failed {
            attempts: 3,
            transient: true,
            ..
        }
    ));
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert!(outcome.issues.iter().any(|i| matches!(
        i,
        StageIssue::PersistenceTransientFailure { attempts: 3, .. }
    )));
    assert!(record_path(&outcome).is_file());
}

#[tokio::test]
async fn rejected_row_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let pdf = write_pdf(dir.path(), "schema.pdf");
    let out = dir.path().join("out");

    let outcome = pipeline(&out, Arc::new(ScriptedModel::complete()))
        .with_store(Arc::new(RejectingStore))
        .process_document(&pdf)
        .await;

    assert_eq!(outcome.status, DocumentStatus::Failed);
    assert!(matches!(
        outcome.persistence.as_ref().unwrap().remote,
        RemoteStatus::Failed {
            attempts: 1,
            transient: false,
            ..
        }
    ));
    assert!(outcome.reason().unwrap().contains("column"));
}

#[tokio::test]
async fn upload_disabled_skips_the_store() {
    let dir = TempDir::new().unwrap();
    let pdf = write_pdf(dir.path(), "local.pdf");
    let out = dir.path().join("out");
    let store = Arc::new(MemoryStore::new());

    let config = PipelineConfig::builder()
        .output_dir(&out)
        .upload(false)
        .build()
        .unwrap();
    let outcome = Pipeline::new(
        config,
        Arc::new(ScriptedPages::report()),
        Arc::new(ScriptedModel::complete()),
    )
    .with_store(store.clone())
    .process_document(&pdf)
    .await;

    assert_eq!(outcome.status, DocumentStatus::Success);
    assert_eq!(
        outcome.persistence.as_ref().unwrap().remote,
        RemoteStatus::Skipped
    );
    assert!(store.is_empty());
}

// ── Fatal inputs ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn non_pdf_file_fails_before_any_work() {
    let dir = TempDir::new().unwrap();
    let fake = dir.path().join("notes.pdf");
    std::fs::write(&fake, b"just some text").unwrap();
    let out = dir.path().join("out");
    let pages = Arc::new(ScriptedPages::report());
    let model = Arc::new(ScriptedModel::complete());

    let p = Pipeline::new(config(&out), pages.clone(), model.clone());
    let outcome = p.process_document(&fake).await;

    assert_eq!(outcome.status, DocumentStatus::Failed);
    assert!(outcome.record.is_none());
    assert!(outcome.error.is_some());
    assert_eq!(pages.ocr_calls.load(Ordering::SeqCst), 0);
    assert!(model.calls().is_empty());
    assert!(!out.join("records").exists());
}

#[tokio::test]
async fn missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let outcome = pipeline(&out, Arc::new(ScriptedModel::complete()))
        .process_document(&dir.path().join("gone.pdf"))
        .await;
    assert_eq!(outcome.status, DocumentStatus::Failed);
    assert_eq!(outcome.source_file, "gone.pdf");
}

// ── Batch ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_summary_counts_and_is_written() {
    let dir = TempDir::new().unwrap();
    let good = write_pdf(dir.path(), "a_good.pdf");
    let bad = dir.path().join("b_bad.pdf");
    std::fs::write(&bad, b"<html>").unwrap();
    let out = dir.path().join("out");
    let progress = Arc::new(CountingProgress::default());

    let config = PipelineConfig::builder()
        .output_dir(&out)
        .document_concurrency(2)
        .progress_callback(progress.clone())
        .build()
        .unwrap();
    let p = Pipeline::new(
        config,
        Arc::new(ScriptedPages::report()),
        Arc::new(ScriptedModel::complete()),
    );

    let report = p.process_batch(&[bad.clone(), good.clone()]).await.unwrap();

    // Outcomes come back in path order regardless of completion order.
    let paths: Vec<&Path> = report.outcomes.iter().map(|o| o.path.as_path()).collect();
    assert_eq!(paths, vec![good.as_path(), bad.as_path()]);

    let s = &report.summary;
    assert_eq!(s.total_documents, 2);
    assert_eq!(s.success, 1);
    assert_eq!(s.failed, 1);
    assert_eq!(s.partial, 0);
    assert_eq!(s.local_written, 1);
    assert!(s.started_at.is_some());
    assert!(s.has_failures());
    assert_eq!(s.errors.len(), 1);
    assert_eq!(s.errors[0].source_file, "b_bad.pdf");

    assert_eq!(report.summary_path, out.join("summary.json"));
    let on_disk: RunSummary = serde_json::from_value(read_json(&report.summary_path)).unwrap();
    assert_eq!(on_disk.total_documents, 2);
    assert_eq!(on_disk.failed, 1);

    // Consolidated export: one row per input, failures included.
    assert_eq!(report.export_path, out.join("records.csv"));
    let mut reader = csv::Reader::from_path(&report.export_path).unwrap();
    let headers = reader.headers().unwrap().clone();
    let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][col("source_file")], "a_good.pdf");
    assert_eq!(&rows[0][col("market_value")], "12500000");
    assert_eq!(&rows[0][col("bedrooms")], "4");
    assert_eq!(&rows[1][col("status")], "failed");

    assert_eq!(progress.batch_total.load(Ordering::SeqCst), 2);
    assert_eq!(progress.started.load(Ordering::SeqCst), 2);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 2);
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_batch_still_writes_a_summary() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let report = pipeline(&out, Arc::new(ScriptedModel::complete()))
        .process_batch(&[])
        .await
        .unwrap();
    assert_eq!(report.summary.total_documents, 0);
    assert!(!report.summary.has_failures());
    assert!(report.summary_path.is_file());
    let mut reader = csv::Reader::from_path(&report.export_path).unwrap();
    assert!(reader.headers().unwrap().len() > 1);
    assert_eq!(reader.records().count(), 0);
}
