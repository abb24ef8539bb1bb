//! Pipeline stages for turning one valuation report into one record.
//!
//! Each submodule implements one step, so each can be tested alone and the
//! collaborators (pdfium, the model, the store) can be swapped for fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ acquire ──▶ extract ×2 ──▶ merge ──▶ validate ──▶ enrich ──▶ persist
//! (%PDF)   (text/OCR)   (LLM passes)   (home     (typed +     (metadata)  (file +
//!                                       wins)     notes)                   upsert)
//! ```
//!
//! 1. [`input`]   : discover PDFs and check the `%PDF` magic
//! 2. [`acquire`] : native text per page, OCR fallback via [`render`],
//!    [`encode`] and [`llm`]
//! 3. [`extract`] : two schema-scoped model passes, malformed output retried once
//! 4. [`merge`]   : home-pass-wins union with conflict audit
//! 5. [`validate`]: per-field coercion using [`normalize`]
//! 6. [`enrich`]  : provenance metadata and the natural key
//! 7. [`persist`] : atomic local JSON, then upsert through [`store`]
//!
//! After a batch, [`export`] writes every record as one CSV row.

pub mod acquire;
pub mod encode;
pub mod enrich;
pub mod export;
pub mod extract;
pub mod input;
pub mod llm;
pub mod merge;
pub mod normalize;
pub mod persist;
pub mod render;
pub mod store;
pub mod validate;
