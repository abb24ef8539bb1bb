//! Two-pass merge: one raw field set per pass in, one pre-validation record out.
//!
//! Every schema field has a home pass, so the merge is mostly a structural
//! union. For each field:
//!
//! 1. a usable home-pass value is taken;
//! 2. otherwise a usable value from the other pass fills the gap;
//! 3. when both passes supply different usable values the home value is
//!    kept and the other is recorded as a [`MergeConflict`].
//!
//! Blank values and placeholder tokens (`N/A`, `-`, `not stated`, ...) are not
//! usable. A placeholder is still carried when neither pass has anything
//! better, so validation can note it.
//!
//! Nested groups (`location.*`, `valuation.*`, ...) are merged key by key
//! because every schema path is a leaf. The merge never fails: a pass that
//! returned nothing simply contributes nothing and the result is `partial`.

use super::normalize::is_placeholder;
use crate::record::{MergeConflict, Pass, RawField, RawFieldSet, RawValue, FIELDS};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One field after the merge, before type coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedValue {
    pub value: RawValue,
    /// Pass the value came from.
    pub source: Pass,
    pub confidence: Option<f32>,
}

/// Output of [`merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedRecord {
    /// Schema path → winning value. Paths with no value in either pass are absent.
    pub values: BTreeMap<&'static str, MergedValue>,
    pub conflicts: Vec<MergeConflict>,
    /// True when either pass contributed no usable field.
    pub partial: bool,
}

impl MergedRecord {
    pub fn get(&self, path: &str) -> Option<&MergedValue> {
        self.values.get(path)
    }

    /// Number of fields filled from their non-home pass.
    pub fn gap_fills(&self) -> usize {
        FIELDS
            .iter()
            .filter(|f| self.values.get(f.path).is_some_and(|v| v.source != f.home))
            .count()
    }
}

/// Merge the two pass outputs into one record.
///
/// Arguments may be given in either order; each set is matched to its pass
/// by [`RawFieldSet::pass`].
pub fn merge(a: &RawFieldSet, b: &RawFieldSet) -> MergedRecord {
    let (pass1, pass2) = if a.pass() == Pass::One { (a, b) } else { (b, a) };
    let for_pass = |p: Pass| if p == Pass::One { pass1 } else { pass2 };

    let mut out = MergedRecord {
        partial: pass1.is_empty() || pass2.is_empty(),
        ..Default::default()
    };

    for spec in FIELDS {
        let other_pass = spec.home.other();
        let home = for_pass(spec.home).get(spec.path);
        let other = for_pass(other_pass).get(spec.path);

        let chosen = match (home.filter(|f| usable(f)), other.filter(|f| usable(f))) {
            (Some(h), Some(o)) => {
                if !same_value(&h.value, &o.value) {
                    warn!(
                        "Merge conflict on '{}': keeping {} value, discarding {} value",
                        spec.path, spec.home, other_pass
                    );
                    out.conflicts.push(MergeConflict {
                        field: spec.path.to_string(),
                        kept: h.value.to_json(),
                        discarded: o.value.to_json(),
                        home_pass: spec.home,
                    });
                }
                Some((h, spec.home))
            }
            (Some(h), None) => Some((h, spec.home)),
            (None, Some(o)) => {
                debug!("'{}' missing from {}, filled from {}", spec.path, spec.home, other_pass);
                Some((o, other_pass))
            }
            (None, None) => home
                .filter(|f| !f.value.is_empty())
                .map(|h| (h, spec.home))
                .or_else(|| other.filter(|f| !f.value.is_empty()).map(|o| (o, other_pass))),
        };

        if let Some((field, source)) = chosen {
            out.values.insert(
                spec.path,
                MergedValue {
                    value: field.value.clone(),
                    source,
                    confidence: field.confidence,
                },
            );
        }
    }

    debug!(
        "Merged {} fields ({} conflicts, {} gap fills, partial={})",
        out.values.len(),
        out.conflicts.len(),
        out.gap_fills(),
        out.partial
    );
    out
}

/// A value worth keeping over whatever the other pass has.
fn usable(field: &RawField) -> bool {
    !field.value.is_empty() && !matches!(&field.value, RawValue::Text(s) if is_placeholder(s))
}

/// Values are the same when their whitespace-collapsed text matches, ignoring case.
fn same_value(a: &RawValue, b: &RawValue) -> bool {
    a.comparable().to_lowercase() == b.comparable().to_lowercase()
}
