//! Field-level validation: merged raw values → typed [`CanonicalRecord`].
//!
//! Each field is coerced on its own according to its [`FieldKind`]; one
//! field failing never affects another. A value that cannot be coerced is
//! nulled (coordinates are kept verbatim instead) and a [`ValidationNote`]
//! records why. Validation never fails.

use crate::pipeline::merge::MergedRecord;
use crate::pipeline::normalize::{self, AreaUnit};
use crate::record::{
    CanonicalRecord, DowngradeReason, FieldKind, FieldSpec, RawValue, ValidationNote, FIELDS,
};
use serde_json::Value;
use tracing::warn;

/// A typed record plus every downgrade made while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub record: CanonicalRecord,
    pub notes: Vec<ValidationNote>,
}

/// Outcome of coercing one field.
enum Coerced {
    Text(String),
    Number(f64),
    Whole(u32),
    Flag(bool),
    Date(chrono::NaiveDate),
    /// Value rejected; slot stays null.
    Rejected(DowngradeReason),
    /// Coordinates we could not read; kept verbatim.
    RawCoordinates(String),
}

pub fn validate(merged: &MergedRecord) -> Validated {
    let mut record = CanonicalRecord::default();
    let mut notes = Vec::new();
    let mut currency_hint: Option<&'static str> = None;

    for spec in FIELDS {
        let Some(mv) = merged.get(spec.path) else {
            continue;
        };
        let coerced = coerce(spec, &mv.value, &mut currency_hint);
        let raw_text = || Some(display_raw(&mv.value));
        match coerced {
            Coerced::Text(s) => {
                if let Some(slot) = record.text_slot(spec.path) {
                    *slot = Some(s);
                }
            }
            Coerced::Number(n) => {
                if let Some(slot) = record.number_slot(spec.path) {
                    *slot = Some(n);
                }
            }
            Coerced::Whole(n) => {
                if let Some(slot) = record.whole_slot(spec.path) {
                    *slot = Some(n);
                }
            }
            Coerced::Flag(b) => {
                if let Some(slot) = record.flag_slot(spec.path) {
                    *slot = Some(b);
                }
            }
            Coerced::Date(d) => {
                if let Some(slot) = record.date_slot(spec.path) {
                    *slot = Some(d);
                }
            }
            Coerced::RawCoordinates(s) => {
                warn!("'{}': coordinates not recognised, kept as text: {:?}", spec.path, s);
                if let Some(slot) = record.text_slot(spec.path) {
                    *slot = Some(s);
                }
                notes.push(ValidationNote {
                    field: spec.path.to_string(),
                    reason: DowngradeReason::UnparsedCoordinates,
                    raw: raw_text(),
                });
            }
            Coerced::Rejected(reason) => {
                warn!("'{}': {} value nulled: {}", spec.path, reason, display_raw(&mv.value));
                notes.push(ValidationNote {
                    field: spec.path.to_string(),
                    reason,
                    raw: raw_text(),
                });
            }
        }
    }

    derive_missing_area(&mut record);
    if record.valuation.currency.is_none() {
        if let Some(code) = currency_hint {
            record.valuation.currency = Some(code.to_string());
        }
    }

    Validated { record, notes }
}

fn coerce(spec: &FieldSpec, value: &RawValue, currency_hint: &mut Option<&'static str>) -> Coerced {
    use Coerced::Rejected;
    use DowngradeReason::{Placeholder, Unparsable};

    let text = match value {
        RawValue::Text(s) => Some(s.as_str()),
        _ => None,
    };
    // "None" is a real answer for a yes/no field.
    if spec.kind == FieldKind::Flag {
        return match value {
            RawValue::Bool(b) => Coerced::Flag(*b),
            RawValue::Text(s) => normalize::parse_flag(s).map_or(Rejected(Unparsable), Coerced::Flag),
            _ => Rejected(Unparsable),
        };
    }
    if let Some(s) = text {
        if normalize::is_placeholder(s) {
            return Rejected(match spec.kind {
                FieldKind::Identifier | FieldKind::Text | FieldKind::Currency | FieldKind::Coordinates => {
                    Placeholder
                }
                _ => Unparsable,
            });
        }
    }

    match spec.kind {
        FieldKind::Identifier | FieldKind::Text => match value {
            RawValue::Text(s) => normalize::clean_text(s).map_or(Rejected(Placeholder), Coerced::Text),
            RawValue::Number(n) => Coerced::Text(format_plain(*n)),
            RawValue::Bool(b) => Coerced::Text(if *b { "Yes" } else { "No" }.to_string()),
            RawValue::Structured(Value::Array(items)) => {
                let joined: Vec<String> = items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => normalize::clean_text(s),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect();
                if joined.is_empty() {
                    Rejected(Unparsable)
                } else {
                    Coerced::Text(joined.join("; "))
                }
            }
            _ => Rejected(Unparsable),
        },

        FieldKind::Money => match value {
            RawValue::Number(n) => Coerced::Number(*n),
            RawValue::Text(s) => match normalize::parse_money(s) {
                Some(m) => {
                    if currency_hint.is_none() {
                        *currency_hint = m.currency;
                    }
                    Coerced::Number(m.amount)
                }
                None => Rejected(Unparsable),
            },
            _ => Rejected(Unparsable),
        },

        FieldKind::Hectares | FieldKind::Acres => {
            let unit = if spec.kind == FieldKind::Hectares {
                AreaUnit::Hectares
            } else {
                AreaUnit::Acres
            };
            match value {
                RawValue::Number(n) => Coerced::Number(*n),
                RawValue::Text(s) => normalize::parse_area(s, unit).map_or(Rejected(Unparsable), Coerced::Number),
                _ => Rejected(Unparsable),
            }
        }

        FieldKind::Number => match value {
            RawValue::Number(n) => Coerced::Number(*n),
            RawValue::Text(s) => normalize::parse_decimal(s).map_or(Rejected(Unparsable), Coerced::Number),
            _ => Rejected(Unparsable),
        },

        FieldKind::Years | FieldKind::Count => match value {
            RawValue::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64 => {
                Coerced::Whole(*n as u32)
            }
            RawValue::Text(s) => {
                let parsed = if spec.kind == FieldKind::Years {
                    normalize::parse_years(s)
                } else {
                    normalize::parse_count(s)
                };
                parsed.map_or(Rejected(Unparsable), Coerced::Whole)
            }
            _ => Rejected(Unparsable),
        },

        // Handled above.
        FieldKind::Flag => Rejected(Unparsable),

        FieldKind::Date => match value {
            RawValue::Text(s) => normalize::parse_date(s).map_or(Rejected(Unparsable), Coerced::Date),
            _ => Rejected(Unparsable),
        },

        FieldKind::Coordinates => coerce_coordinates(value),

        FieldKind::Currency => match value {
            RawValue::Text(s) => {
                let trimmed = s.trim();
                match normalize::canonical_currency(trimmed) {
                    Some(code) => Coerced::Text(code.to_string()),
                    None if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) => {
                        Coerced::Text(trimmed.to_ascii_uppercase())
                    }
                    None => Rejected(Unparsable),
                }
            }
            _ => Rejected(Unparsable),
        },
    }
}

fn coerce_coordinates(value: &RawValue) -> Coerced {
    let pair = match value {
        RawValue::Text(s) => normalize::parse_coordinates(s),
        RawValue::Structured(Value::Object(o)) => {
            let pick = |keys: &[&str]| keys.iter().find_map(|k| o.get(*k)).and_then(as_f64);
            pick(&["lat", "latitude"]).zip(pick(&["lon", "lng", "long", "longitude"]))
        }
        RawValue::Structured(Value::Array(a)) if a.len() == 2 => {
            a.first().and_then(as_f64).zip(a.get(1).and_then(as_f64))
        }
        _ => None,
    };
    match pair {
        Some((lat, lon)) if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) => {
            Coerced::Text(normalize::format_coordinates(lat, lon))
        }
        _ => match normalize::clean_text(&display_raw(value)) {
            Some(raw) => Coerced::RawCoordinates(raw),
            None => Coerced::Rejected(DowngradeReason::Unparsable),
        },
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Fill whichever of hectares/acres is missing from the other.
fn derive_missing_area(record: &mut CanonicalRecord) {
    let land = &mut record.land;
    match (land.plot_area_hectares, land.plot_area_acres) {
        (Some(ha), None) => land.plot_area_acres = Some(normalize::hectares_to_acres(ha)),
        (None, Some(ac)) => land.plot_area_hectares = Some(normalize::acres_to_hectares(ac)),
        _ => {}
    }
}

fn display_raw(value: &RawValue) -> String {
    match value {
        RawValue::Text(s) => s.clone(),
        other => other.to_json().to_string(),
    }
}

/// Whole numbers without a trailing `.0` (model-returned identifiers are often numbers).
fn format_plain(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
