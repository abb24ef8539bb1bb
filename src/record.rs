//! Record schema, raw extraction results and the canonical record.
//!
//! The schema lives in one static table, [`FIELDS`]. Prompts, raw-field
//! parsing, the merge, validation and row flattening all read it, so adding
//! a field means adding one line here and one slot on [`CanonicalRecord`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

// ── Schema ───────────────────────────────────────────────────────────────

/// One of the two independent extraction passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Pass {
    /// Identifiers, parties, dates, unit identity and title/tenure information.
    #[serde(rename = "pass1")]
    One,
    /// Location, land, improvements and valuation figures.
    #[serde(rename = "pass2")]
    Two,
}

impl Pass {
    pub const ALL: [Pass; 2] = [Pass::One, Pass::Two];

    pub fn number(self) -> u8 {
        match self {
            Pass::One => 1,
            Pass::Two => 2,
        }
    }

    pub fn other(self) -> Pass {
        match self {
            Pass::One => Pass::Two,
            Pass::Two => Pass::One,
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass{}", self.number())
    }
}

/// How a field's raw value is coerced during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Reference numbers: trimmed, whitespace collapsed.
    Identifier,
    /// Free text: trimmed, whitespace collapsed.
    Text,
    /// Monetary amount.
    Money,
    /// Area in hectares (accepts an `acres` suffix).
    Hectares,
    /// Area in acres (accepts a `ha` suffix).
    Acres,
    /// Plain decimal (e.g. built-up square feet).
    Number,
    /// Whole years.
    Years,
    /// Small whole count (bedrooms, parking bays); digits or number words.
    Count,
    /// Yes/no.
    Flag,
    /// Calendar date, canonicalised to ISO `YYYY-MM-DD`.
    Date,
    /// Lat/lon pair, canonicalised to `"lat, lon"`.
    Coordinates,
    /// Currency code.
    Currency,
}

/// One canonical field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Dotted path inside the canonical record, e.g. `location.county`.
    pub path: &'static str,
    /// Column name in the remote table.
    pub column: &'static str,
    /// The pass whose prompt asks for this field.
    pub home: Pass,
    pub kind: FieldKind,
    /// Short description given to the model.
    pub hint: &'static str,
}

impl FieldSpec {
    /// Last path segment (`location.county` → `county`).
    pub fn leaf(&self) -> &'static str {
        self.path.rsplit('.').next().unwrap_or(self.path)
    }
}

macro_rules! field {
    ($path:literal, $column:literal, $home:ident, $kind:ident, $hint:literal) => {
        FieldSpec {
            path: $path,
            column: $column,
            home: Pass::$home,
            kind: FieldKind::$kind,
            hint: $hint,
        }
    };
}

/// Every canonical field, in record order.
pub static FIELDS: &[FieldSpec] = &[
    // Pass 1: identifiers
    field!("property_id", "property_id", One, Identifier, "unique property identifier or reference code if the report states one"),
    field!("title_number", "title_number", One, Identifier, "title number, e.g. NAIROBI/BLOCK 82/1234"),
    field!("lr_number", "lr_number", One, Identifier, "Land Reference (L.R.) number, e.g. 209/12345"),
    field!("ir_number", "ir_number", One, Identifier, "Inland Registry (I.R.) number"),
    field!("report_reference", "report_reference", One, Identifier, "the valuer's report reference (\"Our Ref\")"),
    // Pass 1: parties
    field!("client_name", "client_name", One, Text, "the client or instructing party the report is addressed to"),
    field!("valuer_name", "valuer_name", One, Text, "name of the signing valuer"),
    field!("valuer_qualifications", "valuer_qualifications", One, Text, "the valuer's qualifications / registration, e.g. BA (Land Econ), MISK, Registered Valuer"),
    field!("valuer_company", "valuer_company", One, Text, "valuation firm the valuer signs for"),
    // Pass 1: dates
    field!("inspection_date", "inspection_date", One, Date, "date the property was inspected"),
    field!("report_date", "report_date", One, Date, "date of the report / valuation"),
    field!("transfer_date", "transfer_date", One, Date, "date of the last transfer of the property"),
    field!("consent_to_transfer_date", "consent_to_transfer_date", One, Date, "date consent to transfer was granted"),
    // Pass 1: unit identity (sectional and apartment properties)
    field!("unit.apartment_no", "apartment_no", One, Identifier, "apartment / flat / house number"),
    field!("unit.unit_type", "unit_type", One, Text, "apartment, maisonette, bungalow, shop, ..."),
    field!("unit.block", "block", One, Identifier, "block the unit is in"),
    field!("unit.floor_level", "floor_level", One, Text, "floor the unit is on, e.g. Ground, Second"),
    field!("unit.estate_name", "estate_name", One, Text, "name of the estate, court or development"),
    // Pass 1: tenure (title details)
    field!("tenure.tenure_type", "tenure_type", One, Text, "Freehold or Leasehold"),
    field!("tenure.proprietor", "proprietor", One, Text, "registered proprietor(s)"),
    field!("tenure.ownership_type", "ownership_type", One, Text, "sole, joint, company, tenancy in common, ..."),
    field!("tenure.encumbrances", "encumbrances", One, Text, "charges, cautions or other encumbrances noted on the title"),
    field!("tenure.lease_term_years", "lease_term_years", One, Years, "lease term in years (leasehold only)"),
    field!("tenure.lease_start_date", "lease_start_date", One, Date, "date the lease runs from"),
    field!("tenure.lease_term_remaining", "lease_term_remaining", One, Text, "unexpired lease term as stated, e.g. 99 years from 1st January 1990"),
    // Pass 2: location
    field!("location.county", "county", Two, Text, "county the property is in"),
    field!("location.description", "location_description", Two, Text, "short description of the situation / neighbourhood / road access"),
    field!("location.coordinates", "coordinates", Two, Coordinates, "GPS coordinates exactly as printed"),
    field!("location.road_access", "road_access", Two, Text, "road the property is accessed from and how"),
    field!("location.distance_to_landmark", "distance_to_landmark", Two, Text, "distance to a named landmark, e.g. 300 metres to Junction Mall"),
    // Pass 2: land
    field!("land.plot_area_hectares", "plot_area_hectares", Two, Hectares, "plot area in hectares"),
    field!("land.plot_area_acres", "plot_area_acres", Two, Acres, "plot area in acres"),
    field!("land.built_up_area_sqft", "built_up_area_sqft", Two, Number, "built-up / plinth area in square feet"),
    field!("land.land_use", "land_use", Two, Text, "current or permitted land use"),
    field!("land.shape", "shape", Two, Text, "plot shape"),
    field!("land.soil", "soil", Two, Text, "soil type"),
    field!("land.gradient", "gradient", Two, Text, "topography / gradient"),
    field!("land.drainage", "drainage", Two, Text, "drainage"),
    field!("land.vegetation", "vegetation", Two, Text, "vegetation cover"),
    // Pass 2: improvements
    field!("improvements.bedrooms", "bedrooms", Two, Count, "number of bedrooms"),
    field!("improvements.master_en_suite", "master_en_suite", Two, Flag, "whether the master bedroom is en suite (yes/no)"),
    field!("improvements.parking_spaces", "parking_spaces", Two, Count, "number of parking spaces"),
    field!("improvements.balcony_present", "balcony_present", Two, Flag, "whether the unit has a balcony (yes/no)"),
    field!("improvements.accommodation_summary", "accommodation_summary", Two, Text, "what the accommodation comprises"),
    field!("improvements.condition", "condition", Two, Text, "state of repair, e.g. good, fair"),
    field!("improvements.occupancy_status", "occupancy_status", Two, Text, "owner-occupied, tenanted or vacant"),
    field!("improvements.internal_finishes", "internal_finishes", Two, Text, "floor, wall and fitting finishes"),
    // Pass 2: valuation
    field!("valuation.market_value", "market_value", Two, Money, "open market value"),
    field!("valuation.forced_sale_value", "forced_sale_value", Two, Money, "forced sale value"),
    field!("valuation.insurance_value", "insurance_value", Two, Money, "insurance / reinstatement value"),
    field!("valuation.land_value", "land_value", Two, Money, "value attributed to the land alone"),
    field!("valuation.open_market_rental_value", "open_market_rental_value", Two, Money, "open market rental value"),
    field!("valuation.currency", "currency", Two, Currency, "currency of the figures, e.g. KES"),
];

/// Look up a field by its dotted path.
pub fn field(path: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.path == path)
}

/// Fields whose home is `pass`, in record order.
pub fn fields_for(pass: Pass) -> impl Iterator<Item = &'static FieldSpec> {
    FIELDS.iter().filter(move |f| f.home == pass)
}

// ── Raw extraction output ────────────────────────────────────────────────

/// One field value as the model returned it: possibly absent, possibly
/// malformed, never trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    /// An array or object where a scalar was expected.
    Structured(Value),
}

impl RawValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => RawValue::Null,
            Value::Bool(b) => RawValue::Bool(*b),
            Value::Number(n) => n
                .as_f64()
                .map(RawValue::Number)
                .unwrap_or_else(|| RawValue::Text(n.to_string())),
            Value::String(s) => RawValue::Text(s.clone()),
            other => RawValue::Structured(other.clone()),
        }
    }

    /// Null or whitespace-only text.
    pub fn is_empty(&self) -> bool {
        match self {
            RawValue::Null => true,
            RawValue::Text(s) => s.trim().is_empty(),
            RawValue::Structured(Value::Array(a)) => a.is_empty(),
            RawValue::Structured(Value::Object(o)) => o.is_empty(),
            _ => false,
        }
    }

    /// Comparison key: whitespace-collapsed text form.
    pub fn comparable(&self) -> String {
        match self {
            RawValue::Null => String::new(),
            RawValue::Bool(b) => b.to_string(),
            RawValue::Number(n) => n.to_string(),
            RawValue::Text(s) => s.split_whitespace().collect::<Vec<_>>().join(" "),
            RawValue::Structured(v) => v.to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            RawValue::Null => Value::Null,
            RawValue::Bool(b) => Value::Bool(*b),
            RawValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            RawValue::Text(s) => Value::String(s.clone()),
            RawValue::Structured(v) => v.clone(),
        }
    }
}

/// A raw value plus the model's optional self-reported confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawField {
    pub value: RawValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl RawField {
    pub fn new(value: RawValue) -> Self {
        Self {
            value,
            confidence: None,
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::new(RawValue::Text(s.into()))
    }
}

/// Output of one extraction pass, keyed by schema path.
///
/// Only schema fields are kept; unknown keys from the model are dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFieldSet {
    pass: Pass,
    fields: BTreeMap<&'static str, RawField>,
}

impl RawFieldSet {
    pub fn empty(pass: Pass) -> Self {
        Self {
            pass,
            fields: BTreeMap::new(),
        }
    }

    /// Read every schema field out of a loosely-shaped JSON object.
    ///
    /// A field is looked up by nested path (`{"location": {"county": ..}}`),
    /// then by the dotted key (`"location.county"`), then by its bare leaf
    /// name at the top level (`"county"`). A value may be a bare scalar or a
    /// `{"value": .., "confidence": ..}` wrapper. Fields of either pass are
    /// read, so over-answering models still contribute.
    pub fn from_json(pass: Pass, json: &Value) -> Self {
        let mut set = Self::empty(pass);
        let Some(obj) = json.as_object() else {
            return set;
        };
        for spec in FIELDS {
            if let Some(found) = lookup(obj, spec) {
                set.fields.insert(spec.path, unwrap_field(found));
            }
        }
        set
    }

    pub fn pass(&self) -> Pass {
        self.pass
    }

    pub fn get(&self, path: &str) -> Option<&RawField> {
        self.fields.get(path)
    }

    /// Insert a value for a schema path; unknown paths are ignored.
    pub fn insert(&mut self, path: &str, field: RawField) {
        if let Some(spec) = self::field(path) {
            self.fields.insert(spec.path, field);
        }
    }

    /// Number of fields carrying a non-empty value.
    pub fn populated(&self) -> usize {
        self.fields.values().filter(|f| !f.value.is_empty()).count()
    }

    /// True when the pass contributed nothing usable.
    pub fn is_empty(&self) -> bool {
        self.populated() == 0
    }
}

fn lookup<'a>(obj: &'a Map<String, Value>, spec: &FieldSpec) -> Option<&'a Value> {
    let mut segments = spec.path.split('.');
    let first = segments.next()?;
    let mut current = obj.get(first);
    for seg in segments {
        current = current.and_then(|v| v.as_object()).and_then(|o| o.get(seg));
    }
    current
        .or_else(|| obj.get(spec.path))
        .or_else(|| obj.get(spec.leaf()))
}

fn unwrap_field(value: &Value) -> RawField {
    if let Some(o) = value.as_object() {
        if let Some(inner) = o.get("value") {
            let confidence = o
                .get("confidence")
                .and_then(Value::as_f64)
                .map(|c| c.clamp(0.0, 1.0) as f32);
            return RawField {
                value: RawValue::from_json(inner),
                confidence,
            };
        }
    }
    RawField::new(RawValue::from_json(value))
}

// ── Audit entries ────────────────────────────────────────────────────────

/// A value the merge discarded because the home pass disagreed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConflict {
    pub field: String,
    pub kept: Value,
    pub discarded: Value,
    /// The pass whose value was kept.
    pub home_pass: Pass,
}

/// Why validation downgraded a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DowngradeReason {
    /// The value could not be coerced to the field's type; nulled.
    Unparsable,
    /// The value was a placeholder such as "N/A"; nulled.
    Placeholder,
    /// Coordinates not recognised; kept verbatim.
    UnparsedCoordinates,
}

impl fmt::Display for DowngradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DowngradeReason::Unparsable => "unparsable",
            DowngradeReason::Placeholder => "placeholder",
            DowngradeReason::UnparsedCoordinates => "unparsed_coordinates",
        })
    }
}

/// One downgrade recorded by validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationNote {
    pub field: String,
    pub reason: DowngradeReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

// ── Canonical record ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub apartment_no: Option<String>,
    pub unit_type: Option<String>,
    pub block: Option<String>,
    pub floor_level: Option<String>,
    pub estate_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub county: Option<String>,
    pub description: Option<String>,
    pub coordinates: Option<String>,
    pub road_access: Option<String>,
    pub distance_to_landmark: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Land {
    pub plot_area_hectares: Option<f64>,
    pub plot_area_acres: Option<f64>,
    pub built_up_area_sqft: Option<f64>,
    pub land_use: Option<String>,
    pub shape: Option<String>,
    pub soil: Option<String>,
    pub gradient: Option<String>,
    pub drainage: Option<String>,
    pub vegetation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Improvements {
    pub bedrooms: Option<u32>,
    pub master_en_suite: Option<bool>,
    pub parking_spaces: Option<u32>,
    pub balcony_present: Option<bool>,
    pub accommodation_summary: Option<String>,
    pub condition: Option<String>,
    pub occupancy_status: Option<String>,
    pub internal_finishes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tenure {
    pub tenure_type: Option<String>,
    pub proprietor: Option<String>,
    pub ownership_type: Option<String>,
    pub encumbrances: Option<String>,
    pub lease_term_years: Option<u32>,
    pub lease_start_date: Option<NaiveDate>,
    pub lease_term_remaining: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub market_value: Option<f64>,
    pub forced_sale_value: Option<f64>,
    pub insurance_value: Option<f64>,
    pub land_value: Option<f64>,
    pub open_market_rental_value: Option<f64>,
    pub currency: Option<String>,
}

/// Provenance attached by enrichment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub source_file: String,
    /// Per-input artefact key, see [`crate::pipeline::persist::document_id`].
    pub document_id: String,
    pub page_count: usize,
    #[serde(rename = "usedOCR")]
    pub used_ocr: bool,
    pub ocr_pages: Vec<usize>,
    pub degraded_pages: Vec<usize>,
    pub processing_duration_ms: u64,
    pub extracted_at: Option<DateTime<Utc>>,
    pub partial: bool,
    pub pass_failures: BTreeMap<Pass, String>,
    pub merge_conflicts: Vec<MergeConflict>,
    pub validation_notes: Vec<ValidationNote>,
    pub missing_fields: Vec<String>,
    pub record_key: Option<String>,
}

/// The merged, validated, enriched record for one document.
///
/// Every field is either a normalised typed value or `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub property_id: Option<String>,
    pub title_number: Option<String>,
    pub lr_number: Option<String>,
    pub ir_number: Option<String>,
    pub report_reference: Option<String>,
    pub client_name: Option<String>,
    pub valuer_name: Option<String>,
    pub valuer_qualifications: Option<String>,
    pub valuer_company: Option<String>,
    pub inspection_date: Option<NaiveDate>,
    pub report_date: Option<NaiveDate>,
    pub transfer_date: Option<NaiveDate>,
    pub consent_to_transfer_date: Option<NaiveDate>,
    pub unit: Unit,
    pub location: Location,
    pub land: Land,
    pub improvements: Improvements,
    pub tenure: Tenure,
    pub valuation: Valuation,
    pub metadata: RecordMetadata,
}

impl CanonicalRecord {
    /// Mutable slot for a text-like field (identifiers, text, coordinates, currency).
    pub fn text_slot(&mut self, path: &str) -> Option<&mut Option<String>> {
        Some(match path {
            "property_id" => &mut self.property_id,
            "title_number" => &mut self.title_number,
            "lr_number" => &mut self.lr_number,
            "ir_number" => &mut self.ir_number,
            "report_reference" => &mut self.report_reference,
            "client_name" => &mut self.client_name,
            "valuer_name" => &mut self.valuer_name,
            "valuer_qualifications" => &mut self.valuer_qualifications,
            "valuer_company" => &mut self.valuer_company,
            "unit.apartment_no" => &mut self.unit.apartment_no,
            "unit.unit_type" => &mut self.unit.unit_type,
            "unit.block" => &mut self.unit.block,
            "unit.floor_level" => &mut self.unit.floor_level,
            "unit.estate_name" => &mut self.unit.estate_name,
            "tenure.tenure_type" => &mut self.tenure.tenure_type,
            "tenure.proprietor" => &mut self.tenure.proprietor,
            "tenure.ownership_type" => &mut self.tenure.ownership_type,
            "tenure.encumbrances" => &mut self.tenure.encumbrances,
            "tenure.lease_term_remaining" => &mut self.tenure.lease_term_remaining,
            "location.county" => &mut self.location.county,
            "location.description" => &mut self.location.description,
            "location.coordinates" => &mut self.location.coordinates,
            "location.road_access" => &mut self.location.road_access,
            "location.distance_to_landmark" => &mut self.location.distance_to_landmark,
            "land.land_use" => &mut self.land.land_use,
            "land.shape" => &mut self.land.shape,
            "land.soil" => &mut self.land.soil,
            "land.gradient" => &mut self.land.gradient,
            "land.drainage" => &mut self.land.drainage,
            "land.vegetation" => &mut self.land.vegetation,
            "improvements.accommodation_summary" => &mut self.improvements.accommodation_summary,
            "improvements.condition" => &mut self.improvements.condition,
            "improvements.occupancy_status" => &mut self.improvements.occupancy_status,
            "improvements.internal_finishes" => &mut self.improvements.internal_finishes,
            "valuation.currency" => &mut self.valuation.currency,
            _ => return None,
        })
    }

    /// Mutable slot for a decimal field.
    pub fn number_slot(&mut self, path: &str) -> Option<&mut Option<f64>> {
        Some(match path {
            "land.plot_area_hectares" => &mut self.land.plot_area_hectares,
            "land.plot_area_acres" => &mut self.land.plot_area_acres,
            "land.built_up_area_sqft" => &mut self.land.built_up_area_sqft,
            "valuation.market_value" => &mut self.valuation.market_value,
            "valuation.forced_sale_value" => &mut self.valuation.forced_sale_value,
            "valuation.insurance_value" => &mut self.valuation.insurance_value,
            "valuation.land_value" => &mut self.valuation.land_value,
            "valuation.open_market_rental_value" => &mut self.valuation.open_market_rental_value,
            _ => return None,
        })
    }

    /// Mutable slot for a date field.
    pub fn date_slot(&mut self, path: &str) -> Option<&mut Option<NaiveDate>> {
        Some(match path {
            "inspection_date" => &mut self.inspection_date,
            "report_date" => &mut self.report_date,
            "transfer_date" => &mut self.transfer_date,
            "consent_to_transfer_date" => &mut self.consent_to_transfer_date,
            "tenure.lease_start_date" => &mut self.tenure.lease_start_date,
            _ => return None,
        })
    }

    /// Mutable slot for a whole-number field (years and counts).
    pub fn whole_slot(&mut self, path: &str) -> Option<&mut Option<u32>> {
        Some(match path {
            "tenure.lease_term_years" => &mut self.tenure.lease_term_years,
            "improvements.bedrooms" => &mut self.improvements.bedrooms,
            "improvements.parking_spaces" => &mut self.improvements.parking_spaces,
            _ => return None,
        })
    }

    pub fn flag_slot(&mut self, path: &str) -> Option<&mut Option<bool>> {
        Some(match path {
            "improvements.master_en_suite" => &mut self.improvements.master_en_suite,
            "improvements.balcony_present" => &mut self.improvements.balcony_present,
            _ => return None,
        })
    }

    /// The JSON value currently held at a schema path (`Null` when unset).
    pub fn value_at(&self, path: &str) -> Value {
        let pointer = format!("/{}", path.replace('.', "/"));
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.pointer(&pointer).cloned())
            .unwrap_or(Value::Null)
    }

    /// Schema paths that are still null.
    pub fn missing_fields(&self) -> Vec<String> {
        let json = match serde_json::to_value(self) {
            Ok(v) => v,
            Err(_) => return FIELDS.iter().map(|f| f.path.to_string()).collect(),
        };
        FIELDS
            .iter()
            .filter(|f| {
                json.pointer(&format!("/{}", f.path.replace('.', "/")))
                    .map_or(true, Value::is_null)
            })
            .map(|f| f.path.to_string())
            .collect()
    }

    /// Natural key for upsert and dedup.
    ///
    /// `property_id` when present; otherwise a stable hash of the other
    /// identifiers and the document id (the source file name when there is
    /// none), prefixed with `derived-`.
    pub fn natural_key(&self) -> String {
        if let Some(id) = self.property_id.as_deref().map(str::trim) {
            if !id.is_empty() {
                return id.to_string();
            }
        }
        let mut hasher = Sha256::new();
        for part in [
            self.title_number.as_deref(),
            self.lr_number.as_deref(),
            self.ir_number.as_deref(),
            self.report_reference.as_deref(),
            Some(self.document_identity()),
        ] {
            hasher.update(part.unwrap_or("").trim().to_lowercase().as_bytes());
            hasher.update([0x1f]);
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
        format!("derived-{hex}")
    }

    fn document_identity(&self) -> &str {
        if self.metadata.document_id.is_empty() {
            &self.metadata.source_file
        } else {
            &self.metadata.document_id
        }
    }

    /// Flatten into one column per schema field plus key, source and metadata.
    pub fn to_row(&self) -> Map<String, Value> {
        let json = serde_json::to_value(self).unwrap_or(Value::Null);
        let mut row = Map::new();
        row.insert("property_key".into(), Value::String(self.natural_key()));
        for spec in FIELDS {
            let v = json
                .pointer(&format!("/{}", spec.path.replace('.', "/")))
                .cloned()
                .unwrap_or(Value::Null);
            row.insert(spec.column.into(), v);
        }
        row.insert(
            "source_file".into(),
            Value::String(self.metadata.source_file.clone()),
        );
        row.insert(
            "metadata".into(),
            json.get("metadata").cloned().unwrap_or(Value::Null),
        );
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_paths_are_unique_and_have_slots() {
        let mut record = CanonicalRecord::default();
        let mut seen = std::collections::HashSet::new();
        for spec in FIELDS {
            assert!(seen.insert(spec.path), "duplicate path {}", spec.path);
            let has_slot = record.text_slot(spec.path).is_some()
                || record.number_slot(spec.path).is_some()
                || record.date_slot(spec.path).is_some()
                || record.whole_slot(spec.path).is_some()
                || record.flag_slot(spec.path).is_some();
            assert!(has_slot, "no slot for {}", spec.path);
        }
    }

    #[test]
    fn leaf_names_are_unique() {
        let mut leaves = std::collections::HashSet::new();
        for spec in FIELDS {
            assert!(leaves.insert(spec.leaf()), "ambiguous leaf {}", spec.leaf());
        }
    }

    #[test]
    fn both_passes_own_fields() {
        assert!(fields_for(Pass::One).any(|f| f.path == "title_number"));
        assert!(fields_for(Pass::Two).any(|f| f.path == "valuation.market_value"));
        assert_eq!(
            fields_for(Pass::One).count() + fields_for(Pass::Two).count(),
            FIELDS.len()
        );
    }

    #[test]
    fn raw_set_reads_nested_flat_and_wrapped_values() {
        let json = json!({
            "title_number": {"value": "KJD/123", "confidence": 0.9},
            "location": {"county": "Kiambu"},
            "valuation.market_value": "8,500,000",
            "currency": "KShs",
            "unknown_key": "ignored"
        });
        let set = RawFieldSet::from_json(Pass::Two, &json);
        assert_eq!(set.pass(), Pass::Two);
        assert_eq!(
            set.get("title_number").unwrap().value,
            RawValue::Text("KJD/123".into())
        );
        assert_eq!(set.get("title_number").unwrap().confidence, Some(0.9));
        assert_eq!(
            set.get("location.county").unwrap().value,
            RawValue::Text("Kiambu".into())
        );
        assert!(set.get("valuation.market_value").is_some());
        assert!(set.get("valuation.currency").is_some());
        assert_eq!(set.populated(), 4);
    }

    #[test]
    fn non_object_json_gives_empty_set() {
        let set = RawFieldSet::from_json(Pass::One, &json!(["not", "an", "object"]));
        assert!(set.is_empty());
    }

    #[test]
    fn nulls_and_blank_strings_are_empty() {
        let set = RawFieldSet::from_json(
            Pass::One,
            &json!({"title_number": null, "lr_number": "   ", "ir_number": []}),
        );
        assert!(set.is_empty());
        assert!(set.get("title_number").is_some());
    }

    #[test]
    fn natural_key_prefers_property_id() {
        let record = CanonicalRecord {
            property_id: Some("  PROP-7 ".into()),
            ..Default::default()
        };
        assert_eq!(record.natural_key(), "PROP-7");
    }

    #[test]
    fn derived_key_is_stable_and_identity_sensitive() {
        let mut a = CanonicalRecord {
            title_number: Some("KJD/123".into()),
            ..Default::default()
        };
        a.metadata.source_file = "report.pdf".into();
        let b = a.clone();
        assert_eq!(a.natural_key(), b.natural_key());
        assert!(a.natural_key().starts_with("derived-"));

        let mut c = a.clone();
        c.title_number = Some("KJD/124".into());
        assert_ne!(a.natural_key(), c.natural_key());
    }

    #[test]
    fn same_file_name_in_different_folders_gets_different_keys() {
        let mut a = CanonicalRecord::default();
        a.metadata.source_file = "report.pdf".into();
        a.metadata.document_id = "report-1a2b3c4d".into();
        let mut b = a.clone();
        b.metadata.document_id = "report-9f8e7d6c".into();
        assert_ne!(a.natural_key(), b.natural_key());
    }

    #[test]
    fn row_has_one_column_per_field() {
        let mut record = CanonicalRecord::default();
        record.location.county = Some("Nairobi".into());
        record.valuation.market_value = Some(8_500_000.0);
        let row = record.to_row();
        assert_eq!(row.len(), FIELDS.len() + 3);
        assert_eq!(row["county"], json!("Nairobi"));
        assert_eq!(row["market_value"], json!(8_500_000.0));
        assert!(row["metadata"].is_object());
    }

    #[test]
    fn missing_fields_lists_null_paths() {
        let mut record = CanonicalRecord {
            title_number: Some("X".into()),
            ..Default::default()
        };
        record.land.plot_area_hectares = Some(0.05);
        let missing = record.missing_fields();
        assert!(!missing.contains(&"title_number".to_string()));
        assert!(!missing.contains(&"land.plot_area_hectares".to_string()));
        assert!(missing.contains(&"valuation.market_value".to_string()));
        assert_eq!(missing.len(), FIELDS.len() - 2);
    }

    #[test]
    fn metadata_uses_camel_case_keys() {
        let meta = RecordMetadata {
            used_ocr: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["usedOCR"], json!(true));
        assert!(json.get("mergeConflicts").is_some());
        assert!(json.get("validationNotes").is_some());
    }
}
