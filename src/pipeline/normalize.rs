//! Value parsers: raw model strings → typed, canonical values.
//!
//! Every function here is pure and total: it returns `None` when the input
//! cannot be read, and the caller decides what note to record. Models copy
//! values straight out of Kenyan valuation reports, so the parsers accept the
//! formats those reports use (`KShs. 8,500,000/=`, `17th April 2025`,
//! `1°18'34.9"S 36°55'11.3"E`, `0.0465 Ha`) alongside the plain ones.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

/// 1 acre in hectares.
pub const HECTARES_PER_ACRE: f64 = 0.404686;

// ── Text ─────────────────────────────────────────────────────────────────

/// Tokens models (and reports) use for "no value".
const PLACEHOLDERS: &[&str] = &[
    "n/a",
    "na",
    "n.a",
    "none",
    "null",
    "nil",
    "-",
    "--",
    "unknown",
    "not stated",
    "not available",
    "not applicable",
];

/// True when `s` is a placeholder such as `N/A` or `not stated`.
pub fn is_placeholder(s: &str) -> bool {
    let t = s.trim().trim_end_matches('.').to_lowercase();
    PLACEHOLDERS.contains(&t.as_str())
}

/// Trim, collapse internal whitespace, map empty to `None`.
pub fn clean_text(s: &str) -> Option<String> {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

// ── Numbers ──────────────────────────────────────────────────────────────

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d[\d.,]*").unwrap());

// "8 500 000" → "8500000"; only groups of exactly three digits are joined.
static RE_SPACED_GROUPS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d)[ \u{00A0}\u{202F}](\d{3})\b").unwrap());

/// Parse the first number in `s`, tolerating either decimal separator.
///
/// With both `,` and `.` present the one occurring last is the decimal
/// separator. A lone `,` followed by exactly three digits is a thousands
/// separator, otherwise a decimal comma. Repeated separators of one kind
/// are always thousands separators.
pub fn parse_decimal(s: &str) -> Option<f64> {
    let mut joined = s.to_string();
    // Apply twice: overlapping groups ("1 234 567") need a second sweep.
    for _ in 0..2 {
        joined = RE_SPACED_GROUPS.replace_all(&joined, "$1$2").into_owned();
    }
    let token = RE_NUMBER.find(&joined)?.as_str();
    let token = token.trim_end_matches([',', '.']);
    resolve_separators(token)?.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn resolve_separators(token: &str) -> Option<String> {
    let commas = token.matches(',').count();
    let dots = token.matches('.').count();
    let out = match (commas, dots) {
        (0, 0) => token.to_string(),
        (_, 0) => {
            let after = token.rsplit(',').next().unwrap_or("");
            if commas == 1 && after.len() != 3 {
                token.replace(',', ".")
            } else {
                token.replace(',', "")
            }
        }
        (0, _) => {
            if dots == 1 {
                token.to_string()
            } else {
                token.replace('.', "")
            }
        }
        _ => {
            let last_comma = token.rfind(',')?;
            let last_dot = token.rfind('.')?;
            if last_dot > last_comma {
                token.replace(',', "")
            } else {
                token.replace('.', "").replace(',', ".")
            }
        }
    };
    // A decimal separator may appear at most once after resolution.
    if out.matches('.').count() > 1 {
        None
    } else {
        Some(out)
    }
}

// ── Money ────────────────────────────────────────────────────────────────

/// A monetary amount with the currency marker it was written with, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Money {
    pub amount: f64,
    pub currency: Option<&'static str>,
}

static RE_CURRENCY_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\bkshs?\.?|\bkes\b|\busd\b|\bus\$|\$|\beur\b|€|\bgbp\b|£)").unwrap()
});

static RE_SCALE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d\s*(million|mn|m|billion|bn)\b").unwrap());

/// Parse a monetary amount such as `KShs. 8,500,000/=` or `USD 1.2 million`.
pub fn parse_money(s: &str) -> Option<Money> {
    let currency = RE_CURRENCY_MARKER
        .find(s)
        .and_then(|m| canonical_currency(m.as_str()));
    let stripped = RE_CURRENCY_MARKER.replace_all(s, " ");
    let stripped = stripped.replace("/=", " ").replace("/-", " ");
    let mut amount = parse_decimal(&stripped)?;
    if let Some(caps) = RE_SCALE.captures(&stripped) {
        amount *= match caps[1].to_lowercase().as_str() {
            "billion" | "bn" => 1e9,
            _ => 1e6,
        };
    }
    Some(Money { amount, currency })
}

/// Canonical upper-case code for a currency marker or name.
pub fn canonical_currency(s: &str) -> Option<&'static str> {
    let t = s.trim().trim_end_matches('.').to_uppercase();
    let t = t.replace(' ', "");
    Some(match t.as_str() {
        "KSH" | "KSHS" | "KES" | "KSHILLINGS" | "KENYASHILLINGS" | "KENYANSHILLINGS" => "KES",
        "USD" | "US$" | "$" | "USDOLLARS" | "DOLLARS" => "USD",
        "EUR" | "€" | "EURO" | "EUROS" => "EUR",
        "GBP" | "£" | "POUNDS" => "GBP",
        "UGX" => "UGX",
        "TZS" => "TZS",
        _ => return None,
    })
}

// ── Area ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaUnit {
    Hectares,
    Acres,
}

static RE_HECTARES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d[\d.,]*)\s*(?:hectares?|ha)\b").unwrap());
static RE_ACRES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d[\d.,]*)\s*(?:acres?|ac)\b").unwrap());

/// Parse a plot area into `want` units.
///
/// An explicit figure in `want` units wins; otherwise a figure in the other
/// unit is converted; a bare number is taken to already be in `want` units.
pub fn parse_area(s: &str, want: AreaUnit) -> Option<f64> {
    let ha = RE_HECTARES.captures(s).and_then(|c| parse_decimal(&c[1]));
    let ac = RE_ACRES.captures(s).and_then(|c| parse_decimal(&c[1]));
    match want {
        AreaUnit::Hectares => ha.or_else(|| ac.map(acres_to_hectares)),
        AreaUnit::Acres => ac.or_else(|| ha.map(hectares_to_acres)),
    }
    .or_else(|| {
        if ha.is_none() && ac.is_none() {
            parse_decimal(s)
        } else {
            None
        }
    })
}

pub fn acres_to_hectares(acres: f64) -> f64 {
    round6(acres * HECTARES_PER_ACRE)
}

pub fn hectares_to_acres(hectares: f64) -> f64 {
    round6(hectares / HECTARES_PER_ACRE)
}

pub fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

// ── Years ────────────────────────────────────────────────────────────────

static RE_YEARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d{1,4})(?:\.0+)?(?:\s|$|[A-Za-z])").unwrap());

/// Parse a whole number of years: `99`, `"99 years"`, `"999 yrs from 1990"`.
pub fn parse_years(s: &str) -> Option<u32> {
    RE_YEARS.captures(s)?[1].parse().ok()
}

// ── Counts and flags ─────────────────────────────────────────────────────

static RE_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,3}|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve)\b").unwrap()
});

const NUMBER_WORDS: &[&str] = &[
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "eleven", "twelve",
];

/// Parse a small count: `3`, `"2 No."`, `"three bedroomed"`.
pub fn parse_count(s: &str) -> Option<u32> {
    let token = RE_COUNT.captures(s)?.get(1)?.as_str().to_lowercase();
    token
        .parse()
        .ok()
        .or_else(|| NUMBER_WORDS.iter().position(|w| *w == token).map(|i| i as u32))
}

/// Parse a yes/no answer. `None` and `absent` read as no.
pub fn parse_flag(s: &str) -> Option<bool> {
    let t = s.trim().trim_end_matches('.').to_lowercase();
    match t.as_str() {
        "yes" | "y" | "true" | "present" | "available" | "provided" => Some(true),
        "no" | "n" | "false" | "none" | "nil" | "absent" | "not present" | "not available" => Some(false),
        _ => None,
    }
}

// ── Dates ────────────────────────────────────────────────────────────────

// "17th", "1st", and the OCR artefacts "17%" / "17º".
static RE_ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s*(?:st|nd|rd|th|%|º|°)").unwrap());
static RE_OF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+of\s+").unwrap());
// chrono's %b knows "Sep" only.
static RE_SEPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bsept\b").unwrap());
static RE_ISO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})(?:\D|$)").unwrap());
static RE_NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[-/.](\d{1,2})[-/.](\d{4}|\d{2})\b").unwrap());
static RE_DAY_MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}[\s\-]+[A-Za-z]{3,9}[\s\-]+\d{4}\b").unwrap());
static RE_MONTH_DAY_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z]{3,9}\s+\d{1,2}\s+\d{4}\b").unwrap());

/// Parse a calendar date written in any of the common report formats.
///
/// All-numeric dates are read day-first (`04/05/2025` is 4 May); a
/// day-first reading that is impossible falls back to month-first.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let cleaned = RE_ORDINAL.replace_all(s, "$1 ");
    let cleaned = RE_OF.replace_all(&cleaned, " ");
    let cleaned = RE_SEPT.replace_all(&cleaned, "Sep");
    let cleaned = cleaned.replace([',', '.'], " ").replace("  ", " ");

    if let Some(c) = RE_ISO.captures(s) {
        let (y, m, d) = (c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?);
        if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
            return Some(date);
        }
    }
    if let Some(c) = RE_NUMERIC.captures(s) {
        let a: u32 = c[1].parse().ok()?;
        let b: u32 = c[2].parse().ok()?;
        let mut y: i32 = c[3].parse().ok()?;
        if c[3].len() == 2 {
            y += if y < 70 { 2000 } else { 1900 };
        }
        return NaiveDate::from_ymd_opt(y, b, a).or_else(|| NaiveDate::from_ymd_opt(y, a, b));
    }

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some(m) = RE_DAY_MONTH_YEAR.find(&collapsed) {
        let candidate = m.as_str().replace('-', " ");
        for fmt in ["%d %B %Y", "%d %b %Y"] {
            if let Ok(d) = NaiveDate::parse_from_str(&candidate, fmt) {
                return Some(d);
            }
        }
    }
    if let Some(m) = RE_MONTH_DAY_YEAR.find(&collapsed) {
        for fmt in ["%B %d %Y", "%b %d %Y"] {
            if let Ok(d) = NaiveDate::parse_from_str(m.as_str(), fmt) {
                return Some(d);
            }
        }
    }
    None
}

// ── Coordinates ──────────────────────────────────────────────────────────

static RE_DMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        (?:\b(?P<lat_pre>[NSns]))? \s*
        (\d{1,3}) \s* [°º] \s* (\d{1,2}) \s* ['′] \s* (\d{1,2}(?:\.\d+)?) \s* (?:"|″|'')? \s*
        (?P<lat_post>[NSns])?
        [\s,;]*
        (?:\b(?P<lon_pre>[EWew]))? \s*
        (\d{1,3}) \s* [°º] \s* (\d{1,2}) \s* ['′] \s* (\d{1,2}(?:\.\d+)?) \s* (?:"|″|'')? \s*
        (?P<lon_post>[EWew])?
        "#,
    )
    .unwrap()
});

static RE_DECIMAL_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(-?\d{1,3}\.\d+)\s*°?\s*([NSns])?\s*[,;\s]\s*(-?\d{1,3}\.\d+)\s*°?\s*([EWew])?",
    )
    .unwrap()
});

/// Parse a latitude/longitude pair from decimal or degree-minute-second text.
///
/// DMS without hemisphere letters is read as south/east.
pub fn parse_coordinates(s: &str) -> Option<(f64, f64)> {
    if let Some(c) = RE_DMS.captures(s) {
        let dms = |d: usize| -> Option<f64> {
            Some(
                c[d].parse::<f64>().ok()?
                    + c[d + 1].parse::<f64>().ok()? / 60.0
                    + c[d + 2].parse::<f64>().ok()? / 3600.0,
            )
        };
        // A hemisphere letter may come before or after the number.
        let hemisphere = |pre: &str, post: &str| c.name(pre).or_else(|| c.name(post)).map(|m| m.as_str());
        let mut lat = dms(2)?;
        let mut lon = dms(7)?;
        if hemisphere("lat_pre", "lat_post").map_or(true, |h| h.eq_ignore_ascii_case("s")) {
            lat = -lat;
        }
        if hemisphere("lon_pre", "lon_post").is_some_and(|h| h.eq_ignore_ascii_case("w")) {
            lon = -lon;
        }
        return in_range(lat, lon);
    }
    let c = RE_DECIMAL_PAIR.captures(s)?;
    let mut lat: f64 = c[1].parse().ok()?;
    let mut lon: f64 = c[3].parse().ok()?;
    if c.get(2).is_some_and(|h| h.as_str().eq_ignore_ascii_case("s")) {
        lat = -lat.abs();
    }
    if c.get(4).is_some_and(|h| h.as_str().eq_ignore_ascii_case("w")) {
        lon = -lon.abs();
    }
    in_range(lat, lon)
}

fn in_range(lat: f64, lon: f64) -> Option<(f64, f64)> {
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
}

/// Canonical `"lat, lon"` text, six decimals.
pub fn format_coordinates(lat: f64, lon: f64) -> String {
    format!("{lat:.6}, {lon:.6}")
}
