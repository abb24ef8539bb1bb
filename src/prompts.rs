//! Prompts for the two extraction passes and for page OCR.
//!
//! The pass prompts are generated from the schema table in
//! [`crate::record::FIELDS`], so a field added there is asked for
//! automatically by its home pass. Tests inspect the generated text directly
//! without any model involved.

use crate::record::{fields_for, Pass};
use serde_json::{Map, Value};

/// System prompt for reading a scanned page image.
pub const OCR_SYSTEM_PROMPT: &str = r#"You are an OCR engine. Transcribe ALL text visible on this scanned page of a property valuation report.

Rules:
- Preserve the reading order a human would use.
- Keep numbers, reference codes, dates and currency amounts exactly as printed (e.g. "KShs. 8,500,000/=", "L.R. No. 209/12345").
- Render tables as one row per line with cells separated by " | ".
- Do NOT summarise, translate, correct or comment.
- Output only the transcribed text. If the page has no text, output nothing."#;

const PASS_PREAMBLE: &str = "You extract structured data from the text of a property valuation report. \
The text was obtained from a PDF, partly by OCR, so expect broken lines and stray characters. Pages are \
separated by the marker \"--- PAGE BREAK ---\".";

const PASS_RULES: &str = r#"Rules:
- Return a single JSON object with exactly the structure of the template below.
- Copy values as they appear in the report (keep units and currency markers); do not convert or compute.
- Use null for anything the report does not state. Never guess.
- Dates: copy the date as written.
- Yes/no fields: answer "yes" or "no".
- Coordinates: copy the GPS coordinates exactly as printed."#;

/// Appended on the retry that follows an unparseable response.
pub const STRICT_JSON_SUFFIX: &str = r#"

IMPORTANT: Your previous answer could not be parsed. Return ONLY the JSON object. No markdown fences, no commentary, no text before or after the JSON."#;

/// Delimits the document text in the user message.
pub const PAGE_BREAK: &str = "\n--- PAGE BREAK ---\n";

/// Short description of what a pass extracts, for logs and prompts.
pub fn pass_focus(pass: Pass) -> &'static str {
    match pass {
        Pass::One => "report identifiers, parties, dates, unit identity and title/tenure details",
        Pass::Two => "location, land description, improvements and valuation figures",
    }
}

/// JSON template listing the pass's home fields, nested by path, with hints as values.
pub fn pass_template(pass: Pass) -> Value {
    let mut root = Map::new();
    for spec in fields_for(pass) {
        let segments: Vec<&str> = spec.path.split('.').collect();
        insert_path(&mut root, &segments, Value::String(spec.hint.to_string()));
    }
    Value::Object(root)
}

fn insert_path(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [leaf] => {
            map.insert(leaf.to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(child) = entry {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Full system prompt for one pass; `strict` adds the JSON-only reminder.
pub fn pass_system_prompt(pass: Pass, strict: bool) -> String {
    let template = serde_json::to_string_pretty(&pass_template(pass)).unwrap_or_default();
    let mut prompt = format!(
        "{PASS_PREAMBLE}\n\nExtract the {}.\n\n{PASS_RULES}\n\nTemplate (values describe what to put there):\n{template}",
        pass_focus(pass)
    );
    if strict {
        prompt.push_str(STRICT_JSON_SUFFIX);
    }
    prompt
}

/// User message carrying the document text.
pub fn pass_user_message(document_text: &str) -> String {
    format!("REPORT TEXT:\n\"\"\"\n{document_text}\n\"\"\"")
}
