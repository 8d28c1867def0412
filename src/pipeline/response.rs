//! Raw model output → validated record.
//!
//! Even with a JSON-only instruction, models occasionally wrap their answer
//! in a ```` ```json ```` fence or pad it with whitespace. Those artefacts are
//! stripped deterministically before parsing; anything else that is not a
//! schema-valid JSON object is rejected with a diagnostic that points into
//! the text, so a failed attempt can be debugged from the log alone.

use crate::error::ResponseDiagnostic;
use crate::schema::{validate, Record};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Bytes of raw text kept on each side of a syntax error.
pub const EXCERPT_RADIUS: usize = 100;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\n(.*)\n```\s*$").unwrap());

/// Strip outer code fences, a leading BOM and surrounding whitespace.
pub fn clean_response(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('\u{FEFF}').trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Parse and validate a raw response against record contract `R`.
pub fn parse_record<R: Record>(raw: &str) -> Result<R, ResponseDiagnostic> {
    let cleaned = clean_response(raw);
    let value: Value =
        serde_json::from_str(&cleaned).map_err(|e| syntax_diagnostic(&cleaned, &e))?;
    Ok(validate::<R>(value)?)
}

fn syntax_diagnostic(text: &str, err: &serde_json::Error) -> ResponseDiagnostic {
    let offset = byte_offset(text, err.line(), err.column());
    ResponseDiagnostic::Syntax {
        offset,
        message: strip_position(&err.to_string()),
        excerpt: excerpt(text, offset, EXCERPT_RADIUS).to_string(),
    }
}

/// Convert serde_json's 1-based line/column into a byte offset.
fn byte_offset(text: &str, line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line - 1)
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(text.len())
}

/// serde_json appends " at line L column C"; the offset replaces it.
fn strip_position(message: &str) -> String {
    match message.rfind(" at line ") {
        Some(idx) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

/// A window of `radius` bytes either side of `offset`, widened to the
/// nearest char boundaries.
fn excerpt(text: &str, offset: usize, radius: usize) -> &str {
    let mut start = offset.saturating_sub(radius);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = offset.saturating_add(radius).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    &text[start..end]
}
