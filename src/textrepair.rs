//! Text repair: deterministic cleanup of raw OCR text and malformed JSON.
//!
//! ## Why is text repair necessary?
//!
//! Scanned exam papers come out of OCR with page furniture (running headers,
//! page numbers, test-series boilerplate), noise glyphs where answer blanks
//! and rules were printed, broken list numbering (`l.` for `1.`), and words
//! hyphenated across line breaks. Feeding that to the LLM wastes tokens and
//! degrades extraction accuracy. Likewise the LLM's JSON output is
//! frequently malformed — unquoted keys, trailing commas, markdown fences,
//! a missing closing brace, or the object buried in explanatory prose.
//!
//! This module applies cheap, deterministic string rules for both problems.
//! Each rule is a pure function (`&str → String`) with no shared state, so
//! the set is easy to extend or re-order, and each is independently
//! testable.
//!
//! ## Rule Order
//!
//! [`clean_ocr_text`] rules must run in this specific order: line-anchored
//! boilerplate stripping and hyphen rejoining only work while line breaks
//! still exist, so both precede the line-break collapse; dash normalisation
//! runs after noise-glyph collapse so long dash rules are gone before single
//! dashes are spaced; the whitespace collapse runs last and makes the whole
//! chain idempotent.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::ExtractError;

/// Clean raw OCR text into a single normalized line for the LLM.
///
/// Rules (applied in order):
/// 1. Strip running headers, bare page numbers, and test-series boilerplate
/// 2. Collapse pipe/underscore/dash noise-glyph runs into spaces
/// 3. Fix OCR-broken list numbering (`l.`/`I.` → `1.`, `O.` → `0.`, `1O.` → `10.`)
/// 4. Rejoin words hyphenated across line breaks
/// 5. Collapse all line breaks to single spaces
/// 6. Insert missing spaces at case and letter/digit boundaries
/// 7. Normalise en/em/horizontal-bar dashes to `" - "`
/// 8. Collapse whitespace runs and trim
///
/// Pure and idempotent: `clean_ocr_text(clean_ocr_text(x)) ==
/// clean_ocr_text(x)` for all inputs.
pub fn clean_ocr_text(input: &str) -> String {
    let s = strip_boilerplate_lines(input);
    let s = collapse_noise_glyphs(&s);
    let s = fix_list_numbering(&s);
    let s = rejoin_hyphenated_words(&s);
    let s = collapse_line_breaks(&s);
    let s = insert_boundary_spaces(&s);
    let s = normalise_dashes(&s);
    collapse_whitespace(&s)
}

// ── Rule 1: Strip headers, page numbers, boilerplate ─────────────────────────

static RE_PAGE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^[ \t]*page[ \t]+\d+([ \t]+of[ \t]+\d+)?[ \t]*$").unwrap());

static RE_BARE_PAGE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*-?[ \t]*\d{1,3}[ \t]*-?[ \t]*$").unwrap());

static RE_SERIES_BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?mi)^[ \t]*(cambridge[ \t]+ielts[ \t]*\d*|ielts[ \t]+(practice[ \t]+)?tests?[ \t]*\d*|official[ \t]+practice[ \t]+materials?|test[ \t]+\d+)[ \t]*$",
    )
    .unwrap()
});

fn strip_boilerplate_lines(input: &str) -> String {
    let s = RE_PAGE_HEADER.replace_all(input, "");
    let s = RE_BARE_PAGE_NUMBER.replace_all(&s, "");
    RE_SERIES_BOILERPLATE.replace_all(&s, "").to_string()
}

// ── Rule 2: Collapse noise glyphs ────────────────────────────────────────────
//
// Answer blanks print as underscore runs, table rules as pipes and long dash
// runs. None of it is content the model should transcribe.

static RE_PIPE_NOISE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[|¦]+").unwrap());
static RE_UNDERSCORE_NOISE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());
static RE_DASH_RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{4,}").unwrap());

fn collapse_noise_glyphs(input: &str) -> String {
    let s = RE_PIPE_NOISE.replace_all(input, " ");
    let s = RE_UNDERSCORE_NOISE.replace_all(&s, " ");
    RE_DASH_RULE.replace_all(&s, " ").to_string()
}

// ── Rule 3: Fix OCR-broken list numbering ────────────────────────────────────

static RE_LOWER_L_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)[lI]([.)])[ \t]").unwrap());
static RE_OH_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^([ \t]*)O([.)])[ \t]").unwrap());
static RE_TEN_WITH_OH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b1O([.)])").unwrap());

fn fix_list_numbering(input: &str) -> String {
    let s = RE_LOWER_L_ITEM.replace_all(input, "${1}1${2} ");
    let s = RE_OH_ITEM.replace_all(&s, "${1}0${2} ");
    RE_TEN_WITH_OH.replace_all(&s, "10${1}").to_string()
}

// ── Rule 4: Rejoin hyphen-broken words ───────────────────────────────────────

static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L})-[ \t]*\r?\n[ \t]*(\p{L})").unwrap());

fn rejoin_hyphenated_words(input: &str) -> String {
    RE_HYPHEN_BREAK.replace_all(input, "${1}${2}").to_string()
}

// ── Rule 5: Collapse line breaks ─────────────────────────────────────────────
//
// OCR inserts a paragraph break at every visual gap; none of them are
// meaningful once the page furniture is gone.

static RE_LINE_BREAKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]*\r?\n[\s]*").unwrap());

fn collapse_line_breaks(input: &str) -> String {
    RE_LINE_BREAKS.replace_all(input, " ").to_string()
}

// ── Rule 6: Insert missing boundary spaces ───────────────────────────────────
//
// Joined glyph clusters like "Question1" or "islandThe" appear when OCR
// merges columns. Split at lower→upper and letter→digit boundaries only;
// digit→letter is left alone so ordinals ("20th") survive.

static RE_CASE_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z])([A-Z])").unwrap());
static RE_LETTER_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Za-z])(\d)").unwrap());

fn insert_boundary_spaces(input: &str) -> String {
    let s = RE_CASE_BOUNDARY.replace_all(input, "${1} ${2}");
    RE_LETTER_DIGIT.replace_all(&s, "${1} ${2}").to_string()
}

// ── Rule 7: Normalise dash variants ──────────────────────────────────────────

static RE_DASH_VARIANT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[–—―‒−]\s*").unwrap());

fn normalise_dashes(input: &str) -> String {
    RE_DASH_VARIANT.replace_all(input, " - ").to_string()
}

// ── Rule 8: Collapse whitespace ──────────────────────────────────────────────

static RE_WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE_RUN.replace_all(input, " ").trim().to_string()
}

// ── JSON repair chain ────────────────────────────────────────────────────────

/// Parse LLM output as JSON, repairing progressively harder damage.
///
/// Stages, in order; each stage's failure is non-fatal:
///
/// 1. Direct `serde_json` parse.
/// 2. Structural cleanup — strip markdown fences, quote unquoted keys,
///    strip trailing commas, escape raw newlines inside string literals,
///    strip control characters.
/// 3. General repair — close an unterminated string, drop unmatched
///    closers, balance remaining braces/brackets.
/// 4. Extract the first balanced `{…}` span from the text (the model often
///    wraps its JSON in prose) and re-apply stage 2.
///
/// Only exhaustion of all four stages returns
/// [`ExtractError::JsonParse`], whose message carries `context` and a
/// ≤200-character excerpt of the offending text.
pub fn parse_json_safely(raw: &str, context: &str) -> Result<Value, ExtractError> {
    if let Ok(v) = serde_json::from_str(raw) {
        return Ok(v);
    }
    debug!("direct JSON parse failed ({context}), attempting structural cleanup");

    let cleaned = structural_cleanup(raw);
    if let Ok(v) = serde_json::from_str(&cleaned) {
        return Ok(v);
    }
    debug!("structural cleanup failed ({context}), attempting repair pass");

    let repaired = repair_json(&cleaned);
    if let Ok(v) = serde_json::from_str(&repaired) {
        return Ok(v);
    }
    debug!("repair pass failed ({context}), attempting object extraction");

    if let Some(span) = extract_json_object(raw) {
        let cleaned = structural_cleanup(span);
        if let Ok(v) = serde_json::from_str(&cleaned) {
            return Ok(v);
        }
    }

    Err(ExtractError::JsonParse {
        context: context.to_string(),
        excerpt: truncate_excerpt(raw, 200),
    })
}

static RE_CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").unwrap());
static RE_UNQUOTED_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").unwrap());
static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());

/// Stage-2 cleanup: fixes the cheap, common classes of damage.
fn structural_cleanup(input: &str) -> String {
    let s = match RE_CODE_FENCE.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    };
    let s = RE_UNQUOTED_KEY.replace_all(&s, "${1}\"${2}\":");
    let s = RE_TRAILING_COMMA.replace_all(&s, "${1}");
    let s = escape_newlines_in_strings(&s);
    strip_control_chars(&s)
}

/// Escape raw newlines/tabs inside JSON string literals.
///
/// Walks the text tracking string state so newlines *between* tokens (legal
/// JSON whitespace) are left alone.
fn escape_newlines_in_strings(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in input.chars() {
        if in_string {
            match c {
                _ if escaped => {
                    escaped = false;
                    out.push(c);
                }
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => {}
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}

/// Remove control characters that serde_json rejects, keeping structural
/// whitespace.
fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t' || c == '\r')
        .collect()
}

/// Stage-3 repair: balance the token structure of nearly-valid JSON.
///
/// Closes an unterminated trailing string, drops closers that match nothing,
/// and appends the closers still owed at end of input. Intentionally
/// conservative — it never reorders or deletes content characters.
fn repair_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in input.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' | '[' => {
                stack.push(c);
                out.push(c);
            }
            '}' => {
                if stack.last() == Some(&'{') {
                    stack.pop();
                    out.push(c);
                }
                // unmatched closer: dropped
            }
            ']' => {
                if stack.last() == Some(&'[') {
                    stack.pop();
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    if in_string {
        out.push('"');
    }
    // Trailing comma before the closers we are about to add breaks the parse.
    let mut out = RE_TRAILING_COMMA.replace_all(&out, "${1}").to_string();
    while let Some(open) = stack.pop() {
        let trimmed = out.trim_end().to_string();
        out = match trimmed.chars().last() {
            Some(',') => trimmed[..trimmed.len() - 1].to_string(),
            _ => trimmed,
        };
        out.push(if open == '{' { '}' } else { ']' });
    }
    out
}

/// Stage-4 extraction: find the first balanced `{…}` span in free text.
fn extract_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in input[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + c.len_utf8();
                    return Some(&input[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn truncate_excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────
