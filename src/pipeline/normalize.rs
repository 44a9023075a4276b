//! Text normalisation: deterministic cleanup of raw OCR output.
//!
//! Tesseract output for a scanned certificate carries artefacts that have
//! nothing to do with its content: CRLF line endings, no-break spaces in
//! table cells, zero-width characters, typographic dashes in ids and dates,
//! and runs of spaces where table columns were. The rules here remove them
//! so the metadata rules and the weight-table parser can match against
//! plain single-spaced lines.
//!
//! ## Rule Order
//!
//! Line endings are normalised before splitting, invisible characters are
//! removed before whitespace is collapsed (a zero-width space between two
//! spaces would otherwise keep them apart), and blank lines are dropped last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules and split into non-empty lines in reading order.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Replace no-break and other exotic spaces with ASCII space
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, …)
/// 4. Replace typographic dashes with `-`
/// 5. Collapse whitespace runs and trim each line
/// 6. Drop lines that are empty after cleanup
pub fn clean_page_text(raw: &str) -> Vec<String> {
    let s = normalise_line_endings(raw);
    let s = normalise_spaces(&s);
    let s = remove_invisible_chars(&s);
    let s = normalise_dashes(&s);
    s.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Exotic spaces ────────────────────────────────────────────────────

fn normalise_spaces(input: &str) -> String {
    input.replace(
        [
            '\u{00A0}', '\u{2007}', '\u{202F}', '\u{2009}', '\u{2002}', '\u{2003}', '\t',
        ],
        " ",
    )
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{000C}',
        ],
        "",
    )
}

// ── Rule 4: Dashes ───────────────────────────────────────────────────────────

fn normalise_dashes(input: &str) -> String {
    input.replace(['\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2212}'], "-")
}

// ── Rule 5: Whitespace ───────────────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse every whitespace run to one space and trim the ends.
pub fn collapse_whitespace(line: &str) -> String {
    RE_WHITESPACE.replace_all(line.trim(), " ").into_owned()
}

// ── Letter/digit confusion ───────────────────────────────────────────────────

/// Letters OCR commonly produces in place of a digit, with that digit.
pub(crate) fn confusable_digit(c: char) -> Option<char> {
    match c {
        'O' | 'o' | 'Q' | 'D' => Some('0'),
        'I' | 'l' | '|' | 'i' => Some('1'),
        _ => None,
    }
}

fn is_hard_letter(c: Option<char>) -> bool {
    matches!(c, Some(ch) if ch.is_alphabetic() && confusable_digit(ch).is_none())
}

/// Replace letters that sit inside a run of digits with the digit OCR most
/// likely misread them from (`2O24` → `2024`, `1l5` → `115`).
///
/// A letter is replaced only when at least one neighbour is a digit and no
/// neighbour is an unambiguous letter, so words such as `No.` or `Lab` and
/// alphabetic id prefixes such as `CM-` stay intact.
pub fn fix_digit_confusion(input: &str) -> String {
    let mut chars: Vec<char> = input.chars().collect();
    loop {
        let mut changed = false;
        for i in 0..chars.len() {
            let Some(digit) = confusable_digit(chars[i]) else {
                continue;
            };
            let prev = i.checked_sub(1).map(|j| chars[j]);
            let next = chars.get(i + 1).copied();
            let digit_neighbour =
                prev.is_some_and(|c| c.is_ascii_digit()) || next.is_some_and(|c| c.is_ascii_digit());
            if digit_neighbour && !is_hard_letter(prev) && !is_hard_letter(next) {
                chars[i] = digit;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    chars.into_iter().collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────
