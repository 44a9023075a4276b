//! Weight-table reconstruction: flat OCR lines → top-level weights + sets.
//!
//! OCR gives no table structure, only lines. Each line is first classified
//! ([`classify`]) into a set header, a weight row, a numbers-only line, an
//! orphaned row (table-shaped but without a readable id) or plain text. The
//! classified line then drives a two-state machine:
//!
//! ```text
//!              set header ──────────────┐
//!   ┌──────────┐                  ┌─────▼──────────┐
//!   │ Scanning │ ───set header──▶ │ InSet(set_id)  │ ◀─ row with set prefix
//!   └──────────┘ ◀──top-level row─└────────────────┘ ◀─ id-less numeric row
//! ```
//!
//! [`transition`] is pure: given the state and one event it returns the next
//! state and the action to apply, so every policy decision (prefix matching,
//! where an id-less row goes, what counts as dropped) is testable on its own.
//!
//! ## Row shape
//!
//! A row is a weight id followed by numbers. With three numbers they are
//! nominal, actual-after and uncertainty; with more, the first is nominal and
//! the last two are actual-after and uncertainty (extra middle columns such as
//! "before adjustment" are skipped). Id-less set rows with more than three
//! numbers take the first three instead ([`ColumnLayout`]). With fewer than
//! three the row is kept with the missing fields absent, after first trying
//! to complete it from the next line when OCR split the row in two.
//!
//! Masses are in grams: a value written with `kg` or `mg` is scaled.

use crate::error::{CertError, Warning, WarningCode};
use crate::pipeline::normalize::confusable_digit;
use crate::pipeline::ocr::PageText;
use crate::record::{WeightEntry, WeightSet};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

// ── Patterns ─────────────────────────────────────────────────────────────────

/// `Set No. W1`, `SET NO W2`, `Set W3` anywhere on the line.
static RE_SET_NO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bset\s*(?:no\.?|number|#)?\s*(w\s?\d)\b").unwrap());

/// A line that is only a set id, optionally followed by words and one
/// parenthetical range: `W1`, `W2 Set`, `W1 Set (1 mg to 500 g)`.
static RE_SET_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(W\d)(?:\s+[A-Za-z][A-Za-z.:]*)*(?:\s*\([^()]*\))?$").unwrap());

/// Canonical weight id: 1–5 letter prefix, digits, optional suffix letter and
/// dash-separated parts (`WFS001`, `WES123`, `W1-500`).
static RE_WEIGHT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{1,5}[0-9]+[A-Z]?(?:-[0-9A-Z]+)*$").unwrap());

static RE_GROUP_HEAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{1,3}$").unwrap());
static RE_GROUP_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{3}(?:[.,][0-9]+)?$").unwrap());

// ── Numeric cleaning ─────────────────────────────────────────────────────────

/// Mass units with their power-of-ten exponent relative to grams.
const UNITS: [(&str, i32); 3] = [("kg", 3), ("mg", -3), ("g", 0)];

fn is_unit(token: &str) -> bool {
    UNITS.iter().any(|(unit, _)| *unit == token)
}

/// Parse one OCR'd numeric token, tolerating common corruption.
///
/// * letters OCR confuses with digits (`2OOOO` → `20000`), only when the
///   token holds at least one real digit
/// * a leading `±` or `+` and trailing punctuation
/// * a trailing mass unit, scaled to grams (`20kg` → `20000`, `500mg` → `0.5`)
/// * any mix of `.` and `,`: the last separator is the decimal point and
///   earlier ones are digit grouping (`20.000,12`, `20,000.12`, `20000,12`)
pub fn clean_numeric(token: &str) -> Option<f64> {
    let mut s = token.trim_start_matches(['±', '+']);
    s = s.trim_end_matches([',', '.', ';', ':']);
    let mut exponent = 0;
    for (unit, exp) in UNITS {
        if let Some(stripped) = s.strip_suffix(unit) {
            if stripped.ends_with(|c: char| c.is_ascii_digit()) {
                s = stripped;
                exponent = exp;
                break;
            }
        }
    }
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut digits = String::with_capacity(s.len());
    let mut last_sep = None;
    for c in s.chars() {
        match c {
            '0'..='9' => digits.push(c),
            '.' | ',' => {
                last_sep = Some(digits.len());
            }
            other => digits.push(confusable_digit(other)?),
        }
    }
    let mut normalised = String::with_capacity(digits.len() + 2);
    if negative {
        normalised.push('-');
    }
    match last_sep {
        Some(at) if at < digits.len() => {
            if at == 0 {
                normalised.push('0');
            }
            normalised.push_str(&digits[..at]);
            normalised.push('.');
            normalised.push_str(&digits[at..]);
        }
        _ => normalised.push_str(&digits),
    }
    let value = normalised.parse::<f64>().ok().filter(|v| v.is_finite())?;
    // Divide for sub-gram units so `500mg` is exactly 0.5.
    Some(if exponent < 0 {
        value / 10f64.powi(-exponent)
    } else {
        value * 10f64.powi(exponent)
    })
}

fn is_numeric(token: &str) -> bool {
    clean_numeric(token).is_some()
}

fn has_decimal_separator(token: &str) -> bool {
    token
        .trim_end_matches([',', '.'])
        .contains(['.', ','])
}

/// Nominal and a measured value agree to within a factor of two.
fn same_magnitude(nominal: f64, measured: f64) -> bool {
    nominal > 0.0 && measured > 0.0 && (0.5..=2.0).contains(&(nominal / measured))
}

/// At least three columns, and the nominal matches one of the measured
/// columns between it and the uncertainty.
fn consistent_row(tokens: &[String]) -> bool {
    let values: Vec<f64> = tokens.iter().filter_map(|t| clean_numeric(t)).collect();
    match values.as_slice() {
        [nominal, measured @ .., _] if values.len() >= 3 => {
            measured.iter().any(|m| same_magnitude(*nominal, *m))
        }
        _ => false,
    }
}

fn apply_merges(tokens: &[String], heads: &[usize]) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if heads.contains(&i) {
            out.push(format!("{}{}", tokens[i], tokens[i + 1]));
            i += 2;
        } else {
            out.push(tokens[i].clone());
            i += 1;
        }
    }
    out
}

/// Re-join digit groups OCR split on a thousands space (`20 000` → `20000`)
/// when a row has more numeric tokens than columns.
///
/// A join is kept only when it makes the row consistent: the nominal must
/// then sit within a factor of two of a measured column. The fewest joins
/// that achieve this win. A row that is already consistent, or that no set
/// of joins makes consistent, is returned unchanged.
pub fn merge_thousands(tokens: Vec<String>) -> Vec<String> {
    const MAX_CANDIDATES: usize = 8;

    if tokens.len() <= 3 || consistent_row(&tokens) {
        return tokens;
    }
    let mut candidates: Vec<usize> = (0..tokens.len() - 1)
        .filter(|&i| RE_GROUP_HEAD.is_match(&tokens[i]) && RE_GROUP_TAIL.is_match(&tokens[i + 1]))
        .collect();
    candidates.truncate(MAX_CANDIDATES);

    let mut masks: Vec<u32> = (1..1u32 << candidates.len()).collect();
    masks.sort_by_key(|m| m.count_ones());
    for mask in masks {
        let heads: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1 << bit) != 0)
            .map(|(_, &i)| i)
            .collect();
        if heads.windows(2).any(|w| w[1] == w[0] + 1) {
            continue;
        }
        let merged = apply_merges(&tokens, &heads);
        if consistent_row(&merged) {
            return merged;
        }
    }
    tokens
}

// ── Weight ids ───────────────────────────────────────────────────────────────

/// Canonicalise a weight-id token, or `None` when it is not one.
///
/// Letter/digit confusion is repaired in the digit run after the prefix
/// (`WFS0O1` → `WFS001`). Trailing `O`/`I` on the prefix move into the digits
/// when real digits follow (`WFSOO1` → `WFS001`).
pub fn parse_weight_id(token: &str) -> Option<String> {
    let letters_end = token
        .find(|c: char| !c.is_ascii_uppercase())
        .unwrap_or(token.len());
    if letters_end == 0 || letters_end == token.len() {
        return None;
    }
    let (prefix, rest) = token.split_at(letters_end);
    if !rest.starts_with(|c: char| c.is_ascii_digit() || confusable_digit(c).is_some()) {
        return None;
    }

    let mut prefix = prefix.to_string();
    let mut body = String::new();
    if rest.starts_with(|c: char| c.is_ascii_digit()) {
        while prefix.len() > 1 && prefix.ends_with(['O', 'I']) {
            if let Some(c) = prefix.pop() {
                body.insert(0, c);
            }
        }
    }
    body.push_str(rest);

    let mut canonical = prefix;
    let mut in_first_run = true;
    for c in body.chars() {
        if c == '-' {
            in_first_run = false;
        }
        match confusable_digit(c) {
            Some(d) if in_first_run => canonical.push(d),
            _ => canonical.push(c.to_ascii_uppercase()),
        }
    }
    RE_WEIGHT_ID.is_match(&canonical).then_some(canonical)
}

// ── Line classification ──────────────────────────────────────────────────────

/// What one cleaned OCR line looks like, independent of parser state.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// Opens (or reopens) a weight set.
    SetHeader(String),
    /// A weight id followed by zero or more raw numeric tokens.
    Row { weight_id: String, numbers: Vec<String> },
    /// Only numeric tokens.
    Numbers(Vec<String>),
    /// Shaped like a table row but without a readable weight id.
    Orphan,
    Text,
}

pub fn classify(line: &str) -> LineKind {
    if let Some(caps) = RE_SET_NO.captures(line).or_else(|| RE_SET_BARE.captures(line)) {
        let id: String = caps[1]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        return LineKind::SetHeader(id);
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&first) = tokens.first() else {
        return LineKind::Text;
    };

    let with_units = attach_units(&tokens);
    if with_units.iter().all(|t| is_numeric(t)) {
        return LineKind::Numbers(with_units);
    }

    let id_and_rest = parse_weight_id(first).map(|id| (id, &tokens[1..])).or_else(|| {
        // `WFS 001 ...`: OCR put a space inside the id.
        let second = tokens.get(1)?;
        let split_ok = (2..=5).contains(&first.len())
            && first.chars().all(|c| c.is_ascii_uppercase())
            && second.len() == 3;
        if !split_ok {
            return None;
        }
        parse_weight_id(&format!("{first}{second}")).map(|id| (id, &tokens[2..]))
    });

    if let Some((weight_id, rest)) = id_and_rest {
        let rest = attach_units(rest);
        let numbers: Vec<String> = rest
            .iter()
            .filter(|t| is_numeric(t))
            .cloned()
            .collect();
        let fillers = rest.len() - numbers.len();
        let ends_numeric = rest.last().map_or(true, |t| is_numeric(t));
        if ends_numeric && numbers.len() >= fillers {
            return LineKind::Row { weight_id, numbers };
        }
    }

    if looks_tabular(&tokens) {
        return LineKind::Orphan;
    }
    LineKind::Text
}

/// Join a unit written apart from its value (`20 kg` → `20kg`).
fn attach_units(tokens: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match out.last_mut() {
            Some(prev) if is_unit(token) && is_numeric(prev) => prev.push_str(token),
            _ => out.push(token.to_string()),
        }
    }
    out
}

/// Table-shaped: an id-like first token followed by numbers ending the line,
/// at least one of them with a decimal part.
fn looks_tabular(tokens: &[&str]) -> bool {
    let Some((first, rest)) = tokens.split_first() else {
        return false;
    };
    let numeric: Vec<&&str> = rest.iter().filter(|t| is_numeric(t)).collect();
    let id_like = (first.chars().any(|c| c.is_ascii_digit()) && !is_numeric(first))
        || (first.len() <= 5 && first.chars().all(|c| c.is_ascii_uppercase()));
    id_like
        && numeric.len() >= 2
        && rest.last().is_some_and(|t| is_numeric(t))
        && numeric.iter().any(|t| has_decimal_separator(t))
}

// ── Row values ───────────────────────────────────────────────────────────────

/// Which numbers become actual-after and uncertainty when a row has more
/// than three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnLayout {
    /// Rows with a weight id: the last two, skipping middle columns such as
    /// "before adjustment".
    FirstAndLastTwo,
    /// Id-less set rows: the second and third, ignoring anything after.
    FirstThree,
}

/// The measured columns of one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowValues {
    pub nominal: f64,
    pub actual_after: Option<f64>,
    pub uncertainty: Option<f64>,
}

impl RowValues {
    /// Map raw numeric tokens to columns. `None` when there are none.
    pub fn from_tokens(tokens: Vec<String>, layout: ColumnLayout) -> Option<Self> {
        let mut numbers: Vec<f64> = merge_thousands(tokens)
            .iter()
            .filter_map(|t| clean_numeric(t))
            .collect();
        if layout == ColumnLayout::FirstThree {
            numbers.truncate(3);
        }
        match numbers.as_slice() {
            [] => None,
            [nominal] => Some(Self {
                nominal: *nominal,
                actual_after: None,
                uncertainty: None,
            }),
            [nominal, actual] => Some(Self {
                nominal: *nominal,
                actual_after: Some(*actual),
                uncertainty: None,
            }),
            [nominal, .., actual, uncertainty] => Some(Self {
                nominal: *nominal,
                actual_after: Some(*actual),
                uncertainty: Some(*uncertainty),
            }),
        }
    }

    fn into_entry(self, weight_id: String) -> WeightEntry {
        let mut entry = WeightEntry::new(weight_id, self.nominal);
        if let Some(actual) = self.actual_after {
            entry = entry.with_actual(actual);
        }
        if let Some(u) = self.uncertainty {
            entry = entry.with_uncertainty(u);
        }
        entry
    }
}

// ── State machine ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParseState {
    #[default]
    Scanning,
    InSet { set_id: String },
}

/// One classified line, ready for [`transition`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SetHeader(String),
    Row(WeightEntry),
    /// A numeric row with no id of its own.
    IdlessRow(RowValues),
    Orphan,
    Text,
}

impl Event {
    /// The entry this event adds to set `set_id`. Id-less rows are named
    /// `<set>-<nominal>`, e.g. `W1-500`.
    fn into_set_entry(self, set_id: &str) -> Option<WeightEntry> {
        match self {
            Event::Row(entry) => Some(entry),
            Event::IdlessRow(values) => {
                Some(values.into_entry(format!("{}-{}", set_id, values.nominal)))
            }
            _ => None,
        }
    }
}

/// What the parser does with the current line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    OpenSet(String),
    AppendToSet(String),
    AppendTopLevel,
    Drop,
    Ignore,
}

/// True when `weight_id` carries `set_id` as its prefix: `W1-500` and `W1`
/// belong to `W1`, `W10` does not.
pub fn belongs_to_set(weight_id: &str, set_id: &str) -> bool {
    match weight_id.strip_prefix(set_id) {
        Some(rest) => !rest.starts_with(|c: char| c.is_ascii_digit()),
        None => false,
    }
}

pub fn transition(state: &ParseState, event: &Event) -> (ParseState, Action) {
    match (state, event) {
        (_, Event::SetHeader(id)) => (
            ParseState::InSet { set_id: id.clone() },
            Action::OpenSet(id.clone()),
        ),
        (ParseState::InSet { set_id }, Event::Row(entry)) if belongs_to_set(&entry.weight_id, set_id) => {
            (state.clone(), Action::AppendToSet(set_id.clone()))
        }
        (_, Event::Row(_)) => (ParseState::Scanning, Action::AppendTopLevel),
        (ParseState::InSet { set_id }, Event::IdlessRow(_)) => {
            (state.clone(), Action::AppendToSet(set_id.clone()))
        }
        (ParseState::Scanning, Event::IdlessRow(_)) | (_, Event::Orphan) => (state.clone(), Action::Drop),
        (_, Event::Text) => (state.clone(), Action::Ignore),
    }
}

// ── Parser ───────────────────────────────────────────────────────────────────

/// Result of one parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTables {
    pub weights: Vec<WeightEntry>,
    pub sets: Vec<WeightSet>,
    pub dropped_lines: usize,
    pub warnings: Vec<Warning>,
}

/// Insert or overwrite by id, keeping the first-seen position.
/// Returns `true` when an earlier entry was replaced.
fn upsert(list: &mut Vec<WeightEntry>, entry: WeightEntry) -> bool {
    match list.iter_mut().find(|e| e.weight_id == entry.weight_id) {
        Some(existing) => {
            *existing = entry;
            true
        }
        None => {
            list.push(entry);
            false
        }
    }
}

/// The set with `id`, opened at the end when not seen before.
fn set_mut<'a>(sets: &'a mut Vec<WeightSet>, id: &str) -> &'a mut WeightSet {
    let pos = match sets.iter().position(|s| s.id == id) {
        Some(pos) => pos,
        None => {
            sets.push(WeightSet::new(id));
            sets.len() - 1
        }
    };
    &mut sets[pos]
}

/// Turn the document's OCR lines into weights and sets.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightTableParser;

impl WeightTableParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse every page in order. Fails only when no page has any text.
    pub fn parse(&self, pages: &[PageText]) -> Result<ParsedTables, CertError> {
        if pages.iter().all(PageText::is_empty) {
            return Err(CertError::EmptyDocumentText { pages: pages.len() });
        }

        let mut out = ParsedTables::default();
        let mut state = ParseState::default();

        for page in pages {
            let page_num = page.page_index + 1;
            let mut dropped_here = 0usize;
            let mut i = 0;
            while i < page.lines.len() {
                let (event, consumed) = self.next_event(&page.lines, i);
                let (next_state, action) = transition(&state, &event);
                match (action, event) {
                    (Action::OpenSet(id), _) => {
                        debug!("Page {}: weight set {}", page_num, id);
                        set_mut(&mut out.sets, &id);
                    }
                    (Action::AppendToSet(set_id), event) => {
                        if let Some(entry) = event.into_set_entry(&set_id) {
                            let id = entry.weight_id.clone();
                            let set = set_mut(&mut out.sets, &set_id);
                            if upsert(&mut set.weights, entry) {
                                out.warnings.push(duplicate_warning(&id, &set_id, page_num));
                            }
                        }
                    }
                    (Action::AppendTopLevel, Event::Row(entry)) => {
                        let id = entry.weight_id.clone();
                        if upsert(&mut out.weights, entry) {
                            out.warnings.push(duplicate_warning(&id, "the top-level list", page_num));
                        }
                    }
                    (Action::Drop, _) => {
                        debug!("Page {}: dropped table line '{}'", page_num, page.lines[i]);
                        dropped_here += 1;
                    }
                    _ => {}
                }
                state = next_state;
                i += consumed;
            }

            if dropped_here > 0 {
                out.dropped_lines += dropped_here;
                let w = Warning::new(
                    WarningCode::DroppedLines,
                    format!("{dropped_here} table line(s) dropped: no valid weight id"),
                )
                .on_page(page_num);
                warn!("{}", w);
                out.warnings.push(w);
            }
        }

        info!(
            "Parsed {} top-level weights and {} weight sets ({} lines dropped)",
            out.weights.len(),
            out.sets.len(),
            out.dropped_lines
        );
        Ok(out)
    }

    /// Build the event for `lines[i]`, merging in `lines[i + 1]` when it
    /// completes a split row. Returns the event and how many lines it used.
    fn next_event(&self, lines: &[String], i: usize) -> (Event, usize) {
        match classify(&lines[i]) {
            LineKind::SetHeader(id) => (Event::SetHeader(id), 1),
            LineKind::Row { weight_id, mut numbers } => {
                let mut consumed = 1;
                // Only a row missing its actual-after can continue on the next
                // line, and never into a line that is a complete row itself.
                // A bare id always takes the next line.
                if numbers.len() < 2 {
                    if let Some(LineKind::Numbers(more)) = lines.get(i + 1).map(|l| classify(l)) {
                        let mut combined = numbers.clone();
                        combined.extend(more.iter().cloned());
                        let completes = numbers.is_empty()
                            || (idless_row(more).is_none() && merge_thousands(combined.clone()).len() <= 3);
                        if completes {
                            numbers = combined;
                            consumed = 2;
                        }
                    }
                }
                match RowValues::from_tokens(numbers, ColumnLayout::FirstAndLastTwo) {
                    Some(values) => (Event::Row(values.into_entry(weight_id)), consumed),
                    // An id with nothing after it is a reference, not a row.
                    None => (Event::Text, 1),
                }
            }
            LineKind::Numbers(tokens) => match idless_row(tokens) {
                Some(values) => (Event::IdlessRow(values), 1),
                None => (Event::Text, 1),
            },
            LineKind::Orphan => (Event::Orphan, 1),
            LineKind::Text => (Event::Text, 1),
        }
    }
}

/// A numbers-only line that is a row on its own: three or more columns, at
/// least one with a decimal part. Page numbers and bare counts are not.
fn idless_row(tokens: Vec<String>) -> Option<RowValues> {
    let has_decimal = tokens.iter().any(|t| has_decimal_separator(t));
    let count = merge_thousands(tokens.clone()).len();
    if count < 3 || !has_decimal {
        return None;
    }
    RowValues::from_tokens(tokens, ColumnLayout::FirstThree)
}

fn duplicate_warning(id: &str, container: &str, page: usize) -> Warning {
    let w = Warning::new(
        WarningCode::DuplicateWeightId,
        format!("Weight {id} appears more than once in {container}; keeping the later row"),
    )
    .on_page(page);
    warn!("{}", w);
    w
}
