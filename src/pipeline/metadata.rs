//! Certificate-level fields from OCR text.
//!
//! An ordered table of [`FieldRule`]s is applied line by line. Each rule names
//! a field, a search scope and a pattern whose first capture group is the
//! value. A field may have several rules: the first rule that matches
//! anywhere in its scope wins and later rules for that field are skipped.
//!
//! ## Scopes
//!
//! Title and certificate number are printed in the page-1 header and nowhere
//! else that can be trusted, so they are searched on the first page only.
//! Dates, lab, customer and contact are also repeated in continuation-page
//! headers, which are often cleaner scans than page 1, so they are searched
//! on every page in reading order.
//!
//! ## Dates
//!
//! Matched dates are normalised to `YYYY-MM-DD`. Numeric dates are read
//! day-first (`01/02/2024` is 1 February), falling back to month-first only
//! when day-first is impossible. A date that matches the pattern but does not
//! parse is kept verbatim and an `unparsed_date` warning is recorded.

use crate::error::{Warning, WarningCode};
use crate::pipeline::normalize::{collapse_whitespace, fix_digit_confusion};
use crate::pipeline::ocr::PageText;
use crate::record::CertificateMetadata;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Date shapes accepted inside field patterns and by the page-1 date scan.
const DATE: &str = r"(?:\d{4}[-/.]\d{1,2}[-/.]\d{1,2}|\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4}|\d{1,2}\s+[A-Za-z]{3,9}\.?\s+\d{4}|[A-Za-z]{3,9}\.?\s+\d{1,2},?\s+\d{4})";

static RE_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(&format!(r"\b{DATE}\b")).unwrap());

/// Accreditation bodies that sign calibration certificates.
const ACCREDITATION_BODIES: &str = r"SANAS|UKAS|NATA|A2LA|DAkkS|COFRAC|IANZ|ENAC|ACCREDIA|CNAS|JAB";

// ── Rule table ───────────────────────────────────────────────────────────────

/// Metadata field a rule fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    CertificateNumber,
    Title,
    Pages,
    IssuingLab,
    DateIssued,
    DateExpiry,
    CustomerName,
    AccreditationBody,
    ContactPerson,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::CertificateNumber => "certificate_number",
            Field::Title => "title",
            Field::Pages => "pages",
            Field::IssuingLab => "issuing_lab",
            Field::DateIssued => "date_issued",
            Field::DateExpiry => "date_expiry",
            Field::CustomerName => "customer_name",
            Field::AccreditationBody => "accreditation_body",
            Field::ContactPerson => "contact_person",
        }
    }
}

/// Where a rule looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    FirstPage,
    /// Every page in order; first match wins.
    AnyPage,
}

/// How a captured value is cleaned before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcess {
    /// Trim whitespace and trailing punctuation.
    Text,
    /// As `Text`, then uppercase.
    Upper,
    /// Repair letter/digit confusion, then uppercase.
    Identifier,
    /// Normalise to `YYYY-MM-DD`.
    Date,
    /// Repair letter/digit confusion, then parse as an integer.
    Count,
}

pub struct FieldRule {
    pub field: Field,
    pub scope: Scope,
    pub pattern: Regex,
    pub post: PostProcess,
}

impl FieldRule {
    fn new(field: Field, scope: Scope, pattern: &str, post: PostProcess) -> Self {
        Self {
            field,
            scope,
            pattern: Regex::new(pattern).unwrap(),
            post,
        }
    }
}

static RULES: Lazy<Vec<FieldRule>> = Lazy::new(|| {
    use Field::*;
    use PostProcess as P;
    use Scope::*;
    vec![
        FieldRule::new(
            CertificateNumber,
            FirstPage,
            r"(?i:certificate\s+n(?:umber|o|0))\.?\s*:?\s*([A-Za-z0-9][A-Za-z0-9/-]*[A-Za-z0-9])",
            P::Identifier,
        ),
        FieldRule::new(
            Title,
            FirstPage,
            r"(?i)^((?:[a-z][a-z-]*\s+)*calibration\s+certificate)$",
            P::Upper,
        ),
        FieldRule::new(Title, FirstPage, r"(?i)^(certificate\s+of\s+calibration)$", P::Upper),
        FieldRule::new(IssuingLab, AnyPage, r"(?i:issued\s+by)\s*:?\s*(.+)$", P::Text),
        FieldRule::new(
            IssuingLab,
            AnyPage,
            r"\b([A-Z][A-Z&]*(?:\s+[A-Z][A-Z&]*)*\s+LAB(?:ORATORY|ORATORIES|S)?\b.*)$",
            P::Text,
        ),
        FieldRule::new(
            DateIssued,
            AnyPage,
            &format!(r"(?i:date\s+of\s+issue|issue\s+date|date\s+issued)\s*:?\s*({DATE})"),
            P::Date,
        ),
        FieldRule::new(
            DateExpiry,
            AnyPage,
            &format!(
                r"(?i:date\s+of\s+expiry|expiry\s+date|expiration\s+date|valid\s+until|due\s+date)\s*:?\s*({DATE})"
            ),
            P::Date,
        ),
        FieldRule::new(
            CustomerName,
            AnyPage,
            r"(?i)calibration\s+of:\s*(.+?)\s*(?:calibration\s+date.*)?$",
            P::Text,
        ),
        FieldRule::new(
            CustomerName,
            AnyPage,
            r"(?i)(?:customer(?:\s+name)?|client)\s*:\s*(.+)$",
            P::Text,
        ),
        FieldRule::new(
            ContactPerson,
            AnyPage,
            r"(?i)contact\s+(?:details|person)\s*:\s*([a-z][a-z .'-]*?)\s*(?:[0-9+(].*)?$",
            P::Text,
        ),
        FieldRule::new(
            AccreditationBody,
            AnyPage,
            &format!(r"\b({ACCREDITATION_BODIES})\b"),
            P::Upper,
        ),
        FieldRule::new(
            Pages,
            AnyPage,
            r"(?i)\bpage\s+[0-9OIl]{1,3}\s+of\s+([0-9OIl]{1,3})\b",
            P::Count,
        ),
        FieldRule::new(
            Pages,
            AnyPage,
            r"(?i)\b(?:no\.?|number)\s+of\s+pages\s*:?\s*([0-9OIl]{1,3})\b",
            P::Count,
        ),
    ]
});

// ── Date normalisation ───────────────────────────────────────────────────────

/// Formats tried in order: ISO first, then day-first numeric, then
/// month-first numeric, then two-digit years, then month names.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%m/%d/%Y", "%m-%d-%Y",
    "%d/%m/%y", "%d-%m-%y", "%d.%m.%y", "%d %B %Y", "%d %b %Y", "%B %d, %Y", "%b %d, %Y", "%B %d %Y",
    "%b %d %Y",
];

/// Normalise a matched date to `YYYY-MM-DD`, or `None` when it cannot be read.
pub fn normalize_date(raw: &str) -> Option<String> {
    let cleaned = collapse_whitespace(&raw.replace(". ", " ")).replace(" ,", ",");
    DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
        .find(|d| (1900..=2200).contains(&d.year()))
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn clean_text(value: &str) -> String {
    collapse_whitespace(value)
        .trim_end_matches([',', ';', ':', '.', '-'])
        .trim()
        .to_string()
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Applies the rule table to a document's pages.
#[derive(Clone, Copy)]
pub struct MetadataExtractor {
    rules: &'static [FieldRule],
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self { rules: &RULES }
    }
}

impl MetadataExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract metadata and the warnings produced along the way.
    ///
    /// `rasterized_pages` is the number of pages actually rendered; it
    /// substitutes for an undeclared page count and is compared against a
    /// declared one.
    pub fn extract(&self, pages: &[PageText], rasterized_pages: usize) -> (CertificateMetadata, Vec<Warning>) {
        let mut meta = CertificateMetadata::default();
        let mut warnings = Vec::new();
        let mut filled: Vec<Field> = Vec::new();

        for rule in self.rules {
            if filled.contains(&rule.field) {
                continue;
            }
            let searched = match rule.scope {
                Scope::FirstPage => pages.first().into_iter().collect::<Vec<_>>(),
                Scope::AnyPage => pages.iter().collect(),
            };
            let hit = searched.iter().find_map(|page| {
                page.lines.iter().find_map(|line| {
                    let subject = match rule.post {
                        PostProcess::Date | PostProcess::Count => fix_digit_confusion(line),
                        _ => line.clone(),
                    };
                    let captured = rule.pattern.captures(&subject)?.get(1)?.as_str().to_string();
                    Some((page.page_index + 1, captured))
                })
            });
            let Some((page_num, raw)) = hit else {
                continue;
            };
            if self.store(&mut meta, rule, &raw, page_num, &mut warnings) {
                debug!("{} = {:?} (page {})", rule.field.name(), raw, page_num);
                filled.push(rule.field);
            }
        }

        meta.calibration_dates = first_page_dates(pages.first());
        self.check_page_count(&mut meta, rasterized_pages, &mut warnings);

        for field in meta.missing_fields() {
            let w = Warning::new(WarningCode::MissingField, format!("No value found for {field}"));
            warn!("{}", w);
            warnings.push(w);
        }
        (meta, warnings)
    }

    /// Apply post-processing and store. Returns `false` when the captured
    /// value turned out unusable, so a later rule may still fill the field.
    fn store(
        &self,
        meta: &mut CertificateMetadata,
        rule: &FieldRule,
        raw: &str,
        page_num: usize,
        warnings: &mut Vec<Warning>,
    ) -> bool {
        let text = match rule.post {
            PostProcess::Text => clean_text(raw),
            PostProcess::Upper => clean_text(raw).to_uppercase(),
            PostProcess::Identifier => fix_digit_confusion(&clean_text(raw)).to_uppercase(),
            PostProcess::Date => match normalize_date(raw) {
                Some(d) => d,
                None => {
                    let w = Warning::new(
                        WarningCode::UnparsedDate,
                        format!("Could not normalise {} '{}'; keeping it as read", rule.field.name(), raw),
                    )
                    .on_page(page_num);
                    warn!("{}", w);
                    warnings.push(w);
                    clean_text(raw)
                }
            },
            PostProcess::Count => {
                return match fix_digit_confusion(raw).parse::<u32>() {
                    Ok(n) if n > 0 => {
                        meta.pages = Some(n);
                        true
                    }
                    _ => false,
                };
            }
        };
        if text.is_empty() {
            return false;
        }
        let slot = match rule.field {
            Field::CertificateNumber => &mut meta.certificate_number,
            Field::Title => &mut meta.title,
            Field::IssuingLab => &mut meta.issuing_lab,
            Field::DateIssued => &mut meta.date_issued,
            Field::DateExpiry => &mut meta.date_expiry,
            Field::CustomerName => &mut meta.customer_name,
            Field::AccreditationBody => &mut meta.accreditation_body,
            Field::ContactPerson => &mut meta.contact_person,
            Field::Pages => return false,
        };
        *slot = Some(text);
        true
    }

    fn check_page_count(&self, meta: &mut CertificateMetadata, rasterized: usize, warnings: &mut Vec<Warning>) {
        match meta.pages {
            Some(declared) if declared as usize != rasterized => {
                let w = Warning::new(
                    WarningCode::PageCountMismatch,
                    format!("Certificate declares {declared} pages but {rasterized} were rasterized"),
                );
                warn!("{}", w);
                warnings.push(w);
            }
            Some(_) => {}
            None if rasterized > 0 => meta.pages = u32::try_from(rasterized).ok(),
            None => {}
        }
    }
}

/// Every distinct date on the first page, normalised, in reading order.
fn first_page_dates(page: Option<&PageText>) -> Vec<String> {
    let mut dates: Vec<String> = Vec::new();
    let Some(page) = page else {
        return dates;
    };
    for line in &page.lines {
        let fixed = fix_digit_confusion(line);
        for m in RE_DATE.find_iter(&fixed) {
            let date = normalize_date(m.as_str()).unwrap_or_else(|| {
                debug!("Unparsed date on page 1: {}", m.as_str());
                m.as_str().to_string()
            });
            if !dates.contains(&date) {
                dates.push(date);
            }
        }
    }
    dates
}

/// Extract metadata treating every page given as rasterized.
pub fn extract_metadata(pages: &[PageText]) -> (CertificateMetadata, Vec<Warning>) {
    MetadataExtractor::new().extract(pages, pages.len())
}
