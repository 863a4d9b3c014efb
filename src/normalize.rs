//! # Listing Normalization
//! Canonical vocabularies and parsers for the raw marketplace fields.
//!
//! - Colour / fuel / transmission / body strings arrive in German, English,
//!   French, Italian or Spanish; everything is compared accent-stripped and
//!   lowercased.
//! - Price and mileage may be stored as free-form strings ("24.990 €");
//!   the parsers keep digits plus the first decimal separator.
//! - Pure functions, no I/O; suitable for unit tests and reuse.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Closed colour vocabulary surfaced in responses.
pub const CANONICAL_COLOURS: [&str; 11] = [
    "white", "black", "gray", "blue", "red", "silver", "green", "brown", "beige", "orange",
    "yellow",
];

/// Exact synonym table (marketplace spelling -> canonical colour).
static COLOUR_SYNONYMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("weiss", "white"),
        ("weiß", "white"),
        ("weiss metallic", "white"),
        ("weiß metallic", "white"),
        ("white", "white"),
        ("candy white", "white"),
        ("polar white", "white"),
        ("pure white", "white"),
        ("alpinweiss", "white"),
        ("alpine white", "white"),
        ("blanc", "white"),
        ("bianco", "white"),
        ("schwarz", "black"),
        ("schwarz metallic", "black"),
        ("black", "black"),
        ("deep black", "black"),
        ("noir", "black"),
        ("nero", "black"),
        ("grau", "gray"),
        ("grau metallic", "gray"),
        ("graphit", "gray"),
        ("graphite", "gray"),
        ("grey", "gray"),
        ("gray", "gray"),
        ("gris", "gray"),
        ("anthrazit", "gray"),
        ("anthracite", "gray"),
        ("blau", "blue"),
        ("blue", "blue"),
        ("azul", "blue"),
        ("bleu", "blue"),
        ("blu", "blue"),
        ("rot", "red"),
        ("red", "red"),
        ("rosso", "red"),
        ("rouge", "red"),
        ("silber", "silver"),
        ("silber metallic", "silver"),
        ("silver", "silver"),
        ("argent", "silver"),
        ("grun", "green"),
        ("green", "green"),
        ("verde", "green"),
        ("vert", "green"),
        ("braun", "brown"),
        ("brown", "brown"),
        ("marron", "brown"),
        ("bruin", "brown"),
        ("beige", "beige"),
        ("sand", "beige"),
        ("creme", "beige"),
        ("orange", "orange"),
        ("gelb", "yellow"),
        ("yellow", "yellow"),
        ("amarillo", "yellow"),
        ("giallo", "yellow"),
    ])
});

/// Keyword fallback for composite marketing names ("obsidianschwarz metallic").
/// Order matters: first canonical colour whose keyword occurs as a substring wins.
static COLOUR_KEYWORDS: Lazy<Vec<(&'static str, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        (
            "white",
            vec![
                "weiss", "weiß", "white", "bianco", "blanc", "blanco", "alpin", "arctic", "polar",
                "candy", "pure white", "snow",
            ],
        ),
        (
            "black",
            vec![
                "schwarz", "black", "noir", "nero", "obsidian", "midnight", "deep black", "onyx",
            ],
        ),
        (
            "gray",
            vec![
                "grau", "gray", "grey", "gris", "anthracite", "anthrazit", "graphit", "graphite",
                "slate",
            ],
        ),
        ("blue", vec!["blau", "bleu", "blu", "azul", "blue", "navy", "ocean"]),
        ("red", vec!["rot", "rosso", "rouge", "red", "crimson"]),
        ("silver", vec!["silber", "silver", "argent", "platinum", "platino"]),
        ("green", vec!["grun", "gruen", "verde", "vert", "green"]),
        ("brown", vec!["braun", "marron", "brown", "bruin", "bronze"]),
        ("beige", vec!["beige", "sand", "creme", "champagne", "ivory"]),
        ("orange", vec!["orange", "sunset"]),
        ("yellow", vec!["gelb", "giallo", "amarillo", "yellow"]),
    ]
});

/// German marketplace fuel labels -> canonical fuel vocabulary.
pub static FUEL_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("benzin", "petrol"),
        ("petrol", "petrol"),
        ("diesel", "diesel"),
        ("elektro", "electric"),
        ("electric", "electric"),
        ("elektro/benzin", "hybrid"),
        ("hybrid", "hybrid"),
        ("plugin-hybrid", "plug-in hybrid"),
        ("plug-in hybrid", "plug-in hybrid"),
        ("lpg", "lpg"),
        ("cng", "cng"),
    ])
});

pub static TRANSMISSION_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("automatik", "automatic"),
        ("automatic", "automatic"),
        ("tiptronic", "automatic"),
        ("schaltgetriebe", "manual"),
        ("manuell", "manual"),
        ("manual", "manual"),
    ])
});

pub static BODY_TYPE_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("suv/gelandewagen/pickup", "suv"),
        ("gelandewagen", "suv"),
        ("suv", "suv"),
        ("limousine", "sedan"),
        ("sedan", "sedan"),
        ("kombi", "wagon"),
        ("wagon", "wagon"),
        ("coupe", "coupe"),
        ("cabrio", "convertible"),
        ("kabriolett", "convertible"),
        ("convertible", "convertible"),
        ("kastenwagen hochdach", "van"),
        ("kastenwagen", "van"),
        ("transporter", "van"),
        ("van", "van"),
        ("kleinwagen", "hatchback"),
        ("schraghecklimousine", "hatchback"),
        ("hatchback", "hatchback"),
    ])
});

/// Splitter for composite colour values ("schwarz / weiss", "blau und grau").
static COMPOSITE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/,;]| und | with ").expect("composite colour splitter"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Trim a raw field; empty strings collapse to `None`.
pub fn clean(value: Option<&str>) -> Option<&str> {
    match value {
        Some(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        None => None,
    }
}

/// Strip diacritics: NFKD-decompose and drop combining marks ("grün" ->
/// "grun", "coupé" -> "coupe"). Characters without a decomposition (ß) pass
/// through untouched; the synonym tables carry both spellings.
pub fn strip_accents(value: &str) -> String {
    value.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Accent-stripped lowercase comparison form used for every categorical
/// equality check.
pub fn comparison_form(value: &str) -> String {
    strip_accents(value).to_lowercase()
}

/// Canonicalise an exterior/interior colour string.
///
/// Lookup order: exact synonym table, composite parts, keyword substring
/// scan, and finally the lowercased literal itself. Equal canonical output is
/// a necessary condition for a colour hard-lock match.
pub fn normalize_colour(value: Option<&str>) -> Option<String> {
    let text = clean(value)?;
    let mut lowered = comparison_form(text).replace('-', " ");
    lowered = WHITESPACE.replace_all(&lowered, " ").trim().to_string();

    if let Some(canonical) = COLOUR_SYNONYMS.get(lowered.as_str()) {
        return Some((*canonical).to_string());
    }

    for part in COMPOSITE_SPLIT.split(&lowered) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(canonical) = COLOUR_SYNONYMS.get(part) {
            return Some((*canonical).to_string());
        }
    }

    for (canonical, keywords) in COLOUR_KEYWORDS.iter() {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return Some((*canonical).to_string());
        }
    }

    Some(lowered)
}

/// True when `colour` belongs to the closed vocabulary (as opposed to a
/// fall-through literal that can never match across languages).
pub fn is_canonical_colour(colour: &str) -> bool {
    CANONICAL_COLOURS.contains(&colour)
}

/// Canonicalise fuel / transmission / body via a synonym map. Unknown keys
/// yield the lowercased literal, never `None` for non-empty input.
pub fn normalize_category(
    value: Option<&str>,
    mapping: &HashMap<&'static str, &'static str>,
) -> Option<String> {
    let text = clean(value)?;
    let key = comparison_form(text);
    match mapping.get(key.as_str()) {
        Some(canonical) => Some((*canonical).to_string()),
        None => Some(key),
    }
}

/// Locate the first 4-digit token after splitting on `/` and `-`.
pub fn extract_year(raw: Option<&str>) -> Option<i32> {
    let text = clean(raw)?;
    text.replace('/', "-")
        .split('-')
        .find(|token| token.len() == 4 && token.chars().all(|c| c.is_ascii_digit()))
        .and_then(|token| token.parse().ok())
}

/// Parse a first-registration string into a naive timestamp. Accepts
/// `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` and ISO `T` separators.
pub fn parse_registration(raw: &str) -> Option<NaiveDateTime> {
    let text = raw.trim().replace(' ', "T");
    if let Ok(ts) = text.parse::<NaiveDateTime>() {
        return Some(ts);
    }
    text.parse::<NaiveDate>()
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Whole months elapsed between registration and `now`, clamped to zero for
/// future registrations.
pub fn age_months(registration: NaiveDateTime, now: NaiveDateTime) -> i64 {
    let reg = if registration > now { now } else { registration };
    let mut months =
        i64::from(now.year() - reg.year()) * 12 + i64::from(now.month() as i32 - reg.month() as i32);
    if now.day() < reg.day() {
        months -= 1;
    }
    months.max(0)
}

/// Parse a free-form money/odometer string: keep digits plus the first
/// decimal separator (`.` or `,`); everything else is dropped. Empty -> None.
fn parse_numeric_text(value: &str) -> Option<f64> {
    let mut out = String::with_capacity(value.len());
    let mut seen_separator = false;
    let mut seen_digit = false;
    for ch in value.chars() {
        if ch.is_ascii_digit() {
            out.push(ch);
            seen_digit = true;
        } else if (ch == '.' || ch == ',') && seen_digit && !seen_separator {
            out.push('.');
            seen_separator = true;
        }
    }
    if !seen_digit {
        return None;
    }
    out.parse().ok()
}

pub fn parse_price(value: Option<&str>) -> Option<f64> {
    parse_numeric_text(clean(value)?)
}

pub fn parse_mileage(value: Option<&str>) -> Option<f64> {
    parse_numeric_text(clean(value)?)
}
