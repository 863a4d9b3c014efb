//! # Description Text Profile
//! Token set and option-feature set derived from a listing's free-text
//! description. Both feed the textual similarity axis and the explanation's
//! `text_hits` / `shared_tokens`.
//!
//! - Tokens: accent-stripped, lowercased, split on non-word characters;
//!   stopwords and tokens of <= 2 chars are dropped unless purely numeric.
//! - Features: fixed regex library over recognised equipment options
//!   (adaptive cruise, 360° camera, CarPlay, heated seats, ...).

use std::collections::{BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::normalize::comparison_form;

/// Closed option-feature vocabulary (machine keys).
pub const OPTION_KEYS: [&str; 8] = [
    "adaptive_cruise_control",
    "camera_360",
    "carplay_android_auto",
    "heated_seats",
    "matrix_led",
    "panoramic_roof",
    "dab_plus",
    "park_assist",
];

/// Recognisers for the option vocabulary, compiled once. German and English
/// marketplace wordings.
static OPTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let compile = |key: &'static str, pattern: &str| {
        (key, Regex::new(pattern).expect("option feature regex"))
    };
    vec![
        compile(
            "adaptive_cruise_control",
            r"(?i)\b(acc|adaptive(?:r)? cruise(?: control)?|abstandsregeltempomat|distronic)\b",
        ),
        compile("camera_360", r"(?i)\b360\s*(?:grad|camera|kamera|°)"),
        compile(
            "carplay_android_auto",
            r"(?i)\b(carplay|android\s*auto|apple\s*carplay)\b",
        ),
        compile("heated_seats", r"(?i)\bsitzheizung\b|\bheated seats?\b"),
        compile("matrix_led", r"(?i)\bmatrix\s*led\b"),
        compile("panoramic_roof", r"(?i)\bpanoram(adach|a dach|ic roof)\b"),
        compile("dab_plus", r"(?i)\bdab\+?\b"),
        compile("park_assist", r"(?i)\bpark(assist|pilot|hilfe|tronic|distance)\b"),
    ]
});

/// Display label for an option key, used in explanations.
pub fn option_label(key: &str) -> &str {
    match key {
        "adaptive_cruise_control" => "Adaptive Cruise / ACC",
        "camera_360" => "360° Camera",
        "carplay_android_auto" => "CarPlay / Android Auto",
        "heated_seats" => "Heated Seats",
        "matrix_led" => "Matrix LED",
        "panoramic_roof" => "Panoramic Roof",
        "dab_plus" => "DAB+ Digital Radio",
        "park_assist" => "Parking Assist",
        other => other,
    }
}

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "der", "die", "das", "und", "oder", "mit", "ein", "eine", "den", "von", "fur", "auf",
        "zum", "zur", "the", "and", "for", "with", "einmal",
    ])
});

static TOKEN_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").expect("token splitter"));

/// Derived view of one description. Sets are ordered so shared-token lists
/// serialize deterministically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextProfile {
    pub tokens: BTreeSet<String>,
    pub features: BTreeSet<String>,
    pub lowered: String,
}

/// Tokenize a description into the comparison token set.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let lowered = comparison_form(text);
    let mut tokens = BTreeSet::new();
    for token in TOKEN_SPLIT.split(&lowered) {
        if token.is_empty() || STOPWORDS.contains(token) {
            continue;
        }
        let short = token.chars().count() <= 2;
        if short && !token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        tokens.insert(token.to_string());
    }
    tokens
}

/// Match the option library against a lowered description.
pub fn extract_option_features(lowered: &str) -> BTreeSet<String> {
    OPTION_PATTERNS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(lowered))
        .map(|(key, _)| (*key).to_string())
        .collect()
}

/// Build the full profile for one description.
pub fn build_text_profile(description: &str) -> TextProfile {
    let lowered = comparison_form(description);
    let tokens = tokenize(description);
    let features = extract_option_features(&lowered);
    TextProfile {
        tokens,
        features,
        lowered,
    }
}
