//! # Similarity Engine
//! Hybrid match score over three axes: categorical hard-lock agreement,
//! bounded-linear numeric proximity, and textual overlap of the description
//! profiles. Axis weights are construction-time data and re-normalised to
//! sum to one, so caller overrides can't break the [0,1] contract.
//!
//! Every per-field component is exposed in the details bundle; the ranker
//! and the explanation builder both read from it.

use serde::Serialize;

use crate::listing::VehiclePayload;
use crate::normalize::comparison_form;
use crate::text_profile::{option_label, TextProfile};

/// Tuning knobs for the numeric windows, taken from the request.
#[derive(Debug, Clone, Copy)]
pub struct Tolerances {
    pub year_tolerance_years: f64,
    pub mileage_ratio: f64,
    pub mileage_min_window: f64,
    pub power_ratio: f64,
    pub power_min_window: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            year_tolerance_years: 2.0,
            mileage_ratio: 2.0,
            mileage_min_window: 5000.0,
            power_ratio: 0.15,
            power_min_window: 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AxisWeights {
    pub categorical: f64,
    pub numeric: f64,
    pub text: f64,
}

impl Default for AxisWeights {
    fn default() -> Self {
        Self {
            categorical: 0.45,
            numeric: 0.25,
            text: 0.30,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatComponent {
    pub score: f64,
    pub weight: f64,
    pub locked: bool,
    pub target: Option<String>,
    pub candidate: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatComponents {
    pub make_model: CatComponent,
    pub body: CatComponent,
    pub fuel: CatComponent,
    pub transmission: CatComponent,
    pub exterior_color: CatComponent,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoricalDetails {
    pub score: f64,
    pub components: CatComponents,
}

#[derive(Debug, Clone, Serialize)]
pub struct NumComponent {
    pub score: f64,
    pub diff: Option<f64>,
    pub signed_diff: Option<f64>,
    pub window: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_diff: Option<f64>,
    pub target: Option<f64>,
    pub candidate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NumComponents {
    pub age: NumComponent,
    pub mileage: NumComponent,
    pub power: NumComponent,
}

#[derive(Debug, Clone, Serialize)]
pub struct NumericDetails {
    pub score: f64,
    pub components: NumComponents,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextComponents {
    pub feature_overlap: f64,
    pub token_overlap: f64,
    pub feature_hits: Vec<String>,
    pub shared_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextDetails {
    pub score: f64,
    pub components: TextComponents,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarityDetails {
    pub match_score: f64,
    pub categorical: CategoricalDetails,
    pub numeric: NumericDetails,
    pub textual: TextDetails,
    pub weights: AxisWeights,
}

/// Field weights inside the categorical axis.
const W_MAKE_MODEL: f64 = 0.25;
const W_BODY: f64 = 0.20;
const W_FUEL: f64 = 0.20;
const W_TRANSMISSION: f64 = 0.15;
const W_EXTERIOR_COLOR: f64 = 0.20;

/// Field weights inside the numeric axis.
const W_AGE: f64 = 0.40;
const W_MILEAGE: f64 = 0.40;
const W_POWER: f64 = 0.20;

/// Field weights inside the textual axis.
const W_FEATURE_OVERLAP: f64 = 0.60;
const W_TOKEN_OVERLAP: f64 = 0.40;

#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    weights: AxisWeights,
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new(AxisWeights::default())
    }
}

impl SimilarityEngine {
    /// Build an engine with caller-supplied axis weights. A non-positive
    /// total falls back to the defaults; anything else is re-normalised.
    pub fn new(weights: AxisWeights) -> Self {
        let total = weights.categorical + weights.numeric + weights.text;
        let weights = if total <= 0.0 || !total.is_finite() {
            AxisWeights::default()
        } else {
            AxisWeights {
                categorical: weights.categorical / total,
                numeric: weights.numeric / total,
                text: weights.text / total,
            }
        };
        Self { weights }
    }

    /// Score one (target, candidate) pair. Both payloads are already
    /// normalised; profiles are built per request and passed in.
    pub fn score(
        &self,
        target: &VehiclePayload,
        candidate: &VehiclePayload,
        target_profile: &TextProfile,
        candidate_profile: &TextProfile,
        tolerances: &Tolerances,
    ) -> (f64, SimilarityDetails) {
        let categorical = self.categorical(target, candidate);
        let numeric = self.numeric(target, candidate, tolerances);
        let textual = self.textual(target_profile, candidate_profile);

        let total = self.weights.categorical * categorical.score
            + self.weights.numeric * numeric.score
            + self.weights.text * textual.score;
        let final_score = total.clamp(0.0, 1.0);

        let details = SimilarityDetails {
            match_score: final_score,
            categorical,
            numeric,
            textual,
            weights: self.weights,
        };
        (final_score, details)
    }

    fn categorical(&self, target: &VehiclePayload, candidate: &VehiclePayload) -> CategoricalDetails {
        // Both sides present and equal (comparison form) -> 1.0, present and
        // unequal -> 0.0, either side missing -> neutral 0.5.
        let cat_score = |a: Option<&str>, b: Option<&str>| match (a, b) {
            (Some(a), Some(b)) => {
                if comparison_form(a) == comparison_form(b) {
                    1.0
                } else {
                    0.0
                }
            }
            _ => 0.5,
        };

        let norm = |v: Option<&str>| v.map(comparison_form);
        let target_make = norm(target.make.as_deref());
        let target_model = norm(target.model.as_deref());
        let candidate_make = norm(candidate.make.as_deref());
        let candidate_model = norm(candidate.model.as_deref());
        let mm_score = match (&target_make, &target_model, &candidate_make, &candidate_model) {
            (Some(tm), Some(tmo), Some(cm), Some(cmo)) => {
                if tm == cm && tmo == cmo {
                    1.0
                } else {
                    0.0
                }
            }
            _ => 0.5,
        };

        let label = |make: &Option<String>, model: &Option<String>, p: &VehiclePayload| {
            if make.is_none() && model.is_none() {
                None
            } else {
                Some(
                    format!(
                        "{} {}",
                        p.make.as_deref().unwrap_or(""),
                        p.model.as_deref().unwrap_or("")
                    )
                    .trim()
                    .to_string(),
                )
            }
        };

        let make_model = CatComponent {
            score: mm_score,
            weight: W_MAKE_MODEL,
            locked: true,
            target: label(&target_make, &target_model, target),
            candidate: label(&candidate_make, &candidate_model, candidate),
        };
        let body = CatComponent {
            score: cat_score(target.body_group.as_deref(), candidate.body_group.as_deref()),
            weight: W_BODY,
            locked: true,
            target: target.body_group.clone(),
            candidate: candidate.body_group.clone(),
        };
        let fuel = CatComponent {
            score: cat_score(target.fuel_group.as_deref(), candidate.fuel_group.as_deref()),
            weight: W_FUEL,
            locked: true,
            target: target.fuel_group.clone(),
            candidate: candidate.fuel_group.clone(),
        };
        let transmission = CatComponent {
            score: cat_score(
                target.transmission_group.as_deref(),
                candidate.transmission_group.as_deref(),
            ),
            weight: W_TRANSMISSION,
            locked: true,
            target: target.transmission_group.clone(),
            candidate: candidate.transmission_group.clone(),
        };
        let exterior_color = CatComponent {
            score: cat_score(
                target.color_canonical.as_deref(),
                candidate.color_canonical.as_deref(),
            ),
            weight: W_EXTERIOR_COLOR,
            locked: true,
            target: target.color_canonical.clone(),
            candidate: candidate.color_canonical.clone(),
        };

        let weight_total = W_MAKE_MODEL + W_BODY + W_FUEL + W_TRANSMISSION + W_EXTERIOR_COLOR;
        let weighted = W_MAKE_MODEL * make_model.score
            + W_BODY * body.score
            + W_FUEL * fuel.score
            + W_TRANSMISSION * transmission.score
            + W_EXTERIOR_COLOR * exterior_color.score;

        CategoricalDetails {
            score: weighted / weight_total,
            components: CatComponents {
                make_model,
                body,
                fuel,
                transmission,
                exterior_color,
            },
        }
    }

    fn numeric(
        &self,
        target: &VehiclePayload,
        candidate: &VehiclePayload,
        tolerances: &Tolerances,
    ) -> NumericDetails {
        let year_tolerance_months = tolerances.year_tolerance_years.max(0.1) * 12.0;
        let mileage_ratio = tolerances.mileage_ratio.max(0.01);
        let mileage_min_window = tolerances.mileage_min_window.max(0.0);
        let power_ratio = tolerances.power_ratio.max(0.01);
        let power_min_window = tolerances.power_min_window.max(0.0);

        let age = {
            let target_age = target.age_months.map(|m| m as f64);
            let candidate_age = candidate.age_months.map(|m| m as f64);
            let window = year_tolerance_months.max(1.0);
            match (target_age, candidate_age) {
                (Some(t), Some(c)) => {
                    let signed = c - t;
                    NumComponent {
                        score: bounded_similarity(signed.abs(), window),
                        diff: Some(signed.abs()),
                        signed_diff: Some(signed),
                        window,
                        percent_diff: None,
                        target: target_age,
                        candidate: candidate_age,
                    }
                }
                _ => NumComponent {
                    score: 0.5,
                    diff: None,
                    signed_diff: None,
                    window: year_tolerance_months,
                    percent_diff: None,
                    target: target_age,
                    candidate: candidate_age,
                },
            }
        };

        let mileage = match (target.mileage_km, candidate.mileage_km) {
            (Some(t), Some(c)) => {
                let window = (t.abs() * mileage_ratio).max(mileage_min_window).max(1.0);
                let signed = c - t;
                NumComponent {
                    score: bounded_similarity(signed.abs(), window),
                    diff: Some(signed.abs()),
                    signed_diff: Some(signed),
                    window,
                    percent_diff: None,
                    target: Some(t),
                    candidate: Some(c),
                }
            }
            (t, c) => NumComponent {
                score: 0.5,
                diff: None,
                signed_diff: None,
                window: mileage_min_window,
                percent_diff: None,
                target: t,
                candidate: c,
            },
        };

        let power = match (target.power_kw, candidate.power_kw) {
            (Some(t), Some(c)) => {
                let window = (t.abs() * power_ratio).max(power_min_window).max(1.0);
                let signed = c - t;
                NumComponent {
                    score: bounded_similarity(signed.abs(), window),
                    diff: Some(signed.abs()),
                    signed_diff: Some(signed),
                    window,
                    percent_diff: Some(signed / t.max(1.0) * 100.0),
                    target: Some(t),
                    candidate: Some(c),
                }
            }
            (t, c) => NumComponent {
                score: 0.5,
                diff: None,
                signed_diff: None,
                window: power_min_window,
                percent_diff: None,
                target: t,
                candidate: c,
            },
        };

        let score = W_AGE * age.score + W_MILEAGE * mileage.score + W_POWER * power.score;
        NumericDetails {
            score,
            components: NumComponents { age, mileage, power },
        }
    }

    fn textual(&self, target: &TextProfile, candidate: &TextProfile) -> TextDetails {
        let token_overlap = jaccard(&target.tokens, &candidate.tokens);
        let feature_overlap = jaccard(&target.features, &candidate.features);

        let score = W_FEATURE_OVERLAP * feature_overlap + W_TOKEN_OVERLAP * token_overlap;

        let feature_hits: Vec<String> = target
            .features
            .intersection(&candidate.features)
            .map(|key| option_label(key).to_string())
            .collect();
        let shared_tokens: Vec<String> = target
            .tokens
            .intersection(&candidate.tokens)
            .take(10)
            .cloned()
            .collect();

        TextDetails {
            score,
            components: TextComponents {
                feature_overlap,
                token_overlap,
                feature_hits,
                shared_tokens,
            },
        }
    }
}

/// `max(0, 1 - diff/window)`; a degenerate window is neutral.
fn bounded_similarity(diff: f64, window: f64) -> f64 {
    if window <= 0.0 {
        return 0.5;
    }
    (1.0 - diff / window).clamp(0.0, 1.0)
}

/// Jaccard index; two empty sets are neutral rather than dissimilar.
fn jaccard(a: &std::collections::BTreeSet<String>, b: &std::collections::BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.5;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::ListingRow;
    use crate::text_profile::build_text_profile;
    use chrono::{TimeZone, Utc};

    fn payload(
        id: &str,
        price: Option<f64>,
        mileage: Option<f64>,
        power: Option<f64>,
        colour: &str,
        description: &str,
    ) -> VehiclePayload {
        let row = ListingRow {
            vehicle_id: id.to_string(),
            listing_url: None,
            price: None,
            mileage_raw: None,
            first_registration_raw: Some("2021-06-01".into()),
            make: Some("BMW".into()),
            model: Some("3er".into()),
            fuel_type: Some("Benzin".into()),
            transmission: Some("Automatik".into()),
            body_type: Some("Limousine".into()),
            color: Some(colour.to_string()),
            interior_color: None,
            upholstery_color: None,
            description: Some(description.to_string()),
            data_source: None,
            images: None,
            created_at: None,
            updated_at: None,
            price_num: price,
            mileage_num: mileage,
            power_num: power,
        };
        VehiclePayload::from_row(&row, Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap())
    }

    fn score_pair(target: &VehiclePayload, candidate: &VehiclePayload) -> (f64, SimilarityDetails) {
        let engine = SimilarityEngine::default();
        let tp = build_text_profile(&target.description);
        let cp = build_text_profile(&candidate.description);
        engine.score(target, candidate, &tp, &cp, &Tolerances::default())
    }

    #[test]
    fn identical_twin_scores_near_one() {
        let desc = "Sitzheizung, Panoramadach, Apple CarPlay, DAB+";
        let target = payload("t", Some(25000.0), Some(45000.0), Some(120.0), "Schwarz", desc);
        let twin = payload("c", Some(23500.0), Some(43000.0), Some(120.0), "Schwarz", desc);

        let (score, details) = score_pair(&target, &twin);
        assert!(score > 0.95, "twin should score near 1.0, got {score}");
        assert_eq!(details.categorical.score, 1.0);
        assert_eq!(details.textual.components.feature_overlap, 1.0);
    }

    #[test]
    fn categorical_mismatch_and_null_semantics() {
        let target = payload("t", Some(25000.0), Some(45000.0), Some(120.0), "Schwarz", "");
        let mut other = payload("c", Some(25000.0), Some(45000.0), Some(120.0), "Weiss", "");
        let (_, details) = score_pair(&target, &other);
        assert_eq!(details.categorical.components.exterior_color.score, 0.0);

        other.color_canonical = None;
        let (_, details) = score_pair(&target, &other);
        assert_eq!(details.categorical.components.exterior_color.score, 0.5);
    }

    #[test]
    fn numeric_similarity_is_bounded_linear() {
        let target = payload("t", Some(25000.0), Some(45000.0), Some(120.0), "Schwarz", "");
        // Mileage window: max(45000 * 2.0, 5000) = 90000; delta 45000 -> 0.5.
        let candidate = payload("c", Some(25000.0), Some(90000.0), Some(120.0), "Schwarz", "");
        let (_, details) = score_pair(&target, &candidate);
        let mileage = &details.numeric.components.mileage;
        assert!((mileage.score - 0.5).abs() < 1e-9);
        assert_eq!(mileage.signed_diff, Some(45000.0));

        // Outside the window the score floors at zero.
        let far = payload("c2", Some(25000.0), Some(200000.0), Some(120.0), "Schwarz", "");
        let (_, details) = score_pair(&target, &far);
        assert_eq!(details.numeric.components.mileage.score, 0.0);
    }

    #[test]
    fn missing_numeric_values_are_neutral() {
        let target = payload("t", Some(25000.0), None, Some(120.0), "Schwarz", "");
        let candidate = payload("c", Some(25000.0), Some(45000.0), Some(120.0), "Schwarz", "");
        let (_, details) = score_pair(&target, &candidate);
        assert_eq!(details.numeric.components.mileage.score, 0.5);
        assert_eq!(details.numeric.components.mileage.diff, None);
    }

    #[test]
    fn power_percent_diff_is_signed() {
        let target = payload("t", Some(25000.0), Some(45000.0), Some(100.0), "Schwarz", "");
        let candidate = payload("c", Some(25000.0), Some(45000.0), Some(90.0), "Schwarz", "");
        let (_, details) = score_pair(&target, &candidate);
        let power = &details.numeric.components.power;
        assert_eq!(power.percent_diff, Some(-10.0));
    }

    #[test]
    fn shared_features_beat_shared_nothing() {
        let desc = "Sitzheizung, Panoramadach, Matrix LED, 360 Grad Kamera";
        let target = payload("t", Some(25000.0), Some(45000.0), Some(120.0), "Schwarz", desc);
        let rich = payload("a", Some(25000.0), Some(45000.0), Some(120.0), "Schwarz", desc);
        let poor = payload(
            "b",
            Some(25000.0),
            Some(45000.0),
            Some(120.0),
            "Schwarz",
            "Scheckheftgepflegt, Nichtraucher",
        );

        let (rich_score, rich_details) = score_pair(&target, &rich);
        let (poor_score, _) = score_pair(&target, &poor);
        assert!(rich_score > poor_score);
        assert_eq!(rich_details.textual.components.feature_hits.len(), 4);
    }

    #[test]
    fn empty_profiles_are_neutral_not_hostile() {
        let target = payload("t", Some(25000.0), Some(45000.0), Some(120.0), "Schwarz", "");
        let candidate = payload("c", Some(25000.0), Some(45000.0), Some(120.0), "Schwarz", "");
        let (_, details) = score_pair(&target, &candidate);
        assert_eq!(details.textual.components.feature_overlap, 0.5);
        assert_eq!(details.textual.components.token_overlap, 0.5);
    }

    #[test]
    fn caller_weights_are_renormalised() {
        let engine = SimilarityEngine::new(AxisWeights {
            categorical: 9.0,
            numeric: 5.0,
            text: 6.0,
        });
        let w = engine.weights;
        assert!((w.categorical + w.numeric + w.text - 1.0).abs() < 1e-9);
        assert!((w.categorical - 0.45).abs() < 1e-9);

        // Degenerate weights fall back to the defaults.
        let engine = SimilarityEngine::new(AxisWeights {
            categorical: 0.0,
            numeric: 0.0,
            text: 0.0,
        });
        assert!((engine.weights.categorical - 0.45).abs() < 1e-9);
    }
}
