//! # Ranker
//! Blend match, deal, freshness, and trust into the final rank key, then
//! apply the quality floor. Ordering is deterministic: stable sort by final
//! score descending, ties keep the cohort's retrieval order (store recency).
//!
//! All scores are guarded against NaN/infinity before they reach the wire;
//! a non-finite component is clamped to zero and logged, never propagated.

use std::collections::HashMap;

use serde::Serialize;

use crate::deal::{compute_deal_score, DealDetails};
use crate::explain::{build_explanation, Explanation};
use crate::listing::VehiclePayload;
use crate::similarity::{
    AxisWeights, CatComponents, NumComponents, SimilarityEngine, TextComponents, Tolerances,
};
use crate::text_profile::{build_text_profile, TextProfile};

/// Candidates below this match score are dropped unless that would empty
/// most of the response.
const MIN_SIMILARITY: f64 = 0.30;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RankWeights {
    #[serde(rename = "match")]
    pub match_weight: f64,
    #[serde(rename = "deal")]
    pub deal_weight: f64,
    pub freshness: f64,
    pub trust: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self::from_balance(0.0)
    }
}

impl RankWeights {
    /// Shift α/β with a single scalar in [-1, 1]: positive favours match,
    /// negative favours deal, α+β stays 0.85. Freshness and trust are fixed.
    pub fn from_balance(balance: f64) -> Self {
        let balance = balance.clamp(-1.0, 1.0);
        let alpha_raw = (0.55 + balance * 0.2).max(0.15);
        let beta_raw = (0.30 - balance * 0.2).max(0.15);
        let scale = 0.85 / (alpha_raw + beta_raw);
        Self {
            match_weight: (alpha_raw * scale).clamp(0.1, 0.85),
            deal_weight: (beta_raw * scale).clamp(0.1, 0.85),
            freshness: 0.10,
            trust: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarityAxisScores {
    pub categorical: f64,
    pub numeric: f64,
    pub text: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingWeightsDetail {
    #[serde(rename = "match")]
    pub match_weights: AxisWeights,
    pub ranking: RankWeights,
}

/// Full per-candidate debug bundle.
#[derive(Debug, Clone, Serialize)]
pub struct RankingDetails {
    pub match_score: f64,
    pub similarity_components: SimilarityAxisScores,
    pub categorical_components: CatComponents,
    pub numeric_components: NumComponents,
    pub text_components: TextComponents,
    pub weights: RankingWeightsDetail,
    pub deal: DealDetails,
}

/// One ranked result: the normalised payload flattened together with its
/// scores, debug bundle, and explanation.
#[derive(Debug, Clone, Serialize)]
pub struct Comparable {
    #[serde(flatten)]
    pub vehicle: VehiclePayload,
    pub similarity_score: f64,
    pub deal_score: f64,
    pub final_score: f64,
    /// Alias of `final_score` kept for frontend compatibility.
    pub score: f64,
    pub price_hat: Option<f64>,
    pub savings: f64,
    pub savings_percent: Option<f64>,
    pub freshness_score: Option<f64>,
    pub trust_score: f64,
    pub ranking_details: RankingDetails,
    pub explanation: Explanation,
}

/// Exponential decay over days since the last update; unknown recency is a
/// mild penalty (0.0), not neutral.
pub fn freshness_score(freshness_days: Option<f64>) -> Option<f64> {
    freshness_days.map(|days| (-days / 30.0).exp())
}

/// Fraction of the five presence signals set: price, mileage, power,
/// description, images.
pub fn trust_score(payload: &VehiclePayload) -> f64 {
    let signals = [
        payload.price_eur.is_some(),
        payload.mileage_km.is_some(),
        payload.power_kw.is_some(),
        !payload.description.is_empty(),
        !payload.images.is_empty(),
    ];
    signals.iter().filter(|set| **set).count() as f64 / signals.len() as f64
}

/// Percentile of `value` within the cohort's sorted price vector, via the
/// left bisection point. Length-1 cohorts pin to 0.
pub fn price_percentile(sorted_prices: &[f64], value: f64) -> f64 {
    if sorted_prices.len() <= 1 {
        return 0.0;
    }
    let pos = sorted_prices.partition_point(|p| *p < value);
    (pos as f64 / (sorted_prices.len() - 1) as f64).clamp(0.0, 1.0)
}

/// Median of an already-sorted vector; even lengths average the middle pair.
fn median(sorted: &[f64]) -> Option<f64> {
    match sorted.len() {
        0 => None,
        n if n % 2 == 1 => Some(sorted[n / 2]),
        n => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

fn sanitize_unit(value: f64, label: &str) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        tracing::warn!(component = label, "non-finite score clamped to zero");
        0.0
    }
}

pub struct RankedCohort {
    pub comparables: Vec<Comparable>,
    pub cohort_median_price: Option<f64>,
    /// Set when the quality floor had to be relaxed.
    pub warning: Option<String>,
}

/// Score and order the cohort. Candidates arrive in retrieval order, which
/// also breaks final-score ties.
pub fn rank_cohort(
    target: &VehiclePayload,
    candidates: &[VehiclePayload],
    engine: &SimilarityEngine,
    tolerances: &Tolerances,
    weights: &RankWeights,
) -> RankedCohort {
    let target_profile = build_text_profile(&target.description);

    // Per-request memo: the profile of a listing is needed for scoring and
    // explanations alike, and building it is the hottest CPU path.
    let mut profiles: HashMap<String, TextProfile> = HashMap::new();
    for candidate in candidates {
        profiles
            .entry(candidate.id.clone())
            .or_insert_with(|| build_text_profile(&candidate.description));
    }

    let mut price_values: Vec<f64> = candidates.iter().filter_map(|c| c.price_eur).collect();
    price_values.sort_by(|a, b| a.partial_cmp(b).expect("finite cohort prices"));
    let cohort_median_price = median(&price_values);

    let mut scored: Vec<Comparable> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let profile = &profiles[&candidate.id];
        let (similarity_score, similarity_details) =
            engine.score(target, candidate, &target_profile, profile, tolerances);

        let percentile = match candidate.price_eur {
            Some(price) if !price_values.is_empty() => {
                Some(price_percentile(&price_values, price))
            }
            _ => None,
        };
        let (deal_score, mut deal_details) = compute_deal_score(
            candidate.price_eur,
            percentile,
            cohort_median_price,
            target.price_eur,
            target.mileage_km,
            candidate.mileage_km,
        );
        deal_details.comparable_count = price_values.len();

        let savings = match (target.price_eur, candidate.price_eur) {
            (Some(t), Some(c)) => t - c,
            _ => 0.0,
        };
        let savings_percent = target
            .price_eur
            .filter(|p| *p > 0.0)
            .map(|p| savings / p * 100.0);

        let freshness = freshness_score(candidate.freshness_days);
        let trust = trust_score(candidate);

        let similarity_score = sanitize_unit(similarity_score, "match");
        let deal_score = sanitize_unit(deal_score, "deal");
        let final_score = sanitize_unit(
            weights.match_weight * similarity_score
                + weights.deal_weight * deal_score
                + weights.freshness * freshness.unwrap_or(0.0)
                + weights.trust * trust,
            "final",
        );

        let explanation = build_explanation(
            target,
            candidate,
            &similarity_details,
            &deal_details,
            candidates.len(),
            savings,
        );

        scored.push(Comparable {
            vehicle: candidate.clone(),
            similarity_score,
            deal_score,
            final_score,
            score: final_score,
            price_hat: candidate.price_eur.map(|p| p * 1.03),
            savings,
            savings_percent,
            freshness_score: freshness,
            trust_score: trust,
            ranking_details: RankingDetails {
                match_score: similarity_score,
                similarity_components: SimilarityAxisScores {
                    categorical: similarity_details.categorical.score,
                    numeric: similarity_details.numeric.score,
                    text: similarity_details.textual.score,
                },
                categorical_components: similarity_details.categorical.components.clone(),
                numeric_components: similarity_details.numeric.components.clone(),
                text_components: similarity_details.textual.components.clone(),
                weights: RankingWeightsDetail {
                    match_weights: similarity_details.weights,
                    ranking: *weights,
                },
                deal: deal_details,
            },
            explanation,
        });
    }

    // Stable sort: equal finals keep retrieval (recency) order.
    scored.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Quality floor with a 50% escape hatch against empty responses.
    let total = scored.len();
    let above: Vec<Comparable> = scored
        .iter()
        .filter(|c| c.similarity_score >= MIN_SIMILARITY)
        .cloned()
        .collect();

    if total > 0 && (above.len() as f64) < (total as f64) * 0.5 {
        let below: Vec<Comparable> = scored
            .into_iter()
            .filter(|c| c.similarity_score < MIN_SIMILARITY)
            .collect();
        let keep = below.len().div_euclid(2).max(1);
        let mut comparables = above;
        let above_count = comparables.len();
        comparables.extend(below.into_iter().take(keep));
        let warning = format!(
            "Only {above_count} of {total} candidates met the match quality floor; \
             including top sub-threshold results"
        );
        return RankedCohort {
            comparables,
            cohort_median_price,
            warning: Some(warning),
        };
    }

    RankedCohort {
        comparables: above,
        cohort_median_price,
        warning: None,
    }
}
