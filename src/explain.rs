//! # Explanation Bundle
//! Machine-readable justification attached to every comparable: hard-lock
//! statuses with both sides' values, signed numeric deltas, the top shared
//! option labels and tokens, the deal view against the cohort, and
//! freshness. Surfaced fields stay small (top-5 lists, rounded numbers);
//! the full component breakdown lives in `ranking_details`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::deal::{DealComponents, DealDetails};
use crate::listing::VehiclePayload;
use crate::similarity::{CatComponent, SimilarityDetails};

#[derive(Debug, Clone, Serialize)]
pub struct HardMatch {
    pub status: &'static str,
    pub target: Option<String>,
    pub candidate: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Proximities {
    pub age_months_delta: Option<f64>,
    pub mileage_delta: Option<f64>,
    pub power_delta_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DealView {
    pub discount_pct: Option<f64>,
    pub price_percentile: Option<f64>,
    pub median_price: Option<f64>,
    pub comparable_count: usize,
    pub savings_eur: Option<f64>,
    pub components: DealComponents,
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    /// Keyed by display label; only make/model and body are surfaced by
    /// default, the remaining hard locks stay in the debug bundle.
    pub hard_matches: BTreeMap<String, HardMatch>,
    pub text_hits: Vec<String>,
    pub shared_tokens: Vec<String>,
    pub proximities: Proximities,
    pub deal_view: DealView,
    pub freshness_days: Option<f64>,
    pub target_price_eur: Option<f64>,
    pub candidate_price_eur: Option<f64>,
}

fn status_for(score: f64) -> &'static str {
    if score >= 0.99 {
        "match"
    } else if score <= 0.01 {
        "mismatch"
    } else {
        "partial"
    }
}

fn hard_match(component: &CatComponent) -> HardMatch {
    let status = if component.target.is_none() || component.candidate.is_none() {
        "unknown"
    } else {
        status_for(component.score)
    };
    HardMatch {
        status,
        target: component.target.clone(),
        candidate: component.candidate.clone(),
        score: component.score,
    }
}

fn rounded(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

pub fn build_explanation(
    target: &VehiclePayload,
    candidate: &VehiclePayload,
    similarity: &SimilarityDetails,
    deal: &DealDetails,
    cohort_size: usize,
    savings: f64,
) -> Explanation {
    let categorical = &similarity.categorical.components;
    let numeric = &similarity.numeric.components;
    let textual = &similarity.textual.components;

    let mut hard_matches = BTreeMap::new();
    hard_matches.insert(
        "Make & Model".to_string(),
        hard_match(&categorical.make_model),
    );
    hard_matches.insert("Body Type".to_string(), hard_match(&categorical.body));

    let proximities = Proximities {
        age_months_delta: numeric.age.signed_diff.map(|v| rounded(v, 2)),
        mileage_delta: numeric.mileage.signed_diff.map(|v| rounded(v, 2)),
        power_delta_pct: numeric.power.percent_diff.map(|v| rounded(v, 2)),
    };

    let deal_view = DealView {
        discount_pct: deal.discount_pct.map(|v| rounded(v, 2)),
        price_percentile: deal.price_percentile,
        median_price: deal.median_price,
        comparable_count: if deal.comparable_count > 0 {
            deal.comparable_count
        } else {
            cohort_size
        },
        savings_eur: Some(rounded(savings, 0)),
        components: deal.components.clone(),
    };

    Explanation {
        hard_matches,
        text_hits: textual.feature_hits.iter().take(5).cloned().collect(),
        shared_tokens: textual.shared_tokens.iter().take(5).cloned().collect(),
        proximities,
        deal_view,
        freshness_days: candidate.freshness_days.map(|v| rounded(v, 1)),
        target_price_eur: target.price_eur,
        candidate_price_eur: candidate.price_eur,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_score_bands() {
        assert_eq!(status_for(1.0), "match");
        assert_eq!(status_for(0.995), "match");
        assert_eq!(status_for(0.0), "mismatch");
        assert_eq!(status_for(0.5), "partial");
    }

    #[test]
    fn missing_side_reads_unknown() {
        let component = CatComponent {
            score: 0.5,
            weight: 0.2,
            locked: true,
            target: Some("sedan".into()),
            candidate: None,
        };
        assert_eq!(hard_match(&component).status, "unknown");
    }

    #[test]
    fn rounding_is_stable() {
        assert_eq!(rounded(10.456, 2), 10.46);
        assert_eq!(rounded(1499.6, 0), 1500.0);
        assert_eq!(rounded(-3.333, 2), -3.33);
    }
}
