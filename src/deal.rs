//! # Deal Scorer
//! Places a candidate's price against its market cohort. Two components,
//! each squashed through a sigmoid so a 10% discount reads much stronger
//! than a 1% one:
//!
//! - comparable: discount against the cohort median (falling back to the
//!   inverse price percentile), adjusted for the mileage gap to the target;
//! - hedonic: discount against the target's own asking price.
//!
//! Pure function; a candidate without a price is neutral (0.5).

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DealComponents {
    pub comparable: f64,
    pub hedonic: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DealDetails {
    pub price_percentile: Option<f64>,
    pub median_price: Option<f64>,
    pub mileage_ratio: Option<f64>,
    pub discount_pct: Option<f64>,
    /// Number of priced cohort members; filled in by the ranker.
    pub comparable_count: usize,
    pub components: DealComponents,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Score one candidate against the cohort statistics. All inputs in euros /
/// kilometres; `percentile` in [0,1] over the cohort's sorted prices.
pub fn compute_deal_score(
    price: Option<f64>,
    percentile: Option<f64>,
    median_price: Option<f64>,
    target_price: Option<f64>,
    target_mileage: Option<f64>,
    candidate_mileage: Option<f64>,
) -> (f64, DealDetails) {
    let Some(price) = price else {
        return (
            0.5,
            DealDetails {
                price_percentile: percentile,
                median_price,
                mileage_ratio: None,
                discount_pct: None,
                comparable_count: 0,
                components: DealComponents {
                    comparable: 0.5,
                    hedonic: 0.5,
                },
            },
        );
    };

    // Comparable component: cohort-median discount when a median exists,
    // inverse percentile otherwise, neutral without either.
    let mut comps_discount = None;
    let mut comps = match percentile {
        Some(p) => (1.0 - p).clamp(0.0, 1.0),
        None => 0.5,
    };
    if let Some(median) = median_price.filter(|m| *m > 0.0) {
        let discount = (median - price) / median;
        comps_discount = Some(discount);
        comps = sigmoid(6.0 * discount);
    }

    // Mileage adjustment: penalise higher mileage, softly reward lower.
    let mut mileage_ratio = None;
    if let (Some(target_km), Some(candidate_km)) = (
        target_mileage.filter(|m| *m != 0.0),
        candidate_mileage.filter(|m| *m != 0.0),
    ) {
        let ratio = (candidate_km - target_km) / target_km.max(1.0);
        mileage_ratio = Some(ratio);
        if ratio > 0.0 {
            comps -= (ratio / 1.5).min(1.0) * 0.25;
        } else {
            comps += (ratio.abs() / 1.5).min(1.0) * 0.15;
        }
    }

    // Hedonic component anchored on the target's own price.
    let hedonic = match target_price.filter(|p| *p > 0.0) {
        Some(anchor) => sigmoid(6.0 * (anchor - price) / anchor),
        None => comps,
    };

    let deal = (0.5 * comps + 0.5 * hedonic).clamp(0.0, 1.0);
    (
        deal,
        DealDetails {
            price_percentile: percentile,
            median_price,
            mileage_ratio,
            discount_pct: comps_discount.map(|d| d * 100.0),
            comparable_count: 0,
            components: DealComponents {
                comparable: comps,
                hedonic,
            },
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_price_is_neutral() {
        let (deal, details) = compute_deal_score(None, Some(0.2), Some(24000.0), Some(25000.0), None, None);
        assert_eq!(deal, 0.5);
        assert_eq!(details.components.comparable, 0.5);
        assert_eq!(details.components.hedonic, 0.5);
        assert_eq!(details.discount_pct, None);
    }

    #[test]
    fn below_median_price_scores_above_half() {
        let (deal, details) = compute_deal_score(
            Some(22500.0),
            Some(0.0),
            Some(25000.0),
            Some(25000.0),
            Some(45000.0),
            Some(45000.0),
        );
        // 10% under both median and target: both components > 0.5.
        assert!(details.components.comparable > 0.6);
        assert!(details.components.hedonic > 0.6);
        assert!(deal > 0.6);
        assert!((details.discount_pct.unwrap() - 10.0).abs() < 1e-9);
        // Equal mileage means no adjustment.
        assert_eq!(details.mileage_ratio, Some(0.0));
    }

    #[test]
    fn higher_mileage_is_penalised_lower_rewarded() {
        let base = compute_deal_score(
            Some(23500.0),
            Some(0.0),
            Some(25000.0),
            Some(25000.0),
            Some(45000.0),
            Some(45000.0),
        );
        let worse = compute_deal_score(
            Some(23500.0),
            Some(0.0),
            Some(25000.0),
            Some(25000.0),
            Some(45000.0),
            Some(60000.0),
        );
        let better = compute_deal_score(
            Some(23500.0),
            Some(0.0),
            Some(25000.0),
            Some(25000.0),
            Some(45000.0),
            Some(43000.0),
        );
        assert!(worse.0 < base.0, "higher mileage must lower the deal");
        assert!(better.0 > base.0, "lower mileage must raise the deal");
        assert!(worse.1.mileage_ratio.unwrap() > 0.0);
        assert!(better.1.mileage_ratio.unwrap() < 0.0);
    }

    #[test]
    fn percentile_fallback_without_median() {
        let (_, details) = compute_deal_score(
            Some(20000.0),
            Some(0.25),
            None,
            None,
            None,
            None,
        );
        // No median and no target anchor: hedonic mirrors the comparable.
        assert!((details.components.comparable - 0.75).abs() < 1e-9);
        assert_eq!(details.components.comparable, details.components.hedonic);
        assert_eq!(details.discount_pct, None);
    }

    #[test]
    fn deal_stays_in_unit_interval() {
        // Extreme discount with extreme mileage reward cannot escape [0,1].
        let (deal, _) = compute_deal_score(
            Some(1000.0),
            Some(0.0),
            Some(50000.0),
            Some(50000.0),
            Some(100000.0),
            Some(1000.0),
        );
        assert!((0.0..=1.0).contains(&deal));

        let (deal, _) = compute_deal_score(
            Some(100000.0),
            Some(1.0),
            Some(20000.0),
            Some(20000.0),
            Some(10000.0),
            Some(300000.0),
        );
        assert!((0.0..=1.0).contains(&deal));
    }
}
