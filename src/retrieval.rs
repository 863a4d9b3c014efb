//! # Candidate Retrieval (Progressive Relaxation)
//! Walk a fixed ladder of filter configurations until the cohort holds at
//! least `min_results` candidates. Hard locks (make, model, body, fuel,
//! transmission, exterior colour) apply at every step; soft numeric locks
//! widen per step.
//!
//! Colour and year cannot be normalised portably in SQL, so both are applied
//! in-process after each fetch: colour by canonical equality, year by the
//! step's tolerance. Steps whose effective predicate set duplicates an
//! earlier step (targets missing numerics collapse neighbouring steps) are
//! skipped outright.

use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;

use crate::cache::CohortCache;
use crate::error::{ApiError, ApiResult};
use crate::listing::ListingRow;
use crate::normalize::{clean, comparison_form, extract_year, normalize_colour};
use crate::store::{FilterSpec, ListingStore};

#[derive(Debug, Clone, Copy)]
pub struct RelaxationStep {
    pub name: &'static str,
    pub year_tolerance: i32,
    pub mileage_ratio: f64,
    pub price_min: f64,
    pub price_max: f64,
    pub power_ratio: f64,
}

/// The ladder, strictest first. Step 1 mirrors a same-spec shopper; step 5 is
/// as wide as the cohort is allowed to get.
pub const RELAXATION_LADDER: [RelaxationStep; 5] = [
    RelaxationStep {
        name: "strict",
        year_tolerance: 2,
        mileage_ratio: 0.50,
        price_min: 0.60,
        price_max: 1.40,
        power_ratio: 0.15,
    },
    RelaxationStep {
        name: "relaxed_year",
        year_tolerance: 3,
        mileage_ratio: 0.50,
        price_min: 0.60,
        price_max: 1.40,
        power_ratio: 0.15,
    },
    RelaxationStep {
        name: "relaxed_mileage",
        year_tolerance: 3,
        mileage_ratio: 0.75,
        price_min: 0.60,
        price_max: 1.40,
        power_ratio: 0.15,
    },
    RelaxationStep {
        name: "relaxed_price",
        year_tolerance: 3,
        mileage_ratio: 0.75,
        price_min: 0.50,
        price_max: 1.50,
        power_ratio: 0.15,
    },
    RelaxationStep {
        name: "relaxed_power",
        year_tolerance: 3,
        mileage_ratio: 0.75,
        price_min: 0.50,
        price_max: 1.50,
        power_ratio: 0.25,
    },
];

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub candidate_limit: i64,
    pub min_results: usize,
}

/// A cohort member, annotated with the ladder step that admitted it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub row: ListingRow,
    pub matched_step: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HardLockFlags {
    pub make: bool,
    pub model: bool,
    pub body_type: bool,
    pub fuel_type: bool,
    pub transmission: bool,
    pub exterior_color: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SoftLockRanges {
    pub year: Option<String>,
    pub mileage: Option<String>,
    pub price: Option<String>,
    pub power: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FiltersApplied {
    pub hard_locks: HardLockFlags,
    pub soft_locks: SoftLockRanges,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptLog {
    pub name: &'static str,
    pub row_count: usize,
    pub query_time_s: f64,
    pub filters_applied: FiltersApplied,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalDebug {
    pub selected_attempt: Option<&'static str>,
    pub attempts: Vec<AttemptLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct RetrievalOutcome {
    pub candidates: Vec<Candidate>,
    pub debug: RetrievalDebug,
}

/// Target attributes the ladder needs, extracted once.
struct TargetFacts {
    id: String,
    make_raw: String,
    model_raw: String,
    make_norm: String,
    model_norm: String,
    body_cmp: Option<String>,
    fuel_cmp: Option<String>,
    transmission_cmp: Option<String>,
    colour: Option<String>,
    price: Option<f64>,
    mileage: Option<f64>,
    power: Option<f64>,
}

impl TargetFacts {
    fn from_row(target: &ListingRow) -> ApiResult<Self> {
        let make_raw = clean(target.make.as_deref())
            .ok_or_else(|| ApiError::bad_request("Target vehicle missing make or model"))?
            .to_string();
        let model_raw = clean(target.model.as_deref())
            .ok_or_else(|| ApiError::bad_request("Target vehicle missing make or model"))?
            .to_string();

        let positive = |v: Option<f64>| v.filter(|x| *x > 0.0);

        Ok(Self {
            id: target.vehicle_id.clone(),
            make_norm: comparison_form(&make_raw),
            model_norm: comparison_form(&model_raw),
            make_raw,
            model_raw,
            body_cmp: clean(target.body_type.as_deref()).map(comparison_form),
            fuel_cmp: clean(target.fuel_type.as_deref()).map(comparison_form),
            transmission_cmp: clean(target.transmission.as_deref()).map(comparison_form),
            colour: normalize_colour(target.color.as_deref()),
            price: positive(target.price_value()),
            mileage: positive(target.mileage_value()),
            power: positive(target.power_value()),
        })
    }
}

fn build_spec(step: &RelaxationStep, facts: &TargetFacts) -> FilterSpec {
    FilterSpec {
        exclude_id: facts.id.clone(),
        make: facts.make_raw.clone(),
        model: facts.model_raw.clone(),
        body_type: facts.body_cmp.clone(),
        fuel_type: facts.fuel_cmp.clone(),
        transmission: facts.transmission_cmp.clone(),
        require_colour: facts.colour.is_some(),
        mileage_between: facts
            .mileage
            .map(|m| (m * (1.0 - step.mileage_ratio), m * (1.0 + step.mileage_ratio))),
        price_between: facts.price.map(|p| (p * step.price_min, p * step.price_max)),
        power_between: facts
            .power
            .map(|p| (p * (1.0 - step.power_ratio), p * (1.0 + step.power_ratio))),
    }
}

fn filters_applied(
    step: &RelaxationStep,
    facts: &TargetFacts,
    target_year: Option<i32>,
) -> FiltersApplied {
    FiltersApplied {
        hard_locks: HardLockFlags {
            make: true,
            model: true,
            body_type: facts.body_cmp.is_some(),
            fuel_type: facts.fuel_cmp.is_some(),
            transmission: facts.transmission_cmp.is_some(),
            exterior_color: facts.colour.is_some(),
        },
        soft_locks: SoftLockRanges {
            year: target_year.map(|_| format!("±{}", step.year_tolerance)),
            mileage: facts
                .mileage
                .map(|_| format!("±{}%", (step.mileage_ratio * 100.0).round() as i32)),
            price: facts.price.map(|_| {
                format!(
                    "{}-{}%",
                    (step.price_min * 100.0).round() as i32,
                    (step.price_max * 100.0).round() as i32
                )
            }),
            power: facts
                .power
                .map(|_| format!("±{}%", (step.power_ratio * 100.0).round() as i32)),
        },
    }
}

/// Run the ladder against the store. Returns the first step that reaches
/// `min_results`; otherwise the best-populated step with a warning; an empty
/// cohort comes back with `debug.error` set for the 404 payload.
pub async fn retrieve(
    store: &dyn ListingStore,
    cache: &CohortCache,
    target: &ListingRow,
    target_year: Option<i32>,
    options: &RetrievalOptions,
) -> ApiResult<RetrievalOutcome> {
    let facts = TargetFacts::from_row(target)?;

    let mut executed: HashSet<String> = HashSet::new();
    let mut attempts: Vec<AttemptLog> = Vec::new();
    let mut best: Option<(Vec<Candidate>, &'static str)> = None;

    for step in &RELAXATION_LADDER {
        let spec = build_spec(step, &facts);
        let spec_fp = spec.fingerprint();

        // The year tolerance is enforced in-process but is still part of the
        // step's effective predicate set.
        let attempt_fp = match target_year {
            Some(_) => format!("{spec_fp}|year=±{}", step.year_tolerance),
            None => format!("{spec_fp}|year=-"),
        };
        if !executed.insert(attempt_fp) {
            tracing::debug!(step = step.name, "skipping duplicate relaxation step");
            continue;
        }

        let key = CohortCache::key(
            &facts.make_norm,
            &facts.model_norm,
            options.candidate_limit,
            &spec_fp,
        );
        let started = Instant::now();
        let rows = match cache.get(&key) {
            Some(rows) => rows,
            None => {
                let rows = store.fetch_candidates(&spec, options.candidate_limit).await?;
                cache.put(key, &rows);
                rows
            }
        };
        let fetched = rows.len();

        let kept: Vec<Candidate> = rows
            .into_iter()
            .filter(|row| {
                if let Some(target_colour) = &facts.colour {
                    if normalize_colour(row.color.as_deref()).as_deref()
                        != Some(target_colour.as_str())
                    {
                        return false;
                    }
                }
                if let Some(year) = target_year {
                    match extract_year(row.first_registration_raw.as_deref()) {
                        Some(candidate_year) => {
                            if (candidate_year - year).abs() > step.year_tolerance {
                                return false;
                            }
                        }
                        None => return false,
                    }
                }
                true
            })
            .map(|row| Candidate {
                row,
                matched_step: step.name,
            })
            .collect();

        let query_time_s = started.elapsed().as_secs_f64();
        tracing::debug!(
            step = step.name,
            fetched,
            kept = kept.len(),
            query_time_s,
            "relaxation attempt"
        );
        attempts.push(AttemptLog {
            name: step.name,
            row_count: kept.len(),
            query_time_s: (query_time_s * 1000.0).round() / 1000.0,
            filters_applied: filters_applied(step, &facts, target_year),
        });

        if kept.len() >= options.min_results {
            return Ok(RetrievalOutcome {
                candidates: kept,
                debug: RetrievalDebug {
                    selected_attempt: Some(step.name),
                    attempts,
                    warning: None,
                    error: None,
                },
            });
        }

        let better = best
            .as_ref()
            .map(|(rows, _)| kept.len() > rows.len())
            .unwrap_or(true);
        if better {
            best = Some((kept, step.name));
        }
    }

    match best {
        Some((candidates, name)) if !candidates.is_empty() => {
            let warning = format!(
                "Only found {} results (minimum: {})",
                candidates.len(),
                options.min_results
            );
            Ok(RetrievalOutcome {
                candidates,
                debug: RetrievalDebug {
                    selected_attempt: Some(name),
                    attempts,
                    warning: Some(warning),
                    error: None,
                },
            })
        }
        _ => Ok(RetrievalOutcome {
            candidates: Vec::new(),
            debug: RetrievalDebug {
                selected_attempt: None,
                attempts,
                warning: None,
                error: Some("No candidates found matching filters".to_string()),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryListingStore;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn listing(id: &str, year: i32, price: f64, mileage: f64, colour: &str) -> ListingRow {
        ListingRow {
            vehicle_id: id.to_string(),
            listing_url: Some(format!("https://example.test/{id}")),
            price: Some(format!("{price}")),
            mileage_raw: Some(format!("{mileage}")),
            first_registration_raw: Some(format!("{year}-06-01")),
            make: Some("BMW".into()),
            model: Some("3er".into()),
            fuel_type: Some("Benzin".into()),
            transmission: Some("Automatik".into()),
            body_type: Some("Limousine".into()),
            color: Some(colour.to_string()),
            interior_color: None,
            upholstery_color: None,
            description: Some("Sitzheizung".into()),
            data_source: Some("autoscout24".into()),
            images: None,
            created_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            updated_at: None,
            price_num: Some(price),
            mileage_num: Some(mileage),
            power_num: Some(120.0),
        }
    }

    fn target() -> ListingRow {
        listing("target", 2021, 25000.0, 45000.0, "Schwarz")
    }

    fn options(min_results: usize) -> RetrievalOptions {
        RetrievalOptions {
            candidate_limit: 400,
            min_results,
        }
    }

    fn cache() -> CohortCache {
        CohortCache::new(Duration::ZERO)
    }

    #[tokio::test]
    async fn strict_step_satisfies_when_cohort_is_large_enough() {
        let rows: Vec<ListingRow> = (0..5)
            .map(|i| listing(&format!("c{i}"), 2021, 24000.0, 44000.0, "Schwarz"))
            .collect();
        let store = MemoryListingStore::new(rows);

        let outcome = retrieve(&store, &cache(), &target(), Some(2021), &options(5))
            .await
            .unwrap();
        assert_eq!(outcome.debug.selected_attempt, Some("strict"));
        assert_eq!(outcome.debug.attempts.len(), 1);
        assert_eq!(outcome.candidates.len(), 5);
        assert!(outcome
            .candidates
            .iter()
            .all(|c| c.matched_step == "strict"));
    }

    #[tokio::test]
    async fn year_relaxation_admits_wider_registrations() {
        // One in-tolerance candidate plus four that only fit at ±3 years.
        let mut rows = vec![listing("near", 2021, 24000.0, 44000.0, "Schwarz")];
        for i in 0..4 {
            rows.push(listing(&format!("far{i}"), 2024, 24000.0, 44000.0, "Schwarz"));
        }
        let store = MemoryListingStore::new(rows);

        let outcome = retrieve(&store, &cache(), &target(), Some(2021), &options(5))
            .await
            .unwrap();
        assert_eq!(outcome.debug.selected_attempt, Some("relaxed_year"));
        assert_eq!(outcome.debug.attempts.len(), 2);
        assert_eq!(outcome.candidates.len(), 5);
    }

    #[tokio::test]
    async fn colour_is_a_hard_lock_at_every_step() {
        let rows = vec![
            listing("black", 2021, 24000.0, 44000.0, "Schwarz Metallic"),
            listing("white", 2021, 24000.0, 44000.0, "Alpinweiss"),
        ];
        let store = MemoryListingStore::new(rows);

        let outcome = retrieve(&store, &cache(), &target(), Some(2021), &options(1))
            .await
            .unwrap();
        assert!(outcome
            .candidates
            .iter()
            .all(|c| c.row.vehicle_id == "black"));
    }

    #[tokio::test]
    async fn best_attempt_returned_with_warning_when_ladder_exhausted() {
        let rows = vec![
            listing("a", 2021, 24000.0, 44000.0, "Schwarz"),
            listing("b", 2022, 26000.0, 52000.0, "Schwarz"),
        ];
        let store = MemoryListingStore::new(rows);

        let outcome = retrieve(&store, &cache(), &target(), Some(2021), &options(10))
            .await
            .unwrap();
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.debug.attempts.len(), 5);
        assert!(outcome.debug.warning.as_deref().unwrap().contains("minimum: 10"));
    }

    #[tokio::test]
    async fn empty_cohort_reports_error_with_attempt_counts() {
        let store = MemoryListingStore::new(vec![listing("w", 2021, 24000.0, 44000.0, "Weiss")]);
        let outcome = retrieve(&store, &cache(), &target(), Some(2021), &options(5))
            .await
            .unwrap();
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.debug.selected_attempt, None);
        assert!(outcome.debug.error.is_some());
        assert_eq!(outcome.debug.attempts.len(), 5);
        assert!(outcome.debug.attempts.iter().all(|a| a.row_count == 0));
    }

    #[tokio::test]
    async fn duplicate_steps_collapse_for_sparse_targets() {
        // No mileage, power, or year on the target: the ladder degenerates to
        // the two distinct price envelopes.
        let mut sparse = target();
        sparse.mileage_raw = None;
        sparse.mileage_num = None;
        sparse.power_num = None;
        sparse.first_registration_raw = None;

        let store = MemoryListingStore::new(vec![listing("c", 2021, 24000.0, 44000.0, "Schwarz")]);
        let outcome = retrieve(&store, &cache(), &sparse, None, &options(5))
            .await
            .unwrap();
        let names: Vec<&str> = outcome.debug.attempts.iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["strict", "relaxed_price"]);
    }

    #[tokio::test]
    async fn missing_make_is_a_bad_request() {
        let mut bad = target();
        bad.make = None;
        let store = MemoryListingStore::new(Vec::new());
        let err = retrieve(&store, &cache(), &bad, None, &options(5))
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn soft_lock_ranges_are_reported_per_attempt() {
        let store = MemoryListingStore::new(vec![listing("c", 2021, 24000.0, 44000.0, "Schwarz")]);
        let outcome = retrieve(&store, &cache(), &target(), Some(2021), &options(5))
            .await
            .unwrap();
        let strict = &outcome.debug.attempts[0];
        assert_eq!(strict.filters_applied.soft_locks.year.as_deref(), Some("±2"));
        assert_eq!(
            strict.filters_applied.soft_locks.mileage.as_deref(),
            Some("±50%")
        );
        assert_eq!(
            strict.filters_applied.soft_locks.price.as_deref(),
            Some("60-140%")
        );
        assert_eq!(
            strict.filters_applied.soft_locks.power.as_deref(),
            Some("±15%")
        );
        assert!(strict.filters_applied.hard_locks.exterior_color);
    }
}
