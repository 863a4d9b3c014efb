//! # HTTP API Layer
//! Routes, shared state, and the comparables orchestration:
//! fetch target -> normalise -> progressive retrieval -> score -> rank ->
//! respond with explanations and request metadata.
//!
//! ## Endpoints
//! - `GET /health` — liveness + store connectivity
//! - `GET /stats` — basic store statistics
//! - `GET /top-vehicles` — most-listed (make, model) pairs
//! - `GET /listings/{id}` — normalised listing payload
//! - `GET /listings/{id}/comparables` — ranked comparables with explanations

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::cache::CohortCache;
use crate::config::AppConfig;
use crate::error::{ApiError, ApiResult};
use crate::listing::{ListingRow, VehiclePayload};
use crate::normalize::is_canonical_colour;
use crate::ranking::{rank_cohort, Comparable, RankWeights};
use crate::retrieval::{retrieve, FiltersApplied, RetrievalOptions};
use crate::similarity::{SimilarityEngine, Tolerances};
use crate::store::ListingStore;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn ListingStore>,
    cache: Arc<CohortCache>,
    config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn ListingStore>, config: AppConfig) -> Self {
        let cache = Arc::new(CohortCache::new(config.cohort_cache_ttl));
        Self {
            store,
            cache,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/top-vehicles", get(top_vehicles))
        .route("/listings/{vehicle_id}", get(get_listing))
        .route("/listings/{vehicle_id}/comparables", get(comparables))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct Metadata {
    pub requested_top: i64,
    pub returned: usize,
    pub total_candidates: usize,
    pub raw_candidates: usize,
    pub selected_attempt: Option<&'static str>,
    pub filters_applied: Option<FiltersApplied>,
    pub relaxation_attempts: usize,
    pub processing_time_s: f64,
    pub weights: RankWeights,
    pub cohort_median_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ComparablesResponse {
    pub vehicle: VehiclePayload,
    pub comparables: Vec<Comparable>,
    pub metadata: Metadata,
}

async fn health(State(state): State<AppState>) -> Response {
    match state.store.available_count().await {
        Ok(count) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database_connected": true,
                "vehicle_count": count,
                "timestamp": Utc::now().to_rfc3339(),
            })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database_connected": false,
                    "error": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.store.stats().await?;
    Ok(Json(json!({
        "total_vehicles": stats.total_vehicles,
        "unique_makes": stats.unique_makes,
        "data_sources": stats.data_sources,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

async fn top_vehicles(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = parse_int_param(&params, "limit", 10).clamp(1, 50);
    let rows = state.store.top_vehicles(limit).await?;
    let vehicles: Vec<serde_json::Value> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            json!({
                "rank": i + 1,
                "make": row.make,
                "model": row.model,
                "count": row.count,
                "sample_url": row.sample_url,
            })
        })
        .collect();
    Ok(Json(json!({
        "vehicles": vehicles,
        "total_returned": vehicles.len(),
    })))
}

async fn get_listing(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
) -> ApiResult<Json<VehiclePayload>> {
    let row = fetch_target(&*state.store, &vehicle_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Vehicle {vehicle_id} not found")))?;
    Ok(Json(VehiclePayload::from_row(&row, Utc::now())))
}

async fn comparables(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<ComparablesResponse>> {
    let started = Instant::now();

    let top = parse_top(params.get("top"))?;
    let tolerances = Tolerances {
        year_tolerance_years: parse_int_param(&params, "year_variance", 2).max(0) as f64,
        mileage_ratio: parse_float_param(&params, "mileage_variance_multiplier", 2.0),
        mileage_min_window: parse_float_param(&params, "mileage_min_window", 5000.0),
        power_ratio: parse_float_param(&params, "power_variance_pct", 0.15),
        power_min_window: parse_float_param(&params, "power_min_window", 15.0),
    };
    let candidate_limit =
        parse_int_param(&params, "max_candidates", state.config.candidate_limit).max(50);
    let balance = parse_float_param(&params, "balance", 0.0).clamp(-1.0, 1.0);
    let weights = RankWeights::from_balance(balance);

    let target_row = fetch_target(&*state.store, &vehicle_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Vehicle {vehicle_id} not found")))?;

    let now = Utc::now();
    let target = VehiclePayload::from_row(&target_row, now);

    let options = RetrievalOptions {
        candidate_limit,
        min_results: (top as usize).max(5),
    };
    let outcome = retrieve(
        &*state.store,
        &state.cache,
        &target_row,
        target.year,
        &options,
    )
    .await?;

    if outcome.candidates.is_empty() {
        let debug = serde_json::to_value(&outcome.debug).unwrap_or(serde_json::Value::Null);
        return Err(ApiError::not_found("No comparable vehicles found").with_debug(debug));
    }

    let candidate_payloads: Vec<VehiclePayload> = outcome
        .candidates
        .iter()
        .map(|candidate| VehiclePayload::from_row(&candidate.row, now))
        .collect();

    let engine = SimilarityEngine::default();
    let ranked = rank_cohort(&target, &candidate_payloads, &engine, &tolerances, &weights);

    let mut warnings: Vec<String> = Vec::new();
    if let Some(colour) = &target.color_canonical {
        if !is_canonical_colour(colour) {
            warnings.push(format!(
                "Target colour '{colour}' is outside the canonical vocabulary; \
                 colour matching is literal"
            ));
        }
    }
    warnings.extend(outcome.debug.warning.iter().cloned());
    warnings.extend(ranked.warning.iter().cloned());
    let warning = if warnings.is_empty() {
        None
    } else {
        Some(warnings.join("; "))
    };

    let selected_attempt = outcome.debug.selected_attempt;
    let filters_applied = outcome
        .debug
        .attempts
        .iter()
        .find(|attempt| Some(attempt.name) == selected_attempt)
        .map(|attempt| attempt.filters_applied.clone());

    let total_candidates = ranked.comparables.len();
    let comparables: Vec<Comparable> = ranked
        .comparables
        .into_iter()
        .take(top as usize)
        .collect();

    let metadata = Metadata {
        requested_top: top,
        returned: comparables.len(),
        total_candidates,
        raw_candidates: outcome.candidates.len(),
        selected_attempt,
        filters_applied,
        relaxation_attempts: outcome.debug.attempts.len(),
        processing_time_s: round3(started.elapsed().as_secs_f64()),
        weights,
        cohort_median_price: ranked.cohort_median_price,
        warning,
    };

    tracing::info!(
        target_id = %vehicle_id,
        returned = metadata.returned,
        raw = metadata.raw_candidates,
        attempt = metadata.selected_attempt.unwrap_or("-"),
        elapsed_s = metadata.processing_time_s,
        "comparables request served"
    );

    Ok(Json(ComparablesResponse {
        vehicle: target,
        comparables,
        metadata,
    }))
}

/// Target reads are idempotent: retry a transient store failure once before
/// surfacing the 503.
async fn fetch_target(store: &dyn ListingStore, id: &str) -> ApiResult<Option<ListingRow>> {
    match store.fetch(id).await {
        Err(err) if err.is_transient() => {
            tracing::warn!(error = %err, "target fetch failed; retrying once");
            tokio::time::sleep(Duration::from_millis(200)).await;
            store.fetch(id).await
        }
        other => other,
    }
}

/// `top` is the one strict knob: junk or < 1 is a client error, anything
/// above 50 clamps to 50.
fn parse_top(raw: Option<&String>) -> ApiResult<i64> {
    let top = match raw {
        None => 10,
        Some(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| ApiError::bad_request("Invalid 'top' parameter"))?,
    };
    if top < 1 {
        return Err(ApiError::bad_request("Invalid 'top' parameter: must be >= 1"));
    }
    Ok(top.min(50))
}

fn parse_int_param(params: &HashMap<String, String>, name: &str, default: i64) -> i64 {
    params
        .get(name)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_float_param(params: &HashMap<String, String>, name: &str, default: f64) -> f64 {
    params
        .get(name)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
