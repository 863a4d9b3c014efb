//! # Listing Store Adapter
//! Read-only access to the listings table.
//!
//! The `price` / `mileage_km` / `power_kw` columns may hold free-form text,
//! so every SELECT carries SQL coercions (`price_num`, `mileage_num`,
//! `power_num`) that strip non-digits and cast. The same expressions are
//! reused inside soft-lock range predicates.
//!
//! `ListingStore` is the seam between the engine and PostgreSQL; the
//! in-memory adapter backs router-level tests and local experiments without
//! a database.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::config::DbConfig;
use crate::error::ApiResult;
use crate::listing::ListingRow;

const TABLE: &str = "vehicle_marketplace.vehicle_data";

/// Numeric coercion of the free-form price column.
const NUMERIC_PRICE_SQL: &str =
    "CAST(NULLIF(REGEXP_REPLACE(price, '[^0-9]', '', 'g'), '') AS DOUBLE PRECISION)";

/// Mileage may be numeric or text; coerce through TEXT either way.
const NUMERIC_MILEAGE_SQL: &str = "CAST(NULLIF(REGEXP_REPLACE(COALESCE(CAST(mileage_km AS TEXT), ''), '[^0-9]', '', 'g'), '') AS DOUBLE PRECISION)";

/// Power is numeric in some sources and text in others; extract the first
/// numeric run (decimal point included) and cast.
const NUMERIC_POWER_SQL: &str =
    "CAST(NULLIF(SUBSTRING(CAST(power_kw AS TEXT) FROM '[0-9]+\\.?[0-9]*'), '') AS DOUBLE PRECISION)";

static SELECT_BASE_FIELDS: Lazy<String> = Lazy::new(|| {
    format!(
        "vehicle_id, \
         listing_url, \
         CAST(price AS TEXT) AS price, \
         CAST(mileage_km AS TEXT) AS mileage_raw, \
         first_registration_raw, \
         make, \
         model, \
         fuel_type, \
         transmission, \
         body_type, \
         color, \
         interior_color, \
         upholstery_color, \
         description, \
         data_source, \
         CAST(images AS TEXT) AS images, \
         created_at, \
         updated_at, \
         {NUMERIC_PRICE_SQL} AS price_num, \
         {NUMERIC_MILEAGE_SQL} AS mileage_num, \
         {NUMERIC_POWER_SQL} AS power_num"
    )
});

/// Composed WHERE clause for one candidate fetch. Hard locks bind raw
/// make/model verbatim and body/fuel/transmission as lower(trim) equality;
/// colour is reduced to presence in SQL (canonical equality happens
/// in-process). Soft locks are closed numeric ranges over the coerced
/// columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub exclude_id: String,
    pub make: String,
    pub model: String,
    /// Accent-stripped lowercase comparison values.
    pub body_type: Option<String>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub require_colour: bool,
    pub mileage_between: Option<(f64, f64)>,
    pub price_between: Option<(f64, f64)>,
    pub power_between: Option<(f64, f64)>,
}

impl FilterSpec {
    /// Canonical fingerprint of the effective predicate set. Two ladder steps
    /// with the same fingerprint would execute the same query; callers use
    /// this to deduplicate steps and key the cohort cache.
    pub fn fingerprint(&self) -> String {
        let range = |r: &Option<(f64, f64)>| match r {
            Some((lo, hi)) => format!("{lo:.3}..{hi:.3}"),
            None => "-".to_string(),
        };
        format!(
            "make={}|model={}|body={}|fuel={}|trans={}|colour={}|mileage={}|price={}|power={}",
            self.make,
            self.model,
            self.body_type.as_deref().unwrap_or("-"),
            self.fuel_type.as_deref().unwrap_or("-"),
            self.transmission.as_deref().unwrap_or("-"),
            self.require_colour,
            range(&self.mileage_between),
            range(&self.price_between),
            range(&self.power_between),
        )
    }

    /// In-process mirror of the SQL predicates, used by the memory adapter.
    /// Numeric checks run over the row coercion helpers; a row missing a
    /// value inside an active range predicate is excluded, matching SQL
    /// `BETWEEN` semantics on NULL.
    pub fn admits(&self, row: &ListingRow) -> bool {
        if row.vehicle_id == self.exclude_id {
            return false;
        }
        if row.make.as_deref() != Some(self.make.as_str())
            || row.model.as_deref() != Some(self.model.as_str())
        {
            return false;
        }

        let lowered = |v: &Option<String>| v.as_deref().map(|s| s.trim().to_lowercase());
        if let Some(body) = &self.body_type {
            if lowered(&row.body_type).as_deref() != Some(body.as_str()) {
                return false;
            }
        }
        if let Some(fuel) = &self.fuel_type {
            if lowered(&row.fuel_type).as_deref() != Some(fuel.as_str()) {
                return false;
            }
        }
        if let Some(transmission) = &self.transmission {
            if lowered(&row.transmission).as_deref() != Some(transmission.as_str()) {
                return false;
            }
        }
        if self.require_colour && row.color.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return false;
        }

        let in_range = |value: Option<f64>, range: &Option<(f64, f64)>| match range {
            Some((lo, hi)) => value.map(|v| *lo <= v && v <= *hi).unwrap_or(false),
            None => true,
        };
        in_range(row.mileage_value(), &self.mileage_between)
            && in_range(row.price_value(), &self.price_between)
            && in_range(row.power_value(), &self.power_between)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_vehicles: i64,
    pub unique_makes: i64,
    pub data_sources: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopVehicleRow {
    pub make: String,
    pub model: String,
    pub count: i64,
    pub sample_url: String,
}

/// Read-only listing store operations used by the engine and the HTTP layer.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Return a single available listing, or `None` if unknown/unavailable.
    async fn fetch(&self, id: &str) -> ApiResult<Option<ListingRow>>;

    /// Execute the composed WHERE clause; up to `limit` rows, newest first.
    async fn fetch_candidates(&self, spec: &FilterSpec, limit: i64) -> ApiResult<Vec<ListingRow>>;

    /// Count of available listings (health checks).
    async fn available_count(&self) -> ApiResult<i64>;

    async fn stats(&self) -> ApiResult<StoreStats>;

    /// Most-listed (make, model) pairs with a sample URL each.
    async fn top_vehicles(&self, limit: i64) -> ApiResult<Vec<TopVehicleRow>>;
}

/// PostgreSQL-backed store. Connections are pooled; every operation checks a
/// connection out for its own duration only, so cancellation returns it to
/// the pool with the future's drop.
pub struct PgListingStore {
    pool: PgPool,
}

impl PgListingStore {
    /// Build the pool and verify connectivity once.
    pub async fn connect(config: &DbConfig) -> ApiResult<Self> {
        let statement_timeout_ms =
            format!("{}", config.connect_timeout.as_millis().max(1000));
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.dbname)
            .ssl_mode(PgSslMode::Prefer)
            .options([("statement_timeout", statement_timeout_ms.as_str())]);

        tracing::info!(
            host = %config.host,
            dbname = %config.dbname,
            min = config.min_connections,
            max = config.max_connections,
            "initialising listing store pool"
        );

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            // Keep idle connections alive; the marketplace sees long quiet spells.
            .idle_timeout(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListingStore for PgListingStore {
    async fn fetch(&self, id: &str) -> ApiResult<Option<ListingRow>> {
        let sql = format!(
            "SELECT {} FROM {TABLE} WHERE vehicle_id = $1 AND is_vehicle_available = true LIMIT 1",
            &*SELECT_BASE_FIELDS
        );
        let row = sqlx::query_as::<_, ListingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn fetch_candidates(&self, spec: &FilterSpec, limit: i64) -> ApiResult<Vec<ListingRow>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM {TABLE} WHERE is_vehicle_available = true",
            &*SELECT_BASE_FIELDS
        ));
        qb.push(" AND vehicle_id != ");
        qb.push_bind(spec.exclude_id.clone());
        qb.push(" AND make = ");
        qb.push_bind(spec.make.clone());
        qb.push(" AND model = ");
        qb.push_bind(spec.model.clone());

        if let Some(body) = &spec.body_type {
            qb.push(" AND LOWER(TRIM(body_type)) = ");
            qb.push_bind(body.clone());
        }
        if let Some(fuel) = &spec.fuel_type {
            qb.push(" AND LOWER(TRIM(fuel_type)) = ");
            qb.push_bind(fuel.clone());
        }
        if let Some(transmission) = &spec.transmission {
            qb.push(" AND LOWER(TRIM(transmission)) = ");
            qb.push_bind(transmission.clone());
        }
        if spec.require_colour {
            qb.push(" AND color IS NOT NULL AND color != ''");
        }
        if let Some((lo, hi)) = spec.mileage_between {
            qb.push(format!(" AND {NUMERIC_MILEAGE_SQL} BETWEEN "));
            qb.push_bind(lo);
            qb.push(" AND ");
            qb.push_bind(hi);
        }
        if let Some((lo, hi)) = spec.price_between {
            qb.push(format!(" AND {NUMERIC_PRICE_SQL} BETWEEN "));
            qb.push_bind(lo);
            qb.push(" AND ");
            qb.push_bind(hi);
        }
        if let Some((lo, hi)) = spec.power_between {
            qb.push(format!(" AND power_kw IS NOT NULL AND {NUMERIC_POWER_SQL} BETWEEN "));
            qb.push_bind(lo);
            qb.push(" AND ");
            qb.push_bind(hi);
        }

        qb.push(" ORDER BY created_at DESC LIMIT ");
        qb.push_bind(limit);

        let rows = qb
            .build_query_as::<ListingRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn available_count(&self) -> ApiResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {TABLE} WHERE is_vehicle_available = true");
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn stats(&self) -> ApiResult<StoreStats> {
        let sql = format!(
            "SELECT \
                 COUNT(*) FILTER (WHERE is_vehicle_available) AS total_vehicles, \
                 COUNT(DISTINCT make) AS unique_makes, \
                 COUNT(DISTINCT data_source) AS data_sources \
             FROM {TABLE}"
        );
        let (total_vehicles, unique_makes, data_sources): (i64, i64, i64) =
            sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(StoreStats {
            total_vehicles,
            unique_makes,
            data_sources,
        })
    }

    async fn top_vehicles(&self, limit: i64) -> ApiResult<Vec<TopVehicleRow>> {
        let sql = format!(
            "SELECT make::TEXT, model::TEXT, COUNT(*) AS count, MIN(listing_url)::TEXT AS sample_url \
             FROM {TABLE} \
             WHERE make IS NOT NULL AND model IS NOT NULL AND listing_url IS NOT NULL \
               AND is_vehicle_available = true \
             GROUP BY make, model \
             ORDER BY COUNT(*) DESC \
             LIMIT $1"
        );
        let rows: Vec<(String, String, i64, String)> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(make, model, count, sample_url)| TopVehicleRow {
                make,
                model,
                count,
                sample_url,
            })
            .collect())
    }
}

/// In-memory adapter over a fixed set of *available* listings. Backs the
/// router-level tests and offline experiments; predicate semantics mirror
/// the SQL composition via [`FilterSpec::admits`].
#[derive(Debug, Default)]
pub struct MemoryListingStore {
    rows: Vec<ListingRow>,
    fail: bool,
}

impl MemoryListingStore {
    pub fn new(rows: Vec<ListingRow>) -> Self {
        Self { rows, fail: false }
    }

    /// A store whose every operation fails with a transient error, for
    /// exercising the 503 path.
    pub fn failing() -> Self {
        Self {
            rows: Vec::new(),
            fail: true,
        }
    }

    fn check(&self) -> ApiResult<()> {
        if self.fail {
            Err(crate::error::ApiError::transient(
                "listing store unreachable",
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn fetch(&self, id: &str) -> ApiResult<Option<ListingRow>> {
        self.check()?;
        Ok(self.rows.iter().find(|row| row.vehicle_id == id).cloned())
    }

    async fn fetch_candidates(&self, spec: &FilterSpec, limit: i64) -> ApiResult<Vec<ListingRow>> {
        self.check()?;
        let mut rows: Vec<ListingRow> = self
            .rows
            .iter()
            .filter(|row| spec.admits(row))
            .cloned()
            .collect();
        // Newest first; rows without a timestamp sink to the end.
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn available_count(&self) -> ApiResult<i64> {
        self.check()?;
        Ok(self.rows.len() as i64)
    }

    async fn stats(&self) -> ApiResult<StoreStats> {
        self.check()?;
        let makes: std::collections::HashSet<_> =
            self.rows.iter().filter_map(|r| r.make.as_deref()).collect();
        let sources: std::collections::HashSet<_> = self
            .rows
            .iter()
            .filter_map(|r| r.data_source.as_deref())
            .collect();
        Ok(StoreStats {
            total_vehicles: self.rows.len() as i64,
            unique_makes: makes.len() as i64,
            data_sources: sources.len() as i64,
        })
    }

    async fn top_vehicles(&self, limit: i64) -> ApiResult<Vec<TopVehicleRow>> {
        self.check()?;
        let mut groups: std::collections::HashMap<(String, String), (i64, String)> =
            std::collections::HashMap::new();
        for row in &self.rows {
            let (Some(make), Some(model), Some(url)) = (
                row.make.as_deref(),
                row.model.as_deref(),
                row.listing_url.as_deref(),
            ) else {
                continue;
            };
            let entry = groups
                .entry((make.to_string(), model.to_string()))
                .or_insert_with(|| (0, url.to_string()));
            entry.0 += 1;
            if url < entry.1.as_str() {
                entry.1 = url.to_string();
            }
        }
        let mut out: Vec<TopVehicleRow> = groups
            .into_iter()
            .map(|((make, model), (count, sample_url))| TopVehicleRow {
                make,
                model,
                count,
                sample_url,
            })
            .collect();
        out.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.make.cmp(&b.make))
                .then_with(|| a.model.cmp(&b.model))
        });
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(id: &str, make: &str, model: &str) -> ListingRow {
        ListingRow {
            vehicle_id: id.to_string(),
            listing_url: Some(format!("https://example.test/{id}")),
            price: Some("20000".into()),
            mileage_raw: Some("50000".into()),
            first_registration_raw: Some("2021-01-01".into()),
            make: Some(make.to_string()),
            model: Some(model.to_string()),
            fuel_type: Some("Benzin".into()),
            transmission: Some("Automatik".into()),
            body_type: Some("Limousine".into()),
            color: Some("Schwarz".into()),
            interior_color: None,
            upholstery_color: None,
            description: None,
            data_source: Some("autoscout24".into()),
            images: None,
            created_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            updated_at: None,
            price_num: Some(20000.0),
            mileage_num: Some(50000.0),
            power_num: Some(110.0),
        }
    }

    fn spec() -> FilterSpec {
        FilterSpec {
            exclude_id: "target".into(),
            make: "BMW".into(),
            model: "3er".into(),
            body_type: Some("limousine".into()),
            fuel_type: Some("benzin".into()),
            transmission: Some("automatik".into()),
            require_colour: true,
            mileage_between: Some((25000.0, 75000.0)),
            price_between: Some((12000.0, 28000.0)),
            power_between: Some((93.5, 126.5)),
        }
    }

    #[test]
    fn admits_applies_hard_and_soft_locks() {
        let s = spec();
        assert!(s.admits(&row("c1", "BMW", "3er")));
        // Target itself is never admitted.
        assert!(!s.admits(&row("target", "BMW", "3er")));
        // Hard-lock mismatch.
        assert!(!s.admits(&row("c2", "Audi", "A4")));
        // Out-of-range soft lock.
        let mut expensive = row("c3", "BMW", "3er");
        expensive.price_num = Some(40000.0);
        assert!(!s.admits(&expensive));
        // Missing value inside an active range predicate excludes the row.
        let mut no_power = row("c4", "BMW", "3er");
        no_power.power_num = None;
        assert!(!s.admits(&no_power));
    }

    #[test]
    fn fingerprint_distinguishes_predicate_sets() {
        let a = spec();
        let mut b = spec();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.price_between = Some((10000.0, 30000.0));
        assert_ne!(a.fingerprint(), b.fingerprint());
        b.price_between = None;
        let mut c = spec();
        c.price_between = None;
        assert_eq!(b.fingerprint(), c.fingerprint());
    }

    #[tokio::test]
    async fn memory_store_orders_by_recency_and_limits() {
        let mut older = row("old", "BMW", "3er");
        older.created_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let newer = row("new", "BMW", "3er");
        let store = MemoryListingStore::new(vec![older, newer]);

        let rows = store.fetch_candidates(&spec(), 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].vehicle_id, "new");

        let rows = store.fetch_candidates(&spec(), 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vehicle_id, "new");
    }

    #[tokio::test]
    async fn failing_store_surfaces_transient_errors() {
        let store = MemoryListingStore::failing();
        let err = store.fetch("x").await.unwrap_err();
        assert!(err.is_transient());
    }
}
