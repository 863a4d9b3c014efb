//! # Service Configuration
//! Environment-derived settings, read once at boot and immutable afterwards.
//! Missing required database variables fail startup with the full list of
//! missing names so misconfigured deployments die loudly.

use std::time::Duration;

use anyhow::{anyhow, Result};

pub const ENV_DATABASE_HOST: &str = "DATABASE_HOST";
pub const ENV_DATABASE_PORT: &str = "DATABASE_PORT";
pub const ENV_DATABASE_USER: &str = "DATABASE_USER";
pub const ENV_DATABASE_PASSWORD: &str = "DATABASE_PASSWORD";
pub const ENV_DATABASE_NAME: &str = "DATABASE_NAME";
pub const ENV_DB_MIN_CONN: &str = "DB_MIN_CONN";
pub const ENV_DB_MAX_CONN: &str = "DB_MAX_CONN";
pub const ENV_DB_CONNECT_TIMEOUT: &str = "DB_CONNECT_TIMEOUT";
pub const ENV_CANDIDATE_LIMIT: &str = "CANDIDATE_LIMIT";
pub const ENV_COHORT_CACHE_TTL: &str = "COHORT_CACHE_TTL_SECONDS";
pub const ENV_PORT: &str = "PORT";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db: DbConfig,
    /// Default upper bound on candidate rows fetched per relaxation step.
    pub candidate_limit: i64,
    /// TTL of the cohort cache; zero disables caching.
    pub cohort_cache_ttl: Duration,
    pub port: u16,
}

impl AppConfig {
    /// Read configuration from process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but with an injectable lookup so
    /// tests don't have to mutate process-global state.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = [ENV_DATABASE_HOST, ENV_DATABASE_USER, ENV_DATABASE_PASSWORD];
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| get(name).map(|v| v.trim().is_empty()).unwrap_or(true))
            .collect();
        if !missing.is_empty() {
            return Err(anyhow!(
                "Missing database environment variables: {}",
                missing.join(", ")
            ));
        }

        let db = DbConfig {
            host: get(ENV_DATABASE_HOST).unwrap_or_default(),
            port: parse_or(&get, ENV_DATABASE_PORT, 5432),
            user: get(ENV_DATABASE_USER).unwrap_or_default(),
            password: get(ENV_DATABASE_PASSWORD).unwrap_or_default(),
            dbname: get(ENV_DATABASE_NAME).unwrap_or_else(|| "postgres".to_string()),
            min_connections: parse_or(&get, ENV_DB_MIN_CONN, 2),
            max_connections: parse_or(&get, ENV_DB_MAX_CONN, 10),
            connect_timeout: Duration::from_secs(parse_or(&get, ENV_DB_CONNECT_TIMEOUT, 10)),
        };

        Ok(Self {
            db,
            candidate_limit: parse_or(&get, ENV_CANDIDATE_LIMIT, 400),
            cohort_cache_ttl: Duration::from_secs(parse_or(&get, ENV_COHORT_CACHE_TTL, 180)),
            port: parse_or(&get, ENV_PORT, 8000),
        })
    }
}

/// Parse an optional env value, falling back to `default` on absence or junk.
fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> T {
    get(name)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
