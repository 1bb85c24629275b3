//! Geolocated country lookup
//!
//! The country is the only host fact that survives across sessions. It is
//! kept in the settings table with the time it was fetched; a cached value
//! inside the validity window is reused without touching the network.
//! Lookup failures are logged and leave the country unknown.

use crate::facts::HostFactCache;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use snippets_common::{db, time, ClientConfig};
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Settings key holding the cached country code
pub const GEO_COUNTRY_KEY: &str = "geo_country";
/// Settings key holding the RFC 3339 fetch time
pub const GEO_UPDATED_KEY: &str = "geo_last_updated";

const USER_AGENT: &str = concat!("snippets-client/", env!("CARGO_PKG_VERSION"));

/// Geolocation client errors
#[derive(Debug, Error)]
pub enum GeoError {
    /// Network communication error (includes timeouts)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Service answered with a non-success status
    #[error("API error {0}")]
    ApiError(u16),

    /// Body was not JSON or had no usable country code
    #[error("Parse error: {0}")]
    ParseError(String),
}

#[derive(Debug, Deserialize)]
struct GeoResponse {
    country_code: Option<String>,
}

/// HTTP client for the geolocation service
#[derive(Clone)]
pub struct GeoClient {
    http_client: reqwest::Client,
    url: String,
}

impl GeoClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, GeoError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| GeoError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }

    /// Fetch the caller's country code, lowercased
    ///
    /// Single attempt, no retry.
    pub async fn fetch_country(&self) -> Result<String, GeoError> {
        debug!(url = %self.url, "Querying geolocation service");

        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| GeoError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::ApiError(status.as_u16()));
        }

        let body: GeoResponse = response
            .json()
            .await
            .map_err(|e| GeoError::ParseError(e.to_string()))?;

        body.country_code
            .map(|code| code.trim().to_lowercase())
            .filter(|code| !code.is_empty())
            .ok_or_else(|| GeoError::ParseError("missing country_code".to_string()))
    }
}

/// Country previously fetched and persisted
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCountry {
    pub country: String,
    pub updated: DateTime<Utc>,
}

/// Read the persisted country; missing or unparseable entries read as `None`
pub async fn load_cached_country(pool: &SqlitePool) -> Option<CachedCountry> {
    let country = match db::get_setting(pool, GEO_COUNTRY_KEY).await {
        Ok(value) => value?,
        Err(e) => {
            warn!(error = %e, "Failed to read cached country");
            return None;
        }
    };
    let updated = db::get_setting(pool, GEO_UPDATED_KEY)
        .await
        .ok()
        .flatten()
        .and_then(|raw| time::parse_rfc3339(&raw))?;

    Some(CachedCountry {
        country: country.to_lowercase(),
        updated,
    })
}

pub async fn save_cached_country(pool: &SqlitePool, cached: &CachedCountry) -> snippets_common::Result<()> {
    db::set_setting(pool, GEO_COUNTRY_KEY, &cached.country).await?;
    db::set_setting(pool, GEO_UPDATED_KEY, &cached.updated.to_rfc3339()).await?;
    Ok(())
}

/// Fills the country fact from the cache or the geolocation service
pub struct CountryResolver {
    client: Option<GeoClient>,
    pool: Option<SqlitePool>,
    window: chrono::Duration,
}

impl CountryResolver {
    pub fn new(client: Option<GeoClient>, pool: Option<SqlitePool>, window: chrono::Duration) -> Self {
        Self { client, pool, window }
    }

    /// Build from configuration; an unset URL or a client build failure
    /// disables lookups
    pub fn from_config(config: &ClientConfig, pool: Option<SqlitePool>) -> Self {
        let client = config.geo_url.as_ref().and_then(|url| {
            GeoClient::new(url.clone(), config.geo_timeout())
                .map_err(|e| warn!(error = %e, "Geolocation disabled"))
                .ok()
        });
        Self::new(client, pool, config.geo_cache_window())
    }

    /// Apply a fresh cached country now, or start a background lookup
    ///
    /// Returns the lookup task when one was started. The fact stays unknown
    /// until that task finishes.
    pub async fn resolve(&self, facts: &HostFactCache) -> Option<JoinHandle<()>> {
        if let Some(pool) = &self.pool {
            if let Some(cached) = load_cached_country(pool).await {
                if time::is_within_window(cached.updated, self.window, time::now()) {
                    debug!(country = %cached.country, "Using cached country");
                    facts.set_country(&cached.country, cached.updated).await;
                    return None;
                }
                debug!("Cached country expired");
            }
        }

        let client = self.client.clone()?;
        let pool = self.pool.clone();
        let facts = facts.clone();

        Some(tokio::spawn(async move {
            match client.fetch_country().await {
                Ok(country) => {
                    let cached = CachedCountry {
                        country,
                        updated: time::now(),
                    };
                    info!(country = %cached.country, "Country geolocated");
                    facts.set_country(&cached.country, cached.updated).await;
                    if let Some(pool) = pool {
                        if let Err(e) = save_cached_country(&pool, &cached).await {
                            warn!(error = %e, "Failed to persist country");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Geolocation failed; country stays unknown"),
            }
        }))
    }
}
