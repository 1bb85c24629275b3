//! Sampled usage metrics
//!
//! Best effort and fire-and-forget: a report either becomes one GET to the
//! collector or nothing at all. Either way the returned [`Completion`] fires,
//! and never before the call returns, so callers can always chain on it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snippets_common::{ClientConfig, Completion};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const METRICS_TIMEOUT: Duration = Duration::from_secs(30);

/// One interaction worth counting; never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsEvent {
    pub metric: String,
    pub snippet_id: i64,
    pub snippet_full_name: String,
    pub campaign: Option<String>,
    pub country: Option<String>,
    /// Link target for click metrics
    pub href: Option<String>,
}

/// Reporter settings, usually taken from [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct MetricsSettings {
    pub url: Option<String>,
    pub sample_rate: f64,
    pub locale: String,
    /// Diagnostic mode: log instead of sending
    pub preview: bool,
    pub seed: Option<u64>,
}

impl From<&ClientConfig> for MetricsSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            url: config.metrics_url.clone(),
            sample_rate: config.metrics_sample_rate,
            locale: config.locale.clone(),
            preview: config.preview,
            seed: config.random_seed,
        }
    }
}

pub struct MetricsReporter {
    settings: MetricsSettings,
    http_client: Option<reqwest::Client>,
    rng: Mutex<StdRng>,
    transmitted: AtomicU64,
}

impl MetricsReporter {
    pub fn new(settings: MetricsSettings) -> Self {
        let http_client = match reqwest::Client::builder().timeout(METRICS_TIMEOUT).build() {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "Metrics client unavailable; metrics disabled");
                None
            }
        };
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            settings,
            http_client,
            rng: Mutex::new(rng),
            transmitted: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(MetricsSettings::from(config))
    }

    /// Report `event`; `telemetry_enabled` is the host's current answer
    pub fn report(&self, event: &MetricsEvent, telemetry_enabled: Option<bool>) -> Completion {
        if self.settings.preview {
            info!(metric = %event.metric, snippet_id = event.snippet_id, "[preview mode] Sending metric");
            return Completion::next_tick();
        }

        let draw: f64 = self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen();
        if !self.should_transmit(&event.metric, draw, telemetry_enabled) {
            debug!(metric = %event.metric, draw = draw, "Metric not sent");
            return Completion::next_tick();
        }

        let (Some(client), Some(url)) = (self.http_client.clone(), self.build_url(event)) else {
            return Completion::next_tick();
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; metric dropped");
            return Completion::ready();
        };

        self.transmitted.fetch_add(1, Ordering::Relaxed);
        let metric = event.metric.clone();
        let (done, completion) = Completion::pair();
        runtime.spawn(async move {
            match client.get(url).send().await {
                Ok(response) => {
                    debug!(metric = %metric, status = response.status().as_u16(), "Metric sent")
                }
                Err(e) => debug!(metric = %metric, error = %e, "Metric send failed"),
            }
            done.complete();
        });
        completion
    }

    /// Sampling and configuration gate
    fn should_transmit(&self, metric: &str, draw: f64, telemetry_enabled: Option<bool>) -> bool {
        draw < self.settings.sample_rate
            && !metric.is_empty()
            && self.settings.url.is_some()
            && telemetry_enabled != Some(false)
    }

    /// Collector URL with the event encoded in the query string
    pub fn build_url(&self, event: &MetricsEvent) -> Option<reqwest::Url> {
        let base = self.settings.url.as_deref()?;
        let snippet_id = event.snippet_id.to_string();
        let mut params = vec![
            ("snippet_name", snippet_id.as_str()),
            ("snippet_full_name", event.snippet_full_name.as_str()),
            ("locale", self.settings.locale.as_str()),
            ("country", event.country.as_deref().unwrap_or("")),
            ("metric", event.metric.as_str()),
            ("campaign", event.campaign.as_deref().unwrap_or("")),
        ];
        if let Some(href) = event.href.as_deref() {
            params.push(("href", href));
        }

        match reqwest::Url::parse_with_params(base, &params) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(url = base, error = %e, "Invalid metrics URL");
                None
            }
        }
    }

    /// Number of metrics handed to the network so far
    pub fn transmitted(&self) -> u64 {
        self.transmitted.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> f64 {
        self.settings.sample_rate
    }
}
