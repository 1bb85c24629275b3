//! Host environment facts
//!
//! Facts are requested over the correlation bus at session start and land
//! whenever the host answers. Selection reads a [`HostFacts`] snapshot and
//! treats every `None` as "unknown", never waiting for a pending answer.

use crate::bus::{CorrelationBus, ResponseFields};
use chrono::{DateTime, Utc};
use serde_json::Value;
use snippets_common::time;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Account status request; answered with `setup`
pub const CONFIG_SYNC: &str = "sync";
/// Application info request; answered with `defaultBrowser`, `profileCreatedWeeksAgo`, `telemetryEnabled`
pub const CONFIG_APPINFO: &str = "appinfo";
/// Search engine request; answered with `searchEngineIdentifier`
pub const CONFIG_SEARCH_ENGINE: &str = "selectedSearchEngine";

/// Snapshot of everything selection may ask about the host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostFacts {
    pub account_configured: Option<bool>,
    pub default_browser: Option<bool>,
    pub selected_search_engine: Option<String>,
    /// Lowercase country code
    pub country: Option<String>,
    pub country_updated: Option<DateTime<Utc>>,
    pub profile_age_weeks: Option<u32>,
    /// Major version parsed from the user agent
    pub application_version: Option<u32>,
    pub test_cohort: Option<bool>,
    pub telemetry_enabled: Option<bool>,
}

impl HostFacts {
    /// Facts derivable from the client environment alone
    pub fn from_environment(env: &ClientEnvironment, version_token: &str) -> Self {
        Self {
            application_version: parse_major_version(&env.user_agent, version_token),
            test_cohort: env.test_cohort,
            ..Default::default()
        }
    }

    /// Whether the cached country is still inside its validity window
    pub fn country_is_fresh(&self, window: chrono::Duration, at: DateTime<Utc>) -> bool {
        match (&self.country, self.country_updated) {
            (Some(_), Some(updated)) => time::is_within_window(updated, window, at),
            _ => false,
        }
    }

    fn apply_sync(&mut self, fields: &ResponseFields) {
        if let Some(setup) = fields.get("setup").and_then(Value::as_bool) {
            self.account_configured = Some(setup);
        }
    }

    fn apply_appinfo(&mut self, fields: &ResponseFields) {
        if let Some(default_browser) = fields.get("defaultBrowser").and_then(Value::as_bool) {
            self.default_browser = Some(default_browser);
        }
        if let Some(weeks) = fields
            .get("profileCreatedWeeksAgo")
            .and_then(Value::as_u64)
            .and_then(|w| u32::try_from(w).ok())
        {
            self.profile_age_weeks = Some(weeks);
        }
        if let Some(enabled) = fields.get("telemetryEnabled").and_then(Value::as_bool) {
            self.telemetry_enabled = Some(enabled);
        }
    }

    fn apply_search_engine(&mut self, fields: &ResponseFields) {
        if let Some(engine) = fields
            .get("searchEngineIdentifier")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            self.selected_search_engine = Some(engine.to_string());
        }
    }
}

/// What the embedding page knows about itself without asking the host
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEnvironment {
    pub user_agent: String,
    /// Viewport width in pixels
    pub screen_width: u32,
    pub test_cohort: Option<bool>,
}

impl Default for ClientEnvironment {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            screen_width: 1280,
            test_cohort: None,
        }
    }
}

/// Extract `<major>` from `<token>/<major>.` in a user-agent string
///
/// A missing token, a non-numeric major, or a major of 0 yields `None`.
pub fn parse_major_version(user_agent: &str, token: &str) -> Option<u32> {
    let needle = format!("{}/", token);
    let start = user_agent.find(&needle)? + needle.len();
    let rest = &user_agent[start..];
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 || !rest[digits_end..].starts_with('.') {
        return None;
    }
    rest[..digits_end].parse::<u32>().ok().filter(|v| *v != 0)
}

/// Session-wide fact cache, written only by bus responses and the geo lookup
#[derive(Clone, Default)]
pub struct HostFactCache {
    facts: Arc<RwLock<HostFacts>>,
}

/// Background tasks waiting on fact responses
pub struct FactRequests {
    handles: Vec<JoinHandle<()>>,
}

impl FactRequests {
    /// Track one more background lookup
    pub fn with_task(mut self, handle: Option<JoinHandle<()>>) -> Self {
        self.handles.extend(handle);
        self
    }

    /// Wait for every answer; never returns if the host ignores a request
    pub async fn settled(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl HostFactCache {
    pub fn new(initial: HostFacts) -> Self {
        Self {
            facts: Arc::new(RwLock::new(initial)),
        }
    }

    /// Issue the three host requests without waiting for any of them
    pub fn start(&self, bus: &CorrelationBus) -> FactRequests {
        let handles = vec![
            self.watch(bus, CONFIG_SYNC, HostFacts::apply_sync),
            self.watch(bus, CONFIG_APPINFO, HostFacts::apply_appinfo),
            self.watch(bus, CONFIG_SEARCH_ENGINE, HostFacts::apply_search_engine),
        ];
        FactRequests { handles }
    }

    fn watch(
        &self,
        bus: &CorrelationBus,
        configuration: &'static str,
        apply: fn(&mut HostFacts, &ResponseFields),
    ) -> JoinHandle<()> {
        // Registered synchronously so an immediate answer is not lost
        let reply = bus.request(configuration);
        let facts = Arc::clone(&self.facts);
        tokio::spawn(async move {
            match reply.recv().await {
                Some(fields) => {
                    apply(&mut *facts.write().await, &fields);
                    debug!(configuration = configuration, "Host fact received");
                }
                None => trace!(configuration = configuration, "Host fact request abandoned"),
            }
        })
    }

    /// Current facts; unknown fields stay `None`
    pub async fn snapshot(&self) -> HostFacts {
        self.facts.read().await.clone()
    }

    /// Record a geolocated country (lowercased)
    pub async fn set_country(&self, country: &str, updated: DateTime<Utc>) {
        let mut facts = self.facts.write().await;
        facts.country = Some(country.to_lowercase());
        facts.country_updated = Some(updated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::HostResponse;
    use serde_json::json;

    #[test]
    fn test_parse_major_version() {
        let ua = "Mozilla/5.0 (X11; Linux x86_64; rv:68.0) Gecko/20100101 Firefox/68.0";
        assert_eq!(parse_major_version(ua, "Firefox"), Some(68));
        assert_eq!(parse_major_version("Firefox/120.0.1", "Firefox"), Some(120));
    }

    #[test]
    fn test_parse_major_version_unknown_forms() {
        assert_eq!(parse_major_version("Chrome/99.0", "Firefox"), None);
        assert_eq!(parse_major_version("Firefox/68", "Firefox"), None, "needs a dot");
        assert_eq!(parse_major_version("Firefox/.1", "Firefox"), None);
        assert_eq!(parse_major_version("Firefox/0.9", "Firefox"), None);
    }

    #[test]
    fn test_from_environment() {
        let env = ClientEnvironment {
            user_agent: "Firefox/70.0".to_string(),
            screen_width: 1600,
            test_cohort: Some(true),
        };
        let facts = HostFacts::from_environment(&env, "Firefox");
        assert_eq!(facts.application_version, Some(70));
        assert_eq!(facts.test_cohort, Some(true));
        assert_eq!(facts.account_configured, None);
    }

    #[test]
    fn test_country_freshness() {
        let now = time::now();
        let mut facts = HostFacts {
            country: Some("fr".to_string()),
            country_updated: Some(now - chrono::Duration::days(10)),
            ..Default::default()
        };
        assert!(facts.country_is_fresh(chrono::Duration::days(30), now));

        facts.country_updated = Some(now - chrono::Duration::days(31));
        assert!(!facts.country_is_fresh(chrono::Duration::days(30), now));

        facts.country_updated = None;
        assert!(!facts.country_is_fresh(chrono::Duration::days(30), now));
    }

    #[test]
    fn test_appinfo_fields_applied() {
        let mut facts = HostFacts::default();
        let fields = json!({
            "defaultBrowser": false,
            "profileCreatedWeeksAgo": 12,
            "telemetryEnabled": true,
        });
        facts.apply_appinfo(fields.as_object().unwrap());
        assert_eq!(facts.default_browser, Some(false));
        assert_eq!(facts.profile_age_weeks, Some(12));
        assert_eq!(facts.telemetry_enabled, Some(true));
    }

    #[test]
    fn test_missing_fields_stay_unknown() {
        let mut facts = HostFacts::default();
        facts.apply_appinfo(json!({"defaultBrowser": "yes"}).as_object().unwrap());
        facts.apply_search_engine(json!({"searchEngineIdentifier": ""}).as_object().unwrap());
        assert_eq!(facts, HostFacts::default());
    }

    #[tokio::test]
    async fn test_start_fills_facts_as_answers_arrive() {
        let bus = CorrelationBus::new(16);
        let mut host = bus.subscribe();
        let cache = HostFactCache::default();
        let requests = cache.start(&bus);

        assert_eq!(bus.pending_count(), 3);
        assert_eq!(cache.snapshot().await, HostFacts::default());

        while let Ok(request) = host.try_recv() {
            let fields = match request.configuration() {
                Some(CONFIG_SYNC) => json!({"setup": true}),
                Some(CONFIG_APPINFO) => json!({"defaultBrowser": true}),
                Some(CONFIG_SEARCH_ENGINE) => json!({"searchEngineIdentifier": "bing"}),
                other => panic!("unexpected configuration {:?}", other),
            };
            let id = request.callback_id().unwrap().to_string();
            bus.deliver(HostResponse::new(id, fields.as_object().cloned().unwrap()));
        }

        requests.settled().await;
        let facts = cache.snapshot().await;
        assert_eq!(facts.account_configured, Some(true));
        assert_eq!(facts.default_browser, Some(true));
        assert_eq!(facts.selected_search_engine.as_deref(), Some("bing"));
        assert_eq!(facts.profile_age_weeks, None);
    }

    #[tokio::test]
    async fn test_set_country_lowercases() {
        let cache = HostFactCache::default();
        cache.set_country("DE", time::now()).await;
        assert_eq!(cache.snapshot().await.country.as_deref(), Some("de"));
    }
}
