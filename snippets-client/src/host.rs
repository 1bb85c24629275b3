//! Stand-in host for running outside a real page
//!
//! [`StaticHost`] answers fact requests on the bus from fixed values;
//! [`ConsoleSurface`] prints what the page would have done; and
//! [`RecordingSurface`] keeps a call log for tests.

use crate::bus::{CorrelationBus, HostRequest, HostResponse, ResponseFields, ACTION_GET_CONFIGURATION};
use crate::delivery::{HostSurface, ACTION_SHOW_ACCOUNTS};
use crate::facts::{CONFIG_APPINFO, CONFIG_SEARCH_ENGINE, CONFIG_SYNC};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Answers the host would give; `None` fields are left out of the response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatedFacts {
    pub account_configured: Option<bool>,
    pub default_browser: Option<bool>,
    pub profile_age_weeks: Option<u32>,
    pub telemetry_enabled: Option<bool>,
    pub search_engine: Option<String>,
}

pub struct StaticHost {
    facts: SimulatedFacts,
}

impl StaticHost {
    pub fn new(facts: SimulatedFacts) -> Self {
        Self { facts }
    }

    /// Response for a configuration request, `None` for anything else
    pub fn answer(&self, request: &HostRequest) -> Option<HostResponse> {
        if request.action != ACTION_GET_CONFIGURATION {
            return None;
        }
        let callback_id = request.callback_id()?;

        let mut fields = ResponseFields::new();
        match request.configuration()? {
            CONFIG_SYNC => {
                insert(&mut fields, "setup", self.facts.account_configured.map(Value::from));
            }
            CONFIG_APPINFO => {
                insert(&mut fields, "defaultBrowser", self.facts.default_browser.map(Value::from));
                insert(
                    &mut fields,
                    "profileCreatedWeeksAgo",
                    self.facts.profile_age_weeks.map(Value::from),
                );
                insert(&mut fields, "telemetryEnabled", self.facts.telemetry_enabled.map(Value::from));
            }
            CONFIG_SEARCH_ENGINE => {
                insert(
                    &mut fields,
                    "searchEngineIdentifier",
                    self.facts.search_engine.clone().map(Value::from),
                );
            }
            other => {
                debug!(configuration = other, "Unknown configuration requested");
                return None;
            }
        }
        Some(HostResponse::new(callback_id, fields))
    }

    /// Listen on `bus` and answer every request
    ///
    /// The subscription is taken before this returns, so requests issued
    /// afterwards are never missed.
    pub fn spawn(self, bus: CorrelationBus) -> JoinHandle<()> {
        let mut requests = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match requests.recv().await {
                    Ok(request) => {
                        if request.action == ACTION_SHOW_ACCOUNTS {
                            info!("Host asked to open the account flow");
                        } else if let Some(response) = self.answer(&request) {
                            bus.deliver(response);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Simulated host fell behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

fn insert(fields: &mut ResponseFields, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        fields.insert(key.to_string(), value);
    }
}

/// Prints surface operations to stdout
#[derive(Debug, Default)]
pub struct ConsoleSurface;

impl HostSurface for ConsoleSurface {
    fn insert_markup(&self, markup: &str) {
        println!("{}", markup);
    }

    fn activate_fragment(&self, script: &str) {
        println!("[script] {}", script.trim());
    }

    fn show_default_content(&self) {
        println!("[default content]");
    }

    fn follow_link(&self, href: &str) {
        println!("[navigate] {}", href);
    }

    fn reload(&self) {
        println!("[reload]");
    }

    fn hide(&self) {
        println!("[hidden]");
    }
}

/// One call made on a [`RecordingSurface`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Insert(String),
    Activate(String),
    DefaultContent,
    Follow(String),
    Reload,
    Hide,
}

/// Keeps every surface call in order
#[derive(Debug, Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<SurfaceCall>>,
}

impl RecordingSurface {
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, call: SurfaceCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl HostSurface for RecordingSurface {
    fn insert_markup(&self, markup: &str) {
        self.record(SurfaceCall::Insert(markup.to_string()));
    }

    fn activate_fragment(&self, script: &str) {
        self.record(SurfaceCall::Activate(script.to_string()));
    }

    fn show_default_content(&self) {
        self.record(SurfaceCall::DefaultContent);
    }

    fn follow_link(&self, href: &str) {
        self.record(SurfaceCall::Follow(href.to_string()));
    }

    fn reload(&self) {
        self.record(SurfaceCall::Reload);
    }

    fn hide(&self) {
        self.record(SurfaceCall::Hide);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_answer_leaves_out_unknown_fields() {
        let host = StaticHost::new(SimulatedFacts {
            default_browser: Some(true),
            ..Default::default()
        });
        let request = HostRequest {
            action: ACTION_GET_CONFIGURATION.to_string(),
            data: json!({"configuration": "appinfo", "callbackID": "abc"}),
        };

        let response = host.answer(&request).unwrap();
        assert_eq!(response.callback_id, "abc");
        assert_eq!(response.fields.len(), 1);
        assert_eq!(response.fields["defaultBrowser"], json!(true));
    }

    #[test]
    fn test_answer_ignores_other_actions() {
        let host = StaticHost::new(SimulatedFacts::default());
        let request = HostRequest {
            action: ACTION_SHOW_ACCOUNTS.to_string(),
            data: json!({}),
        };
        assert!(host.answer(&request).is_none());
    }

    #[tokio::test]
    async fn test_spawned_host_answers_bus_requests() {
        let bus = CorrelationBus::new(16);
        let _host = StaticHost::new(SimulatedFacts {
            search_engine: Some("google".to_string()),
            ..Default::default()
        })
        .spawn(bus.clone());

        let reply = bus.request(CONFIG_SEARCH_ENGINE);
        let fields = tokio::time::timeout(Duration::from_secs(1), reply.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fields["searchEngineIdentifier"], json!("google"));
    }
}
