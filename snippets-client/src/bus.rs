//! Correlation bus: request/response messaging with the host application
//!
//! Outbound messages are broadcast to whoever represents the host (a page
//! bridge, a test, the CLI simulator). Requests carry a fresh correlation id
//! and park a one-shot sender in an explicit request table; inbound responses
//! are routed to the matching entry and the entry is removed, so each request
//! is answered at most once. Responses with an unknown id are ignored.
//!
//! The bus never times out. A request the host ignores stays in the table
//! until [`CorrelationBus::forget`] is called or the bus is dropped.
//!
//! # Wire shape
//!
//! ```text
//! outbound: {"action": "getConfiguration", "data": {"configuration": "sync", "callbackID": "…"}}
//! inbound:  {"callbackID": "…", "setup": true}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snippets_common::uuid_utils;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace};

/// Action used for fact requests
pub const ACTION_GET_CONFIGURATION: &str = "getConfiguration";

/// Result fields of a host response
pub type ResponseFields = Map<String, Value>;

/// Outbound broadcast message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRequest {
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

impl HostRequest {
    /// Correlation id carried by a configuration request, if any
    pub fn callback_id(&self) -> Option<&str> {
        self.data.get("callbackID").and_then(Value::as_str)
    }

    /// Configuration name carried by a configuration request, if any
    pub fn configuration(&self) -> Option<&str> {
        self.data.get("configuration").and_then(Value::as_str)
    }
}

/// Inbound response; every field besides `callbackID` is a result field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResponse {
    #[serde(rename = "callbackID")]
    pub callback_id: String,
    #[serde(flatten)]
    pub fields: ResponseFields,
}

impl HostResponse {
    pub fn new(callback_id: impl Into<String>, fields: ResponseFields) -> Self {
        Self {
            callback_id: callback_id.into(),
            fields,
        }
    }
}

/// Handle to a request awaiting its response
#[derive(Debug)]
pub struct PendingReply {
    callback_id: String,
    rx: oneshot::Receiver<ResponseFields>,
}

impl PendingReply {
    pub fn callback_id(&self) -> &str {
        &self.callback_id
    }

    /// Wait for the response
    ///
    /// `None` when the request was forgotten or the bus went away; otherwise
    /// this may never resolve if the host stays silent.
    pub async fn recv(self) -> Option<ResponseFields> {
        self.rx.await.ok()
    }
}

/// Broadcast request/response bus
#[derive(Clone)]
pub struct CorrelationBus {
    outbound: broadcast::Sender<HostRequest>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ResponseFields>>>>,
}

impl CorrelationBus {
    /// Creates a bus buffering up to `capacity` outbound messages per host listener
    pub fn new(capacity: usize) -> Self {
        let (outbound, _) = broadcast::channel(capacity);
        Self {
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Host side: receive every outbound message sent after subscribing
    pub fn subscribe(&self) -> broadcast::Receiver<HostRequest> {
        self.outbound.subscribe()
    }

    /// Ask the host for a named configuration
    ///
    /// The table entry is registered before the request is broadcast so a
    /// host that answers immediately cannot be missed.
    pub fn request(&self, configuration: &str) -> PendingReply {
        let callback_id = uuid_utils::correlation_id();
        let (tx, rx) = oneshot::channel();
        self.table().insert(callback_id.clone(), tx);

        debug!(configuration = configuration, callback_id = %callback_id, "Requesting host configuration");
        self.broadcast(HostRequest {
            action: ACTION_GET_CONFIGURATION.to_string(),
            data: serde_json::json!({
                "configuration": configuration,
                "callbackID": callback_id,
            }),
        });

        PendingReply { callback_id, rx }
    }

    /// Fire-and-forget action; no response is expected
    pub fn send(&self, action: &str, data: Value) {
        debug!(action = action, "Sending host action");
        self.broadcast(HostRequest {
            action: action.to_string(),
            data,
        });
    }

    /// Route a response to its pending request
    ///
    /// Returns `false` when no request with that id is pending (unknown,
    /// already answered, or forgotten); such responses are dropped.
    pub fn deliver(&self, response: HostResponse) -> bool {
        let Some(tx) = self.table().remove(&response.callback_id) else {
            trace!(callback_id = %response.callback_id, "Ignoring unmatched host response");
            return false;
        };
        // The requester may have stopped listening; the entry is consumed either way
        let _ = tx.send(response.fields);
        true
    }

    /// Route a raw JSON response; malformed payloads are ignored
    pub fn deliver_json(&self, raw: &str) -> bool {
        match serde_json::from_str::<HostResponse>(raw) {
            Ok(response) => self.deliver(response),
            Err(e) => {
                debug!(error = %e, "Ignoring malformed host response");
                false
            }
        }
    }

    /// Deliver responses from `inbound` until the channel closes
    pub async fn pump(self, mut inbound: mpsc::UnboundedReceiver<HostResponse>) {
        while let Some(response) = inbound.recv().await {
            self.deliver(response);
        }
        debug!("Host response stream closed");
    }

    /// Drop a pending request; its [`PendingReply`] resolves to `None`
    pub fn forget(&self, callback_id: &str) -> bool {
        self.table().remove(callback_id).is_some()
    }

    /// Number of requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    fn broadcast(&self, request: HostRequest) {
        if self.outbound.send(request).is_err() {
            debug!("No host listening on the bus");
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<ResponseFields>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn fields(value: Value) -> ResponseFields {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn test_request_wire_shape() {
        let bus = CorrelationBus::new(16);
        let mut host = bus.subscribe();

        let pending = bus.request("sync");
        let request = host.try_recv().expect("host should see the request");

        assert_eq!(request.action, "getConfiguration");
        assert_eq!(request.configuration(), Some("sync"));
        assert_eq!(request.callback_id(), Some(pending.callback_id()));

        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["data"]["callbackID"], json!(pending.callback_id()));
        assert_eq!(bus.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_matching_response_resolves_once() {
        let bus = CorrelationBus::new(16);
        let pending = bus.request("sync");
        let id = pending.callback_id().to_string();

        assert!(bus.deliver(HostResponse::new(id.clone(), fields(json!({"setup": true})))));
        let result = pending.recv().await.expect("should resolve");
        assert_eq!(result["setup"], json!(true));

        // Second answer for the same id finds nothing
        assert!(!bus.deliver(HostResponse::new(id, fields(json!({"setup": false})))));
        assert_eq!(bus.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_response_ignored() {
        let bus = CorrelationBus::new(16);
        let pending = bus.request("appinfo");

        assert!(!bus.deliver(HostResponse::new("someone-else", ResponseFields::new())));
        assert_eq!(bus.pending_count(), 1, "pending request must survive a stray response");

        let still_waiting =
            tokio::time::timeout(Duration::from_millis(20), pending.recv()).await;
        assert!(still_waiting.is_err());
    }

    #[tokio::test]
    async fn test_silent_host_leaves_request_pending() {
        let bus = CorrelationBus::new(16);
        let pending = bus.request("selectedSearchEngine");

        let result = tokio::time::timeout(Duration::from_millis(20), pending.recv()).await;
        assert!(result.is_err(), "bus must not invent a timeout");
        assert_eq!(bus.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_forget_resolves_to_none() {
        let bus = CorrelationBus::new(16);
        let pending = bus.request("sync");
        assert!(bus.forget(pending.callback_id()));
        assert_eq!(pending.recv().await, None);
    }

    #[test]
    fn test_correlation_ids_unique_per_request() {
        let bus = CorrelationBus::new(16);
        let a = bus.request("sync");
        let b = bus.request("sync");
        assert_ne!(a.callback_id(), b.callback_id());
        assert_eq!(bus.pending_count(), 2);
    }

    #[test]
    fn test_send_is_fire_and_forget() {
        let bus = CorrelationBus::new(16);
        let mut host = bus.subscribe();

        bus.send("showFirefoxAccounts", json!({}));
        let message = host.try_recv().unwrap();
        assert_eq!(message.action, "showFirefoxAccounts");
        assert_eq!(message.callback_id(), None);
        assert_eq!(bus.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_deliver_json_flattened_fields() {
        let bus = CorrelationBus::new(16);
        let pending = bus.request("selectedSearchEngine");
        let raw = format!(
            r#"{{"callbackID": "{}", "searchEngineIdentifier": "google"}}"#,
            pending.callback_id()
        );

        assert!(bus.deliver_json(&raw));
        assert!(!bus.deliver_json("{not json"));
        let result = pending.recv().await.unwrap();
        assert_eq!(result["searchEngineIdentifier"], json!("google"));
    }

    #[tokio::test]
    async fn test_pump_routes_inbound_stream() {
        let bus = CorrelationBus::new(16);
        let pending = bus.request("sync");
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(bus.clone().pump(rx));

        tx.send(HostResponse::new(pending.callback_id(), fields(json!({"setup": false}))))
            .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), pending.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["setup"], json!(false));

        drop(tx);
        pump.await.unwrap();
    }
}
