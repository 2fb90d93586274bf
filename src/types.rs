//! Core event types for the a3s-realtime system
//!
//! `Event` is the transport-neutral envelope every producer publishes.
//! Domain types (`DriftAlert`, `CloudEvent`) are flattened into an event
//! payload with a fixed key set so that consumers can rely on it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wildcard topic matching every event type
pub const TOPIC_ALL: &str = "all";

/// Drift alerts produced by rule evaluation
pub const TOPIC_DRIFT: &str = "drift";

/// Runtime security monitor / audit log events
pub const TOPIC_FALCO: &str = "falco";

/// Infrastructure state changes
pub const TOPIC_STATE_CHANGE: &str = "state_change";

/// Topics advertised to duplex clients on connect
pub const VALID_TOPICS: [&str; 4] = [TOPIC_ALL, TOPIC_DRIFT, TOPIC_FALCO, TOPIC_STATE_CHANGE];

/// Check whether a subscription topic selects an event type.
///
/// The `all` wildcard is checked before the exact match.
pub fn topic_matches(topic: &str, event_type: &str) -> bool {
    topic == TOPIC_ALL || topic == event_type
}

/// A single event flowing through the broadcaster
///
/// Events are immutable once published; the broadcaster hands out
/// `Arc<Event>` so every receiver shares one allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type (`drift`, `falco`, `state_change` or producer-defined)
    #[serde(rename = "type")]
    pub event_type: String,

    /// RFC3339 timestamp, may be empty when the producer did not set one
    #[serde(default)]
    pub timestamp: String,

    /// Arbitrary string-keyed payload
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(event_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: now_rfc3339(),
            payload,
        }
    }

    /// Add a payload entry
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// Identity of the principal that made a change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Identity kind (e.g. `IAMUser`, `AssumedRole`, `ServiceAccount`)
    #[serde(rename = "type", default)]
    pub identity_type: String,

    #[serde(default)]
    pub principal_id: String,

    #[serde(default)]
    pub arn: String,

    #[serde(default)]
    pub account_id: String,

    #[serde(default)]
    pub user_name: String,
}

/// A detected drift between declared and observed infrastructure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub severity: String,
    pub resource_type: String,
    pub resource_name: String,
    pub resource_id: String,

    /// Attribute that drifted (e.g. `disable_api_termination`)
    pub attribute: String,

    #[serde(default)]
    pub old_value: Value,

    #[serde(default)]
    pub new_value: Value,

    #[serde(default)]
    pub user_identity: UserIdentity,

    /// Names of the drift rules that matched
    #[serde(default)]
    pub matched_rules: Vec<String>,

    /// Alert classification (e.g. `drift`, `unmanaged`)
    #[serde(default)]
    pub alert_type: String,
}

impl DriftAlert {
    /// Flatten into the `drift` event payload.
    ///
    /// Keys: severity, resource_type, resource_name, resource_id, attribute,
    /// old_value, new_value, user_identity, matched_rules, alert_type.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("severity".into(), self.severity.clone().into());
        payload.insert("resource_type".into(), self.resource_type.clone().into());
        payload.insert("resource_name".into(), self.resource_name.clone().into());
        payload.insert("resource_id".into(), self.resource_id.clone().into());
        payload.insert("attribute".into(), self.attribute.clone().into());
        payload.insert("old_value".into(), self.old_value.clone());
        payload.insert("new_value".into(), self.new_value.clone());
        payload.insert(
            "user_identity".into(),
            serde_json::to_value(&self.user_identity).unwrap_or_default(),
        );
        payload.insert("matched_rules".into(), self.matched_rules.clone().into());
        payload.insert("alert_type".into(), self.alert_type.clone().into());
        payload
    }
}

/// A normalized cloud change event (audit log or runtime monitor output)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    /// Cloud provider (`aws`, `gcp`, ...)
    pub provider: String,

    /// Provider API call name (e.g. `ModifyInstanceAttribute`)
    pub event_name: String,

    pub resource_type: String,
    pub resource_id: String,

    #[serde(default)]
    pub user_identity: UserIdentity,

    /// Attribute changes extracted from the request
    #[serde(default)]
    pub changes: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

impl CloudEvent {
    /// Flatten into the `falco` event payload, omitting unset optional fields
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("provider".into(), self.provider.clone().into());
        payload.insert("event_name".into(), self.event_name.clone().into());
        payload.insert("resource_type".into(), self.resource_type.clone().into());
        payload.insert("resource_id".into(), self.resource_id.clone().into());
        payload.insert(
            "user_identity".into(),
            serde_json::to_value(&self.user_identity).unwrap_or_default(),
        );
        payload.insert("changes".into(), Value::Object(self.changes.clone()));

        let optional = [
            ("region", &self.region),
            ("project_id", &self.project_id),
            ("service_name", &self.service_name),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                payload.insert(key.into(), value.clone().into());
            }
        }
        payload
    }
}

/// Current time as an RFC3339 string
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
