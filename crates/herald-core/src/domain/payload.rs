//! Notification payload and its gateway document form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Delivery priority hint forwarded to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Numeric value used on the wire (5 = normal, 10 = immediate).
    pub fn as_gateway_value(self) -> u8 {
        match self {
            Priority::Normal => 5,
            Priority::High => 10,
        }
    }
}

fn default_sound() -> String {
    "default".to_string()
}

/// What gets shown on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,

    #[serde(default = "default_sound")]
    pub sound: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Custom keys merged into the top level of the gateway document.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,

    #[serde(default)]
    pub priority: Priority,

    /// The gateway discards the notification after this instant; so do we.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            badge: None,
            sound: default_sound(),
            category: None,
            thread_id: None,
            data: Map::new(),
            priority: Priority::Normal,
            expiration: None,
        }
    }

    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|at| at <= now)
    }

    /// Build the document sent to the gateway.
    ///
    /// Shape: `{"aps": {"alert": {"title", "body"}, "sound", "badge"?, "category"?,
    /// "thread-id"?}, ...data}`. Custom data cannot overwrite `aps`.
    pub fn to_gateway_json(&self) -> Value {
        let mut aps = Map::new();
        aps.insert(
            "alert".to_string(),
            json!({ "title": self.title, "body": self.body }),
        );
        aps.insert("sound".to_string(), Value::String(self.sound.clone()));
        if let Some(badge) = self.badge {
            aps.insert("badge".to_string(), json!(badge));
        }
        if let Some(category) = &self.category {
            aps.insert("category".to_string(), Value::String(category.clone()));
        }
        if let Some(thread_id) = &self.thread_id {
            aps.insert("thread-id".to_string(), Value::String(thread_id.clone()));
        }

        let mut document = Map::new();
        for (key, value) in &self.data {
            if key != "aps" {
                document.insert(key.clone(), value.clone());
            }
        }
        document.insert("aps".to_string(), Value::Object(aps));
        Value::Object(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_payload_has_alert_and_default_sound() {
        let doc = NotificationPayload::new("Hello", "World").to_gateway_json();

        assert_eq!(doc["aps"]["alert"]["title"], "Hello");
        assert_eq!(doc["aps"]["alert"]["body"], "World");
        assert_eq!(doc["aps"]["sound"], "default");
        assert!(doc["aps"].get("badge").is_none());
        assert!(doc["aps"].get("thread-id").is_none());
    }

    #[test]
    fn optional_fields_and_custom_data_are_included() {
        let doc = NotificationPayload::new("t", "b")
            .with_badge(3)
            .with_category("MESSAGE")
            .with_thread_id("chat-42")
            .with_data("order_id", json!(17))
            .with_data("aps", json!("ignored"))
            .to_gateway_json();

        assert_eq!(doc["aps"]["badge"], 3);
        assert_eq!(doc["aps"]["category"], "MESSAGE");
        assert_eq!(doc["aps"]["thread-id"], "chat-42");
        assert_eq!(doc["order_id"], 17);
        assert!(doc["aps"].is_object());
    }

    #[test]
    fn deserializes_with_defaults() {
        let payload: NotificationPayload =
            serde_json::from_str(r#"{"title": "t", "body": "b"}"#).unwrap();

        assert_eq!(payload.sound, "default");
        assert_eq!(payload.priority, Priority::Normal);
        assert!(payload.data.is_empty());
    }

    #[test]
    fn expiration_is_inclusive() {
        let now = Utc::now();
        let payload = NotificationPayload::new("t", "b").with_expiration(now);

        assert!(payload.is_expired(now));
        assert!(!payload.is_expired(now - chrono::Duration::seconds(1)));
        assert!(!NotificationPayload::new("t", "b").is_expired(now));
    }

    #[test]
    fn priority_maps_to_gateway_values() {
        assert_eq!(Priority::Normal.as_gateway_value(), 5);
        assert_eq!(Priority::High.as_gateway_value(), 10);
    }
}
