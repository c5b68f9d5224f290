//! Inbound storage-change notifications.
//!
//! Three delivery shapes are understood:
//! - CloudEvents binary mode: `ce-id`/`ce-type` headers, body is the object resource.
//! - CloudEvents structured mode: `{"id", "type", "data": {...}}`.
//! - Background-function envelope: `{"context": {"eventId", "eventType"}, "data": {...}}`.
//!
//! A bare object resource (no ids at all) is also accepted for manual runs and
//! gets a generated `local-` event id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IngestError, IngestResult};

/// Event ids carried in CloudEvents binary-mode headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEventHeaders {
    pub id: String,
    pub event_type: String,
}

/// One object-storage change, consumed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageNotification {
    pub bucket: String,
    pub object_key: String,
    /// Scalar fields of the object resource other than bucket and name
    /// (generation, metageneration, timeCreated, updated, ...), stringified.
    pub metadata: BTreeMap<String, String>,
    pub event_id: String,
    pub event_type: String,
}

#[derive(Deserialize)]
struct LegacyContext {
    #[serde(rename = "eventId")]
    event_id: String,
    #[serde(rename = "eventType")]
    event_type: String,
}

impl StorageNotification {
    /// Build a notification from an HTTP delivery: optional binary-mode headers plus the raw body.
    pub fn from_request(headers: Option<CloudEventHeaders>, body: &[u8]) -> IngestResult<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| invalid(format!("body is not JSON: {e}")))?;
        let Value::Object(mut envelope) = value else {
            return Err(invalid("body is not a JSON object"));
        };

        if let Some(headers) = headers {
            return Self::from_object_resource(envelope, headers.id, headers.event_type);
        }

        if let Some(context) = envelope.remove("context") {
            let context: LegacyContext = serde_json::from_value(context)
                .map_err(|e| invalid(format!("bad context: {e}")))?;
            let data = take_data(&mut envelope)?;
            return Self::from_object_resource(data, context.event_id, context.event_type);
        }

        if envelope.contains_key("specversion") || envelope.contains_key("data") {
            let id = take_string(&mut envelope, "id")?;
            let event_type = take_string(&mut envelope, "type")?;
            let data = take_data(&mut envelope)?;
            return Self::from_object_resource(data, id, event_type);
        }

        let event_id = format!("local-{}", uuid::Uuid::new_v4());
        Self::from_object_resource(envelope, event_id, "manual".to_string())
    }

    fn from_object_resource(
        mut object: Map<String, Value>,
        event_id: String,
        event_type: String,
    ) -> IngestResult<Self> {
        let bucket = take_string(&mut object, "bucket")?;
        let object_key = take_string(&mut object, "name")?;

        let metadata = object
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key, s)),
                Value::Number(n) => Some((key, n.to_string())),
                Value::Bool(b) => Some((key, b.to_string())),
                _ => None,
            })
            .collect();

        Ok(StorageNotification {
            bucket,
            object_key,
            metadata,
            event_id,
            event_type,
        })
    }

    pub fn metageneration(&self) -> Option<&str> {
        self.metadata.get("metageneration").map(String::as_str)
    }

    pub fn time_created(&self) -> Option<&str> {
        self.metadata.get("timeCreated").map(String::as_str)
    }

    pub fn updated(&self) -> Option<&str> {
        self.metadata.get("updated").map(String::as_str)
    }
}

fn invalid(reason: impl Into<String>) -> IngestError {
    IngestError::InvalidNotification {
        reason: reason.into(),
    }
}

fn take_data(envelope: &mut Map<String, Value>) -> IngestResult<Map<String, Value>> {
    match envelope.remove("data") {
        Some(Value::Object(data)) => Ok(data),
        Some(_) => Err(invalid("`data` is not an object")),
        None => Err(invalid("missing `data`")),
    }
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> IngestResult<String> {
    match object.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) => Err(invalid(format!("`{key}` is empty"))),
        Some(_) => Err(invalid(format!("`{key}` is not a string"))),
        None => Err(invalid(format!("missing `{key}`"))),
    }
}
