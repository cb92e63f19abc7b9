//! Wire envelope for every frame the server emits.
//!
//! ```json
//! {"type": "task_created", "payload": {"id": "42", "title": "Write docs"}}
//! ```
//!
//! The payload is kept as raw JSON so a broadcast is serialized exactly once,
//! and every recipient shares the same text through an [`OutboundFrame`].

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::de::{Deserializer, Error as _};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Encoded envelope text, shared by every mailbox it is delivered to.
pub type OutboundFrame = Arc<str>;

/// Failed to serialize a payload into an envelope.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode envelope: {0}")]
pub struct EncodingError(#[from] serde_json::Error);

/// Kind of event an envelope carries.
///
/// Unknown tags survive a decode/encode cycle through [`MessageType::Other`].
/// Equality and hashing go by wire tag, so `Other("task_created")` equals
/// [`MessageType::TaskCreated`].
#[derive(Clone, Debug)]
pub enum MessageType {
    /// A task was created.
    TaskCreated,
    /// A task's fields changed.
    TaskUpdated,
    /// A task was removed.
    TaskDeleted,
    /// A task moved to another status column.
    TaskStatusChanged,
    /// Application-level keepalive from a peer.
    Ping,
    /// Reply to [`MessageType::Ping`].
    Pong,
    /// Any other tag, passed through verbatim.
    Other(String),
}

impl MessageType {
    /// Wire tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskDeleted => "task_deleted",
            Self::TaskStatusChanged => "task_status_changed",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Other(tag) => tag,
        }
    }

    /// Map a wire tag to a type. Never fails: unknown tags become `Other`.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "task_created" => Self::TaskCreated,
            "task_updated" => Self::TaskUpdated,
            "task_deleted" => Self::TaskDeleted,
            "task_status_changed" => Self::TaskStatusChanged,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            other => Self::Other(other.to_string()),
        }
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        Self::parse(tag)
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag.is_empty() {
            return Err(D::Error::custom("message type must not be empty"));
        }
        Ok(Self::parse(&tag))
    }
}

/// `{"type", "payload"}` envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Event kind.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Arbitrary JSON; `null` when the sender omitted it.
    #[serde(default = "null_payload")]
    pub payload: Box<RawValue>,
}

fn null_payload() -> Box<RawValue> {
    RawValue::NULL.to_owned()
}

impl Envelope {
    /// Wrap an already-encoded payload.
    pub fn new(message_type: MessageType, payload: Box<RawValue>) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    /// Serialize `payload` into a new envelope.
    pub fn with_payload<T: Serialize + ?Sized>(
        message_type: MessageType,
        payload: &T,
    ) -> Result<Self, EncodingError> {
        let payload = serde_json::value::to_raw_value(payload)?;
        Ok(Self::new(message_type, payload))
    }

    /// Parse an inbound text frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode into shareable frame text.
    pub fn to_frame(&self) -> Result<OutboundFrame, EncodingError> {
        let text = serde_json::to_string(self)?;
        Ok(Arc::from(text))
    }
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.message_type == other.message_type && self.payload.get() == other.payload.get()
    }
}

/// Serialize `{"type": message_type, "payload": payload}` into a frame.
///
/// The same inputs always produce byte-identical output.
pub fn encode<T: Serialize + ?Sized>(
    message_type: MessageType,
    payload: &T,
) -> Result<OutboundFrame, EncodingError> {
    Envelope::with_payload(message_type, payload)?.to_frame()
}

/// Task fields carried by `task_*` events.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    /// Task ID.
    pub id: String,
    /// Title, omitted on deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Status column the task sits in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
    /// Priority label such as `high`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Assigned user IDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    /// Label names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Anything else the producer attached.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TaskPayload {
    /// Payload carrying just a task ID.
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}
