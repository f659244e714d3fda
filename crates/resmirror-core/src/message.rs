//! Realtime protocol message types
//!
//! Outbound messages are join requests. Inbound messages are resource
//! events wrapped in a `{"data": {...}}` envelope; decoding never fails
//! loudly, it classifies the message instead.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{Link, ResourceData, ResourceKey, TargetId};
use crate::topic::Topic;

/// Messages sent to the realtime server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a topic room
    Join { topic: String },
}

impl ClientMessage {
    /// Create a join message
    pub fn join(topic: &Topic) -> Self {
        ClientMessage::Join {
            topic: topic.to_string(),
        }
    }

    /// Encode message as a JSON text frame
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("JSON encoding failed")
    }
}

/// A decoded resource event
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    /// A new resource now exists
    Create { key: ResourceKey, data: ResourceData },
    /// Fields of an existing resource changed
    Patch {
        resource_type: Option<String>,
        resource_id: String,
        set: ResourceData,
    },
    /// A link was appended under `relation`
    AddLink {
        resource_type: Option<String>,
        resource_id: String,
        relation: String,
        link: Link,
    },
    /// The resource was removed on the server
    Delete {
        resource_type: Option<String>,
        resource_id: String,
    },
}

impl ResourceEvent {
    pub fn action(&self) -> &'static str {
        match self {
            ResourceEvent::Create { .. } => "create",
            ResourceEvent::Patch { .. } => "patch",
            ResourceEvent::AddLink { .. } => "add_link",
            ResourceEvent::Delete { .. } => "delete",
        }
    }

    pub fn resource_id(&self) -> &str {
        match self {
            ResourceEvent::Create { key, .. } => &key.resource_id,
            ResourceEvent::Patch { resource_id, .. }
            | ResourceEvent::AddLink { resource_id, .. }
            | ResourceEvent::Delete { resource_id, .. } => resource_id,
        }
    }

    pub fn resource_type(&self) -> Option<&str> {
        match self {
            ResourceEvent::Create { key, .. } => Some(&key.resource_type),
            ResourceEvent::Patch { resource_type, .. }
            | ResourceEvent::AddLink { resource_type, .. }
            | ResourceEvent::Delete { resource_type, .. } => resource_type.as_deref(),
        }
    }
}

/// Outcome of decoding one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(ResourceEvent),
    /// Well-formed envelope with an action this client does not handle
    Unrecognized { action: String },
    /// Missing or mistyped fields; the frame is dropped
    Malformed { reason: String },
    /// Envelope whose payload is not an event object (e.g. a greeting)
    NotAnEvent,
}

#[derive(Deserialize)]
struct Envelope {
    data: Value,
}

#[derive(Deserialize)]
struct CreateFields {
    resource_id: String,
    resource_data: ResourceData,
}

#[derive(Deserialize)]
struct PatchBody {
    #[serde(rename = "$set")]
    set: ResourceData,
}

#[derive(Deserialize)]
struct PatchFields {
    resource_id: String,
    patch: PatchBody,
}

#[derive(Deserialize)]
struct AddLinkFields {
    resource_id: String,
    relation: String,
    title: String,
    target_id: TargetId,
}

#[derive(Deserialize)]
struct DeleteFields {
    resource_id: String,
}

/// Decode an inbound text frame
pub fn decode(raw: &str) -> Decoded {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Decoded::Malformed {
                reason: format!("invalid envelope: {}", e),
            }
        }
    };

    let Value::Object(data) = envelope.data else {
        return Decoded::NotAnEvent;
    };

    let action = match data.get("action") {
        Some(Value::String(action)) => action.clone(),
        Some(_) => {
            return Decoded::Malformed {
                reason: "action is not a string".to_string(),
            }
        }
        None => {
            return Decoded::Malformed {
                reason: "missing action".to_string(),
            }
        }
    };

    // The server stamps events with `resource_name`; `resource_type` wins if both are present
    let resource_type = ["resource_type", "resource_name"]
        .iter()
        .find_map(|field| data.get(*field).and_then(Value::as_str))
        .map(str::to_string);

    let event = match action.as_str() {
        "create" => {
            let Some(resource_type) = resource_type else {
                return Decoded::Malformed {
                    reason: "create without resource_type".to_string(),
                };
            };
            fields::<CreateFields>(data, &action).map(|f| ResourceEvent::Create {
                key: ResourceKey::new(resource_type, f.resource_id),
                data: f.resource_data,
            })
        }
        "patch" => fields::<PatchFields>(data, &action).map(|f| ResourceEvent::Patch {
            resource_type,
            resource_id: f.resource_id,
            set: f.patch.set,
        }),
        "add_link" => fields::<AddLinkFields>(data, &action).map(|f| ResourceEvent::AddLink {
            resource_type,
            resource_id: f.resource_id,
            relation: f.relation,
            link: Link {
                title: f.title,
                target_id: f.target_id,
            },
        }),
        "delete" => fields::<DeleteFields>(data, &action).map(|f| ResourceEvent::Delete {
            resource_type,
            resource_id: f.resource_id,
        }),
        _ => {
            return Decoded::Unrecognized {
                action: action.clone(),
            }
        }
    };

    match event {
        Ok(event) => Decoded::Event(event),
        Err(reason) => Decoded::Malformed { reason },
    }
}

fn fields<T: DeserializeOwned>(data: Map<String, Value>, action: &str) -> Result<T, String> {
    serde_json::from_value(Value::Object(data)).map_err(|e| format!("{} event: {}", action, e))
}
