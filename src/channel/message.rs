use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::ChannelError;

/// An inbound envelope: a mandatory `type` discriminator plus an opaque
/// payload (every other field of the JSON object).
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    kind: String,
    payload: Value,
}

impl InboundMessage {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Parse one text frame.
    pub fn parse(raw: &str) -> Result<Self, ChannelError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ChannelError::MalformedMessage {
                reason: e.to_string(),
            })?;
        let Value::Object(mut fields) = value else {
            return Err(ChannelError::MalformedMessage {
                reason: "expected a JSON object".to_string(),
            });
        };

        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            Some(_) => {
                return Err(ChannelError::MalformedMessage {
                    reason: "`type` must be a string".to_string(),
                });
            }
            None => {
                return Err(ChannelError::MalformedMessage {
                    reason: "missing `type` field".to_string(),
                });
            }
        };

        Ok(Self {
            kind,
            payload: Value::Object(fields),
        })
    }

    /// The discriminator used for routing.
    pub fn message_type(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Decode the payload into a caller type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ChannelError> {
        T::deserialize(&self.payload).map_err(|e| ChannelError::MalformedMessage {
            reason: format!("{} payload: {}", self.kind, e),
        })
    }

    /// Re-assemble the original envelope.
    pub fn to_value(&self) -> Value {
        let mut fields = match &self.payload {
            Value::Object(fields) => fields.clone(),
            _ => Map::new(),
        };
        fields.insert("type".to_string(), Value::String(self.kind.clone()));
        Value::Object(fields)
    }
}

/// Messages queued by an `on_connect` handler, sent as soon as it returns.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<String>,
}

impl Outbox {
    pub fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ChannelError> {
        let text =
            serde_json::to_string(message).map_err(|e| ChannelError::Serialize(e.to_string()))?;
        self.pending.push(text);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, String> {
        self.pending.drain(..)
    }
}
