//! Messages exchanged between the two ends of an established connection.
//!
//! Payloads are JSON objects tagged by a `type` field. The transport is
//! expected to preserve message boundaries, so no framing happens here.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::models::message::ChatMessage;
use crate::models::message::MessageId;
use crate::models::message::Sender;
use crate::models::session_code::SessionCode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionMessage {
    /// Sent by both ends as soon as a connection is usable. Purely
    /// informational; nothing waits for it.
    Handshake { code: SessionCode },

    Message(WireChatMessage),
}

/// A live message as carried on the wire. Everything but the content is
/// optional on receipt, and an optional field of the wrong shape counts as
/// missing; the receiver fills in what is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireChatMessage {
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<MessageId>,

    pub content: String,

    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub sender: Option<Sender>,

    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<u64>,
}

/// Read an optional field, treating a value that does not fit as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl From<&ChatMessage> for WireChatMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            id: Some(message.id.clone()),
            content: message.content.clone(),
            sender: Some(message.sender),
            timestamp: Some(message.timestamp),
        }
    }
}

impl SessionMessage {
    pub fn handshake(code: SessionCode) -> Self {
        Self::Handshake { code }
    }

    pub fn chat(message: &ChatMessage) -> Self {
        Self::Message(message.into())
    }

    pub fn get_type(&self) -> &'static str {
        match self {
            SessionMessage::Handshake { .. } => "handshake",
            SessionMessage::Message(_) => "message",
        }
    }

    pub fn encode(&self) -> Value {
        // serializing a plain data enum into a `Value` cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Interpret an inbound payload. Anything unrecognized or malformed is
    /// dropped; there is no error channel back to the sender.
    pub fn decode(payload: &Value) -> Option<Self> {
        match serde_json::from_value::<Self>(payload.clone()) {
            Ok(SessionMessage::Message(message)) if message.content.is_empty() => {
                debug!("Ignoring message payload without content");
                None
            }
            Ok(message) => Some(message),
            Err(err) => {
                debug!("Ignoring unrecognized payload: {err}");
                None
            }
        }
    }
}

impl WireChatMessage {
    /// Turn a received record into the locally stored message, generating an
    /// id and timestamp when the peer did not send them.
    pub fn into_received(self, now_millis: u64) -> ChatMessage {
        ChatMessage {
            id: self.id.unwrap_or_else(MessageId::random),
            content: self.content,
            sender: Sender::Peer,
            timestamp: self.timestamp.unwrap_or(now_millis),
        }
    }
}
