use std::fmt::Display;

use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

/// Longest outgoing message, counted in characters.
pub const MAX_MESSAGE_CHARS: usize = 100;

/// Opaque per-message token. Locally created ids are 128 random bits in
/// lowercase hex; ids received from a peer are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn random() -> Self {
        let bits: u128 = rand::rng().random();
        Self(format!("{bits:032x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Sender {
    /// Written on this side of the session.
    #[serde(rename = "self")]
    #[strum(serialize = "self")]
    Local,

    Peer,
}

/// The live message. A session holds at most one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub content: String,
    pub sender: Sender,

    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ChatMessage {
    pub fn new_local(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::random(),
            content: content.into(),
            sender: Sender::Local,
            timestamp: now_millis(),
        }
    }
}

pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}
