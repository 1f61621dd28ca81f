//! Boundary to the layer that moves payloads between two endpoints.
//!
//! A session drives the transport through [`Transport`] calls and learns
//! about everything asynchronous (inbound connections, openings, data,
//! closings, errors) from [`TransportEvent`]s delivered on a channel.

use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::models::endpoint::EndpointId;
use crate::protocol::SessionMessage;

/// Handle of one connection, unique for the lifetime of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Outcome of a registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The endpoint is claimed.
    Complete,

    /// The answer arrives later as [`TransportEvent::Registered`] or
    /// [`TransportEvent::RegistrationFailed`].
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("endpoint {0} is already taken")]
    EndpointTaken(EndpointId),

    #[error("no endpoint is registered")]
    NotRegistered,

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("transport is gone: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Registered(EndpointId),

    RegistrationFailed(TransportError),

    /// Someone dialled our endpoint. `remote` is their raw identifier.
    InboundConnection {
        conn: ConnectionId,
        remote: EndpointId,
    },

    /// The connection can carry payloads.
    Opened(ConnectionId),

    Data {
        conn: ConnectionId,
        payload: Value,
    },

    Closed(ConnectionId),

    /// The dialled endpoint is not registered.
    PeerUnavailable {
        conn: ConnectionId,
        target: EndpointId,
    },

    ConnectionError {
        conn: ConnectionId,
        reason: String,
    },

    /// The transport itself failed; every connection is gone.
    TransportLost(String),
}

impl TransportEvent {
    pub fn get_type(&self) -> &'static str {
        match self {
            TransportEvent::Registered(_) => "registered",
            TransportEvent::RegistrationFailed(_) => "registration failed",
            TransportEvent::InboundConnection { .. } => "inbound connection",
            TransportEvent::Opened(_) => "opened",
            TransportEvent::Data { .. } => "data",
            TransportEvent::Closed(_) => "closed",
            TransportEvent::PeerUnavailable { .. } => "peer unavailable",
            TransportEvent::ConnectionError { .. } => "connection error",
            TransportEvent::TransportLost(_) => "transport lost",
        }
    }
}

/// Operations a session needs from the transport. All calls return
/// immediately; completion is reported through [`TransportEvent`]s.
pub trait Transport: Send {
    fn register(&mut self, endpoint: &EndpointId) -> Result<Registration, TransportError>;

    fn unregister(&mut self);

    /// Start connecting to `target`. The returned handle identifies the
    /// attempt in later events.
    fn dial(&mut self, target: &EndpointId) -> Result<ConnectionId, TransportError>;

    /// Answer an inbound connection, letting it open on both ends.
    fn accept(&mut self, conn: ConnectionId) -> Result<(), TransportError>;

    fn send(&mut self, conn: ConnectionId, message: &SessionMessage) -> Result<(), TransportError>;

    fn close(&mut self, conn: ConnectionId);
}
