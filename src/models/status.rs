use serde::Deserialize;
use serde::Serialize;

/// Caller-visible state of a session.
///
/// Whether the local identity is registered with the transport is tracked
/// separately (see `PeerSession::is_ready`); a registered session that has
/// not dialled anyone is still `Idle`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Idle,

    /// An outbound dial is pending.
    Connecting,

    Connected,

    /// A connection existed and has ended. The session cannot be reused.
    Disconnected,

    /// Registration or negotiation failed for good.
    Error,
}

impl ConnectionStatus {
    /// No further connections will be made or accepted from this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}
