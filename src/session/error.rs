/// Input the session refuses outright. Nothing changes state except the
/// recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Enter a valid 6-character code")]
    InvalidCode,

    #[error("Cannot connect to yourself")]
    SelfConnect,

    #[error("Not ready. Please wait...")]
    NotReady,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Already connecting. Please wait...")]
    DialInProgress,

    #[error("This session has ended. Start a new one to connect again")]
    SessionEnded,

    #[error("Not connected")]
    NotConnected,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message too long (max {max} characters)")]
    MessageTooLong { max: usize },
}

/// Every failure a caller can observe, one category per distinct next step.
///
/// `ConnectionLost` and `TransportFailure` end the session; everything else
/// leaves it usable for a caller-initiated retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Code conflict. Generated new code.")]
    RegistrationCollision,

    #[error("Peer not found. Check the code.")]
    PeerUnavailable,

    #[error("Peer refused the connection. They may already be in a session.")]
    ConnectionRefused,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Connection failed. Try again.")]
    TransportFailure,

    #[error("Connection timeout. Peer may not be ready.")]
    DialTimeout,
}

impl SessionError {
    pub fn ends_session(self) -> bool {
        matches!(self, Self::ConnectionLost | Self::TransportFailure)
    }
}
