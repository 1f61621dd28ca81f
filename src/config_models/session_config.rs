use std::net::SocketAddr;
use std::time::Duration;

use anyhow::ensure;
use anyhow::Result;

use super::cli_args::ChatArgs;
use super::cli_args::RelayArgs;
use crate::models::message::MAX_MESSAGE_CHARS;
use crate::relay::frame::DEFAULT_MAX_FRAME_LENGTH;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames must at least fit a full-length message and its envelope.
const MIN_FRAME_LENGTH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a caller waits for a dial before giving up.
    pub dial_timeout: Duration,

    pub max_message_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            max_message_chars: MAX_MESSAGE_CHARS,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.dial_timeout.is_zero(),
            "dial timeout must be positive"
        );
        ensure!(
            self.max_message_chars > 0,
            "messages must allow at least one character"
        );
        Ok(())
    }
}

impl From<&ChatArgs> for SessionConfig {
    fn from(args: &ChatArgs) -> Self {
        Self {
            dial_timeout: args.dial_timeout,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub max_frame_length: usize,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_frame_length >= MIN_FRAME_LENGTH,
            "max frame length must be at least {MIN_FRAME_LENGTH} bytes, got {}",
            self.max_frame_length
        );
        Ok(())
    }
}

impl From<&RelayArgs> for RelayConfig {
    fn from(args: &RelayArgs) -> Self {
        Self {
            listen: args.listen,
            max_frame_length: args.max_frame_length,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 9797)),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}
