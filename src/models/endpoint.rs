use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;

use super::session_code::CodeError;
use super::session_code::SessionCode;

/// Namespace every endpoint identifier lives in.
pub const ENDPOINT_PREFIX: &str = "vanish-";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("identifier {0:?} is outside the \"vanish-\" namespace")]
    ForeignNamespace(String),

    #[error("identifier carries an invalid code: {0}")]
    InvalidCode(#[from] CodeError),
}

/// Transport-level address of a session, derived from its [`SessionCode`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an identifier exactly as received from the transport, without
    /// checking that it belongs to the namespace.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn to_endpoint_id(code: &SessionCode) -> EndpointId {
    EndpointId(format!("{ENDPOINT_PREFIX}{code}"))
}

/// Recover the session code behind an identifier produced by
/// [`to_endpoint_id`].
pub fn from_endpoint_id(raw: &str) -> Result<SessionCode, EndpointError> {
    let Some(code) = raw.strip_prefix(ENDPOINT_PREFIX) else {
        return Err(EndpointError::ForeignNamespace(raw.to_owned()));
    };
    Ok(code.parse()?)
}
