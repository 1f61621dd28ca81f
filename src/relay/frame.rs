//! Frames exchanged between relay clients and the relay.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio_serde::formats::Json;
use tokio_serde::formats::SymmetricalJson;
use tokio_serde::SymmetricallyFramed;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;

use crate::models::endpoint::EndpointId;
use crate::transport::ConnectionId;

/// Default upper bound on an encoded frame.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum RelayFrame {
    // client to relay
    Register {
        endpoint: EndpointId,
    },
    Unregister,
    Dial {
        conn: ConnectionId,
        target: EndpointId,
    },
    Accept {
        conn: ConnectionId,
    },

    // both directions
    Data {
        conn: ConnectionId,
        payload: Value,
    },
    Close {
        conn: ConnectionId,
    },

    // relay to client
    Registered {
        endpoint: EndpointId,
    },
    EndpointTaken {
        endpoint: EndpointId,
    },
    Incoming {
        conn: ConnectionId,
        from: EndpointId,
    },
    Open {
        conn: ConnectionId,
    },
    PeerUnavailable {
        conn: ConnectionId,
        target: EndpointId,
    },
    Error {
        reason: String,
    },
}

impl RelayFrame {
    pub fn get_type(&self) -> &'static str {
        match self {
            RelayFrame::Register { .. } => "register",
            RelayFrame::Unregister => "unregister",
            RelayFrame::Dial { .. } => "dial",
            RelayFrame::Accept { .. } => "accept",
            RelayFrame::Data { .. } => "data",
            RelayFrame::Close { .. } => "close",
            RelayFrame::Registered { .. } => "registered",
            RelayFrame::EndpointTaken { .. } => "endpoint taken",
            RelayFrame::Incoming { .. } => "incoming",
            RelayFrame::Open { .. } => "open",
            RelayFrame::PeerUnavailable { .. } => "peer unavailable",
            RelayFrame::Error { .. } => "error",
        }
    }
}

pub type RelayFramed<S> =
    SymmetricallyFramed<Framed<S, LengthDelimitedCodec>, RelayFrame, Json<RelayFrame, RelayFrame>>;

/// Codec rules for frame delimiting.
pub fn get_codec_rules(max_frame_length: usize) -> LengthDelimitedCodec {
    let mut codec_rules = LengthDelimitedCodec::new();
    codec_rules.set_max_frame_length(max_frame_length);
    codec_rules
}

/// Wrap a byte stream into a stream and sink of [`RelayFrame`]s.
pub fn framed<S>(stream: S, max_frame_length: usize) -> RelayFramed<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let length_delimited = Framed::new(stream, get_codec_rules(max_frame_length));
    SymmetricallyFramed::new(length_delimited, SymmetricalJson::default())
}
