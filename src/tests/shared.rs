use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use bytes::Bytes;
use bytes::BytesMut;
use tokio_serde::formats::SymmetricalJson;
use tokio_serde::Serializer;
use tokio_util::codec::Encoder;
use tokio_util::codec::LengthDelimitedCodec;

use crate::models::endpoint::EndpointId;
use crate::models::session_code::SessionCode;
use crate::protocol::SessionMessage;
use crate::relay::frame::RelayFrame;
use crate::transport::ConnectionId;
use crate::transport::Registration;
use crate::transport::Transport;
use crate::transport::TransportError;

pub(crate) fn code(s: &str) -> SessionCode {
    s.parse().unwrap()
}

/// Encode a frame exactly as it appears on a relay link.
pub(crate) fn to_bytes(frame: &RelayFrame) -> Result<Bytes> {
    let mut transport = LengthDelimitedCodec::new();
    let mut formatting = SymmetricalJson::<RelayFrame>::default();
    let mut buf = BytesMut::new();
    transport.encode(Pin::new(&mut formatting).serialize(frame)?, &mut buf)?;
    Ok(buf.freeze())
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransportCall {
    Register(EndpointId),
    Unregister,
    Dial(EndpointId),
    Accept(ConnectionId),
    Send(ConnectionId, SessionMessage),
    Close(ConnectionId),
}

/// A transport that does nothing but write down what it was asked to do.
/// Clones share the same log.
#[derive(Debug, Clone)]
pub(crate) struct RecordingTransport {
    pub(crate) registration: Result<Registration, TransportError>,
    next_conn: u64,
    log: Arc<Mutex<Vec<TransportCall>>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            registration: Ok(Registration::Complete),
            next_conn: 100,
            log: Arc::default(),
        }
    }
}

impl RecordingTransport {
    pub(crate) fn calls(&self) -> Vec<TransportCall> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn dialled(&self) -> Vec<EndpointId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Dial(target) => Some(target),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn closed(&self) -> Vec<ConnectionId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Close(conn) => Some(conn),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn sent_on(&self, conn: ConnectionId) -> Vec<SessionMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Send(c, message) if c == conn => Some(message),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TransportCall) {
        self.log.lock().unwrap().push(call);
    }
}

impl Transport for RecordingTransport {
    fn register(&mut self, endpoint: &EndpointId) -> Result<Registration, TransportError> {
        self.record(TransportCall::Register(endpoint.clone()));
        self.registration.clone()
    }

    fn unregister(&mut self) {
        self.record(TransportCall::Unregister);
    }

    fn dial(&mut self, target: &EndpointId) -> Result<ConnectionId, TransportError> {
        self.record(TransportCall::Dial(target.clone()));
        self.next_conn += 1;
        Ok(ConnectionId(self.next_conn))
    }

    fn accept(&mut self, conn: ConnectionId) -> Result<(), TransportError> {
        self.record(TransportCall::Accept(conn));
        Ok(())
    }

    fn send(&mut self, conn: ConnectionId, message: &SessionMessage) -> Result<(), TransportError> {
        self.record(TransportCall::Send(conn, message.clone()));
        Ok(())
    }

    fn close(&mut self, conn: ConnectionId) {
        self.record(TransportCall::Close(conn));
    }
}
