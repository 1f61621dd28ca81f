//! [`Transport`] implementation on top of a relay link.

use std::net::SocketAddr;

use anyhow::Context;
use anyhow::Result;
use futures::SinkExt;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::frame;
use super::frame::RelayFrame;
use crate::models::endpoint::EndpointId;
use crate::protocol::SessionMessage;
use crate::transport::ConnectionId;
use crate::transport::Registration;
use crate::transport::Transport;
use crate::transport::TransportError;
use crate::transport::TransportEvent;

/// Frames or events buffered in either direction of a relay link.
pub const LINK_CHANNEL_CAPACITY: usize = 64;

/// Client end of a relay link. Calls only enqueue frames; answers come back
/// as [`TransportEvent`]s on the receiver handed out with the transport.
#[derive(Debug, Clone)]
pub struct RelayTransport {
    outbound: mpsc::Sender<RelayFrame>,
}

impl RelayTransport {
    pub async fn connect(
        relay_address: SocketAddr,
        max_frame_length: usize,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let stream = TcpStream::connect(relay_address)
            .await
            .with_context(|| format!("Failed to connect to relay at {relay_address}"))?;
        info!("Connected to relay at {relay_address}");

        Ok(Self::spawn(stream, max_frame_length))
    }

    /// Run the link over an already established stream.
    pub fn spawn<S>(stream: S, max_frame_length: usize) -> (Self, mpsc::Receiver<TransportEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut sink, mut stream) = frame::framed(Box::pin(stream), max_frame_length).split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<RelayFrame>(LINK_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    warn!("Failed to write to relay: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("Relay writer finished");
        });

        tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(frame)) => {
                        let Some(event) = to_event(frame) else {
                            continue;
                        };
                        if event_tx.send(event).await.is_err() {
                            debug!("No one listens to relay events any more");
                            return;
                        }
                    }
                    Some(Err(e)) => break format!("relay link failed: {e}"),
                    None => break "relay closed the link".to_owned(),
                }
            };
            info!("Relay link lost: {reason}");
            let _ = event_tx.send(TransportEvent::TransportLost(reason)).await;
        });

        (
            Self {
                outbound: outbound_tx,
            },
            event_rx,
        )
    }

    /// Never waits: a full queue means the relay link has stalled.
    fn enqueue(&self, frame: RelayFrame) -> Result<(), TransportError> {
        self.outbound.try_send(frame).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "relay link is not draining",
                TrySendError::Closed(_) => "relay link is closed",
            };
            TransportError::Unavailable(reason.to_owned())
        })
    }
}

fn to_event(frame: RelayFrame) -> Option<TransportEvent> {
    let event = match frame {
        RelayFrame::Registered { endpoint } => TransportEvent::Registered(endpoint),
        RelayFrame::EndpointTaken { endpoint } => {
            TransportEvent::RegistrationFailed(TransportError::EndpointTaken(endpoint))
        }
        RelayFrame::Incoming { conn, from } => {
            TransportEvent::InboundConnection { conn, remote: from }
        }
        RelayFrame::Open { conn } => TransportEvent::Opened(conn),
        RelayFrame::PeerUnavailable { conn, target } => {
            TransportEvent::PeerUnavailable { conn, target }
        }
        RelayFrame::Data { conn, payload } => TransportEvent::Data { conn, payload },
        RelayFrame::Close { conn } => TransportEvent::Closed(conn),
        RelayFrame::Error { reason } => {
            warn!("Relay reported an error: {reason}");
            return None;
        }
        other => {
            debug!("Ignoring {} frame from relay", other.get_type());
            return None;
        }
    };
    Some(event)
}

impl Transport for RelayTransport {
    fn register(&mut self, endpoint: &EndpointId) -> Result<Registration, TransportError> {
        self.enqueue(RelayFrame::Register {
            endpoint: endpoint.clone(),
        })?;
        Ok(Registration::Pending)
    }

    fn unregister(&mut self) {
        let _ = self.enqueue(RelayFrame::Unregister);
    }

    fn dial(&mut self, target: &EndpointId) -> Result<ConnectionId, TransportError> {
        let conn = ConnectionId::random();
        self.enqueue(RelayFrame::Dial {
            conn,
            target: target.clone(),
        })?;
        Ok(conn)
    }

    fn accept(&mut self, conn: ConnectionId) -> Result<(), TransportError> {
        self.enqueue(RelayFrame::Accept { conn })
    }

    fn send(&mut self, conn: ConnectionId, message: &SessionMessage) -> Result<(), TransportError> {
        self.enqueue(RelayFrame::Data {
            conn,
            payload: message.encode(),
        })
    }

    fn close(&mut self, conn: ConnectionId) {
        let _ = self.enqueue(RelayFrame::Close { conn });
    }
}
