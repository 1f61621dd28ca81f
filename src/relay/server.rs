use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use futures::SinkExt;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::frame;
use super::frame::RelayFrame;
use super::frame::RelayFramed;
use super::registry::ClientId;
use super::registry::Delivery;
use super::registry::Registry;

/// Frames queued for one client before it is considered too slow and cut off.
pub const RELAY_OUTBOX_CAPACITY: usize = 256;

/// Shared state of a running relay.
#[derive(Debug, Default)]
pub struct Relay {
    registry: Mutex<Registry>,
    outboxes: Mutex<HashMap<ClientId, mpsc::Sender<RelayFrame>>>,
    next_client: AtomicU64,
}

impl Relay {
    /// Admit a new client link. Frames for it arrive on the returned receiver.
    /// The receiver closes early if the client stops draining it.
    pub fn add_client(&self) -> Result<(ClientId, mpsc::Receiver<RelayFrame>)> {
        let client = ClientId(self.next_client.fetch_add(1, Ordering::Relaxed));
        let (outbox_tx, outbox_rx) = mpsc::channel(RELAY_OUTBOX_CAPACITY);

        if let Ok(mut outboxes) = self.outboxes.lock() {
            outboxes.insert(client, outbox_tx);
        } else {
            bail!("Failed to lock relay outboxes");
        }

        Ok((client, outbox_rx))
    }

    pub fn dispatch(&self, client: ClientId, frame: RelayFrame) -> Result<()> {
        let deliveries = if let Ok(mut registry) = self.registry.lock() {
            registry.handle(client, frame)
        } else {
            bail!("Failed to lock relay registry");
        };
        self.deliver(deliveries)
    }

    pub fn remove_client(&self, client: ClientId) -> Result<()> {
        let deliveries = if let Ok(mut registry) = self.registry.lock() {
            registry.remove_client(client)
        } else {
            bail!("Failed to lock relay registry");
        };

        if let Ok(mut outboxes) = self.outboxes.lock() {
            outboxes.remove(&client);
        } else {
            bail!("Failed to lock relay outboxes");
        }

        self.deliver(deliveries)
    }

    pub fn endpoint_count(&self) -> usize {
        self.registry
            .lock()
            .map(|registry| registry.endpoint_count())
            .unwrap_or_default()
    }

    fn deliver(&self, deliveries: Vec<Delivery>) -> Result<()> {
        let Ok(mut outboxes) = self.outboxes.lock() else {
            bail!("Failed to lock relay outboxes");
        };

        for (client, frame) in deliveries {
            let Some(outbox) = outboxes.get(&client) else {
                debug!("No outbox for {client}; frame dropped");
                continue;
            };
            match outbox.try_send(frame) {
                Ok(()) => (),
                Err(TrySendError::Full(_)) => {
                    // dropping the sender closes the outbox, which ends the link
                    warn!("{client} is not keeping up; dropping its link");
                    outboxes.remove(&client);
                }
                Err(TrySendError::Closed(_)) => debug!("{client} is going away; frame dropped"),
            }
        }

        Ok(())
    }
}

/// Accept clients forever.
pub async fn serve(
    listener: TcpListener,
    relay: Arc<Relay>,
    max_frame_length: usize,
) -> Result<()> {
    info!("Relay listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer_address) = listener.accept().await?;
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            debug!("Client connected from {peer_address}");
            match handle_client(stream, relay, max_frame_length).await {
                Ok(()) => (),
                Err(e) => warn!("Client {peer_address} failed: {e:#}"),
            }
            debug!("Client {peer_address} left");
        });
    }
}

/// Run one client link until it closes.
pub async fn handle_client<S>(stream: S, relay: Arc<Relay>, max_frame_length: usize) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = frame::framed(stream, max_frame_length);
    let (client, mut outbox) = relay.add_client()?;

    let result = client_loop(&mut framed, &relay, client, &mut outbox).await;

    if let Err(e) = relay.remove_client(client) {
        error!("Failed to remove {client}: {e}");
    }

    result
}

async fn client_loop<S>(
    framed: &mut RelayFramed<S>,
    relay: &Relay,
    client: ClientId,
    outbox: &mut mpsc::Receiver<RelayFrame>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            outgoing = outbox.recv() => {
                let Some(frame) = outgoing else {
                    bail!("{client} fell too far behind");
                };
                framed
                    .send(frame)
                    .await
                    .with_context(|| format!("Failed to write to {client}"))?;
            }

            incoming = framed.next() => {
                match incoming {
                    Some(Ok(frame)) => relay.dispatch(client, frame)?,
                    Some(Err(e)) => {
                        let reason = "malformed or oversized frame".to_owned();
                        let _ = framed.send(RelayFrame::Error { reason }).await;
                        return Err(e).context(format!("Bad frame from {client}"));
                    }
                    None => {
                        debug!("{client} closed its link");
                        return Ok(());
                    }
                }
            }
        }
    }
}
