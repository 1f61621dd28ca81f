//! The task that owns a [`PeerSession`].
//!
//! Commands from the handle, events from the transport and the dial deadline
//! are all served by one `select!` loop, so the session is never touched
//! from two places at once.

use tokio::select;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tokio::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;

use crate::config_models::session_config::SessionConfig;
use crate::models::channel::SessionCommand;
use crate::models::message::ChatMessage;
use crate::models::session_code::CodeGenerator;
use crate::session::DialAttempt;
use crate::session::PeerSession;
use crate::session::SessionError;
use crate::session::SessionEvent;
use crate::session::SessionSnapshot;
use crate::session::ValidationError;
use crate::transport::Transport;
use crate::transport::TransportEvent;

pub const SESSION_CHANNEL_CAPACITY: usize = 16;

/// Handle to a running session. Dropping every clone shuts the session down.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn register(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Register)
            .await
            .unwrap_or(Err(ended()))
    }

    pub async fn connect(&self, target: &str) -> Result<(), SessionError> {
        let target = target.to_owned();
        self.request(|reply| SessionCommand::Connect(target, reply))
            .await
            .unwrap_or(Err(ended()))
    }

    pub async fn send(&self, content: &str) -> Result<ChatMessage, SessionError> {
        let content = content.to_owned();
        self.request(|reply| SessionCommand::Send(content, reply))
            .await
            .unwrap_or(Err(ended()))
    }

    pub async fn disconnect(&self) {
        let _ = self.request(SessionCommand::Disconnect).await;
    }

    /// Stop the session task and wait until it has released the transport.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        while self.snapshots.changed().await.is_ok() {}
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> SessionCommand,
    ) -> Option<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands.send(command(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }
}

fn ended() -> SessionError {
    ValidationError::SessionEnded.into()
}

#[derive(Debug)]
pub struct SessionDriver<T, G> {
    session: PeerSession<T, G>,
    commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::Receiver<TransportEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
    dial_timeout: Duration,
    dial_deadline: Option<(DialAttempt, Instant)>,
}

impl<T, G> SessionDriver<T, G>
where
    T: Transport + 'static,
    G: CodeGenerator + 'static,
{
    pub fn spawn(
        session: PeerSession<T, G>,
        events: mpsc::Receiver<TransportEvent>,
        config: &SessionConfig,
    ) -> (SessionHandle, JoinHandle<()>) {
        let session = session.with_max_message_chars(config.max_message_chars);
        let (commands_tx, commands_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let (snapshots_tx, snapshots_rx) = watch::channel(session.snapshot());

        let driver = Self {
            session,
            commands: commands_rx,
            events,
            snapshots: snapshots_tx,
            dial_timeout: config.dial_timeout,
            dial_deadline: None,
        };
        let join_handle = tokio::spawn(driver.run());

        let handle = SessionHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        };
        (handle, join_handle)
    }

    async fn run(mut self) {
        info!("Session {} started", self.session.local_code());

        loop {
            select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },

                Some(event) = self.events.recv() => {
                    self.session.handle_event(event.into());
                }

                attempt = wait_for_deadline(self.dial_deadline) => {
                    self.dial_deadline = None;
                    self.session.handle_event(SessionEvent::DialTimeout(attempt));
                }
            }

            if self.session.pending_dial().is_none() {
                self.dial_deadline = None;
            }
            self.publish();
        }

        self.session.teardown();
        self.publish();
        info!("Session {} stopped", self.session.local_code());
    }

    /// Replies go out after the resulting snapshot is published, so a caller
    /// that got an answer never observes an older state.
    fn handle_command(&mut self, command: SessionCommand) {
        debug!("Handling command: {}", command.get_type());
        match command {
            SessionCommand::Register(reply) => {
                let result = self.session.register();
                self.publish();
                let _ = reply.send(result);
            }
            SessionCommand::Connect(target, reply) => {
                let result = self.session.connect(&target).map(|attempt| {
                    self.dial_deadline = Some((attempt, Instant::now() + self.dial_timeout));
                });
                self.publish();
                let _ = reply.send(result);
            }
            SessionCommand::Send(content, reply) => {
                let result = self.session.send(&content);
                self.publish();
                let _ = reply.send(result);
            }
            SessionCommand::Disconnect(reply) => {
                self.session.disconnect();
                self.publish();
                let _ = reply.send(());
            }
            SessionCommand::Shutdown => (),
        }
    }

    fn publish(&self) {
        let snapshot = self.session.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn wait_for_deadline(deadline: Option<(DialAttempt, Instant)>) -> DialAttempt {
    match deadline {
        Some((attempt, at)) => {
            sleep_until(at).await;
            attempt
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::models::endpoint::EndpointId;
    use crate::models::session_code::FixedCodes;
    use crate::models::status::ConnectionStatus;
    use crate::tests::shared::code;
    use crate::tests::shared::RecordingTransport;
    use crate::tests::shared::TransportCall;
    use crate::transport::ConnectionId;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn start(
        transport: &RecordingTransport,
    ) -> (SessionHandle, mpsc::Sender<TransportEvent>) {
        let session = PeerSession::new(transport.clone(), FixedCodes::new([code("AB3X7Q")]));
        let (events_tx, events_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let config = SessionConfig {
            dial_timeout: TIMEOUT,
            ..Default::default()
        };
        let (handle, _join) = SessionDriver::spawn(session, events_rx, &config);
        (handle, events_tx)
    }

    /// The connection id the recording transport handed out for the n-th dial.
    fn nth_dial(n: u64) -> ConnectionId {
        ConnectionId(100 + n)
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn dial_times_out_after_configured_wait() {
        let transport = RecordingTransport::default();
        let (handle, _events) = start(&transport);
        handle.register().await.unwrap();
        handle.connect("ZZ9988").await.unwrap();
        assert_eq!(ConnectionStatus::Connecting, handle.snapshot().status);

        tokio::time::sleep(TIMEOUT - Duration::from_millis(1)).await;
        assert_eq!(ConnectionStatus::Connecting, handle.snapshot().status);

        let mut snapshots = handle.subscribe();
        let snapshot = snapshots
            .wait_for(|s| s.status == ConnectionStatus::Idle)
            .await
            .unwrap()
            .clone();
        assert_eq!(Some(SessionError::DialTimeout), snapshot.last_error);
        assert_eq!(None, snapshot.peer_code);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn late_opening_after_timeout_is_closed() {
        let transport = RecordingTransport::default();
        let (handle, events) = start(&transport);
        handle.register().await.unwrap();
        handle.connect("ZZ9988").await.unwrap();

        tokio::time::sleep(TIMEOUT * 2).await;
        assert_eq!(Some(SessionError::DialTimeout), handle.snapshot().last_error);

        events.send(TransportEvent::Opened(nth_dial(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(transport.closed().contains(&nth_dial(1)));
        assert_eq!(ConnectionStatus::Idle, handle.snapshot().status);
        assert!(transport.sent_on(nth_dial(1)).is_empty());
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn opening_in_time_cancels_the_deadline() {
        let transport = RecordingTransport::default();
        let (handle, events) = start(&transport);
        handle.register().await.unwrap();
        handle.connect("ZZ9988").await.unwrap();
        events.send(TransportEvent::Opened(nth_dial(1))).await.unwrap();

        let mut snapshots = handle.subscribe();
        snapshots
            .wait_for(|s| s.status == ConnectionStatus::Connected)
            .await
            .unwrap();

        tokio::time::sleep(TIMEOUT * 2).await;
        let snapshot = handle.snapshot();
        assert_eq!(ConnectionStatus::Connected, snapshot.status);
        assert_eq!(None, snapshot.last_error);
    }

    #[traced_test]
    #[tokio::test]
    async fn messages_flow_through_the_handle() {
        let transport = RecordingTransport::default();
        let (handle, events) = start(&transport);
        handle.register().await.unwrap();

        events
            .send(TransportEvent::InboundConnection {
                conn: ConnectionId(1),
                remote: EndpointId::from_raw("vanish-ZZ9988"),
            })
            .await
            .unwrap();
        events.send(TransportEvent::Opened(ConnectionId(1))).await.unwrap();

        let mut snapshots = handle.subscribe();
        snapshots
            .wait_for(|s| s.status == ConnectionStatus::Connected)
            .await
            .unwrap();
        assert_eq!(Some(code("ZZ9988")), handle.snapshot().peer_code);

        let sent = handle.send("hello").await.unwrap();
        assert_eq!(Some(sent), handle.snapshot().current_message);

        assert_eq!(
            Err(SessionError::Validation(ValidationError::EmptyMessage)),
            handle.send("   ").await
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn shutdown_releases_the_transport() {
        let transport = RecordingTransport::default();
        let (handle, _events) = start(&transport);
        handle.register().await.unwrap();

        let other = handle.clone();
        handle.shutdown().await;

        assert_eq!(Some(TransportCall::Unregister), transport.calls().pop());
        assert_eq!(Err(ended()), other.connect("ZZ9988").await);
    }
}
