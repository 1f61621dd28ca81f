//! The peer session state machine.
//!
//! A [`PeerSession`] owns one local identity, at most one connection and the
//! single live message. Caller intent arrives through method calls
//! (`connect`, `send`, `disconnect`, ...); everything the transport reports
//! arrives through [`PeerSession::handle_event`]. Both paths are expected to
//! be serialized by the owner, see [`crate::session_loop`].

pub mod error;

pub use error::SessionError;
pub use error::ValidationError;
use serde_json::Value;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::models::endpoint::from_endpoint_id;
use crate::models::endpoint::to_endpoint_id;
use crate::models::endpoint::EndpointId;
use crate::models::message::now_millis;
use crate::models::message::ChatMessage;
use crate::models::message::MAX_MESSAGE_CHARS;
use crate::models::session_code::CodeGenerator;
use crate::models::session_code::SessionCode;
use crate::models::status::ConnectionStatus;
use crate::protocol::SessionMessage;
use crate::transport::ConnectionId;
use crate::transport::Registration;
use crate::transport::Transport;
use crate::transport::TransportError;
use crate::transport::TransportEvent;

/// How many codes are drawn after a collision before giving up on finding
/// one that differs from the taken code.
const MAX_CODE_DRAWS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// The one connection a session may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub peer_code: SessionCode,
    pub direction: Direction,

    /// Set once the transport reports the connection usable.
    pub open: bool,
}

/// Identifies one dial attempt, so that a timer armed for an earlier attempt
/// cannot give up on a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DialAttempt(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDial {
    pub target: SessionCode,
    pub attempt: DialAttempt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Transport(TransportEvent),

    /// The caller-visible wait for a dial ran out.
    DialTimeout(DialAttempt),
}

impl From<TransportEvent> for SessionEvent {
    fn from(event: TransportEvent) -> Self {
        Self::Transport(event)
    }
}

/// What a caller can observe about a session at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub local_code: SessionCode,
    pub peer_code: Option<SessionCode>,
    pub status: ConnectionStatus,
    pub ready: bool,
    pub current_message: Option<ChatMessage>,
    pub last_error: Option<SessionError>,
}

#[derive(Debug)]
pub struct PeerSession<T, G> {
    transport: T,
    code_generator: G,
    local_code: SessionCode,
    ready: bool,
    status: ConnectionStatus,
    connection: Option<Connection>,
    pending_dial: Option<PendingDial>,
    dial_attempts: u64,
    peer_code: Option<SessionCode>,
    current_message: Option<ChatMessage>,
    last_error: Option<SessionError>,
    max_message_chars: usize,
}

impl<T: Transport, G: CodeGenerator> PeerSession<T, G> {
    pub fn new(transport: T, mut code_generator: G) -> Self {
        let local_code = code_generator.generate();
        Self {
            transport,
            code_generator,
            local_code,
            ready: false,
            status: ConnectionStatus::Idle,
            connection: None,
            pending_dial: None,
            dial_attempts: 0,
            peer_code: None,
            current_message: None,
            last_error: None,
            max_message_chars: MAX_MESSAGE_CHARS,
        }
    }

    pub fn with_max_message_chars(mut self, max_message_chars: usize) -> Self {
        self.max_message_chars = max_message_chars;
        self
    }

    pub fn local_code(&self) -> SessionCode {
        self.local_code
    }

    pub fn local_endpoint(&self) -> EndpointId {
        to_endpoint_id(&self.local_code)
    }

    pub fn peer_code(&self) -> Option<SessionCode> {
        self.peer_code
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// The local identity is registered; connections can be made and taken.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn pending_dial(&self) -> Option<PendingDial> {
        self.pending_dial
    }

    pub fn current_message(&self) -> Option<&ChatMessage> {
        self.current_message.as_ref()
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.last_error
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            local_code: self.local_code,
            peer_code: self.peer_code,
            status: self.status,
            ready: self.ready,
            current_message: self.current_message.clone(),
            last_error: self.last_error,
        }
    }

    /// Claim the endpoint derived from the local code.
    ///
    /// On a collision the code is replaced by a fresh one and the error is
    /// returned; calling `register` again claims the new code.
    pub fn register(&mut self) -> Result<(), SessionError> {
        if self.status.is_terminal() {
            return Err(self.reject(ValidationError::SessionEnded));
        }
        if self.ready {
            return Ok(());
        }

        let endpoint = self.local_endpoint();
        debug!("Registering as {endpoint}");
        self.last_error = None;
        match self.transport.register(&endpoint) {
            Ok(Registration::Complete) => {
                self.on_registered(&endpoint);
                Ok(())
            }
            Ok(Registration::Pending) => Ok(()),
            Err(err) => {
                self.on_registration_failed(err);
                Err(self.last_error.unwrap_or(SessionError::TransportFailure))
            }
        }
    }

    /// Dial the session identified by `target`.
    ///
    /// Returns as soon as the dial is issued. The outcome arrives later as
    /// transport events, or as [`SessionEvent::DialTimeout`] for the returned
    /// attempt if the owner's timer runs out first.
    pub fn connect(&mut self, target: &str) -> Result<DialAttempt, SessionError> {
        let Ok(target) = target.parse::<SessionCode>() else {
            return Err(self.reject(ValidationError::InvalidCode));
        };
        if target == self.local_code {
            return Err(self.reject(ValidationError::SelfConnect));
        }
        if self.status.is_terminal() {
            return Err(self.reject(ValidationError::SessionEnded));
        }
        if !self.ready {
            return Err(self.reject(ValidationError::NotReady));
        }
        if self.is_connected() {
            return Err(self.reject(ValidationError::AlreadyConnected));
        }
        if self.pending_dial.is_some() {
            return Err(self.reject(ValidationError::DialInProgress));
        }
        if self.connection.is_some() {
            return Err(self.reject(ValidationError::AlreadyConnected));
        }

        let endpoint = to_endpoint_id(&target);
        info!("Connecting to {endpoint}");
        let conn = match self.transport.dial(&endpoint) {
            Ok(conn) => conn,
            Err(err) => {
                warn!("Failed to dial {endpoint}: {err}");
                self.fail(ConnectionStatus::Error, SessionError::TransportFailure);
                return Err(SessionError::TransportFailure);
            }
        };

        self.dial_attempts += 1;
        let attempt = DialAttempt(self.dial_attempts);
        self.status = ConnectionStatus::Connecting;
        self.pending_dial = Some(PendingDial { target, attempt });
        self.peer_code = Some(target);
        self.last_error = None;
        self.connection = Some(Connection {
            id: conn,
            peer_code: target,
            direction: Direction::Outbound,
            open: false,
        });

        Ok(attempt)
    }

    /// Answer an unsolicited connection. Only the first connection is ever
    /// taken; anything arriving while the slot is occupied is closed.
    pub fn accept_inbound(&mut self, conn: ConnectionId, remote: &EndpointId) -> bool {
        info!("Incoming connection from {remote}");

        if self.status.is_terminal() {
            info!("Rejecting connection from {remote} - session has ended");
            self.transport.close(conn);
            return false;
        }

        // A pending dial holds the slot as well. Two sessions that dial each
        // other at the same time therefore refuse each other and both end up
        // idle with `ConnectionRefused`.
        if self.connection.is_some() {
            info!("Rejecting connection from {remote} - already connected");
            self.transport.close(conn);
            return false;
        }

        let peer_code = match from_endpoint_id(remote.as_str()) {
            Ok(code) => code,
            Err(err) => {
                warn!("Rejecting connection from {remote}: {err}");
                self.transport.close(conn);
                return false;
            }
        };

        if let Err(err) = self.transport.accept(conn) {
            warn!("Failed to accept connection from {remote}: {err}");
            self.transport.close(conn);
            return false;
        }

        self.peer_code = Some(peer_code);
        self.connection = Some(Connection {
            id: conn,
            peer_code,
            direction: Direction::Inbound,
            open: false,
        });

        true
    }

    /// Make `content` the live message on both ends.
    ///
    /// The local copy is replaced as soon as the message is handed to the
    /// transport; delivery is not confirmed and never retried.
    pub fn send(&mut self, content: &str) -> Result<ChatMessage, SessionError> {
        let conn = match &self.connection {
            Some(connection) if connection.open && self.is_connected() => connection.id,
            _ => return Err(self.reject(ValidationError::NotConnected)),
        };
        if content.trim().is_empty() {
            return Err(self.reject(ValidationError::EmptyMessage));
        }
        if content.chars().count() > self.max_message_chars {
            return Err(self.reject(ValidationError::MessageTooLong {
                max: self.max_message_chars,
            }));
        }

        let message = ChatMessage::new_local(content.trim());
        if let Err(err) = self.transport.send(conn, &SessionMessage::chat(&message)) {
            warn!("Failed to hand message to transport: {err}");
        }

        self.current_message = Some(message.clone());
        self.last_error = None;

        Ok(message)
    }

    /// End the session from this side. Calling it again does nothing new.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            info!("Closing connection with {}", connection.peer_code);
            self.transport.close(connection.id);
        }
        self.pending_dial = None;
        self.current_message = None;
        self.last_error = None;
        self.status = ConnectionStatus::Disconnected;
    }

    /// Release everything held on the transport. Used on shutdown, when no
    /// one observes the status any more, so the status is left as is.
    pub fn teardown(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.transport.close(connection.id);
        }
        if self.ready {
            self.transport.unregister();
            self.ready = false;
        }
        self.pending_dial = None;
        self.current_message = None;
        debug!("Session {} torn down", self.local_code);
    }

    /// The single entry point for everything that happens asynchronously.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::DialTimeout(attempt) => self.on_dial_timeout(attempt),
            SessionEvent::Transport(event) => {
                debug!("Handling transport event: {}", event.get_type());
                match event {
                    TransportEvent::Registered(endpoint) => self.on_registered(&endpoint),
                    TransportEvent::RegistrationFailed(err) => self.on_registration_failed(err),
                    TransportEvent::InboundConnection { conn, remote } => {
                        self.accept_inbound(conn, &remote);
                    }
                    TransportEvent::Opened(conn) => self.on_opened(conn),
                    TransportEvent::Data { conn, payload } => self.receive(conn, &payload),
                    TransportEvent::Closed(conn) => self.on_closed(conn),
                    TransportEvent::PeerUnavailable { conn, target } => {
                        self.on_peer_unavailable(conn, &target);
                    }
                    TransportEvent::ConnectionError { conn, reason } => {
                        self.on_connection_error(conn, &reason);
                    }
                    TransportEvent::TransportLost(reason) => self.on_transport_lost(&reason),
                }
            }
        }
    }

    /// Take in a payload from the active connection.
    pub fn receive(&mut self, conn: ConnectionId, payload: &Value) {
        if !self.is_active_open(conn) {
            debug!("Ignoring data on inactive connection {conn}");
            return;
        }

        match SessionMessage::decode(payload) {
            Some(SessionMessage::Handshake { code }) => {
                info!("Handshake received from {code}");
                if self.peer_code.is_some_and(|peer| peer != code) {
                    warn!(
                        "Peer announced code {code}, expected {}",
                        self.peer_code.map(|c| c.to_string()).unwrap_or_default()
                    );
                }
            }
            Some(SessionMessage::Message(wire)) => {
                if wire.content.chars().count() > self.max_message_chars {
                    debug!("Accepting oversized message from peer");
                }
                self.current_message = Some(wire.into_received(now_millis()));
            }
            None => (),
        }
    }

    fn is_active_open(&self, conn: ConnectionId) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.id == conn && connection.open)
    }

    fn is_active(&self, conn: ConnectionId) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.id == conn)
    }

    fn reject(&mut self, reason: ValidationError) -> SessionError {
        debug!("Rejected: {reason}");
        let err = SessionError::from(reason);
        self.last_error = Some(err);
        err
    }

    fn fail(&mut self, status: ConnectionStatus, err: SessionError) {
        self.status = status;
        self.last_error = Some(err);
        self.connection = None;
        self.pending_dial = None;
        if status.is_terminal() {
            self.current_message = None;
        }
    }

    fn end_connection(&mut self, err: Option<SessionError>) {
        self.connection = None;
        self.pending_dial = None;
        self.current_message = None;
        self.last_error = err;
        self.status = ConnectionStatus::Disconnected;
    }

    fn on_registered(&mut self, endpoint: &EndpointId) {
        if *endpoint != self.local_endpoint() {
            debug!("Ignoring registration of stale endpoint {endpoint}");
            return;
        }
        info!("Registered as {endpoint}");
        self.ready = true;
    }

    fn on_registration_failed(&mut self, err: TransportError) {
        self.ready = false;
        match err {
            TransportError::EndpointTaken(endpoint) => {
                let old_code = self.local_code;
                let new_code = std::iter::repeat_with(|| self.code_generator.generate())
                    .take(MAX_CODE_DRAWS)
                    .find(|candidate| *candidate != old_code)
                    .unwrap_or(old_code);
                if new_code == old_code {
                    warn!("Endpoint {endpoint} is taken and no different code could be drawn");
                } else {
                    warn!(
                        "Endpoint {endpoint} is taken; replacing code {old_code} with {new_code}"
                    );
                }
                self.local_code = new_code;
                self.last_error = Some(SessionError::RegistrationCollision);
            }
            err => {
                warn!("Registration failed: {err}");
                self.fail(ConnectionStatus::Error, SessionError::TransportFailure);
            }
        }
    }

    fn on_opened(&mut self, conn: ConnectionId) {
        let local_code = self.local_code;
        let Some(connection) = self.connection.as_mut().filter(|c| c.id == conn) else {
            info!("Closing connection {conn}; it is not the active connection");
            self.transport.close(conn);
            return;
        };
        if connection.open {
            return;
        }

        connection.open = true;
        let peer_code = connection.peer_code;
        self.status = ConnectionStatus::Connected;
        self.pending_dial = None;
        self.last_error = None;
        info!("Connection established with {peer_code}");

        if let Err(err) = self
            .transport
            .send(conn, &SessionMessage::handshake(local_code))
        {
            warn!("Failed to send handshake to {peer_code}: {err}");
        }
    }

    fn on_closed(&mut self, conn: ConnectionId) {
        let Some(connection) = self.connection.filter(|c| c.id == conn) else {
            debug!("Ignoring close of inactive connection {conn}");
            return;
        };

        if connection.open {
            info!("Connection with {} closed", connection.peer_code);
            self.end_connection(None);
            return;
        }

        match connection.direction {
            Direction::Outbound => {
                info!("{} refused the connection", connection.peer_code);
                self.peer_code = None;
                self.fail(ConnectionStatus::Idle, SessionError::ConnectionRefused);
            }
            Direction::Inbound => {
                debug!("{} gave up before the connection opened", connection.peer_code);
                self.peer_code = None;
                self.connection = None;
            }
        }
    }

    fn on_peer_unavailable(&mut self, conn: ConnectionId, target: &EndpointId) {
        if !self.is_active(conn) {
            debug!("Ignoring unavailability of {target} for inactive connection {conn}");
            return;
        }
        info!("Peer {target} is not available");
        self.peer_code = None;
        self.fail(ConnectionStatus::Idle, SessionError::PeerUnavailable);
    }

    fn on_connection_error(&mut self, conn: ConnectionId, reason: &str) {
        if !self.is_active(conn) {
            debug!("Ignoring error on inactive connection {conn}: {reason}");
            return;
        }
        warn!("Connection error: {reason}");

        if self.is_active_open(conn) {
            self.transport.close(conn);
            self.end_connection(Some(SessionError::ConnectionLost));
        } else {
            self.fail(ConnectionStatus::Error, SessionError::TransportFailure);
        }
    }

    fn on_transport_lost(&mut self, reason: &str) {
        warn!("Transport lost: {reason}");
        self.ready = false;
        if self.is_connected() {
            self.end_connection(Some(SessionError::ConnectionLost));
        } else if !self.status.is_terminal() {
            self.fail(ConnectionStatus::Error, SessionError::TransportFailure);
        }
    }

    fn on_dial_timeout(&mut self, attempt: DialAttempt) {
        let Some(pending) = self.pending_dial.filter(|p| p.attempt == attempt) else {
            return;
        };
        if self.is_connected() {
            return;
        }

        // The transport keeps trying; if it gets through after all, the
        // connection no longer matches the slot and is closed on opening.
        info!("Gave up waiting for {}", pending.target);
        self.peer_code = None;
        self.fail(ConnectionStatus::Idle, SessionError::DialTimeout);
    }
}
