use tokio::sync::oneshot;

use super::message::ChatMessage;
use crate::session::SessionError;

/// Requests handed to the task that owns a session.
#[derive(Debug)]
pub enum SessionCommand {
    Register(oneshot::Sender<Result<(), SessionError>>),
    Connect(String, oneshot::Sender<Result<(), SessionError>>),
    Send(String, oneshot::Sender<Result<ChatMessage, SessionError>>),
    Disconnect(oneshot::Sender<()>),
    Shutdown,
}

impl SessionCommand {
    pub fn get_type(&self) -> &'static str {
        match self {
            SessionCommand::Register(_) => "register",
            SessionCommand::Connect(..) => "connect",
            SessionCommand::Send(..) => "send",
            SessionCommand::Disconnect(_) => "disconnect",
            SessionCommand::Shutdown => "shutdown",
        }
    }
}
