//! Line-oriented front end for one session.

use std::net::SocketAddr;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::select;
use tokio::signal;
use tracing::info;

use crate::config_models::session_config::SessionConfig;
use crate::models::message::Sender;
use crate::models::session_code::RandomCodeGenerator;
use crate::models::status::ConnectionStatus;
use crate::relay::client::RelayTransport;
use crate::relay::frame::DEFAULT_MAX_FRAME_LENGTH;
use crate::session::PeerSession;
use crate::session::SessionError;
use crate::session::SessionSnapshot;
use crate::session_loop::SessionDriver;
use crate::session_loop::SessionHandle;

const USAGE: &str =
    "Commands: /connect CODE, /disconnect, /quit. Anything else is sent to your peer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input<'a> {
    Connect(&'a str),
    Disconnect,
    Quit,
    Message(&'a str),
    Unknown(&'a str),
    Empty,
}

pub fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }

    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Message(line.trim_end_matches(['\r', '\n']));
    };

    let (name, argument) = command
        .split_once(char::is_whitespace)
        .map(|(name, argument)| (name, argument.trim()))
        .unwrap_or((command, ""));

    match name {
        "connect" | "c" => Input::Connect(argument),
        "disconnect" | "d" => Input::Disconnect,
        "quit" | "q" => Input::Quit,
        _ => Input::Unknown(name),
    }
}

/// Lines worth showing for the step from `previous` to `current`.
pub fn describe_changes(previous: &SessionSnapshot, current: &SessionSnapshot) -> Vec<String> {
    let mut lines = vec![];
    let peer = current
        .peer_code
        .or(previous.peer_code)
        .map(|code| code.to_string())
        .unwrap_or_else(|| "peer".to_owned());

    if current.local_code != previous.local_code {
        lines.push(format!("Your code is now {}", current.local_code));
    }

    if current.ready && !previous.ready {
        lines.push(format!(
            "Your code is {}. Share it with the person you want to talk to.",
            current.local_code
        ));
    }

    if current.status != previous.status {
        match current.status {
            ConnectionStatus::Connecting => lines.push(format!("Connecting to {peer}...")),
            ConnectionStatus::Connected => lines.push(format!("Connected to {peer}")),
            ConnectionStatus::Disconnected => lines.push("Session ended".to_owned()),
            ConnectionStatus::Error => lines.push("Session failed".to_owned()),
            ConnectionStatus::Idle => (),
        }
    }

    if current.current_message != previous.current_message {
        if let Some(message) = &current.current_message {
            let author = match message.sender {
                Sender::Local => "you".to_owned(),
                Sender::Peer => peer,
            };
            lines.push(format!("[{author}] {}", message.content));
        }
    }

    if current.last_error != previous.last_error {
        if let Some(err) = current.last_error {
            lines.push(format!("! {err}"));
        }
    }

    lines
}

/// Claim a code with the relay, picking new codes until one is free.
async fn register_until_unique(handle: &SessionHandle) -> Result<()> {
    let mut snapshots = handle.subscribe();
    loop {
        match handle.register().await {
            Ok(()) | Err(SessionError::RegistrationCollision) => (),
            Err(err) => bail!("Registration failed: {err}"),
        }

        let snapshot = snapshots
            .wait_for(|s| s.ready || s.last_error.is_some())
            .await
            .context("Session stopped during registration")?
            .clone();

        match snapshot.last_error {
            _ if snapshot.ready => return Ok(()),
            Some(SessionError::RegistrationCollision) => {
                info!("Code collision, registering again as {}", snapshot.local_code);
            }
            Some(err) => bail!("Registration failed: {err}"),
            None => (),
        }
    }
}

pub async fn run(
    relay_address: SocketAddr,
    connect_to: Option<String>,
    config: SessionConfig,
) -> Result<()> {
    config.validate()?;

    let (transport, events) =
        RelayTransport::connect(relay_address, DEFAULT_MAX_FRAME_LENGTH).await?;
    let session = PeerSession::new(transport, RandomCodeGenerator);
    let (handle, _join_handle) = SessionDriver::spawn(session, events, &config);

    register_until_unique(&handle).await?;

    let mut snapshots = handle.subscribe();
    let mut shown = snapshots.borrow_and_update().clone();
    println!(
        "Your code is {}. Share it with the person you want to talk to.",
        shown.local_code
    );
    println!("{USAGE}");

    if let Some(target) = connect_to {
        if let Err(err) = handle.connect(&target).await {
            println!("! {err}");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        select! {
            Ok(()) = signal::ctrl_c() => {
                info!("Detected Ctrl+c signal.");
                break;
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Empty => (),
                    Input::Unknown(name) => println!("Unknown command /{name}. {USAGE}"),
                    Input::Disconnect => handle.disconnect().await,
                    Input::Connect(target) => {
                        if let Err(err) = handle.connect(target).await {
                            println!("! {err}");
                        }
                    }
                    Input::Message(content) => {
                        if let Err(err) = handle.send(content).await {
                            println!("! {err}");
                        }
                    }
                }
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = snapshots.borrow_and_update().clone();
                for line in describe_changes(&shown, &current) {
                    println!("{line}");
                }
                let ended = current.status.is_terminal();
                shown = current;
                if ended {
                    println!("Start vanish again for a new session.");
                    break;
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
