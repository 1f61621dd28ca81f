#![deny(clippy::shadow_unrelated)]

pub mod chat;
pub mod config_models;
pub mod models;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod session_loop;
pub mod transport;


use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use config_models::cli_args;
use config_models::session_config::RelayConfig;
use config_models::session_config::SessionConfig;
use tokio::net::TcpListener;
use tracing::info;

use crate::relay::server::Relay;

/// Run whichever role the command line asks for until it is done.
pub async fn initialize(args: cli_args::Args) -> Result<()> {
    match args.command {
        cli_args::Command::Relay(relay_args) => run_relay(RelayConfig::from(&relay_args)).await,
        cli_args::Command::Chat(chat_args) => {
            let config = SessionConfig::from(&chat_args);
            chat::run(chat_args.relay, chat_args.connect, config).await
        }
    }
}

pub async fn run_relay(config: RelayConfig) -> Result<()> {
    config.validate()?;

    let listener = TcpListener::bind(config.listen).await.with_context(|| {
        format!(
            "Failed to bind to {}. Is a relay already running?",
            config.listen
        )
    })?;
    info!("Relay accepts frames up to {} bytes", config.max_frame_length);

    relay::server::serve(listener, Arc::new(Relay::default()), config.max_frame_length).await
}
