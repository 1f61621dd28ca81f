use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;

/// Ephemeral one-to-one sessions identified by short codes.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable tokio tracing for consumption by the tokio-console application.
    ///
    /// Only has an effect in builds with the `tokio-console` feature.
    #[clap(long, global = true)]
    pub tokio_console: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a relay that chat clients register with and connect through.
    Relay(RelayArgs),

    /// Start a session and talk to one peer.
    Chat(ChatArgs),
}

#[derive(clap::Args, Debug, Clone, Copy)]
pub struct RelayArgs {
    /// Address to accept client links on.
    #[clap(long, default_value = "127.0.0.1:9797", value_name = "ADDR")]
    pub listen: SocketAddr,

    /// Largest frame a client may send, in bytes.
    #[clap(long, default_value = "65536", value_name = "BYTES")]
    pub max_frame_length: usize,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ChatArgs {
    /// Address of the relay.
    #[clap(long, default_value = "127.0.0.1:9797", value_name = "ADDR")]
    pub relay: SocketAddr,

    /// Code of a peer to connect to as soon as the session is ready.
    #[clap(long, value_name = "CODE")]
    pub connect: Option<String>,

    /// Seconds to wait for a peer to answer before giving up.
    #[clap(
        long,
        default_value = "10",
        value_name = "SECONDS",
        value_parser = duration_from_seconds_str
    )]
    pub dial_timeout: Duration,
}

fn duration_from_seconds_str(s: &str) -> Result<Duration, std::num::ParseIntError> {
    Ok(Duration::from_secs(s.parse()?))
}
