use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;
use vanish::config_models::cli_args::Args;

/// How long in-flight tasks get to finish once `initialize` has returned.
const SHUTDOWN_GRACE: tokio::time::Duration = tokio::time::Duration::from_secs(10);

pub fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .context("Failed to start the async runtime")?;

    let result = runtime.block_on(async {
        install_subscriber(args.tokio_console)?;
        vanish::initialize(args).await
    });

    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

#[cfg(feature = "tokio-console")]
fn install_subscriber(tokio_console: bool) -> Result<()> {
    if tokio_console {
        console_subscriber::init();
        return Ok(());
    }
    set_up_logger()
}

#[cfg(not(feature = "tokio-console"))]
fn install_subscriber(tokio_console: bool) -> Result<()> {
    if tokio_console {
        anyhow::bail!("tokio-console support is not compiled in; build with the feature enabled");
    }
    set_up_logger()
}

/// Log to stderr with RFC 3339 timestamps, so stdout stays free for the chat
/// itself. `RUST_LOG` selects what is shown; the default is `info`.
fn set_up_logger() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Unable to set global default subscriber")
}
