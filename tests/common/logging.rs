use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;

/// Log everything vanish emits while an end-to-end test runs.
///
/// Integration tests link vanish as an external crate, and `#[traced_test]`
/// only captures events from the crate under test, so these tests install a
/// global subscriber instead. `RUST_LOG` overrides the default filter.
pub fn tracing_logger() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vanish=trace"));
    let subscriber = FmtSubscriber::builder()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_env_filter(filter)
        .with_test_writer()
        .finish();

    // every test in the binary calls this; only the first one wins
    let _ = tracing::subscriber::set_global_default(subscriber);
}
