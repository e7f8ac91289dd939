//! Logging while the configuration is still being loaded
//!
//! The real subscriber depends on the `logging` config section, so config
//! loading runs under a temporary subscriber instead of emitting into nothing.

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Plain-text subscriber used until the configured one is installed
pub fn bootstrap_subscriber<W>(level: &str, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .finish()
}

/// Run `f` with the bootstrap subscriber writing to stderr
pub fn with_bootstrap_logging<T>(level: &str, f: impl FnOnce() -> T) -> T {
    tracing::subscriber::with_default(bootstrap_subscriber(level, std::io::stderr), f)
}
