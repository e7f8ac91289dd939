//! Startup reporting

mod bootstrap;
mod logger;

pub use bootstrap::{bootstrap_subscriber, with_bootstrap_logging};
pub use logger::{display_startup_banner, StartupLogger};
