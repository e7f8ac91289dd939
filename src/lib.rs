//! MCP Authz Callout - access decisions for gateways fronting JSON-RPC MCP servers
//!
//! This crate provides the authorization callout a gateway invokes once per MCP
//! request. It reads the caller's groups from verified identity claims, looks the
//! request up in a rule table held in a spreadsheet (cached with a TTL), and
//! answers ALLOW or DENY. Evaluation is deny-by-default and first-match-wins.

pub mod callout;
pub mod config;
pub mod error;
pub mod rules;
pub mod startup;
pub mod store;

pub use callout::{CalloutInvocation, CalloutServer, CalloutShim};
pub use config::Config;
pub use error::{CalloutError, Result};
pub use rules::{evaluate, evaluate_detailed, Verdict};
pub use store::RuleStore;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "callout.yaml";

/// Default server host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 9090;

/// Default gRPC callout port
pub const DEFAULT_GRPC_PORT: u16 = 50051;
