//! Startup logging

use crate::config::{Config, RuleSourceConfig, StalePolicy};
use std::path::Path;
use tracing::{info, warn};

/// Logs the resolved configuration at startup
pub struct StartupLogger;

impl StartupLogger {
    /// Display startup information for the resolved configuration
    pub fn display_startup_info(config: &Config, config_path: &Path, version: &str) {
        info!("🚀 MCP Authz Callout v{} starting...", version);
        info!("");

        Self::display_configuration(config_path);
        Self::display_rule_source(config);
        Self::display_cache_policy(config);
        Self::display_server_information(config);
    }

    fn display_configuration(config_path: &Path) {
        info!("📁 Configuration:");
        if config_path.exists() {
            info!("   Config file: {:?} ✅", config_path);
        } else {
            info!("   Config file: built-in defaults ({:?} not found)", config_path);
        }
        info!("");
    }

    fn display_rule_source(config: &Config) {
        info!("📋 Rule Source:");
        info!("   {}", config.rules.source.describe());

        if let RuleSourceConfig::Sheets(sheets) = &config.rules.source {
            match (&sheets.access_token, &sheets.api_key) {
                (Some(_), _) => info!("   Credentials: bearer access token"),
                (None, Some(_)) => info!("   Credentials: API key"),
                (None, None) => warn!("   ⚠️  No Sheets credentials configured, the sheet must be public"),
            }
        }
        info!("");
    }

    fn display_cache_policy(config: &Config) {
        let rules = &config.rules;
        info!("⏱️  Rule Cache:");
        info!("   TTL: {}s, fetch timeout: {}s", rules.cache_ttl_secs, rules.fetch_timeout_secs);
        match (rules.stale_policy, rules.max_stale_secs) {
            (StalePolicy::FailClosed, _) => info!("   On refresh failure: fail closed (deny)"),
            (StalePolicy::ServeStale, Some(max)) => {
                info!("   On refresh failure: serve cached table for up to {}s", max)
            }
            (StalePolicy::ServeStale, None) => info!("   On refresh failure: serve cached table"),
        }
        info!("");
    }

    fn display_server_information(config: &Config) {
        let server = &config.server;
        info!("🌐 Server Information:");
        if server.grpc_enabled {
            info!("   gRPC callout: {}:{}", server.host, server.grpc_port);
        }
        if server.http_enabled {
            info!("   HTTP: http://{}:{}", server.host, server.http_port);
        }
        info!("   Verdict variable: {}", config.callout.verdict_variable);
        info!("");
    }
}

/// Display startup banner with version information
pub fn display_startup_banner(version: &str) {
    info!("");
    info!("╔══════════════════════════════════════════════════════════════╗");
    info!("║                   MCP Authz Callout v{}                   ║", version);
    info!("║          Rule-table access decisions for MCP gateways        ║");
    info!("╚══════════════════════════════════════════════════════════════╝");
    info!("");
}
