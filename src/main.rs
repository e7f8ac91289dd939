use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use mcp_authz_callout::config::Config;
use mcp_authz_callout::rules::evaluate_detailed;
use mcp_authz_callout::startup;
use mcp_authz_callout::{CalloutServer, DEFAULT_CONFIG_FILE, VERSION};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// gRPC callout port
    #[arg(long)]
    grpc_port: Option<u16>,

    /// Fetch the rule table once, report what was loaded, and exit
    #[arg(long)]
    check_rules: bool,

    /// Evaluate a single request against the rule table and exit
    #[arg(long)]
    evaluate: bool,

    /// Caller groups for --evaluate (comma separated)
    #[arg(long, value_delimiter = ',')]
    groups: Vec<String>,

    /// HTTP verb for --evaluate
    #[arg(long, default_value = "POST")]
    verb: String,

    /// MCP method for --evaluate
    #[arg(long, default_value = "")]
    method: String,

    /// Tool name for --evaluate
    #[arg(long, default_value = "")]
    tool: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The logging section comes from the config, so loading logs to a bootstrap subscriber
    let bootstrap_level = cli.log_level.clone().unwrap_or_else(|| "info".to_string());
    let config = startup::with_bootstrap_logging(&bootstrap_level, || {
        Config::load(&cli.config, cli.host.clone(), cli.port, cli.grpc_port)
    })?;

    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, config.logging.is_json())?;

    startup::display_startup_banner(VERSION);
    startup::StartupLogger::display_startup_info(&config, &cli.config, VERSION);

    let server = CalloutServer::new(config)?;

    if cli.check_rules {
        return check_rules(&server).await;
    }
    if cli.evaluate {
        return evaluate_once(&server, &cli).await;
    }

    server.warm_up().await;
    if let Err(e) = server.run().await {
        error!("Callout server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

/// Fetch the table once and summarize it
async fn check_rules(server: &CalloutServer) -> Result<()> {
    let store = server.shim().store();
    let rules = store.fetch().await?;
    let stats = store.stats();

    info!(
        "Rule table OK: {} rules, {} malformed rows, {} shadowed rows from {}",
        rules.len(),
        stats.malformed_rows,
        stats.shadowed_rows,
        stats.source
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Evaluate the request given on the command line
async fn evaluate_once(server: &CalloutServer, cli: &Cli) -> Result<()> {
    let rules = server.shim().store().fetch().await?;
    let groups = if cli.groups.is_empty() {
        vec![mcp_authz_callout::rules::DEFAULT_GROUP.to_string()]
    } else {
        cli.groups.clone()
    };

    let decision = evaluate_detailed(&groups, &cli.verb, &cli.method, &cli.tool, &rules);
    match decision.matched {
        Some(matched) => info!("Matched row {} in the {} pass", matched.row, matched.pass),
        None => info!("No rule applies"),
    }
    println!("{}", decision.verdict);
    Ok(())
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    if json {
        tracing_subscriber::registry()
            .with(fmt_layer.json())
            .with(env_filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(env_filter)
            .try_init()?;
    }

    Ok(())
}
