//! Configuration management for the authz callout

use crate::error::{CalloutError, Result};
use crate::store::CacheSettings;
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Google Sheets API endpoint used when none is configured
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

/// Sheet range holding the rule table, header row included
pub const DEFAULT_SHEETS_RANGE: &str = "Rules!A:E";

// Default functions for serde
fn default_host() -> String {
    crate::DEFAULT_HOST.to_string()
}

fn default_http_port() -> u16 {
    crate::DEFAULT_HTTP_PORT
}

fn default_grpc_port() -> u16 {
    crate::DEFAULT_GRPC_PORT
}

fn default_true() -> bool {
    true
}

fn default_sheets_range() -> String {
    DEFAULT_SHEETS_RANGE.to_string()
}

fn default_sheets_api_base() -> String {
    DEFAULT_SHEETS_API_BASE.to_string()
}

fn default_cache_ttl_secs() -> u64 {
    180
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_claims_variable() -> String {
    "jwt.VerifyAccessToken.payload-json".to_string()
}

fn default_verb_variable() -> String {
    "request.verb".to_string()
}

fn default_method_variable() -> String {
    "mcp.method".to_string()
}

fn default_tool_variable() -> String {
    "mcp.tool_name".to_string()
}

fn default_verdict_variable() -> String {
    "mcp.authz.verdict".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Rule source and cache configuration
    #[serde(default)]
    pub rules: RulesConfig,
    /// Gateway callout variable mapping
    #[serde(default)]
    pub callout: CalloutConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port for the HTTP JSON surface
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Port for the gRPC external callout
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,
    /// Serve the HTTP JSON surface
    #[serde(default = "default_true")]
    pub http_enabled: bool,
    /// Serve the gRPC external callout
    #[serde(default = "default_true")]
    pub grpc_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            grpc_port: default_grpc_port(),
            http_enabled: true,
            grpc_enabled: true,
        }
    }
}

/// Where the rule table comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleSourceConfig {
    /// Google Sheets `values.get`
    Sheets(SheetsSourceConfig),
    /// Local YAML or JSON file
    File { path: PathBuf },
    /// Rows embedded in the configuration
    Inline { rows: Vec<Vec<String>> },
}

impl Default for RuleSourceConfig {
    fn default() -> Self {
        RuleSourceConfig::Sheets(SheetsSourceConfig::default())
    }
}

impl RuleSourceConfig {
    /// Short human-readable description, free of secrets
    pub fn describe(&self) -> String {
        match self {
            RuleSourceConfig::Sheets(sheets) => {
                format!("sheets:{} ({})", sheets.spreadsheet_id, sheets.range)
            }
            RuleSourceConfig::File { path } => format!("file:{}", path.display()),
            RuleSourceConfig::Inline { rows } => format!("inline:{} rows", rows.len()),
        }
    }
}

/// Google Sheets rule source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsSourceConfig {
    /// Spreadsheet identifier
    #[serde(default)]
    pub spreadsheet_id: String,
    /// A1 range holding the rule rows
    #[serde(default = "default_sheets_range")]
    pub range: String,
    /// API base URL
    #[serde(default = "default_sheets_api_base")]
    pub api_base: String,
    /// API key sent as the `key` query parameter
    #[serde(default, with = "crate::config::secret_string")]
    pub api_key: Option<Secret<String>>,
    /// OAuth access token sent as a bearer token
    #[serde(default, with = "crate::config::secret_string")]
    pub access_token: Option<Secret<String>>,
}

impl Default for SheetsSourceConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            range: default_sheets_range(),
            api_base: default_sheets_api_base(),
            api_key: None,
            access_token: None,
        }
    }
}

/// What to do when a refresh fails while an older table is cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Keep answering from the previous table
    #[default]
    ServeStale,
    /// Propagate the failure; the callout then denies
    FailClosed,
}

impl FromStr for StalePolicy {
    type Err = CalloutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serve_stale" | "serve-stale" => Ok(StalePolicy::ServeStale),
            "fail_closed" | "fail-closed" => Ok(StalePolicy::FailClosed),
            other => Err(CalloutError::config(format!(
                "Invalid stale policy '{}'. Must be 'serve_stale' or 'fail_closed'",
                other
            ))),
        }
    }
}

/// Rule source and cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Rule source
    #[serde(default)]
    pub source: RuleSourceConfig,
    /// Seconds a fetched table stays fresh
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Upper bound on a single remote fetch
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Behavior when a refresh fails with a table already cached
    #[serde(default)]
    pub stale_policy: StalePolicy,
    /// Oldest table age, in seconds, that may still be served stale
    #[serde(default)]
    pub max_stale_secs: Option<u64>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            source: RuleSourceConfig::default(),
            cache_ttl_secs: default_cache_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            stale_policy: StalePolicy::default(),
            max_stale_secs: None,
        }
    }
}

impl RulesConfig {
    /// Cache settings for the rule store
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            stale_policy: self.stale_policy,
            max_stale: self.max_stale_secs.map(Duration::from_secs),
        }
    }

    /// Validate rule source and cache configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_secs == 0 {
            return Err(CalloutError::config("rules.cache_ttl_secs must be greater than 0"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(CalloutError::config("rules.fetch_timeout_secs must be greater than 0"));
        }
        if let Some(max_stale) = self.max_stale_secs {
            if max_stale < self.cache_ttl_secs {
                return Err(CalloutError::config(format!(
                    "rules.max_stale_secs ({}) must not be smaller than rules.cache_ttl_secs ({})",
                    max_stale, self.cache_ttl_secs
                )));
            }
        }

        match &self.source {
            RuleSourceConfig::Sheets(sheets) => {
                if sheets.spreadsheet_id.trim().is_empty() {
                    return Err(CalloutError::config(
                        "rules.source.spreadsheet_id is required (or set RULES_SPREADSHEET_ID)",
                    ));
                }
                if sheets.range.trim().is_empty() {
                    return Err(CalloutError::config("rules.source.range cannot be empty"));
                }
                url::Url::parse(&sheets.api_base).map_err(|e| {
                    CalloutError::config(format!("Invalid rules.source.api_base '{}': {}", sheets.api_base, e))
                })?;
            }
            RuleSourceConfig::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(CalloutError::config("rules.source.path cannot be empty"));
                }
            }
            RuleSourceConfig::Inline { .. } => {}
        }

        Ok(())
    }
}

/// Gateway callout configuration: flow variable names and diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalloutConfig {
    /// Flow variable holding the verified claims payload (JSON text)
    #[serde(default = "default_claims_variable")]
    pub claims_variable: String,
    /// Flow variable consulted when the request verb is not set
    #[serde(default = "default_verb_variable")]
    pub verb_variable: String,
    /// Flow variable holding the JSON-RPC method
    #[serde(default = "default_method_variable")]
    pub method_variable: String,
    /// Flow variable holding the tool name
    #[serde(default = "default_tool_variable")]
    pub tool_variable: String,
    /// Flow variable the verdict is written to
    #[serde(default = "default_verdict_variable")]
    pub verdict_variable: String,
    /// Emit build time and invocation count headers
    #[serde(default = "default_true")]
    pub diagnostic_headers: bool,
}

impl Default for CalloutConfig {
    fn default() -> Self {
        Self {
            claims_variable: default_claims_variable(),
            verb_variable: default_verb_variable(),
            method_variable: default_method_variable(),
            tool_variable: default_tool_variable(),
            verdict_variable: default_verdict_variable(),
            diagnostic_headers: true,
        }
    }
}

impl CalloutConfig {
    pub fn validate(&self) -> Result<()> {
        let variables = [
            ("claims_variable", &self.claims_variable),
            ("verb_variable", &self.verb_variable),
            ("method_variable", &self.method_variable),
            ("tool_variable", &self.tool_variable),
            ("verdict_variable", &self.verdict_variable),
        ];
        for (name, value) in variables {
            if value.trim().is_empty() {
                return Err(CalloutError::config(format!("callout.{} cannot be empty", name)));
            }
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(CalloutError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(CalloutError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.format,
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(CalloutError::config("server.host cannot be empty"));
        }
        if !self.http_enabled && !self.grpc_enabled {
            return Err(CalloutError::config(
                "At least one of server.http_enabled and server.grpc_enabled must be true",
            ));
        }
        if self.http_enabled && self.http_port == 0 {
            return Err(CalloutError::config("server.http_port cannot be 0"));
        }
        if self.grpc_enabled && self.grpc_port == 0 {
            return Err(CalloutError::config("server.grpc_port cannot be 0"));
        }
        if self.http_enabled && self.grpc_enabled && self.http_port == self.grpc_port {
            return Err(CalloutError::config(format!(
                "server.http_port and server.grpc_port are both {}",
                self.http_port
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load .env files in order of precedence
    fn load_env_files() {
        // Determine environment
        let env = std::env::var("CALLOUT_ENV")
            .or_else(|_| std::env::var("ENV"))
            .unwrap_or_else(|_| "development".to_string());

        // Load .env files in order of precedence (each overrides the previous)
        let env_specific_file = format!(".env.{}", env);
        let env_files = vec![
            ".env",                    // Base environment file
            &env_specific_file,        // Environment-specific file
            ".env.local",              // Local overrides (highest precedence)
        ];

        for env_file in env_files {
            match dotenvy::from_filename(env_file) {
                Ok(_) => {
                    tracing::info!("Loaded environment variables from {}", env_file);
                }
                Err(e) if e.not_found() => {
                    tracing::debug!("No {} file found, skipping", env_file);
                }
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", env_file, e);
                }
            }
        }

        tracing::info!("Environment: {}", env);
    }

    /// Parse configuration from YAML text without touching the environment
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| CalloutError::config(format!("Failed to parse config file: {}", e)))
    }

    /// Load configuration from file with environment variables and CLI overrides
    pub fn load<P: AsRef<Path>>(
        path: P,
        host_override: Option<String>,
        http_port_override: Option<u16>,
        grpc_port_override: Option<u16>,
    ) -> Result<Self> {
        // Load .env files in order of precedence: .env → .env.{environment} → .env.local
        Self::load_env_files();

        let mut config = if path.as_ref().exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                CalloutError::config(format!("Failed to read config file: {}", e))
            })?;
            Self::from_yaml_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", path.as_ref().display());
            Self::default()
        };

        // Apply environment variable overrides (precedence: .env < file < env < CLI)
        config.apply_environment_overrides()?;

        // Apply CLI overrides (highest precedence)
        if let Some(host) = host_override {
            config.server.host = host;
        }
        if let Some(port) = http_port_override {
            config.server.http_port = port;
        }
        if let Some(port) = grpc_port_override {
            config.server.grpc_port = port;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_environment_overrides(&mut self) -> Result<()> {
        // Server configuration environment variables
        if let Some(host) = non_empty_env("CALLOUT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env::<u16>("CALLOUT_HTTP_PORT")? {
            self.server.http_port = port;
        }
        if let Some(port) = parse_env::<u16>("CALLOUT_GRPC_PORT")? {
            self.server.grpc_port = port;
        }
        // Cloud Run hands the single exposed port to the container as PORT
        if let Some(port) = parse_env::<u16>("PORT")? {
            self.server.grpc_port = port;
        }

        // Rule source
        if let Some(path) = non_empty_env("RULES_FILE") {
            self.rules.source = RuleSourceConfig::File { path: PathBuf::from(path) };
        }
        if let Some(spreadsheet_id) = non_empty_env("RULES_SPREADSHEET_ID") {
            match &mut self.rules.source {
                RuleSourceConfig::Sheets(sheets) => sheets.spreadsheet_id = spreadsheet_id,
                other => {
                    *other = RuleSourceConfig::Sheets(SheetsSourceConfig {
                        spreadsheet_id,
                        ..SheetsSourceConfig::default()
                    });
                }
            }
        }
        if let RuleSourceConfig::Sheets(sheets) = &mut self.rules.source {
            if let Some(range) = non_empty_env("RULES_RANGE") {
                sheets.range = range;
            }
            if let Some(api_key) = non_empty_env("RULES_API_KEY") {
                sheets.api_key = Some(Secret::new(api_key));
            }
            if let Some(token) = non_empty_env("RULES_ACCESS_TOKEN") {
                sheets.access_token = Some(Secret::new(token));
            }
        }

        // Cache behavior
        if let Some(ttl) = parse_env::<u64>("RULES_CACHE_TTL_SECS")? {
            self.rules.cache_ttl_secs = ttl;
        }
        if let Some(timeout) = parse_env::<u64>("RULES_FETCH_TIMEOUT_SECS")? {
            self.rules.fetch_timeout_secs = timeout;
        }
        if let Some(policy) = non_empty_env("RULES_STALE_POLICY") {
            self.rules.stale_policy = policy.parse()?;
        }

        // Logging configuration
        if let Some(level) = non_empty_env("CALLOUT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = non_empty_env("CALLOUT_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.rules.validate()?;
        self.callout.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_env(name) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            CalloutError::config(format!("Invalid {} environment variable: {}", name, e))
        }),
        None => Ok(None),
    }
}
