//! Configuration module for the authz callout
//! 
//! This module provides configuration management and loading utilities.

mod config;
pub mod secret_string;

// Re-export the main configuration types
pub use config::{
    CalloutConfig, Config, LoggingConfig, RuleSourceConfig, RulesConfig, ServerConfig,
    SheetsSourceConfig, StalePolicy, DEFAULT_SHEETS_API_BASE, DEFAULT_SHEETS_RANGE,
};
