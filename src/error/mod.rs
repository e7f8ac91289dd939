//! Error handling module for the authz callout
//! 
//! This module provides the crate error type and result alias.

mod error;

// Re-export the main error types and utilities
pub use error::{CalloutError, Result};
