//! Utilities module for logging, errors, and helper functions
//!
//! This module provides:
//! - Structured logging with tracing
//! - Error handling types
//! - Python-compatible JSON encoding for legacy clients
//! - Small formatting helpers

pub mod error;
pub mod logging;
pub mod pyjson;

// Re-export main types for convenience
pub use error::{DiagnosisError, Result, ResultExt};
pub use logging::init_logging;
pub use pyjson::to_python_json;

/// Format a probability as a percentage with two decimals, e.g. `"87.50%"`
pub fn format_percentage(probability: f32) -> String {
    format!("{:.2}%", probability * 100.0)
}

/// Truncate a string to at most `max_chars` characters (not bytes)
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
