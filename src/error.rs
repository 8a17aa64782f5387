//! Error types for the marshalling engine
//!
//! Per-field validation failures are data, collected into an [`ErrorTree`].
//! `SchemaError` covers the cases where a call cannot hand back a plain
//! result: configuration mistakes, registry lookups and strict-mode failures.

use thiserror::Error;

use crate::tree::ErrorTree;
use crate::value::Native;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Schema engine errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema not found: {name}")]
    NotFound { name: String },

    #[error("Schema already exists: {name} (fingerprint {existing}, got {attempted})")]
    AlreadyExists {
        name: String,
        existing: String,
        attempted: String,
    },

    #[error("Invalid schema configuration: {0}")]
    Config(String),

    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    #[error("Unknown field name in {option}: {name}")]
    UnknownFieldName { option: &'static str, name: String },

    #[error("Schema registry for {0} is no longer available")]
    RegistryDropped(String),

    /// Strict dump produced a non-empty error report.
    #[error("Marshalling failed: {errors}")]
    Marshalling {
        data: serde_json::Value,
        errors: ErrorTree,
    },

    /// Strict load produced a non-empty error report.
    #[error("Unmarshalling failed: {errors}")]
    Unmarshalling { data: Native, errors: ErrorTree },

    #[error("Invalid validator pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Settings(#[from] config_crate::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaError {
    /// The error tree carried by a strict-mode failure, if any
    pub fn errors(&self) -> Option<&ErrorTree> {
        match self {
            SchemaError::Marshalling { errors, .. } | SchemaError::Unmarshalling { errors, .. } => {
                Some(errors)
            }
            _ => None,
        }
    }
}
