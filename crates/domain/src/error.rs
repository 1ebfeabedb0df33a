//! Domain error model.
//!
//! Every failure raised by the configuration engine is a [`ConfigError`]. Each
//! variant belongs to exactly one [`ErrorKind`], which is what callers branch
//! on (the API layer maps kinds to HTTP status codes with a lookup table).

use serde::Serialize;
use thiserror::Error;

/// A single violated constraint, e.g. one JSON-Schema error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    RollbackIneligible,
    Forbidden,
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::RollbackIneligible => write!(f, "rollback_ineligible"),
            ErrorKind::Forbidden => write!(f, "forbidden"),
            ErrorKind::Storage => write!(f, "storage"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid configuration key: {0}")]
    InvalidKey(String),

    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Scope mismatch: {0}")]
    ScopeMismatch(String),

    #[error("Invalid validity range: {0}")]
    InvalidDateRange(String),

    #[error("Invalid JSON schema: {0}")]
    InvalidSchema(String),

    #[error("Value does not match schema ({} error(s))", .0.len())]
    ValidationFailed(Vec<FieldError>),

    #[error("Rollback not allowed: {0}")]
    RollbackIneligible(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ConfigError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::NotFound(_) => ErrorKind::NotFound,
            ConfigError::Conflict(_) => ErrorKind::Conflict,
            ConfigError::InvalidKey(_)
            | ConfigError::InvalidScope(_)
            | ConfigError::InvalidCategory(_)
            | ConfigError::InvalidValue(_)
            | ConfigError::ScopeMismatch(_)
            | ConfigError::InvalidDateRange(_)
            | ConfigError::InvalidSchema(_)
            | ConfigError::ValidationFailed(_) => ErrorKind::Validation,
            ConfigError::RollbackIneligible(_) => ErrorKind::RollbackIneligible,
            ConfigError::Forbidden(_) => ErrorKind::Forbidden,
            ConfigError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Per-field details, only present for schema violations.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ConfigError::ValidationFailed(errors) => errors,
            _ => &[],
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        ConfigError::NotFound(what.to_string())
    }
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<FieldError> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| {
                    FieldError::new(
                        field.to_string(),
                        e.message
                            .clone()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string()),
                    )
                })
            })
            .collect();
        details.sort_by(|a, b| a.path.cmp(&b.path));
        ConfigError::ValidationFailed(details)
    }
}
