// ============================================
// File: crates/capone-service/src/error.rs
// ============================================
//! # Service Error Types

use thiserror::Error;

use capone_core::error::{CoreError, ErrorKind};

/// Result type for configuration and service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors from configuration parsing and service lookup.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("missing configuration entry: [{section}] {key}")]
    MissingEntry { section: String, key: String },

    #[error("unknown service type '{0}'")]
    UnknownServiceType(String),

    #[error("no service named '{0}' configured")]
    UnknownService(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ServiceError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn missing(section: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingEntry {
            section: section.into(),
            key: key.into(),
        }
    }

    /// Returns the error class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. }
            | Self::MissingEntry { .. }
            | Self::UnknownServiceType(_)
            | Self::UnknownService(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Core(e) => e.kind(),
        }
    }
}
