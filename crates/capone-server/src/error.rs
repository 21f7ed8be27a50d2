// ============================================
// File: crates/capone-server/src/error.rs
// ============================================
//! # Server Error Types

use thiserror::Error;

use capone_core::error::{CoreError, ErrorKind};
use capone_service::error::ServiceError;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session {0} not found")]
    SessionNotFound(u32),

    #[error("access denied")]
    AccessDenied,

    #[error("server failed to start: {reason}")]
    Startup { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ServerError {
    pub fn startup(reason: impl Into<String>) -> Self {
        Self::Startup {
            reason: reason.into(),
        }
    }

    /// Returns the error class, used for wire result codes.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound(_) => ErrorKind::NotFound,
            Self::AccessDenied => ErrorKind::Unauthorized,
            Self::Startup { .. } => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Core(e) => e.kind(),
            Self::Service(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(ServerError::SessionNotFound(7).kind(), ErrorKind::NotFound);
        assert_eq!(ServerError::AccessDenied.kind(), ErrorKind::Unauthorized);
        assert_eq!(
            ServerError::Core(CoreError::Unauthorized).kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(ServerError::startup("no port").kind(), ErrorKind::Config);
    }
}
