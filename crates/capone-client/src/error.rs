// ============================================
// File: crates/capone-client/src/error.rs
// ============================================
//! # Client Error Types

use thiserror::Error;

use capone_core::error::{CoreError, ErrorKind};
use capone_service::error::ServiceError;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error types.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered a command with a failure code.
    #[error("server refused: {}", describe_code(.0))]
    Remote(i32),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ClientError {
    /// Returns the error class; remote failures carry the class the
    /// server reported.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Remote(code) => ErrorKind::from_code(*code).unwrap_or(ErrorKind::Protocol),
            Self::Core(e) => e.kind(),
            Self::Service(e) => e.kind(),
        }
    }

    /// The process exit status surfacing this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.kind().code()
    }
}

fn describe_code(code: &i32) -> String {
    match ErrorKind::from_code(*code) {
        Some(kind) => kind.to_string(),
        None => format!("unknown error class {code}"),
    }
}
