// ============================================
// File: crates/capone-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines the error taxonomy shared across the Capone crates. Every
//! error maps onto an `ErrorKind`, which carries the numeric class used
//! both as the wire result code of `SessionResult` and as the client's
//! process exit status.
//!
//! ## Error Classes
//! | Kind | Meaning |
//! |------|---------|
//! | Config | missing key, malformed hex, unknown section |
//! | Io | socket or file failure, truncated reads |
//! | Protocol | framing violation, undecodable or oversized message |
//! | Crypto | signature, AEAD or key-exchange failure |
//! | Unauthorized | ACL deny or capability verification failure |
//! | NotFound | unknown (or already consumed) session identifier |
//! | Invalid | malformed capability string, bad parameter, unknown command |
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - Error classes are wire-visible; do not renumber them

use thiserror::Error;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// ErrorKind
// ============================================

/// Coarse error classification with a stable numeric code.
///
/// The code travels in `SessionResult` frames and doubles as the client
/// process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    Config = 1,
    Io = 2,
    Protocol = 3,
    Crypto = 4,
    Unauthorized = 5,
    NotFound = 6,
    Invalid = 7,
}

impl ErrorKind {
    /// Returns the numeric class code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Maps a wire result code back onto a kind.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Config),
            2 => Some(Self::Io),
            3 => Some(Self::Protocol),
            4 => Some(Self::Crypto),
            5 => Some(Self::Unauthorized),
            6 => Some(Self::NotFound),
            7 => Some(Self::Invalid),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Crypto => "crypto",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not found",
            Self::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

// ============================================
// CoreError
// ============================================

/// Errors raised by the channel, handshake, capability and protocol
/// layers.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // I/O Errors
    // ========================================

    /// Underlying socket or descriptor failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the channel at a block boundary.
    #[error("channel closed by peer")]
    ChannelClosed,

    // ========================================
    // Protocol Errors
    // ========================================

    /// The peer closed the channel in the middle of a block.
    #[error("truncated block: expected {expected} bytes, got {actual}")]
    TruncatedBlock {
        /// Block length that was being read
        expected: usize,
        /// Bytes received before the close
        actual: usize,
    },

    /// A payload length exceeded the caller-supplied bound.
    #[error("payload length {length} exceeds limit {max}")]
    InvalidLength {
        /// Length announced by the peer
        length: usize,
        /// Maximum the caller accepts
        max: usize,
    },

    /// A message could not be encoded or decoded.
    #[error("malformed message: {reason}")]
    MalformedMessage {
        /// What went wrong
        reason: String,
    },

    // ========================================
    // Cryptographic Errors
    // ========================================

    /// Signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// AEAD encryption failed; does not happen with valid inputs.
    #[error("encryption failed")]
    Encryption,

    /// AEAD decryption failed; fatal to the channel.
    #[error("decryption failed: authentication error")]
    Decryption,

    /// Key exchange failed (e.g. scalar multiplication produced the
    /// all-zero point).
    #[error("key exchange failed: {reason}")]
    KeyExchange {
        /// Why the exchange failed
        reason: String,
    },

    /// The remote presented a long-term key other than the expected one.
    #[error("remote identity does not match expected key")]
    KeyMismatch,

    // ========================================
    // Validation Errors
    // ========================================

    /// Block length outside the supported 40..=4096 range.
    #[error("block length {0} out of range")]
    InvalidBlockLength(usize),

    /// Unknown connection command on the wire.
    #[error("unknown command {0}")]
    InvalidCommand(u32),

    /// Key material that could not be parsed.
    #[error("invalid key material: {reason}")]
    InvalidKey {
        /// What went wrong
        reason: String,
    },

    /// A capability (wire or string form) that could not be parsed.
    #[error("invalid capability: {reason}")]
    InvalidCapability {
        /// What went wrong
        reason: String,
    },

    /// A malformed argument outside the other categories.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What went wrong
        reason: String,
    },

    // ========================================
    // Authorization
    // ========================================

    /// Capability verification failed, or a delegation attempted to
    /// widen its parent's rights.
    #[error("unauthorized")]
    Unauthorized,
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `MalformedMessage` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates a `KeyExchange` error.
    pub fn key_exchange(reason: impl Into<String>) -> Self {
        Self::KeyExchange {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidKey` error.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidCapability` error.
    pub fn invalid_capability(reason: impl Into<String>) -> Self {
        Self::InvalidCapability {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidArgument` error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    // ========================================
    // Classification
    // ========================================

    /// Returns the error class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::ChannelClosed => ErrorKind::Io,
            Self::TruncatedBlock { .. }
            | Self::InvalidLength { .. }
            | Self::MalformedMessage { .. } => ErrorKind::Protocol,
            Self::SignatureVerification
            | Self::Encryption
            | Self::Decryption
            | Self::KeyExchange { .. }
            | Self::KeyMismatch => ErrorKind::Crypto,
            Self::InvalidBlockLength(_)
            | Self::InvalidCommand(_)
            | Self::InvalidKey { .. }
            | Self::InvalidCapability { .. }
            | Self::InvalidArgument { .. } => ErrorKind::Invalid,
            Self::Unauthorized => ErrorKind::Unauthorized,
        }
    }

    /// Returns `true` if this error might indicate an attack.
    ///
    /// These errors warrant additional logging.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::SignatureVerification | Self::Decryption | Self::KeyMismatch | Self::Unauthorized
        )
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_are_stable() {
        assert_eq!(ErrorKind::Config.code(), 1);
        assert_eq!(ErrorKind::Unauthorized.code(), 5);
        assert_eq!(ErrorKind::Invalid.code(), 7);

        for code in 1..=7 {
            let kind = ErrorKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(ErrorKind::from_code(0).is_none());
        assert!(ErrorKind::from_code(8).is_none());
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(CoreError::Unauthorized.kind(), ErrorKind::Unauthorized);
        assert_eq!(CoreError::Decryption.kind(), ErrorKind::Crypto);
        assert_eq!(
            CoreError::InvalidLength { length: 10, max: 5 }.kind(),
            ErrorKind::Protocol
        );
        assert_eq!(CoreError::InvalidCommand(9).kind(), ErrorKind::Invalid);
        assert!(CoreError::SignatureVerification.is_suspicious());
        assert!(!CoreError::ChannelClosed.is_suspicious());
    }
}
