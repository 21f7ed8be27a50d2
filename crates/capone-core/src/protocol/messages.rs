// ============================================
// File: crates/capone-core/src/protocol/messages.rs
// ============================================
//! # Protocol Message Definitions
//!
//! ## Creation Reason
//! Defines every message that crosses a channel, for both the handshake
//! and the connection command protocol.
//!
//! ## Message Inventory
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `SessionKey` | both | handshake: signed ephemeral key |
//! | `ConnectionInitiation` | client → server | selects the command |
//! | `ServiceDescription` | server → client | Query response |
//! | `SessionRequest` | client → server | Request body |
//! | `SessionMessage` | server → client | Request response |
//! | `SessionInitiation` | client → server | Connect body |
//! | `SessionTermination` | client → server | Terminate body |
//! | `SessionResult` | server → client | framed return code |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Field names are part of the wire schema; renames break peers
//! - The `SessionKey` signature field is a fixed 64-byte array so the
//!   handshake frames stay constant-size

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::caps::Capability;
use crate::crypto::keys::SignPublicKey;
use crate::crypto::{ENCRYPT_PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::error::{CoreError, ErrorKind};

// ============================================
// Command
// ============================================

/// The connection command selected right after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Ask for the service description.
    Query = 0,
    /// Establish a session, receiving a delegatable capability.
    Request = 1,
    /// Connect to a previously requested session.
    Connect = 2,
    /// Terminate a session.
    Terminate = 3,
}

impl Command {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Command {
    type Error = CoreError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Query),
            1 => Ok(Self::Request),
            2 => Ok(Self::Connect),
            3 => Ok(Self::Terminate),
            other => Err(CoreError::InvalidCommand(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Query => "query",
            Self::Request => "request",
            Self::Connect => "connect",
            Self::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

// ============================================
// SignatureBytes
// ============================================

/// A fixed 64-byte detached signature field.
///
/// Serde only derives arrays up to 32 elements, so this carries its own
/// bytes-form serde impl. The field length never varies, keeping the
/// handshake frame constant-size.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes(pub [u8; SIGNATURE_SIZE]);

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SignatureBytes({:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl Serialize for SignatureBytes {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for SignatureBytes {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SigVisitor;

        impl<'de> serde::de::Visitor<'de> for SigVisitor {
            type Value = SignatureBytes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a byte string of length {SIGNATURE_SIZE}")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                if v.len() != SIGNATURE_SIZE {
                    return Err(E::invalid_length(v.len(), &self));
                }
                let mut arr = [0u8; SIGNATURE_SIZE];
                arr.copy_from_slice(v);
                Ok(SignatureBytes(arr))
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let mut arr = [0u8; SIGNATURE_SIZE];
                for (i, slot) in arr.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                if seq.next_element::<u8>()?.is_some() {
                    return Err(serde::de::Error::invalid_length(SIGNATURE_SIZE + 1, &self));
                }
                Ok(SignatureBytes(arr))
            }
        }

        deserializer.deserialize_bytes(SigVisitor)
    }
}

// ============================================
// Handshake
// ============================================

/// One side's contribution to the key exchange: its long-term identity,
/// a fresh ephemeral key and the identity's signature over it.
///
/// Every field encodes as a fixed-length byte string, so the handshake
/// frames are constant-size in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionKey {
    /// Long-term Ed25519 identity.
    pub sign_pk: SignPublicKey,
    /// Ephemeral X25519 public key.
    #[serde(with = "key_bytes")]
    pub encrypt_pk: [u8; ENCRYPT_PUBLIC_KEY_SIZE],
    /// `Sign(sign_sk, encrypt_pk)`.
    pub signature: SignatureBytes,
}

/// Bytes-form serde for 32-byte key fields; the derived array impl
/// would encode them as integer sequences of varying width.
mod key_bytes {
    use super::ENCRYPT_PUBLIC_KEY_SIZE;
    use std::fmt;

    pub fn serialize<S: serde::Serializer>(
        key: &[u8; ENCRYPT_PUBLIC_KEY_SIZE],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(key)
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; ENCRYPT_PUBLIC_KEY_SIZE], D::Error> {
        struct KeyVisitor;

        impl<'de> serde::de::Visitor<'de> for KeyVisitor {
            type Value = [u8; ENCRYPT_PUBLIC_KEY_SIZE];

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a byte string of length {ENCRYPT_PUBLIC_KEY_SIZE}")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                if v.len() != ENCRYPT_PUBLIC_KEY_SIZE {
                    return Err(E::invalid_length(v.len(), &self));
                }
                let mut arr = [0u8; ENCRYPT_PUBLIC_KEY_SIZE];
                arr.copy_from_slice(v);
                Ok(arr)
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let mut arr = [0u8; ENCRYPT_PUBLIC_KEY_SIZE];
                for (i, slot) in arr.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                if seq.next_element::<u8>()?.is_some() {
                    return Err(serde::de::Error::invalid_length(
                        ENCRYPT_PUBLIC_KEY_SIZE + 1,
                        &self,
                    ));
                }
                Ok(arr)
            }
        }

        deserializer.deserialize_bytes(KeyVisitor)
    }
}

// ============================================
// Connection Commands
// ============================================

/// Selects which command the connection will carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConnectionInitiation {
    /// Raw command discriminant; validate via `Command::try_from`.
    pub command: u32,
}

impl ConnectionInitiation {
    /// Wraps a command for the wire.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command: command.as_u32(),
        }
    }

    /// Validates the received discriminant.
    ///
    /// # Errors
    /// Returns `InvalidCommand` for unknown values.
    pub fn command(&self) -> crate::error::Result<Command> {
        Command::try_from(self.command)
    }
}

/// Everything a peer learns about a service from a Query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub name: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub location: String,
    pub port: String,
}

/// Request body: service-specific parameters, opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub parameters: Vec<u8>,
}

/// Request response: the session handle and the capability delegated to
/// the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub identifier: u32,
    pub cap: Capability,
}

/// Connect body: which session, authorized by which capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInitiation {
    pub identifier: u32,
    pub cap: Capability,
}

/// Terminate body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTermination {
    pub identifier: u32,
    pub cap: Capability,
}

/// Framed return code: zero for success, otherwise an error class code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub result: i32,
}

impl SessionResult {
    /// The success result.
    #[must_use]
    pub const fn ok() -> Self {
        Self { result: 0 }
    }

    /// A failure result carrying the error class.
    #[must_use]
    pub const fn failure(kind: ErrorKind) -> Self {
        Self {
            result: kind.code(),
        }
    }

    /// Returns `true` on success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result == 0
    }

    /// Decodes the error class of a failure result, if recognizable.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(self.result)
    }
}

// ============================================
// Tests
// ============================================
