// ============================================
// File: crates/capone-core/src/lib.rs
// ============================================
//! # Capone Core
//!
//! ## Creation Reason
//! Core building blocks of the Capone service-invocation platform:
//! the trust and session substrate shared by servers and clients.
//!
//! ## Main Functionality
//! - `crypto`: key identities and the symmetric key derivation
//! - `channel`: fixed-block framed transport with optional
//!   authenticated encryption
//! - `handshake`: signed ephemeral key exchange establishing the
//!   per-connection symmetric key
//! - `caps`: unforgeable capabilities with verifiable delegation chains
//! - `protocol`: the CBOR wire messages exchanged over channels
//!
//! ## Layering
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ protocol  (wire messages)                    │
//! ├──────────────────────────────────────────────┤
//! │ handshake (key agreement)  caps (authority)  │
//! ├──────────────────────────────────────────────┤
//! │ channel   (framing + AEAD)                   │
//! ├──────────────────────────────────────────────┤
//! │ crypto    (keys, KDF)                        │
//! └──────────────────────────────────────────────┘
//! ```

pub mod caps;
pub mod channel;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod protocol;

pub use caps::{Capability, Rights};
pub use channel::Channel;
pub use crypto::keys::{SignKeyPair, SignPublicKey, SymmetricKey};
pub use error::{CoreError, ErrorKind, Result};
