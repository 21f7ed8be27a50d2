// ============================================
// File: crates/capone-core/src/crypto/mod.rs
// ============================================
//! # Cryptographic Primitives
//!
//! ## Creation Reason
//! Collects the key types and derivation functions used by the channel,
//! the handshake and the capability model.
//!
//! ## Main Functionality
//! - `keys`: long-term signing identities, per-handshake ephemeral
//!   encryption keys, symmetric channel keys
//! - `kdf`: BLAKE2b-256 channel key derivation
//!
//! ## Cipher Suite
//! - Ed25519 signatures (long-term identities)
//! - X25519 key agreement (ephemeral, per handshake)
//! - XSalsa20-Poly1305 authenticated encryption (channel blocks)
//! - BLAKE2b-256 hashing (KDF and capability secrets)

pub mod kdf;
pub mod keys;

pub use kdf::derive_channel_key;
pub use keys::{EphemeralKeyPair, SignKeyPair, SignPublicKey, SymmetricKey};

// ============================================
// Size Constants
// ============================================

/// Size of an Ed25519 public key in bytes.
pub const SIGN_PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 keypair secret (seed ‖ public key) in bytes.
pub const SIGN_SECRET_KEY_SIZE: usize = 64;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Size of an X25519 public key in bytes.
pub const ENCRYPT_PUBLIC_KEY_SIZE: usize = 32;

/// Size of a symmetric channel key in bytes.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Size of an XSalsa20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag in bytes.
pub const MAC_SIZE: usize = 16;
