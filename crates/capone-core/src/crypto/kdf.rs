// ============================================
// File: crates/capone-core/src/crypto/kdf.rs
// ============================================
//! # Channel Key Derivation
//!
//! ## Creation Reason
//! Derives the symmetric channel key from the X25519 shared secret so
//! that both handshake parties end up with identical key material bound
//! to their ephemeral keys.
//!
//! ## Derivation
//! ```text
//! K = BLAKE2b-256(q || epk_initiator || epk_responder)
//! ```
//! where `q` is the X25519 shared secret. Both sides order the ephemeral
//! keys identically (initiator first), so the derived keys match.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use zeroize::Zeroize;

use super::keys::SymmetricKey;
use super::ENCRYPT_PUBLIC_KEY_SIZE;

/// BLAKE2b with 32-byte output.
pub(crate) type Blake2b256 = Blake2b<U32>;

/// Derives the channel key from a completed key exchange.
///
/// # Arguments
/// * `shared_secret` - X25519 scalar multiplication output
/// * `initiator_public` - initiator's ephemeral public key
/// * `responder_public` - responder's ephemeral public key
///
/// # Key Binding
/// Hashing both ephemeral publics into the key binds it to this exact
/// exchange; a transcript with swapped or substituted ephemerals yields
/// a different key.
#[must_use]
pub fn derive_channel_key(
    shared_secret: &[u8; 32],
    initiator_public: &[u8; ENCRYPT_PUBLIC_KEY_SIZE],
    responder_public: &[u8; ENCRYPT_PUBLIC_KEY_SIZE],
) -> SymmetricKey {
    let mut hasher = Blake2b256::new();
    hasher.update(shared_secret);
    hasher.update(initiator_public);
    hasher.update(responder_public);

    let mut key_bytes: [u8; 32] = hasher.finalize().into();
    let key = SymmetricKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    key
}

// ============================================
// Tests
// ============================================
