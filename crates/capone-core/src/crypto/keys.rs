// ============================================
// File: crates/capone-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Defines the key identities of the Capone protocol with proper
//! security properties (zero on drop, constant-time comparison).
//!
//! ## Main Functionality
//! - `SignKeyPair`: long-term Ed25519 signing identity
//! - `SignPublicKey`: public half, the protocol's notion of identity
//! - `EphemeralKeyPair`: per-handshake X25519 key exchange keys
//! - `SymmetricKey`: derived channel encryption key
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  SignKeyPair (long-term)                                   │
//! │  ├─ Loaded once from the configuration                     │
//! │  ├─ Signs ephemeral keys during the handshake              │
//! │  └─ Its public half identifies the host or user            │
//! │                                                            │
//! │  EphemeralKeyPair (per handshake)                          │
//! │  ├─ Generated fresh, consumed by the exchange              │
//! │  └─ Destroyed once the shared secret is derived            │
//! │                                                            │
//! │  SymmetricKey (per connection)                             │
//! │  ├─ Derived from the exchange                              │
//! │  └─ Encrypts channel blocks until the connection ends      │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL secret key types MUST be cleared on drop
//! - Secret keys must never be logged or serialized carelessly
//! - Use constant-time comparison for key equality

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    ENCRYPT_PUBLIC_KEY_SIZE, SIGNATURE_SIZE, SIGN_PUBLIC_KEY_SIZE, SIGN_SECRET_KEY_SIZE,
    SYMMETRIC_KEY_SIZE,
};
use crate::error::{CoreError, Result};

// ============================================
// SignKeyPair (Ed25519)
// ============================================

/// Long-term Ed25519 identity key pair.
///
/// # Purpose
/// Signs the ephemeral key during the handshake, proving that the
/// connection endpoint controls the identity it claims.
///
/// # Security
/// - The signing key is cleared on drop (inside `ed25519-dalek`)
/// - The 64-byte secret form (seed ‖ public key) is only ever read from
///   the configuration file
///
/// # Example
/// ```
/// use capone_core::crypto::SignKeyPair;
///
/// let identity = SignKeyPair::generate();
/// let signature = identity.sign(b"hello world");
/// assert!(identity.public_key().verify(b"hello world", &signature).is_ok());
/// ```
pub struct SignKeyPair {
    signing_key: SigningKey,
}

impl SignKeyPair {
    /// Generates a new random identity key pair.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Creates an identity from the 64-byte secret form.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the bytes are inconsistent.
    pub fn from_keypair_bytes(bytes: &[u8; SIGN_SECRET_KEY_SIZE]) -> Result<Self> {
        let signing_key = SigningKey::from_keypair_bytes(bytes)
            .map_err(|_| CoreError::invalid_key("inconsistent Ed25519 keypair bytes"))?;
        Ok(Self { signing_key })
    }

    /// Creates an identity from hex-encoded public and secret keys, as
    /// stored in the `[core]` configuration section.
    ///
    /// # Errors
    /// Returns `InvalidKey` on malformed hex or when the public key does
    /// not belong to the secret key.
    pub fn from_hex(public_hex: &str, secret_hex: &str) -> Result<Self> {
        let secret = decode_hex_exact::<SIGN_SECRET_KEY_SIZE>(secret_hex, "secret key")?;
        let pair = Self::from_keypair_bytes(&secret)?;

        let public = decode_hex_exact::<SIGN_PUBLIC_KEY_SIZE>(public_hex, "public key")?;
        if pair.public_key().to_bytes() != public {
            return Err(CoreError::invalid_key(
                "public key does not match secret key",
            ));
        }

        Ok(pair)
    }

    /// Returns the public key component.
    #[must_use]
    pub fn public_key(&self) -> SignPublicKey {
        SignPublicKey(self.signing_key.verifying_key())
    }

    /// Signs a message with this identity.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Exports the 64-byte secret form.
    ///
    /// # Security Warning
    /// Handle the returned bytes with care and zero them after use.
    #[must_use]
    pub fn to_keypair_bytes(&self) -> [u8; SIGN_SECRET_KEY_SIZE] {
        self.signing_key.to_keypair_bytes()
    }
}

impl fmt::Debug for SignKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print private key material
        f.debug_struct("SignKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

// ============================================
// SignPublicKey
// ============================================

/// Public half of an Ed25519 identity.
///
/// Safe to share; this is what the protocol calls an *identity* and
/// what ACLs and capability chains are keyed by.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignPublicKey(VerifyingKey);

impl SignPublicKey {
    /// Creates a public key from raw bytes.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8; SIGN_PUBLIC_KEY_SIZE]) -> Result<Self> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|_| CoreError::invalid_key("invalid Ed25519 public key"))?;
        Ok(Self(key))
    }

    /// Creates a public key from its hex form.
    ///
    /// # Errors
    /// Returns `InvalidKey` on malformed hex or an invalid point.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = decode_hex_exact::<SIGN_PUBLIC_KEY_SIZE>(hex, "public key")?;
        Self::from_bytes(&bytes)
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SIGN_PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Returns the raw public key bytes (owned).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIGN_PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Verifies a detached signature against this key.
    ///
    /// # Errors
    /// Returns `SignatureVerification` if the signature is invalid.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> Result<()> {
        let sig = Signature::from_bytes(signature);
        self.0
            .verify(message, &sig)
            .map_err(|_| CoreError::SignatureVerification)
    }
}

impl std::hash::Hash for SignPublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(self.0.as_bytes());
    }
}

impl fmt::Debug for SignPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_bytes();
        write!(
            f,
            "SignPublicKey({:02x}{:02x}{:02x}{:02x}...)",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )
    }
}

impl fmt::Display for SignPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.as_bytes()))
    }
}

impl Serialize for SignPublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0.as_bytes()))
        } else {
            serializer.serialize_bytes(self.0.as_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for SignPublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct KeyVisitor;

        impl<'de> serde::de::Visitor<'de> for KeyVisitor {
            type Value = SignPublicKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a 32-byte Ed25519 public key")
            }

            fn visit_bytes<E: serde::de::Error>(
                self,
                v: &[u8],
            ) -> std::result::Result<Self::Value, E> {
                if v.len() != SIGN_PUBLIC_KEY_SIZE {
                    return Err(E::invalid_length(v.len(), &self));
                }
                let mut arr = [0u8; SIGN_PUBLIC_KEY_SIZE];
                arr.copy_from_slice(v);
                SignPublicKey::from_bytes(&arr).map_err(E::custom)
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut arr = [0u8; SIGN_PUBLIC_KEY_SIZE];
                for (i, slot) in arr.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                if seq.next_element::<u8>()?.is_some() {
                    return Err(serde::de::Error::invalid_length(
                        SIGN_PUBLIC_KEY_SIZE + 1,
                        &self,
                    ));
                }
                SignPublicKey::from_bytes(&arr).map_err(serde::de::Error::custom)
            }

            fn visit_str<E: serde::de::Error>(
                self,
                v: &str,
            ) -> std::result::Result<Self::Value, E> {
                SignPublicKey::from_hex(v).map_err(E::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(KeyVisitor)
        } else {
            deserializer.deserialize_bytes(KeyVisitor)
        }
    }
}

// ============================================
// EphemeralKeyPair (X25519)
// ============================================

/// Ephemeral X25519 key pair for the handshake's key exchange.
///
/// # Purpose
/// Generated fresh for every handshake to provide forward secrecy.
/// The secret half is consumed by the exchange and cannot be reused.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    /// Generates a new random ephemeral key pair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Returns the public key bytes.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; ENCRYPT_PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Performs the key exchange with a peer's public key, consuming the
    /// secret half.
    ///
    /// # Errors
    /// Returns `KeyExchange` if the scalar multiplication produces the
    /// all-zero point (a low-order peer key).
    pub fn exchange(self, peer_public: &[u8; ENCRYPT_PUBLIC_KEY_SIZE]) -> Result<[u8; 32]> {
        let peer_key = X25519PublicKey::from(*peer_public);
        let shared = self.secret.diffie_hellman(&peer_key);
        if !shared.was_contributory() {
            return Err(CoreError::key_exchange(
                "scalar multiplication produced the zero point",
            ));
        }
        Ok(*shared.as_bytes())
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.public.as_bytes();
        f.debug_struct("EphemeralKeyPair")
            .field(
                "public",
                &format_args!(
                    "{:02x}{:02x}{:02x}{:02x}...",
                    bytes[0], bytes[1], bytes[2], bytes[3]
                ),
            )
            .finish_non_exhaustive()
    }
}

// ============================================
// SymmetricKey
// ============================================

/// Symmetric key for XSalsa20-Poly1305 channel encryption.
///
/// # Purpose
/// Derived from a completed handshake; also constructible directly for
/// channel tests and benchmarks.
///
/// # Security
/// - Zeroed on drop
/// - Constant-time equality
/// - Never printed
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Creates a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parses a key from its hex form.
    ///
    /// # Errors
    /// Returns `InvalidKey` on malformed hex.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = decode_hex_exact::<SYMMETRIC_KEY_SIZE>(hex, "symmetric key")?;
        Ok(Self(bytes))
    }

    /// Returns the raw key bytes.
    ///
    /// # Security Warning
    /// Do not log or persist the returned bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        write!(f, "SymmetricKey([REDACTED])")
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SymmetricKey {}

// ============================================
// Helpers
// ============================================

/// Decodes hex into an exact-size array.
fn decode_hex_exact<const N: usize>(hex: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(hex.trim())
        .map_err(|_| CoreError::invalid_key(format!("malformed hex in {what}")))?;
    if bytes.len() != N {
        return Err(CoreError::invalid_key(format!(
            "{what} must be {N} bytes, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp1 = SignKeyPair::generate();
        let kp2 = SignKeyPair::generate();
        assert_ne!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn test_sign_verify() {
        let kp = SignKeyPair::generate();
        let signature = kp.sign(b"test message");

        assert!(kp.public_key().verify(b"test message", &signature).is_ok());
        assert!(kp.public_key().verify(b"wrong message", &signature).is_err());
    }

    #[test]
    fn test_keypair_hex_roundtrip() {
        let kp = SignKeyPair::generate();
        let public_hex = hex::encode(kp.public_key().as_bytes());
        let secret_hex = hex::encode(kp.to_keypair_bytes());

        let restored = SignKeyPair::from_hex(&public_hex, &secret_hex).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());
    }

    #[test]
    fn test_keypair_from_hex_rejects_mismatched_public() {
        let kp = SignKeyPair::generate();
        let other = SignKeyPair::generate();
        let secret_hex = hex::encode(kp.to_keypair_bytes());
        let wrong_public = hex::encode(other.public_key().as_bytes());

        assert!(SignKeyPair::from_hex(&wrong_public, &secret_hex).is_err());
    }

    #[test]
    fn test_public_key_from_hex_rejects_bad_input() {
        assert!(SignPublicKey::from_hex("abcd").is_err());
        assert!(SignPublicKey::from_hex("not hex at all").is_err());
    }

    #[test]
    fn test_ephemeral_key_exchange() {
        let alice = EphemeralKeyPair::generate();
        let bob = EphemeralKeyPair::generate();

        let alice_pub = alice.public_key_bytes();
        let bob_pub = bob.public_key_bytes();

        let alice_shared = alice.exchange(&bob_pub).unwrap();
        let bob_shared = bob.exchange(&alice_pub).unwrap();

        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn test_ephemeral_exchange_rejects_zero_point() {
        let alice = EphemeralKeyPair::generate();
        let result = alice.exchange(&[0u8; 32]);
        assert!(matches!(result, Err(CoreError::KeyExchange { .. })));
    }

    #[test]
    fn test_symmetric_key_equality_and_hex() {
        let key = SymmetricKey::generate();
        let parsed = SymmetricKey::from_hex(&hex::encode(key.as_bytes())).unwrap();
        assert_eq!(key, parsed);

        assert!(SymmetricKey::from_hex("00ff").is_err());
    }

    #[test]
    fn test_public_key_cbor_roundtrip() {
        let kp = SignKeyPair::generate();
        let public = kp.public_key();

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&public, &mut buf).unwrap();
        let restored: SignPublicKey = ciborium::de::from_reader(buf.as_slice()).unwrap();

        assert_eq!(public, restored);
    }
}
