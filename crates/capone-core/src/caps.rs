// ============================================
// File: crates/capone-core/src/caps.rs
// ============================================
//! # Capabilities
//!
//! ## Creation Reason
//! Implements the unforgeable capability tokens that authorize session
//! access, together with their verifiable delegation chains.
//!
//! ## Main Functionality
//! - `Rights`: bitmask over the EXEC and TERM rights
//! - `Capability::create_root`: random-secret root held by the service
//! - `Capability::create_ref`: derive a delegated capability
//! - `Capability::verify`: replay a presented chain against the root
//! - String codec used by the CLI to pass capabilities around
//!
//! ## Derivation
//! A reference with chain length `n + 1` is derived from its parent by
//! ```text
//! secret' = BLAKE2b-256(parent_secret || be32(rights) || identity)
//! ```
//! so the service can recompute any chain from the root secret alone.
//! Delegation is additively monotonic: a link may only carry a subset
//! of its parent's rights, which the derivation makes unforgeable.
//!
//! ## String Form
//! ```text
//! hex(secret) ( "|" hex(identity) ":" rights_letters )*
//! ```
//! with `x` = EXEC and `t` = TERM.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The derivation input order is wire-compatible state. Never change
//!   it without a protocol version bump.
//! - Secret comparison MUST stay constant-time.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use blake2::Digest;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::crypto::kdf::Blake2b256;
use crate::crypto::keys::SignPublicKey;
use crate::error::{CoreError, Result};

/// Size of a capability secret in bytes.
pub const CAP_SECRET_SIZE: usize = 32;

// ============================================
// Rights
// ============================================

/// Bitmask over the rights a capability grants.
///
/// Future rights are additive; unknown bits are rejected at the string
/// codec but preserved on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rights(u32);

impl Rights {
    /// Right to connect to a session and drive the service.
    pub const EXEC: Rights = Rights(1 << 0);

    /// Right to terminate a session.
    pub const TERM: Rights = Rights(1 << 1);

    /// No rights at all.
    pub const NONE: Rights = Rights(0);

    /// Creates a rights mask from its raw bit representation.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if every right in `self` is also in `other`.
    #[must_use]
    pub const fn subset_of(self, other: Rights) -> bool {
        self.0 & !other.0 == 0
    }

    /// Returns `true` if all rights in `right` are granted.
    #[must_use]
    pub const fn contains(self, right: Rights) -> bool {
        right.subset_of(self)
    }

    /// Returns `true` if no right is granted.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parses a single right letter (`x` or `t`).
    fn from_letter(letter: char) -> Option<Rights> {
        match letter {
            'x' => Some(Self::EXEC),
            't' => Some(Self::TERM),
            _ => None,
        }
    }
}

impl BitOr for Rights {
    type Output = Rights;

    fn bitor(self, rhs: Rights) -> Rights {
        Rights(self.0 | rhs.0)
    }
}

impl BitOrAssign for Rights {
    fn bitor_assign(&mut self, rhs: Rights) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(Self::EXEC) {
            f.write_str("x")?;
        }
        if self.contains(Self::TERM) {
            f.write_str("t")?;
        }
        Ok(())
    }
}

// ============================================
// ChainLink
// ============================================

/// One delegation step: the identity the capability was delegated to
/// and the rights it received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    /// Identity the parent delegated to.
    pub identity: SignPublicKey,
    /// Rights granted by this step.
    pub rights: Rights,
}

// ============================================
// Capability
// ============================================

/// An unforgeable secret plus its delegation chain.
///
/// A chain of length zero is a *root* capability, held only by the
/// service and never transmitted. A *reference* capability has a
/// non-empty chain ending at the identity that may present it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    secret: [u8; CAP_SECRET_SIZE],
    chain: Vec<ChainLink>,
}

impl Capability {
    /// Creates a root capability with a fresh random secret.
    #[must_use]
    pub fn create_root() -> Self {
        let mut secret = [0u8; CAP_SECRET_SIZE];
        OsRng.fill_bytes(&mut secret);
        Self {
            secret,
            chain: Vec::new(),
        }
    }

    /// Reassembles a capability from its parts, e.g. after wire decode.
    #[must_use]
    pub fn from_parts(secret: [u8; CAP_SECRET_SIZE], chain: Vec<ChainLink>) -> Self {
        Self { secret, chain }
    }

    /// Returns the delegation chain.
    #[must_use]
    pub fn chain(&self) -> &[ChainLink] {
        &self.chain
    }

    /// Returns the chain length; zero for a root capability.
    #[must_use]
    pub fn chain_depth(&self) -> usize {
        self.chain.len()
    }

    /// Returns `true` for a root capability.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.chain.is_empty()
    }

    /// Returns the rights granted at the chain tail. A root implicitly
    /// holds all rights.
    #[must_use]
    pub fn tail_rights(&self) -> Rights {
        self.chain
            .last()
            .map_or(Rights::EXEC | Rights::TERM, |link| link.rights)
    }

    /// Returns the identity at the chain tail, if any.
    #[must_use]
    pub fn tail_identity(&self) -> Option<&SignPublicKey> {
        self.chain.last().map(|link| &link.identity)
    }

    /// Derives a capability delegated to `identity` with `rights`.
    ///
    /// # Errors
    /// Returns `Unauthorized` if `rights` is not a subset of the rights
    /// this capability holds; delegation never widens authority.
    pub fn create_ref(&self, rights: Rights, identity: SignPublicKey) -> Result<Capability> {
        if !rights.subset_of(self.tail_rights()) {
            return Err(CoreError::Unauthorized);
        }

        let secret = derive_secret(&self.secret, rights, &identity);
        let mut chain = self.chain.clone();
        chain.push(ChainLink { identity, rights });

        Ok(Capability { secret, chain })
    }

    /// Verifies that `self` is a valid reference derived from `root`,
    /// presented by `invoker`, granting `required`.
    ///
    /// The chain is replayed from the root secret; each step must keep
    /// rights monotonically non-increasing and the reconstructed secret
    /// must match in constant time.
    ///
    /// # Errors
    /// Returns `Unauthorized` on any mismatch. A root capability never
    /// verifies as a reference.
    pub fn verify(&self, root: &Capability, invoker: &SignPublicKey, required: Rights) -> Result<()> {
        let tail = self.chain.last().ok_or(CoreError::Unauthorized)?;
        if tail.identity != *invoker {
            return Err(CoreError::Unauthorized);
        }
        if !tail.rights.contains(required) {
            return Err(CoreError::Unauthorized);
        }

        let mut secret = root.secret;
        let mut rights = Rights::EXEC | Rights::TERM;

        for link in &self.chain {
            if !link.rights.subset_of(rights) {
                return Err(CoreError::Unauthorized);
            }
            secret = derive_secret(&secret, link.rights, &link.identity);
            rights = link.rights;
        }

        if !rights.contains(required) {
            return Err(CoreError::Unauthorized);
        }
        if !bool::from(secret.ct_eq(&self.secret)) {
            return Err(CoreError::Unauthorized);
        }

        Ok(())
    }
}

/// One step of the secret derivation.
fn derive_secret(
    parent_secret: &[u8; CAP_SECRET_SIZE],
    rights: Rights,
    identity: &SignPublicKey,
) -> [u8; CAP_SECRET_SIZE] {
    let mut hasher = Blake2b256::new();
    hasher.update(parent_secret);
    hasher.update(rights.bits().to_be_bytes());
    hasher.update(identity.as_bytes());
    hasher.finalize().into()
}

// ============================================
// String Codec
// ============================================

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.secret))?;
        for link in &self.chain {
            write!(f, "|{}:{}", link.identity, link.rights)?;
        }
        Ok(())
    }
}

impl FromStr for Capability {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('|');

        let secret_hex = parts.next().unwrap_or("");
        if secret_hex.len() != CAP_SECRET_SIZE * 2 {
            return Err(CoreError::invalid_capability("wrong secret length"));
        }
        let secret_bytes = hex::decode(secret_hex)
            .map_err(|_| CoreError::invalid_capability("malformed hex secret"))?;
        let mut secret = [0u8; CAP_SECRET_SIZE];
        secret.copy_from_slice(&secret_bytes);

        let mut chain = Vec::new();
        let mut allowed = Rights::EXEC | Rights::TERM;

        for entry in parts {
            let (identity_hex, letters) = entry
                .split_once(':')
                .ok_or_else(|| CoreError::invalid_capability("chain entry without rights"))?;

            let identity = SignPublicKey::from_hex(identity_hex)
                .map_err(|_| CoreError::invalid_capability("chain entry with invalid identity"))?;

            let mut rights = Rights::NONE;
            for letter in letters.chars() {
                rights |= Rights::from_letter(letter)
                    .ok_or_else(|| CoreError::invalid_capability("unknown right letter"))?;
            }

            if rights.is_empty() {
                return Err(CoreError::invalid_capability("chain entry without rights"));
            }
            if !rights.subset_of(allowed) {
                return Err(CoreError::invalid_capability("rights expand along the chain"));
            }
            allowed = rights;

            chain.push(ChainLink { identity, rights });
        }

        Ok(Capability { secret, chain })
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::SignKeyPair;

    fn identity() -> SignPublicKey {
        SignKeyPair::generate().public_key()
    }

    #[test]
    fn test_root_secrets_are_distinct() {
        let caps: Vec<_> = (0..10).map(|_| Capability::create_root()).collect();
        for pair in caps.windows(2) {
            assert_ne!(pair[0].secret, pair[1].secret);
        }
    }

    #[test]
    fn test_verifying_valid_ref_succeeds() {
        let pk = identity();
        let root = Capability::create_root();
        let cap = root.create_ref(Rights::EXEC, pk).unwrap();

        assert!(cap.verify(&root, &pk, Rights::EXEC).is_ok());
    }

    #[test]
    fn test_verifying_with_different_identity_fails() {
        let pk = identity();
        let other = identity();
        let root = Capability::create_root();
        let cap = root.create_ref(Rights::EXEC, pk).unwrap();

        assert!(matches!(
            cap.verify(&root, &other, Rights::EXEC),
            Err(CoreError::Unauthorized)
        ));
    }

    #[test]
    fn test_verifying_for_ungranted_right_fails() {
        let pk = identity();
        let root = Capability::create_root();
        let cap = root.create_ref(Rights::EXEC, pk).unwrap();

        assert!(cap.verify(&root, &pk, Rights::TERM).is_err());
        assert!(cap.verify(&root, &pk, Rights::EXEC | Rights::TERM).is_err());
    }

    #[test]
    fn test_root_never_verifies_as_reference() {
        let pk = identity();
        let root = Capability::create_root();

        assert!(root.clone().verify(&root, &pk, Rights::EXEC).is_err());
    }

    #[test]
    fn test_delegation_cannot_widen_rights() {
        let broker = identity();
        let root = Capability::create_root();
        let narrowed = root.create_ref(Rights::EXEC, broker).unwrap();

        assert!(matches!(
            narrowed.create_ref(Rights::EXEC | Rights::TERM, identity()),
            Err(CoreError::Unauthorized)
        ));
    }

    #[test]
    fn test_two_step_delegation_verifies_for_final_identity() {
        let broker = identity();
        let user = identity();
        let root = Capability::create_root();

        let broker_cap = root.create_ref(Rights::EXEC | Rights::TERM, broker).unwrap();
        let user_cap = broker_cap.create_ref(Rights::EXEC, user).unwrap();

        assert!(user_cap.verify(&root, &user, Rights::EXEC).is_ok());
        // The broker may not present the delegated capability itself.
        assert!(user_cap.verify(&root, &broker, Rights::EXEC).is_err());
    }

    #[test]
    fn test_tampered_chain_fails_verification() {
        let pk = identity();
        let root = Capability::create_root();
        let cap = root.create_ref(Rights::EXEC, pk).unwrap();

        let mut widened = cap.clone();
        widened.chain[0].rights = Rights::EXEC | Rights::TERM;
        assert!(widened.verify(&root, &pk, Rights::EXEC).is_err());

        let other = identity();
        let mut swapped = cap.clone();
        swapped.chain[0].identity = other;
        assert!(swapped.verify(&root, &other, Rights::EXEC).is_err());

        let mut forged = cap;
        forged.secret[0] ^= 0xff;
        assert!(forged.verify(&root, &pk, Rights::EXEC).is_err());
    }

    #[test]
    fn test_string_roundtrip() {
        let pk = identity();
        let root = Capability::create_root();
        let cap = root
            .create_ref(Rights::EXEC | Rights::TERM, pk)
            .unwrap()
            .create_ref(Rights::EXEC, identity())
            .unwrap();

        let parsed: Capability = cap.to_string().parse().unwrap();
        assert_eq!(cap, parsed);
    }

    #[test]
    fn test_string_form_layout() {
        let pk = identity();
        let secret = [0xaau8; CAP_SECRET_SIZE];
        let cap = Capability::from_parts(
            secret,
            vec![ChainLink {
                identity: pk,
                rights: Rights::EXEC | Rights::TERM,
            }],
        );

        assert_eq!(cap.to_string(), format!("{}|{}:xt", "aa".repeat(32), pk));
    }

    #[test]
    fn test_parsing_rejects_malformed_strings() {
        let secret = "aa".repeat(32);
        let pk = identity();

        // wrong secret length
        assert!(format!("{secret}a").parse::<Capability>().is_err());
        // bad hex in the secret
        assert!(format!("zz{}", "aa".repeat(31)).parse::<Capability>().is_err());
        // entry without the rights separator
        assert!(format!("{secret}|{pk}").parse::<Capability>().is_err());
        // unknown right letter
        assert!(format!("{secret}|{pk}:z").parse::<Capability>().is_err());
        // empty rights
        assert!(format!("{secret}|{pk}:").parse::<Capability>().is_err());
        // rights expanding along the chain
        assert!(format!("{secret}|{pk}:x|{pk}:xt").parse::<Capability>().is_err());
        // trailing garbage after the chain
        assert!(format!("{secret}|{pk}:x|").parse::<Capability>().is_err());
    }

    #[test]
    fn test_parsing_plain_secret_yields_root() {
        let secret = "aa".repeat(32);
        let cap: Capability = secret.parse().unwrap();
        assert!(cap.is_root());
    }

    #[test]
    fn test_wire_roundtrip() {
        let pk = identity();
        let root = Capability::create_root();
        let cap = root.create_ref(Rights::EXEC, pk).unwrap();

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&cap, &mut buf).unwrap();
        let decoded: Capability = ciborium::de::from_reader(buf.as_slice()).unwrap();

        assert_eq!(cap, decoded);
        assert!(decoded.verify(&root, &pk, Rights::EXEC).is_ok());
    }
}
