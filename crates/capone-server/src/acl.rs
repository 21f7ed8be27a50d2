// ============================================
// File: crates/capone-server/src/acl.rs
// ============================================
//! # Access Control Lists
//!
//! ## Creation Reason
//! Optional allow-lists consulted before the Query and Request
//! commands. A wildcard ACL admits any authenticated identity, which
//! is the default when no list file is given. Connect and Terminate
//! are gated purely by capabilities and never consult an ACL.
//!
//! ## File Format
//! One hex-encoded Ed25519 public key per line; blank lines are
//! ignored. ACLs are read once at startup and never mutated afterwards,
//! so they are shared without locking.

use std::collections::HashSet;
use std::path::Path;

use capone_core::crypto::keys::SignPublicKey;

use crate::error::{Result, ServerError};

/// A set of identities permitted to issue a command.
#[derive(Debug, Clone, Default)]
pub struct Acl {
    wildcard: bool,
    identities: HashSet<SignPublicKey>,
}

impl Acl {
    /// An empty ACL denying everyone.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An ACL admitting any authenticated identity.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            wildcard: true,
            identities: HashSet::new(),
        }
    }

    /// Loads an ACL from a key-per-line file.
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be read, or the underlying key
    /// error for malformed lines.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut acl = Self::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let identity = SignPublicKey::from_hex(line).map_err(ServerError::Core)?;
            acl.add(identity);
        }

        Ok(acl)
    }

    /// Admits `identity`. Returns `false` if it was already present.
    pub fn add(&mut self, identity: SignPublicKey) -> bool {
        self.identities.insert(identity)
    }

    /// Checks whether `identity` may proceed.
    #[must_use]
    pub fn is_allowed(&self, identity: &SignPublicKey) -> bool {
        self.wildcard || self.identities.contains(identity)
    }

    /// Number of explicitly admitted identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Returns `true` if no identity is explicitly admitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

// ============================================
// Tests
// ============================================
