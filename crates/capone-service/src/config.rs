// ============================================
// File: crates/capone-service/src/config.rs
// ============================================
//! # Configuration
//!
//! ## Creation Reason
//! Parses the INI-shaped configuration file shared by servers and
//! clients. The format is an external interface of the platform, so it
//! is parsed here instead of being swapped for another config dialect.
//!
//! ## Format
//! ```ini
//! [core]
//! public_key=<hex Ed25519 public key>
//! secret_key=<hex Ed25519 keypair secret>
//! name=My host
//!
//! [service]
//! name=Shell
//! type=exec
//! location=Living room
//! port=1237
//! ```
//! Sections may repeat (one `[service]` block per exposed service).
//! Blank lines and lines starting with `#` or `;` are ignored.
//!
//! ## Access
//! Typed accessors cover the `[core]` and `[service]` sections; plugins
//! read their own sections (e.g. `[xpra] port`) through the raw
//! `get` accessor, so the core never learns their schema.

use std::path::Path;

use tracing::info;

use capone_core::crypto::keys::{SignKeyPair, SignPublicKey};

use crate::error::{Result, ServiceError};
use crate::service::ServiceDescriptor;

// ============================================
// Sections
// ============================================

/// One `[name]` block with its `key=value` entries in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name without the brackets.
    pub name: String,
    /// Entries in file order; keys may repeat across sections.
    pub entries: Vec<(String, String)>,
}

impl Section {
    /// Returns the first value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

// ============================================
// Config
// ============================================

/// A parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    sections: Vec<Section>,
}

impl Config {
    // ========================================
    // Parsing
    // ========================================

    /// Loads and parses a configuration file.
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be read, `Config` on malformed
    /// content.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_str(&content)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parses configuration text.
    ///
    /// # Errors
    /// Returns `Config` on malformed lines or entries outside any
    /// section.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let mut sections: Vec<Section> = Vec::new();

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[') {
                let name = name
                    .strip_suffix(']')
                    .ok_or_else(|| {
                        ServiceError::config(format!("unterminated section on line {}", lineno + 1))
                    })?
                    .trim();
                if name.is_empty() {
                    return Err(ServiceError::config(format!(
                        "empty section name on line {}",
                        lineno + 1
                    )));
                }
                sections.push(Section {
                    name: name.to_owned(),
                    entries: Vec::new(),
                });
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                ServiceError::config(format!("malformed line {}: '{raw}'", lineno + 1))
            })?;
            let section = sections.last_mut().ok_or_else(|| {
                ServiceError::config(format!("entry outside of any section on line {}", lineno + 1))
            })?;
            section
                .entries
                .push((key.trim().to_owned(), value.trim().to_owned()));
        }

        Ok(Self { sections })
    }

    // ========================================
    // Raw Access
    // ========================================

    /// Returns all sections named `name`, in file order.
    pub fn sections<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a Section> + 'b
    where
        'a: 'b,
    {
        self.sections.iter().filter(move |s| s.name == name)
    }

    /// Returns the first value of `key` in the first section named
    /// `section`.
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections(section).find_map(|s| s.get(key))
    }

    // ========================================
    // Typed Accessors
    // ========================================

    /// Returns the `[core]` public key.
    ///
    /// # Errors
    /// Returns `MissingEntry` if absent, `Config` on malformed hex.
    pub fn public_key(&self) -> Result<SignPublicKey> {
        let hex = self
            .get("core", "public_key")
            .ok_or_else(|| ServiceError::missing("core", "public_key"))?;
        SignPublicKey::from_hex(hex).map_err(|e| ServiceError::config(e.to_string()))
    }

    /// Returns the full `[core]` signing identity.
    ///
    /// # Errors
    /// Returns `MissingEntry` on absent keys, `Config` when the hex is
    /// malformed or the halves do not match.
    pub fn sign_keypair(&self) -> Result<SignKeyPair> {
        let public = self
            .get("core", "public_key")
            .ok_or_else(|| ServiceError::missing("core", "public_key"))?;
        let secret = self
            .get("core", "secret_key")
            .ok_or_else(|| ServiceError::missing("core", "secret_key"))?;
        SignKeyPair::from_hex(public, secret).map_err(|e| ServiceError::config(e.to_string()))
    }

    /// Returns the human label advertised in discovery, if configured.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get("core", "name")
    }

    /// Builds descriptors for every configured `[service]` block.
    ///
    /// # Errors
    /// Returns `Config` on incomplete or unknown service entries.
    pub fn services(&self) -> Result<Vec<ServiceDescriptor>> {
        self.sections("service")
            .map(ServiceDescriptor::from_section)
            .collect()
    }

    /// Finds the configured service named `name`.
    ///
    /// # Errors
    /// Returns `UnknownService` if no `[service]` block carries the
    /// name.
    pub fn service_by_name(&self, name: &str) -> Result<ServiceDescriptor> {
        self.sections("service")
            .find(|s| s.get("name") == Some(name))
            .map(ServiceDescriptor::from_section)
            .transpose()?
            .ok_or_else(|| ServiceError::UnknownService(name.to_owned()))
    }
}

// ============================================
// Tests
// ============================================
