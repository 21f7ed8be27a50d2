// ============================================
// File: crates/capone-service/src/plugin.rs
// ============================================
//! # Service Plugin Surface
//!
//! ## Creation Reason
//! The fixed interface between the trust/session core and the code that
//! actually implements a service. The core authorizes a connection and
//! then hands the channel over; everything service-specific lives
//! behind this trait.
//!
//! ## Main Functionality
//! - `Session`: the record a Request creates and a Connect consumes
//! - `ServicePlugin`: parameter codec plus the two connection halves
//!
//! ## Parameter Flow
//! ```text
//! client argv ──parse_params──► opaque bytes ──wire──► validate_params
//!                                                      (then stored in
//!                                                       the session)
//! ```
//! Parameters stay opaque to the core; only the plugin that produced
//! them can interpret them.

use std::time::SystemTime;

use async_trait::async_trait;

use capone_core::caps::Capability;
use capone_core::channel::Channel;
use capone_core::crypto::keys::SignPublicKey;

use crate::config::Config;

// ============================================
// Session
// ============================================

/// A server-side session record.
///
/// Created by a Request, consumed by the first successful Connect or by
/// a Terminate. The capability stored here is the *root*; it never
/// leaves the service host.
#[derive(Debug, Clone)]
pub struct Session {
    /// Randomly drawn identifier, unique among live sessions.
    pub identifier: u32,
    /// Identity that issued the Request.
    pub creator: SignPublicKey,
    /// Plugin-specific parameters as received on the wire.
    pub parameters: Vec<u8>,
    /// Root capability all presented references must derive from.
    pub cap: Capability,
    /// Creation time.
    pub created_at: SystemTime,
}

impl Session {
    /// Creates a session record with a fresh root capability.
    #[must_use]
    pub fn new(identifier: u32, creator: SignPublicKey, parameters: Vec<u8>) -> Self {
        Self {
            identifier,
            creator,
            parameters,
            cap: Capability::create_root(),
            created_at: SystemTime::now(),
        }
    }
}

// ============================================
// ServicePlugin
// ============================================

/// The capability surface every service implements.
///
/// `serve` runs on the service host once a Connect has been authorized;
/// `invoke` runs on the client once the Connect was acknowledged. Both
/// own the channel for the rest of the connection.
#[async_trait]
pub trait ServicePlugin: Send + Sync {
    /// Human-readable service category (e.g. "Shell").
    fn category(&self) -> &'static str;

    /// The type string services of this plugin register under.
    fn service_type(&self) -> &'static str;

    /// Plugin version advertised in query responses.
    fn version(&self) -> &'static str;

    /// Translates client argv into wire parameters.
    ///
    /// # Errors
    /// Returns `InvalidArgument` on unusable argv.
    fn parse_params(&self, args: &[String]) -> capone_core::Result<Vec<u8>>;

    /// Checks that received wire parameters unpack.
    ///
    /// # Errors
    /// Returns `MalformedMessage` on undecodable parameters.
    fn validate_params(&self, params: &[u8]) -> capone_core::Result<()>;

    /// Drives the service side of an authorized Connect.
    async fn serve(
        &self,
        channel: &mut Channel,
        invoker: &SignPublicKey,
        session: &Session,
        cfg: &Config,
    ) -> capone_core::Result<()>;

    /// Drives the invoking side after the Connect was acknowledged.
    async fn invoke(
        &self,
        channel: &mut Channel,
        session: &Session,
        cfg: &Config,
    ) -> capone_core::Result<()>;
}
