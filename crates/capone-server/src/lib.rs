// ============================================
// File: crates/capone-server/src/lib.rs
// ============================================
//! # Capone Server
//!
//! ## Creation Reason
//! The service-host side of the platform: authenticates peers, guards
//! commands by ACL and capability, keeps the session registry and
//! supervises per-connection tasks.
//!
//! ## Request Flow
//! ```text
//! ┌──────────┐  accept   ┌───────────────┐  handshake  ┌──────────┐
//! │ listener │ ────────► │ per-conn task │ ──────────► │ dispatch │
//! └──────────┘           └───────────────┘             └────┬─────┘
//!                                                           │
//!                    Query / Request / Connect / Terminate  │
//!                                                           ▼
//!                                  ┌─────────┐      ┌──────────────┐
//!                                  │   ACLs  │      │   session    │
//!                                  │  + caps │      │   registry   │
//!                                  └─────────┘      └──────────────┘
//! ```

pub mod acl;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod sessions;

pub use acl::Acl;
pub use dispatch::ServerContext;
pub use error::{Result, ServerError};
pub use server::Server;
pub use sessions::SessionRegistry;
