// ============================================
// File: crates/capone-service/src/lib.rs
// ============================================
//! # Capone Services
//!
//! ## Creation Reason
//! Everything both endpoints need to agree on what a *service* is: the
//! INI-shaped configuration file, the service descriptors built from
//! it, and the plugin surface through which the core hands an
//! authorized connection to service-specific code.

pub mod config;
pub mod error;
pub mod plugin;
pub mod plugins;
pub mod service;

pub use config::Config;
pub use error::{Result, ServiceError};
pub use plugin::{ServicePlugin, Session};
pub use service::ServiceDescriptor;
