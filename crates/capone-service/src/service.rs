// ============================================
// File: crates/capone-service/src/service.rs
// ============================================
//! # Service Descriptors
//!
//! ## Creation Reason
//! Binds a configured `[service]` block to the plugin implementing its
//! type. Descriptors are immutable after configuration; the server
//! opens one listening socket per descriptor.

use std::sync::Arc;

use capone_core::protocol::messages::ServiceDescription;

use crate::config::Section;
use crate::error::{Result, ServiceError};
use crate::plugin::ServicePlugin;
use crate::plugins;

/// One exposed service: its configured identity plus the plugin that
/// implements it.
#[derive(Clone)]
pub struct ServiceDescriptor {
    /// Configured service name, unique per host.
    pub name: String,
    /// Service type, resolving to a plugin.
    pub kind: String,
    /// Human-readable location advertised in queries.
    pub location: String,
    /// TCP port the service listens on.
    pub port: String,
    /// The implementation behind this service.
    pub plugin: Arc<dyn ServicePlugin>,
}

impl ServiceDescriptor {
    /// Builds a descriptor, resolving the plugin from the registry.
    ///
    /// # Errors
    /// Returns `UnknownServiceType` for unregistered types.
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        location: impl Into<String>,
        port: impl Into<String>,
    ) -> Result<Self> {
        let kind = kind.into();
        let plugin = plugins::by_type(&kind)?;
        Ok(Self {
            name: name.into(),
            kind,
            location: location.into(),
            port: port.into(),
            plugin,
        })
    }

    /// Builds a descriptor around a caller-supplied plugin instance.
    /// Test suites use this to inject recording plugins.
    #[must_use]
    pub fn with_plugin(
        name: impl Into<String>,
        location: impl Into<String>,
        port: impl Into<String>,
        plugin: Arc<dyn ServicePlugin>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: plugin.service_type().to_owned(),
            location: location.into(),
            port: port.into(),
            plugin,
        }
    }

    /// Builds a descriptor from a `[service]` configuration section.
    ///
    /// Every entry must be one of `name`, `type`, `location` and
    /// `port`; each is required and may appear only once.
    ///
    /// # Errors
    /// Returns `Config` on unknown, duplicate or missing entries.
    pub fn from_section(section: &Section) -> Result<Self> {
        let mut name = None;
        let mut kind = None;
        let mut location = None;
        let mut port = None;

        for (key, value) in &section.entries {
            let slot = match key.as_str() {
                "name" => &mut name,
                "type" => &mut kind,
                "location" => &mut location,
                "port" => &mut port,
                other => {
                    return Err(ServiceError::config(format!(
                        "unknown service entry '{other}'"
                    )))
                }
            };
            if slot.replace(value.clone()).is_some() {
                return Err(ServiceError::config(format!(
                    "service entry '{key}' specified twice"
                )));
            }
        }

        let require = |slot: Option<String>, key: &str| {
            slot.ok_or_else(|| ServiceError::missing("service", key))
        };

        Self::new(
            require(name, "name")?,
            require(kind, "type")?,
            require(location, "location")?,
            require(port, "port")?,
        )
    }

    /// The query response for this service.
    #[must_use]
    pub fn describe(&self) -> ServiceDescription {
        ServiceDescription {
            name: self.name.clone(),
            category: self.plugin.category().to_owned(),
            kind: self.plugin.service_type().to_owned(),
            version: self.plugin.version().to_owned(),
            location: self.location.clone(),
            port: self.port.clone(),
        }
    }

    /// The configured port as a number.
    ///
    /// # Errors
    /// Returns `Config` if the port does not parse.
    pub fn port_number(&self) -> Result<u16> {
        self.port
            .parse()
            .map_err(|_| ServiceError::config(format!("invalid service port '{}'", self.port)))
    }
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("location", &self.location)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
