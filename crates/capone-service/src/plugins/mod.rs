// ============================================
// File: crates/capone-service/src/plugins/mod.rs
// ============================================
//! # Built-in Plugins
//!
//! The registry mapping a service `type` string to its plugin. Further
//! service flavors (screen sharing, input forwarding, capability
//! brokering) plug in here without the core changing.

use std::sync::Arc;

use crate::error::{Result, ServiceError};
use crate::plugin::ServicePlugin;

pub mod exec;

/// Resolves the plugin registered for a service type.
///
/// # Errors
/// Returns `UnknownServiceType` for unregistered types.
pub fn by_type(kind: &str) -> Result<Arc<dyn ServicePlugin>> {
    match kind {
        "exec" => Ok(Arc::new(exec::ExecPlugin)),
        "test" => Ok(Arc::new(test::TestPlugin::default())),
        other => Err(ServiceError::UnknownServiceType(other.to_owned())),
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_types_resolve() {
        assert_eq!(by_type("test").unwrap().service_type(), "test");
        assert_eq!(by_type("exec").unwrap().service_type(), "exec");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(matches!(
            by_type("synergy"),
            Err(ServiceError::UnknownServiceType(_))
        ));
    }
}
