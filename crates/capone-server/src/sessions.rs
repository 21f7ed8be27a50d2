// ============================================
// File: crates/capone-server/src/sessions.rs
// ============================================
//! # Session Registry
//!
//! ## Creation Reason
//! The one piece of mutable shared state in the server: the mapping
//! from session identifier to live session. Request adds, the first
//! successful Connect removes, Terminate removes.
//!
//! ## Invariants
//! - identifiers are unique among live sessions; random draws that
//!   collide are redrawn under the lock
//! - a session is visible to `find` before `add` returns
//! - once `remove(id)` returned the session, no later `find(id)` or
//!   `remove(id)` can succeed; racing Connects are linearized here
//!
//! ## Locking
//! A single mutex serializes all mutations. Session counts stay small
//! (hundreds), so contention and hold times are negligible. The
//! registry is an owning handle passed into the server; there is no
//! process-global state, and tests build fresh registries per case.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use capone_core::crypto::keys::SignPublicKey;
use capone_service::plugin::Session;

/// Process-wide mapping from identifier to session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u32, Arc<Session>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session for `creator`, drawing a fresh unique
    /// identifier and a fresh root capability.
    pub fn add(&self, parameters: Vec<u8>, creator: SignPublicKey) -> Arc<Session> {
        let mut sessions = self.sessions.lock();

        let identifier = loop {
            let candidate = rand::random::<u32>();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Arc::new(Session::new(identifier, creator, parameters));
        sessions.insert(identifier, Arc::clone(&session));

        debug!(identifier, creator = %creator, "session created");
        session
    }

    /// Looks a session up without consuming it.
    #[must_use]
    pub fn find(&self, identifier: u32) -> Option<Arc<Session>> {
        self.sessions.lock().get(&identifier).cloned()
    }

    /// Consumes a session. Exactly one caller wins a race on the same
    /// identifier.
    pub fn remove(&self, identifier: u32) -> Option<Arc<Session>> {
        let removed = self.sessions.lock().remove(&identifier);
        if removed.is_some() {
            debug!(identifier, "session removed");
        }
        removed
    }

    /// Drops every session.
    pub fn clear(&self) {
        self.sessions.lock().clear();
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns `true` if no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use capone_core::crypto::keys::SignKeyPair;

    fn creator() -> SignPublicKey {
        SignKeyPair::generate().public_key()
    }

    #[test]
    fn test_add_then_find() {
        let registry = SessionRegistry::new();
        let session = registry.add(b"params".to_vec(), creator());

        let found = registry.find(session.identifier).unwrap();
        assert_eq!(found.identifier, session.identifier);
        assert_eq!(found.parameters, b"params");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_consumes() {
        let registry = SessionRegistry::new();
        let session = registry.add(Vec::new(), creator());

        assert!(registry.remove(session.identifier).is_some());
        assert!(registry.find(session.identifier).is_none());
        assert!(registry.remove(session.identifier).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sessions_get_distinct_roots() {
        let registry = SessionRegistry::new();
        let a = registry.add(Vec::new(), creator());
        let b = registry.add(Vec::new(), creator());

        assert_ne!(a.identifier, b.identifier);
        assert_ne!(a.cap, b.cap);
    }

    #[test]
    fn test_concurrent_adds_draw_distinct_identifiers() {
        let registry = Arc::new(SessionRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| registry.add(Vec::new(), creator()).identifier)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "identifier {id} drawn twice");
            }
        }
        assert_eq!(registry.len(), 400);
    }

    #[test]
    fn test_clear() {
        let registry = SessionRegistry::new();
        registry.add(Vec::new(), creator());
        registry.add(Vec::new(), creator());

        registry.clear();
        assert!(registry.is_empty());
    }
}
