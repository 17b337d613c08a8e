// crates/sonar-mcp/src/session.rs
// ============================================================================
// Module: Session Token Store
// Description: Binds HTTP session identifiers to the credential that opened them.
// Purpose: Reject session hijacking with a different credential.
// Dependencies: subtle
// ============================================================================

//! ## Overview
//! The first request carrying an `Mcp-Session-Id` binds that session to its
//! credential. Later requests on the same session must present an equal
//! credential; comparisons run in constant time. The store is shared by all
//! concurrent HTTP handlers and is wiped on shutdown.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use subtle::ConstantTimeEq;

use crate::context::Credential;

// ============================================================================
// SECTION: Session Token Store
// ============================================================================

/// Thread-safe map from session id to bound credential.
///
/// # Invariants
/// - A session id is bound to at most one credential.
/// - After [`SessionTokenStore::shutdown`] no new bindings are accepted.
#[derive(Debug, Default)]
pub struct SessionTokenStore {
    /// Bound credentials keyed by session id.
    bindings: Mutex<HashMap<String, Credential>>,
    /// Set once the store has been shut down.
    closed: AtomicBool,
}

impl SessionTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a session on first use or checks it against the stored credential.
    ///
    /// Returns `true` when the session is newly bound or already bound to an
    /// equal credential, and `false` on mismatch or after shutdown.
    pub fn bind(&self, session_id: &str, credential: &Credential) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut bindings = self.lock();
        match bindings.get(session_id) {
            Some(bound) => credentials_match(bound, credential),
            None => {
                bindings.insert(session_id.to_string(), credential.clone());
                true
            }
        }
    }

    /// Returns the credential bound to a session, if any.
    #[must_use]
    pub fn lookup(&self, session_id: &str) -> Option<Credential> {
        self.lock().get(session_id).cloned()
    }

    /// Removes every binding but keeps accepting new ones.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Wipes all bindings and refuses further binds.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.clear();
    }

    /// Returns the number of bound sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true when no sessions are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Locks the binding map, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Credential>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Compares two credentials without leaking timing on the contents.
fn credentials_match(bound: &Credential, presented: &Credential) -> bool {
    bound.as_str().as_bytes().ct_eq(presented.as_str().as_bytes()).into()
}
