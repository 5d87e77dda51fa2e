//! Presence registry: identity → live connection binding.
//!
//! At most one session per identity. A later register for the same identity
//! supersedes any earlier binding unconditionally; unregister is guarded by
//! connection id so a stale disconnect from a superseded connection can
//! never erase the newer session.

use courier_types::UserId;
use dashmap::DashMap;

/// Relay-assigned connection identifier, unique per accepted connection.
pub type ConnId = u64;

/// A live binding of an identity to a connection handle.
#[derive(Debug, Clone)]
pub struct Binding<H> {
    /// Id of the connection holding this binding.
    pub conn_id: ConnId,
    /// Transport handle used for server→client delivery.
    pub handle: H,
}

/// Maps identities to their currently live connection.
///
/// Generic over the handle type: the relay instantiates it with a shared
/// push target wrapping the QUIC connection; tests use lighter stand-ins.
#[derive(Debug)]
pub struct PresenceRegistry<H> {
    entries: DashMap<UserId, Binding<H>>,
}

impl<H> Default for PresenceRegistry<H> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<H: Clone> PresenceRegistry<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `handle`, replacing any prior binding.
    pub fn register(&self, identity: UserId, conn_id: ConnId, handle: H) {
        let prior = self.entries.insert(identity.clone(), Binding { conn_id, handle });
        match prior {
            Some(old) => tracing::debug!(
                "Superseded session for {}: conn {} -> conn {}",
                identity,
                old.conn_id,
                conn_id
            ),
            None => tracing::debug!("Registered session for {} on conn {}", identity, conn_id),
        }
    }

    /// Remove the binding for `identity` only if it still belongs to
    /// `conn_id`. Returns whether a binding was removed.
    pub fn unregister(&self, identity: &UserId, conn_id: ConnId) -> bool {
        let removed = self
            .entries
            .remove_if(identity, |_, binding| binding.conn_id == conn_id)
            .is_some();

        if removed {
            tracing::debug!("Unregistered session for {} (conn {})", identity, conn_id);
        } else {
            tracing::debug!(
                "Ignored stale unregister for {} (conn {})",
                identity,
                conn_id
            );
        }
        removed
    }

    /// Look up the live binding for `identity`, if any.
    pub fn lookup(&self, identity: &UserId) -> Option<Binding<H>> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no sessions are active.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
