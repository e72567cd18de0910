// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connected-client bookkeeping (spec §3 "Client").

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonically assigned identifier for a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Which wire framing a connection was detected to use (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Binary,
    Json,
}

/// Peer credentials obtained via `SO_PEERCRED` (Linux) or `getpeereid`
/// (BSD/macOS). Zero on platforms that don't expose them — never treated
/// as an authentication mechanism, only as diagnostic/logging context
/// (spec: "Non-goals: no authentication beyond peer credentials").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerCreds {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Metadata the listener and connection handler track per connection.
///
/// The receive buffer and per-connection JSON-framer state live alongside
/// the socket in the connection task, not here; this struct is the
/// registry-visible summary used for `status`/diagnostics and for
/// `max_connections` accounting.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub peer: PeerCreds,
    pub connect_time: Instant,
    pub protocol: Protocol,
}

/// Registry of currently-connected clients, owned by the listener.
///
/// Guarded by its own mutex per spec §5's lock-ordering rule
/// (client-registry -> queue -> stats; never the reverse).
#[derive(Default)]
pub struct ClientRegistry {
    next_id: AtomicU32,
    clients: Mutex<HashMap<ClientId, Client>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection, enforcing `max_connections`.
    ///
    /// Returns `None` if the registry is already at capacity — the caller
    /// must reject the accept and close the fd (spec §4.2).
    pub fn register(
        &self,
        peer: PeerCreds,
        protocol: Protocol,
        max_connections: usize,
    ) -> Option<ClientId> {
        let mut clients = self.clients.lock();
        if clients.len() >= max_connections {
            return None;
        }
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        clients.insert(id, Client { id, peer, connect_time: Instant::now(), protocol });
        Some(id)
    }

    pub fn unregister(&self, id: ClientId) {
        self.clients.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: ClientId) -> Option<Client> {
        self.clients.lock().get(&id).cloned()
    }
}

pub type SharedClientRegistry = Arc<ClientRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_respects_max_connections() {
        let reg = ClientRegistry::new();
        let a = reg.register(PeerCreds::default(), Protocol::Json, 1);
        assert!(a.is_some());
        let b = reg.register(PeerCreds::default(), Protocol::Json, 1);
        assert!(b.is_none(), "second registration must be rejected at capacity 1");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unregister_frees_capacity() {
        let reg = ClientRegistry::new();
        let id = reg.register(PeerCreds::default(), Protocol::Binary, 1).unwrap();
        reg.unregister(id);
        assert!(reg.is_empty());
        assert!(reg.register(PeerCreds::default(), Protocol::Binary, 1).is_some());
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let reg = ClientRegistry::new();
        let a = reg.register(PeerCreds::default(), Protocol::Json, 10).unwrap();
        let b = reg.register(PeerCreds::default(), Protocol::Json, 10).unwrap();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }
}
