/*!
 * @file session.rs
 * @brief Per-connection session state and the process-wide session table (§3.2)
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// `(username, authDb)` once a connection completes SCRAM.
#[derive(Debug, Clone)]
pub struct AuthPrincipal {
    pub username: String,
    pub auth_db: String,
}

/// Created on accept, destroyed on close (§3.2). The router only ever
/// reads/writes `authenticated`; cursor ownership lives in `CursorManager`.
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    pub id: u64,
    pub authenticated: bool,
    pub auth_principal: Option<AuthPrincipal>,
    pub compression_enabled: bool,
}

impl ConnectionSession {
    fn new(id: u64) -> Self {
        Self { id, authenticated: false, auth_principal: None, compression_enabled: false }
    }

    pub fn set_authenticated(&mut self, username: &str, auth_db: &str) {
        self.authenticated = true;
        self.auth_principal = Some(AuthPrincipal { username: username.to_string(), auth_db: auth_db.to_string() });
    }

    pub fn clear_authentication(&mut self) {
        self.authenticated = false;
        self.auth_principal = None;
    }
}

/// Exclusive on insert/remove, shared read for the router's auth check (§5).
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<u64, ConnectionSession>>,
    next_id: AtomicU64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    pub fn create(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.write().insert(id, ConnectionSession::new(id));
        id
    }

    pub fn get(&self, id: u64) -> Option<ConnectionSession> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn is_authenticated(&self, id: u64) -> bool {
        self.sessions.read().get(&id).map(|s| s.authenticated).unwrap_or(false)
    }

    pub fn set_authenticated(&self, id: u64, username: &str, auth_db: &str) {
        if let Some(session) = self.sessions.write().get_mut(&id) {
            session.set_authenticated(username, auth_db);
        }
    }

    pub fn clear_authentication(&self, id: u64) {
        if let Some(session) = self.sessions.write().get_mut(&id) {
            session.clear_authentication();
        }
    }

    pub fn remove(&self, id: u64) {
        self.sessions.write().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_flips_exactly_once() {
        let table = SessionTable::new();
        let id = table.create();
        assert!(!table.is_authenticated(id));

        table.set_authenticated(id, "alice", "admin");
        assert!(table.is_authenticated(id));

        let session = table.get(id).unwrap();
        assert_eq!(session.auth_principal.unwrap().username, "alice");
    }

    #[test]
    fn remove_drops_session() {
        let table = SessionTable::new();
        let id = table.create();
        table.remove(id);
        assert!(table.get(id).is_none());
        assert!(!table.is_authenticated(id));
    }
}
