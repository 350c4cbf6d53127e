/*!
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file cursor.rs
 * @brief Server-side cursor manager (§3.5, §4.5)
 */

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bson::Document;
use parking_lot::RwLock;
use rand::RngCore;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Cursor {
    pub id: i64,
    pub namespace: String,
    pub documents: Vec<Document>,
    pub position: usize,
    pub batch_size: i64,
    pub created_at: Instant,
    pub owner_connection_id: u64,
}

impl Cursor {
    fn remaining(&self) -> usize {
        self.documents.len() - self.position
    }
}

/// The single point of truth for server-side cursor state (§4.5); handlers
/// never hold cursor state directly.
#[derive(Debug)]
pub struct CursorManager {
    cursors: RwLock<HashMap<i64, Cursor>>,
    idle_timeout: Duration,
}

impl CursorManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { cursors: RwLock::new(HashMap::new()), idle_timeout }
    }

    /// Allocates a fresh non-zero 64-bit cursor id. Collisions are
    /// vanishingly unlikely but re-rolled defensively rather than ignored.
    pub fn create(
        &self,
        documents: Vec<Document>,
        namespace: &str,
        batch_size: i64,
        owner_connection_id: u64,
    ) -> i64 {
        let mut cursors = self.cursors.write();
        let id = loop {
            let candidate = generate_cursor_id();
            if candidate != 0 && !cursors.contains_key(&candidate) {
                break candidate;
            }
        };

        cursors.insert(
            id,
            Cursor {
                id,
                namespace: namespace.to_string(),
                documents,
                position: 0,
                batch_size,
                created_at: Instant::now(),
                owner_connection_id,
            },
        );
        id
    }

    pub fn get(&self, id: i64) -> Option<Cursor> {
        self.cursors.read().get(&id).cloned()
    }

    /// Returns up to `n` documents starting at the cursor's current
    /// position and advances it; closes the cursor when exhausted (§4.5).
    pub fn advance(&self, id: i64, n: i64) -> Option<(Vec<Document>, i64)> {
        let mut cursors = self.cursors.write();
        let cursor = cursors.get_mut(&id)?;

        let n = n.max(0) as usize;
        let take = n.min(cursor.remaining());
        let start = cursor.position;
        let batch: Vec<Document> = cursor.documents[start..start + take].to_vec();
        cursor.position += take;

        if cursor.remaining() == 0 {
            cursors.remove(&id);
            Some((batch, 0))
        } else {
            Some((batch, id))
        }
    }

    pub fn close(&self, id: i64) -> bool {
        self.cursors.write().remove(&id).is_some()
    }

    /// Closes cursors idle past the configured threshold (default 10
    /// minutes), invoked by a periodic sweep task (§5).
    pub fn cleanup_expired(&self) -> usize {
        let mut cursors = self.cursors.write();
        let before = cursors.len();
        cursors.retain(|_, c| c.created_at.elapsed() <= self.idle_timeout);
        let removed = before - cursors.len();
        if removed > 0 {
            debug!("cursor sweep removed {} expired cursor(s)", removed);
        }
        removed
    }

    pub fn close_all_owned_by(&self, connection_id: u64) -> usize {
        let mut cursors = self.cursors.write();
        let before = cursors.len();
        cursors.retain(|_, c| c.owner_connection_id != connection_id);
        before - cursors.len()
    }

    pub fn len(&self) -> usize {
        self.cursors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn generate_cursor_id() -> i64 {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    i64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn docs(n: usize) -> Vec<Document> {
        (0..n).map(|i| doc! { "_id": i as i32 }).collect()
    }

    #[test]
    fn create_ids_are_never_zero_and_unique() {
        let manager = CursorManager::new(Duration::from_secs(600));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let id = manager.create(docs(1), "test.users", 1, 1);
            assert_ne!(id, 0);
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn advance_returns_at_most_n_and_exhausts() {
        let manager = CursorManager::new(Duration::from_secs(600));
        let id = manager.create(docs(2), "test.users", 1, 7);

        let (batch1, next1) = manager.advance(id, 1).unwrap();
        assert_eq!(batch1.len(), 1);
        assert_eq!(next1, id);

        let (batch2, next2) = manager.advance(id, 1).unwrap();
        assert_eq!(batch2.len(), 1);
        assert_eq!(next2, 0);

        assert!(manager.get(id).is_none());
        assert!(!manager.close(id));
    }

    #[test]
    fn close_is_idempotent() {
        let manager = CursorManager::new(Duration::from_secs(600));
        let id = manager.create(docs(1), "test.users", 1, 1);
        assert!(manager.close(id));
        assert!(!manager.close(id));
    }

    #[test]
    fn close_all_owned_by_scopes_to_connection() {
        let manager = CursorManager::new(Duration::from_secs(600));
        let a1 = manager.create(docs(5), "test.a", 1, 1);
        let _a2 = manager.create(docs(5), "test.a", 1, 1);
        let b1 = manager.create(docs(5), "test.b", 1, 2);

        let removed = manager.close_all_owned_by(1);
        assert_eq!(removed, 2);
        assert!(manager.get(a1).is_none());
        assert!(manager.get(b1).is_some());
    }

    #[test]
    fn cleanup_expired_removes_only_stale_cursors() {
        let manager = CursorManager::new(Duration::from_millis(0));
        manager.create(docs(5), "test.a", 1, 1);
        std::thread::sleep(Duration::from_millis(5));
        let removed = manager.cleanup_expired();
        assert_eq!(removed, 1);
        assert!(manager.is_empty());
    }
}
