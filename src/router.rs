/*!
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file router.rs
 * @brief Command router: auth gate, name normalization, handler dispatch (§4.3)
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bson::{doc, Bson, Document};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::auth::{CredentialsProvider, ScramConversation};
use crate::backend::Backend;
use crate::cursor::CursorManager;
use crate::error::{FauxDBError, Result};
use crate::handlers::{admin, crud, cursor as cursor_handlers, index};
use crate::session::SessionTable;
use crate::wire::ExtractedCommand;

/// Commands that pass through the auth gate unauthenticated (§4.3).
const UNAUTHENTICATED_ALLOW: &[&str] = &[
    "hello",
    "ismaster",
    "isMaster",
    "buildInfo",
    "ping",
    "whatsmyuri",
    "saslStart",
    "saslContinue",
    "authenticate",
    "logout",
    "getParameter",
    "getCmdLineOpts",
];

pub struct Router {
    backend: Arc<dyn Backend>,
    credentials: Arc<dyn CredentialsProvider>,
    sessions: Arc<SessionTable>,
    cursors: Arc<CursorManager>,
    conversations: Mutex<HashMap<i32, ScramConversation>>,
    next_conversation_id: AtomicI32,
    scram_idle_timeout: Duration,
    auth_enabled: bool,
}

impl Router {
    pub fn new(
        backend: Arc<dyn Backend>,
        credentials: Arc<dyn CredentialsProvider>,
        sessions: Arc<SessionTable>,
        cursors: Arc<CursorManager>,
        scram_idle_timeout: Duration,
        auth_enabled: bool,
    ) -> Self {
        Self {
            backend,
            credentials,
            sessions,
            cursors,
            conversations: Mutex::new(HashMap::new()),
            next_conversation_id: AtomicI32::new(1),
            scram_idle_timeout,
            auth_enabled,
        }
    }

    /// Routes one extracted command to its handler (§4.3); errors thrown by
    /// handlers are converted to `{ ok:0, ... }` documents, never panics.
    pub async fn route(&self, cmd: ExtractedCommand, connection_id: u64, peer_addr: &str) -> Document {
        let name = cmd.command_name.clone();

        if self.auth_enabled && !self.is_allowed_unauthenticated(&name) && !self.sessions.is_authenticated(connection_id) {
            return FauxDBError::Unauthorized.to_error_document();
        }

        match self.dispatch(&name, &cmd, connection_id, peer_addr).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("command '{}' failed: {}", name, e);
                e.to_error_document()
            }
        }
    }

    fn is_allowed_unauthenticated(&self, name: &str) -> bool {
        UNAUTHENTICATED_ALLOW.iter().any(|allowed| allowed.eq_ignore_ascii_case(name))
    }

    async fn dispatch(
        &self,
        name: &str,
        cmd: &ExtractedCommand,
        connection_id: u64,
        peer_addr: &str,
    ) -> Result<Document> {
        match name.to_ascii_lowercase().as_str() {
            "hello" | "ismaster" => Ok(admin::hello()),
            "ping" => Ok(admin::ping()),
            "buildinfo" => Ok(admin::build_info()),
            "hostinfo" => Ok(admin::host_info()),
            "whatsmyuri" => Ok(admin::whatsmyuri(peer_addr)),
            "getlog" => Ok(admin::get_log()),
            "getparameter" => Ok(admin::get_parameter()),
            "getcmdlineopts" => Ok(admin::get_cmd_line_opts()),
            "authenticate" => Ok(admin::authenticate()),
            "logout" => {
                self.sessions.clear_authentication(connection_id);
                Ok(doc! { "ok": 1.0 })
            }
            "saslstart" => self.sasl_start(cmd, connection_id).await,
            "saslcontinue" => self.sasl_continue(cmd, connection_id),

            "listdatabases" => admin::list_databases(self.backend.as_ref()).await,
            "listcollections" => admin::list_collections(self.backend.as_ref(), &cmd.db).await,
            "create" => {
                let coll = cmd.command_doc.get_str("create").unwrap_or_default();
                admin::create(self.backend.as_ref(), &cmd.db, coll).await
            }
            "drop" => {
                let coll = cmd.command_doc.get_str("drop").unwrap_or_default();
                admin::drop(self.backend.as_ref(), &cmd.db, coll).await
            }
            "dropdatabase" => admin::drop_database(self.backend.as_ref(), &cmd.db).await,
            "collstats" => {
                let coll = cmd.command_doc.get_str("collStats").unwrap_or_default();
                admin::coll_stats(self.backend.as_ref(), &cmd.db, coll).await
            }
            "dbstats" => admin::db_stats(self.backend.as_ref(), &cmd.db).await,
            "serverstatus" => Ok(admin::server_status()),

            "find" => crud::find(cmd, self.backend.as_ref(), self.cursors.as_ref(), connection_id).await,
            "insert" => crud::insert(cmd, self.backend.as_ref()).await,
            "update" => crud::update(cmd, self.backend.as_ref()).await,
            "delete" => crud::delete(cmd, self.backend.as_ref()).await,
            "count" => crud::count(cmd, self.backend.as_ref()).await,
            "distinct" => crud::distinct(cmd, self.backend.as_ref()).await,
            "aggregate" => crud::aggregate(cmd, self.backend.as_ref()).await,

            "getmore" => cursor_handlers::get_more(cmd, self.cursors.as_ref()).await,
            "killcursors" => cursor_handlers::kill_cursors(cmd, self.cursors.as_ref()).await,

            "listindexes" => index::list_indexes(cmd, self.backend.as_ref()).await,
            "createindexes" => index::create_indexes(cmd, self.backend.as_ref()).await,
            "dropindexes" => index::drop_indexes(cmd, self.backend.as_ref()).await,

            _ => Err(FauxDBError::CommandNotFound(name.to_string())),
        }
    }

    async fn sasl_start(&self, cmd: &ExtractedCommand, connection_id: u64) -> Result<Document> {
        let mechanism = cmd.command_doc.get_str("mechanism").unwrap_or("");
        if mechanism != "SCRAM-SHA-256" {
            return Err(FauxDBError::AuthenticationFailed);
        }
        let payload = sasl_payload(&cmd.command_doc)?;

        let conversation_id = self.next_conversation_id.fetch_add(1, Ordering::Relaxed);
        let mut conversation = ScramConversation::new(conversation_id, &cmd.db, self.scram_idle_timeout);
        let step = conversation.handle_client_first(&payload, self.credentials.as_ref()).await?;

        self.conversations.lock().insert(conversation_id, conversation);
        let _ = connection_id;

        Ok(doc! {
            "ok": 1.0,
            "conversationId": step.conversation_id,
            "done": step.done,
            "payload": sasl_binary(&step.payload),
        })
    }

    fn sasl_continue(&self, cmd: &ExtractedCommand, connection_id: u64) -> Result<Document> {
        let conversation_id = cmd
            .command_doc
            .get_i32("conversationId")
            .map_err(|_| FauxDBError::WireProtocol("missing conversationId".to_string()))?;
        let payload = sasl_payload(&cmd.command_doc)?;

        let mut conversations = self.conversations.lock();
        let conversation = conversations.get_mut(&conversation_id).ok_or(FauxDBError::AuthenticationFailed)?;

        let step = match conversation.handle_client_final(&payload) {
            Ok(step) => step,
            Err(e) => {
                conversations.remove(&conversation_id);
                return Err(e);
            }
        };

        if step.done {
            let username = conversation.username().unwrap_or_default().to_string();
            let db = conversation.db().to_string();
            conversations.remove(&conversation_id);
            debug!("connection {} authenticated as {}@{}", connection_id, username, db);
            self.sessions.set_authenticated(connection_id, &username, &db);
        }

        Ok(doc! {
            "ok": 1.0,
            "conversationId": conversation_id,
            "done": step.done,
            "payload": sasl_binary(&step.payload),
        })
    }

    pub fn on_connection_closed(&self, connection_id: u64) {
        self.cursors.close_all_owned_by(connection_id);
        self.sessions.remove(connection_id);
    }
}

fn sasl_payload(cmd: &Document) -> Result<Vec<u8>> {
    match cmd.get("payload") {
        Some(Bson::Binary(b)) => Ok(b.bytes.clone()),
        Some(Bson::String(s)) => BASE64.decode(s).map_err(|_| FauxDBError::WireProtocol("invalid base64 payload".to_string())),
        _ => Err(FauxDBError::WireProtocol("missing 'payload'".to_string())),
    }
}

fn sasl_binary(payload: &[u8]) -> Bson {
    Bson::Binary(bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: payload.to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryCredentialsProvider;
    use crate::backend::MemoryBackend;
    use bson::doc;

    fn test_router(auth_enabled: bool) -> Router {
        let credentials = Arc::new(InMemoryCredentialsProvider::new());
        credentials.insert("admin", "alice", "secret", 15000);
        Router::new(
            Arc::new(MemoryBackend::new()),
            credentials,
            Arc::new(SessionTable::new()),
            Arc::new(CursorManager::new(Duration::from_secs(600))),
            Duration::from_secs(300),
            auth_enabled,
        )
    }

    fn extracted(name: &str, doc: Document, db: &str) -> ExtractedCommand {
        ExtractedCommand { db: db.to_string(), command_name: name.to_string(), command_doc: doc, document_sequences: HashMap::new() }
    }

    #[tokio::test]
    async fn unauthenticated_ping_passes_the_gate() {
        let router = test_router(true);
        let response = router.route(extracted("ping", doc! { "ping": 1 }, "admin"), 1, "127.0.0.1:1").await;
        assert_eq!(response.get_f64("ok").unwrap(), 1.0);
    }

    #[tokio::test]
    async fn unauthenticated_find_is_rejected() {
        let router = test_router(true);
        let response = router.route(extracted("find", doc! { "find": "x" }, "test"), 1, "127.0.0.1:1").await;
        assert_eq!(response.get_f64("ok").unwrap(), 0.0);
        assert_eq!(response.get_i32("code").unwrap(), 13);
        assert_eq!(response.get_str("codeName").unwrap(), "Unauthorized");
    }

    #[tokio::test]
    async fn auth_disabled_routes_through() {
        let router = test_router(false);
        let response = router.route(extracted("find", doc! { "find": "x" }, "test"), 1, "127.0.0.1:1").await;
        assert_eq!(response.get_f64("ok").unwrap(), 1.0);
    }

    #[tokio::test]
    async fn unknown_command_is_command_not_found() {
        let router = test_router(false);
        let response = router.route(extracted("frobnicate", doc! { "frobnicate": 1 }, "test"), 1, "127.0.0.1:1").await;
        assert_eq!(response.get_i32("code").unwrap(), 59);
    }
}
