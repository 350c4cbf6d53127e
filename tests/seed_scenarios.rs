//! End-to-end seed scenarios driven through the public `Router` surface,
//! standing in for a real socket client (S1, S3, S4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bson::{doc, Bson, Document};

use fauxdb::auth::InMemoryCredentialsProvider;
use fauxdb::auth::{self};
use fauxdb::backend::MemoryBackend;
use fauxdb::cursor::CursorManager;
use fauxdb::session::SessionTable;
use fauxdb::wire::ExtractedCommand;
use fauxdb::Router;

fn extracted(name: &str, doc: Document, db: &str) -> ExtractedCommand {
    ExtractedCommand { db: db.to_string(), command_name: name.to_string(), command_doc: doc, document_sequences: HashMap::new() }
}

fn sasl_payload_doc(payload: &[u8]) -> Bson {
    Bson::Binary(bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: payload.to_vec() })
}

fn payload_bytes(response: &Document) -> Vec<u8> {
    match response.get("payload").unwrap() {
        Bson::Binary(b) => b.bytes.clone(),
        Bson::String(s) => BASE64.decode(s).unwrap(),
        other => panic!("unexpected payload type: {:?}", other),
    }
}

/// Computes a valid SCRAM client-final-message for the given password,
/// mirroring what a real driver does after receiving the server-first
/// message (same math as `auth::scram`'s own unit tests, but exercised here
/// entirely through the router's public `route()` entry point).
fn client_final_for(password: &str, client_nonce: &str, client_first_bare: &str, server_first: &str) -> String {
    let mut server_nonce = None;
    let mut salt_b64 = None;
    let mut iterations = None;
    for part in server_first.split(',') {
        if let Some(r) = part.strip_prefix("r=") {
            server_nonce = Some(r.to_string());
        } else if let Some(r) = part.strip_prefix("s=") {
            salt_b64 = Some(r.to_string());
        } else if let Some(r) = part.strip_prefix("i=") {
            iterations = Some(r.parse::<u32>().unwrap());
        }
    }
    let server_nonce = server_nonce.expect("server-first carries r=");
    let salt = auth::credentials::decode_base64(&salt_b64.expect("server-first carries s=")).unwrap();
    let iterations = iterations.expect("server-first carries i=");

    let salted_password = auth::credentials::pbkdf2_hmac_sha256(password, &salt, iterations);
    let client_key = auth::credentials::hmac_sha256(&salted_password, b"Client Key");
    let stored_key = auth::credentials::sha256(&client_key);

    let client_final_without_proof = format!("c=biws,r={}", server_nonce);
    let auth_message = format!("{},{},{}", client_first_bare, server_first, client_final_without_proof);
    let client_signature = auth::credentials::hmac_sha256(&stored_key, auth_message.as_bytes());
    let client_proof: Vec<u8> = client_key.iter().zip(client_signature.iter()).map(|(a, b)| a ^ b).collect();

    let _ = client_nonce;
    format!("{},p={}", client_final_without_proof, BASE64.encode(&client_proof))
}

fn test_router_with_alice() -> (Router, Arc<CursorManager>, Arc<SessionTable>) {
    let credentials = Arc::new(InMemoryCredentialsProvider::new());
    credentials.insert("admin", "alice", "secret", 15000);
    let cursors = Arc::new(CursorManager::new(Duration::from_secs(600)));
    let sessions = Arc::new(SessionTable::new());
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(
        "test",
        "users",
        vec![doc! { "_id": 1i32, "name": "doc1" }, doc! { "_id": 2i32, "name": "doc2" }],
    );

    let router = Router::new(backend, credentials, sessions.clone(), cursors.clone(), Duration::from_secs(300), true);
    (router, cursors, sessions)
}

#[tokio::test]
async fn s1_handshake_auth_find_getmore() {
    let (router, _cursors, sessions) = test_router_with_alice();
    let connection_id = 1u64;
    sessions.create();

    // 1. hello
    let hello = router.route(extracted("hello", doc! { "hello": 1 }, "admin"), connection_id, "127.0.0.1:1").await;
    assert_eq!(hello.get_f64("ok").unwrap(), 1.0);
    assert!(hello.get_i32("maxWireVersion").unwrap() >= 17);
    assert!(hello.get_bool("isWritablePrimary").unwrap());

    // 2. saslStart
    let client_nonce = "ZmFrZW5vbmNl";
    let client_first = format!("n,,n=alice,r={}", client_nonce);
    let client_first_bare = format!("n=alice,r={}", client_nonce);
    let start_response = router
        .route(
            extracted(
                "saslStart",
                doc! { "saslStart": 1, "mechanism": "SCRAM-SHA-256", "payload": sasl_payload_doc(client_first.as_bytes()), "$db": "admin" },
                "admin",
            ),
            connection_id,
            "127.0.0.1:1",
        )
        .await;
    assert_eq!(start_response.get_f64("ok").unwrap(), 1.0);
    assert!(!start_response.get_bool("done").unwrap());
    let conversation_id = start_response.get_i32("conversationId").unwrap();
    let server_first = String::from_utf8(payload_bytes(&start_response)).unwrap();
    assert!(server_first.starts_with("r="));

    // 3/4. saslContinue with a correctly computed proof
    let client_final = client_final_for("secret", client_nonce, &client_first_bare, &server_first);
    let continue_response = router
        .route(
            extracted(
                "saslContinue",
                doc! { "saslContinue": 1, "conversationId": conversation_id, "payload": sasl_payload_doc(client_final.as_bytes()), "$db": "admin" },
                "admin",
            ),
            connection_id,
            "127.0.0.1:1",
        )
        .await;
    assert_eq!(continue_response.get_f64("ok").unwrap(), 1.0);
    assert!(continue_response.get_bool("done").unwrap());
    let server_final = String::from_utf8(payload_bytes(&continue_response)).unwrap();
    assert!(server_final.starts_with("v="));
    assert!(sessions.is_authenticated(connection_id));

    // 5/6. find with batchSize:1 against the seeded two-document collection
    let find_response = router
        .route(
            extracted("find", doc! { "find": "users", "filter": {}, "batchSize": 1i32, "$db": "test" }, "test"),
            connection_id,
            "127.0.0.1:1",
        )
        .await;
    assert_eq!(find_response.get_f64("ok").unwrap(), 1.0);
    let cursor_doc = find_response.get_document("cursor").unwrap();
    assert_eq!(cursor_doc.get_str("ns").unwrap(), "test.users");
    let first_batch = cursor_doc.get_array("firstBatch").unwrap();
    assert_eq!(first_batch.len(), 1);
    let cursor_id = cursor_doc.get_i64("id").unwrap();
    assert_ne!(cursor_id, 0);

    // 7. getMore drains the remaining document and closes the cursor
    let get_more_response = router
        .route(
            extracted("getMore", doc! { "getMore": cursor_id, "collection": "users", "batchSize": 1i32, "$db": "test" }, "test"),
            connection_id,
            "127.0.0.1:1",
        )
        .await;
    assert_eq!(get_more_response.get_f64("ok").unwrap(), 1.0);
    let next_cursor = get_more_response.get_document("cursor").unwrap();
    assert_eq!(next_cursor.get_i64("id").unwrap(), 0);
    let next_batch = next_cursor.get_array("nextBatch").unwrap();
    assert_eq!(next_batch.len(), 1);
}

#[tokio::test]
async fn s2_unauthenticated_command_rejected() {
    let (router, _cursors, _sessions) = test_router_with_alice();
    let response = router.route(extracted("find", doc! { "find": "x" }, "test"), 42, "127.0.0.1:1").await;
    assert_eq!(response.get_f64("ok").unwrap(), 0.0);
    assert_eq!(response.get_i32("code").unwrap(), 13);
    assert_eq!(response.get_str("codeName").unwrap(), "Unauthorized");
}

#[tokio::test]
async fn s3_bad_proof_and_unknown_user_both_fail_at_continue() {
    let (router, _cursors, _sessions) = test_router_with_alice();

    // (a) known user, wrong password: gets all the way to saslContinue
    // before failing, never short-circuiting at saslStart.
    let known_start = router
        .route(
            extracted(
                "saslStart",
                doc! { "saslStart": 1, "mechanism": "SCRAM-SHA-256", "payload": sasl_payload_doc(b"n,,n=alice,r=nonceA"), "$db": "admin" },
                "admin",
            ),
            1,
            "127.0.0.1:1",
        )
        .await;
    assert_eq!(known_start.get_f64("ok").unwrap(), 1.0);
    let known_conv = known_start.get_i32("conversationId").unwrap();
    let bogus_proof = BASE64.encode([0u8; 32]);
    let known_continue = router
        .route(
            extracted(
                "saslContinue",
                doc! { "saslContinue": 1, "conversationId": known_conv, "payload": sasl_payload_doc(format!("c=biws,r=bogus,p={}", bogus_proof).as_bytes()), "$db": "admin" },
                "admin",
            ),
            1,
            "127.0.0.1:1",
        )
        .await;
    assert_eq!(known_continue.get_f64("ok").unwrap(), 0.0);
    assert_eq!(known_continue.get_i32("code").unwrap(), 18);

    // (b) unknown user: saslStart still succeeds with a plausible
    // salt/iterations (no early rejection that would leak existence).
    let unknown_start = router
        .route(
            extracted(
                "saslStart",
                doc! { "saslStart": 1, "mechanism": "SCRAM-SHA-256", "payload": sasl_payload_doc(b"n,,n=mallory,r=nonceB"), "$db": "admin" },
                "admin",
            ),
            2,
            "127.0.0.1:1",
        )
        .await;
    assert_eq!(unknown_start.get_f64("ok").unwrap(), 1.0);
    let unknown_conv = unknown_start.get_i32("conversationId").unwrap();
    let unknown_continue = router
        .route(
            extracted(
                "saslContinue",
                doc! { "saslContinue": 1, "conversationId": unknown_conv, "payload": sasl_payload_doc(format!("c=biws,r=bogus,p={}", bogus_proof).as_bytes()), "$db": "admin" },
                "admin",
            ),
            2,
            "127.0.0.1:1",
        )
        .await;
    assert_eq!(unknown_continue.get_f64("ok").unwrap(), 0.0);
    assert_eq!(unknown_continue.get_i32("code").unwrap(), 18);
    assert_eq!(unknown_continue.get_i32("code").unwrap(), known_continue.get_i32("code").unwrap());
}

#[tokio::test]
async fn s4_cursor_lifecycle_on_disconnect() {
    let (router, cursors, sessions) = test_router_with_alice();
    let connection_id = sessions.create();
    sessions.set_authenticated(connection_id, "alice", "admin");

    // find{batchSize:1} against a ten-document collection leaves 9 pending,
    // owned by this connection.
    let cursor_id = cursors.create((1..10).map(|i| doc! { "_id": i as i32 }).collect(), "test.wide", 1, connection_id);
    assert!(cursors.get(cursor_id).is_some());

    // Disconnect: the router's cleanup path, invoked by the connection
    // loop on socket close, must scope cursor removal to the owner.
    router.on_connection_closed(connection_id);
    assert!(cursors.get(cursor_id).is_none());
    assert!(!sessions.is_authenticated(connection_id));
}
