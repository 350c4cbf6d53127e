//! Chunked-delivery framing scenario (S6): one OP_MSG arrives split across
//! several short reads, with the next message's bytes bundled into the
//! same final read. `FrameAccumulator` must yield each frame exactly once,
//! never early and never merged with its neighbor, and each extracted
//! frame must route through the command dispatcher exactly once.

use std::sync::Arc;
use std::time::Duration;

use bson::doc;

use fauxdb::auth::InMemoryCredentialsProvider;
use fauxdb::backend::MemoryBackend;
use fauxdb::cursor::CursorManager;
use fauxdb::session::SessionTable;
use fauxdb::wire::{extract, FrameAccumulator, MessageHeader, HEADER_LEN, OP_MSG};
use fauxdb::Router;

fn build_op_msg(request_id: i32, doc: &bson::Document) -> Vec<u8> {
    let body_doc = bson::to_vec(doc).unwrap();
    let mut body = Vec::with_capacity(5 + body_doc.len());
    body.extend_from_slice(&0u32.to_le_bytes()); // flags: no checksum
    body.push(0u8); // section kind 0: the command document
    body.extend_from_slice(&body_doc);

    let header = MessageHeader {
        message_length: (HEADER_LEN + body.len()) as i32,
        request_id,
        response_to: 0,
        op_code: OP_MSG,
    };

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    header.write(&mut frame);
    frame.extend_from_slice(&body);
    frame
}

#[tokio::test]
async fn s6_fragmented_frame_then_bundled_next_frame_each_dispatch_once() {
    let credentials = Arc::new(InMemoryCredentialsProvider::new());
    let cursors = Arc::new(CursorManager::new(Duration::from_secs(600)));
    let sessions = Arc::new(SessionTable::new());
    let backend = Arc::new(MemoryBackend::new());
    let router = Router::new(backend, credentials, sessions.clone(), cursors, Duration::from_secs(300), true);
    let connection_id = sessions.create();

    let padding = "x".repeat(60);
    let first = build_op_msg(1, &doc! { "hello": 1i32, "padding": padding, "$db": "admin" });
    let second = build_op_msg(2, &doc! { "ping": 1i32, "$db": "admin" });
    assert!(first.len() > 61, "first frame must be long enough to survive a 61-byte fragmented prefix");

    let mut accumulator = FrameAccumulator::new();
    let mut extracted_count = 0usize;

    // Deliver the first 61 bytes of the first frame across four short
    // reads; none of them complete a frame.
    let mut offset = 0;
    for fragment_len in [3, 7, 1, 50] {
        accumulator.feed(&first[offset..offset + fragment_len]);
        offset += fragment_len;
        assert!(accumulator.try_next().unwrap().is_none(), "frame must not complete before all bytes arrive");
    }

    // The final read carries the rest of the first frame bundled with the
    // entire second frame, simulating a client pipelining back-to-back
    // requests into one TCP segment.
    let mut trailing = first[offset..].to_vec();
    trailing.extend_from_slice(&second);
    accumulator.feed(&trailing);

    let message_one = accumulator.try_next().unwrap().expect("first frame completes once its final bytes arrive");
    let message_two = accumulator.try_next().unwrap().expect("second frame is already fully buffered");
    assert!(accumulator.try_next().unwrap().is_none(), "no further frames beyond the two fed");

    for message in [message_one, message_two] {
        let extracted = extract(&message).unwrap();
        let response = router.route(extracted, connection_id, "127.0.0.1:1").await;
        assert_eq!(response.get_f64("ok").unwrap(), 1.0);
        extracted_count += 1;
    }

    assert_eq!(extracted_count, 2, "each frame must be dispatched exactly once");
}
