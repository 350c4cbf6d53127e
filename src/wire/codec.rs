/*!
 * @file wire/codec.rs
 * @brief MongoDB wire protocol parsing, extraction, and reply serialization
 *
 * Header framing extended to the full OP_MSG section grammar (kind-0
 * command document plus kind-1 document sequences) per §3.1/§4.1.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use bson::Document;
use bytes::BytesMut;

use super::message::{Message, MessageHeader, HEADER_LEN, OP_MSG, OP_QUERY, OP_REPLY};
use crate::error::{FauxDBError, Result};

/// OP_MSG flag bit 0: a CRC32C checksum trails the message.
const CHECKSUM_PRESENT: u32 = 1 << 0;

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Accumulates inbound bytes across reads and yields complete frames,
/// preserving unconsumed trailing bytes (§4.1 streaming discipline).
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: BytesMut,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pulls the next complete message out of the buffer, if one is fully
    /// present. Never partially consumes a frame.
    pub fn try_next(&mut self) -> Result<Option<Message>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }

        let length = i32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if length < HEADER_LEN as i32 {
            return Err(FauxDBError::WireProtocol(format!("invalid frame length {}", length)));
        }

        let length = length as usize;
        if self.buf.len() < length {
            return Ok(None);
        }

        let frame = self.buf.split_to(length);
        let header = MessageHeader::parse(&frame[..HEADER_LEN])?;
        let body = frame[HEADER_LEN..].to_vec();

        Ok(Some(Message { header, body }))
    }
}

/// The command document plus any kind-1 document sequences, merged by
/// identifier (`documents`, `updates`, `deletes`, …), per §4.1.
#[derive(Debug, Clone, Default)]
pub struct ExtractedCommand {
    pub db: String,
    pub command_name: String,
    pub command_doc: Document,
    pub document_sequences: HashMap<String, Vec<Document>>,
}

pub fn parse(buf: &[u8]) -> Result<Message> {
    if buf.len() < HEADER_LEN {
        return Err(FauxDBError::WireProtocol("message too short".to_string()));
    }
    let header = MessageHeader::parse(&buf[..HEADER_LEN])?;
    if header.message_length as usize != buf.len() {
        return Err(FauxDBError::WireProtocol("length does not match buffer size".to_string()));
    }
    Ok(Message { header, body: buf[HEADER_LEN..].to_vec() })
}

/// Extracts `{ db, commandDoc, documentSequences }` from a parsed message.
pub fn extract(message: &Message) -> Result<ExtractedCommand> {
    match message.header.op_code {
        OP_MSG => extract_op_msg(&message.body),
        OP_QUERY => extract_op_query(&message.body),
        other => Err(FauxDBError::WireProtocol(format!("unsupported opcode {}", other))),
    }
}

fn extract_op_msg(body: &[u8]) -> Result<ExtractedCommand> {
    if body.len() < 4 {
        return Err(FauxDBError::WireProtocol("OP_MSG body too short".to_string()));
    }

    let flags = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let checksummed = flags & CHECKSUM_PRESENT != 0;
    let mut sections = &body[4..];
    if checksummed {
        if sections.len() < 4 {
            return Err(FauxDBError::WireProtocol("OP_MSG missing checksum".to_string()));
        }
        sections = &sections[..sections.len() - 4];
    }

    let mut command_doc: Option<Document> = None;
    let mut document_sequences: HashMap<String, Vec<Document>> = HashMap::new();
    let mut cursor = sections;

    while !cursor.is_empty() {
        let kind = cursor[0];
        cursor = &cursor[1..];

        match kind {
            0 => {
                let doc = read_document(cursor)?;
                let consumed = bson::to_vec(&doc)
                    .map_err(FauxDBError::BsonSerialization)?
                    .len();
                cursor = &cursor[consumed..];
                if command_doc.is_some() {
                    return Err(FauxDBError::WireProtocol(
                        "more than one kind-0 section in OP_MSG".to_string(),
                    ));
                }
                command_doc = Some(doc);
            }
            1 => {
                if cursor.len() < 4 {
                    return Err(FauxDBError::WireProtocol("truncated kind-1 section".to_string()));
                }
                let size = i32::from_le_bytes([cursor[0], cursor[1], cursor[2], cursor[3]]) as usize;
                if size > cursor.len() {
                    return Err(FauxDBError::WireProtocol("kind-1 section size overruns body".to_string()));
                }
                let section_bytes = &cursor[..size];
                let mut rest = &section_bytes[4..];

                let nul = rest
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| FauxDBError::WireProtocol("unterminated kind-1 identifier".to_string()))?;
                let identifier = std::str::from_utf8(&rest[..nul])
                    .map_err(|_| FauxDBError::WireProtocol("identifier not utf8".to_string()))?
                    .to_string();
                rest = &rest[nul + 1..];

                let mut docs = Vec::new();
                while !rest.is_empty() {
                    let doc = read_document(rest)?;
                    let consumed = bson::to_vec(&doc)
                        .map_err(FauxDBError::BsonSerialization)?
                        .len();
                    rest = &rest[consumed..];
                    docs.push(doc);
                }

                if document_sequences.contains_key(&identifier) {
                    return Err(FauxDBError::WireProtocol(format!(
                        "duplicate document sequence identifier '{}'",
                        identifier
                    )));
                }
                document_sequences.insert(identifier, docs);
                cursor = &cursor[size..];
            }
            other => {
                return Err(FauxDBError::WireProtocol(format!("unknown OP_MSG section kind {}", other)));
            }
        }
    }

    let command_doc = command_doc
        .ok_or_else(|| FauxDBError::WireProtocol("OP_MSG missing kind-0 section".to_string()))?;

    let (command_name, db) = command_name_and_db(&command_doc)?;

    Ok(ExtractedCommand { db, command_name, command_doc, document_sequences })
}

fn extract_op_query(body: &[u8]) -> Result<ExtractedCommand> {
    if body.len() < 4 {
        return Err(FauxDBError::WireProtocol("OP_QUERY body too short".to_string()));
    }
    let mut i = 4;
    let nul = body[i..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| FauxDBError::WireProtocol("unterminated collection name".to_string()))?;
    let full_collection_name = std::str::from_utf8(&body[i..i + nul])
        .map_err(|_| FauxDBError::WireProtocol("collection name not utf8".to_string()))?;
    let db = full_collection_name
        .split_once('.')
        .map(|(db, _)| db.to_string())
        .unwrap_or_else(|| full_collection_name.to_string());
    i += nul + 1;

    if body.len() < i + 8 {
        return Err(FauxDBError::WireProtocol("OP_QUERY missing skip/return counts".to_string()));
    }
    i += 8; // numberToSkip, numberToReturn

    let command_doc = read_document(&body[i..])?;
    let (command_name, doc_db) = command_name_and_db(&command_doc)?;
    let db = if full_collection_name.ends_with("$cmd") { doc_db } else { db };

    Ok(ExtractedCommand { db, command_name, command_doc, document_sequences: HashMap::new() })
}

fn read_document(buf: &[u8]) -> Result<Document> {
    Document::from_reader(&mut std::io::Cursor::new(buf)).map_err(FauxDBError::Bson)
}

/// The command name is the document's first non-`$`-prefixed key; `$db`
/// carries the target database, defaulting to `"admin"` when absent (§4.1).
fn command_name_and_db(doc: &Document) -> Result<(String, String)> {
    let command_name = doc
        .iter()
        .find(|(k, _)| !k.starts_with('$'))
        .map(|(k, _)| k.clone())
        .ok_or_else(|| FauxDBError::WireProtocol("empty command document".to_string()))?;

    let db = doc.get_str("$db").unwrap_or("admin").to_string();

    Ok((command_name, db))
}

/// Serializes a reply document, choosing OP_MSG vs OP_REPLY to mirror the
/// request's opcode, and `responseTo` to the peer's `requestID`.
pub fn serialize_reply(request: &Message, response: &Document) -> Result<Vec<u8>> {
    match request.header.op_code {
        OP_QUERY => serialize_op_reply(request.header.request_id, &[response.clone()]),
        _ => serialize_op_msg(request.header.request_id, response),
    }
}

fn serialize_op_msg(response_to: i32, doc: &Document) -> Result<Vec<u8>> {
    let doc_bytes = bson::to_vec(doc).map_err(FauxDBError::BsonSerialization)?;
    let flags: u32 = 0;
    let body_len = 4 + 1 + doc_bytes.len();
    let message_length = (HEADER_LEN + body_len) as i32;

    let header = MessageHeader {
        message_length,
        request_id: next_request_id(),
        response_to,
        op_code: OP_MSG,
    };

    let mut out = Vec::with_capacity(message_length as usize);
    header.write(&mut out);
    out.extend_from_slice(&flags.to_le_bytes());
    out.push(0u8);
    out.extend_from_slice(&doc_bytes);
    Ok(out)
}

fn serialize_op_reply(response_to: i32, docs: &[Document]) -> Result<Vec<u8>> {
    let response_flags: u32 = 0;
    let cursor_id: i64 = 0;
    let starting_from: i32 = 0;
    let number_returned = docs.len() as i32;

    let mut docs_buf = Vec::new();
    for doc in docs {
        docs_buf.extend_from_slice(&bson::to_vec(doc).map_err(FauxDBError::BsonSerialization)?);
    }

    let body_len = 4 + 8 + 4 + 4 + docs_buf.len();
    let message_length = (HEADER_LEN + body_len) as i32;

    let header = MessageHeader {
        message_length,
        request_id: next_request_id(),
        response_to,
        op_code: OP_REPLY,
    };

    let mut out = Vec::with_capacity(message_length as usize);
    header.write(&mut out);
    out.extend_from_slice(&response_flags.to_le_bytes());
    out.extend_from_slice(&cursor_id.to_le_bytes());
    out.extend_from_slice(&starting_from.to_le_bytes());
    out.extend_from_slice(&number_returned.to_le_bytes());
    out.extend_from_slice(&docs_buf);
    Ok(out)
}

/// Builds a best-effort error reply preserving `responseTo`, used when
/// dispatch fails after a frame was successfully parsed (§4.1, §7).
pub fn serialize_error_reply(request: &Message, error: &crate::error::FauxDBError) -> Vec<u8> {
    serialize_reply(request, &error.to_error_document())
        .unwrap_or_else(|_| serialize_op_msg(request.header.request_id, &error.to_error_document())
            .expect("error document always serializes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn build_op_msg(doc: &Document, request_id: i32) -> Vec<u8> {
        let doc_bytes = bson::to_vec(doc).unwrap();
        let flags: u32 = 0;
        let body_len = 4 + 1 + doc_bytes.len();
        let message_length = (HEADER_LEN + body_len) as i32;
        let header = MessageHeader { message_length, request_id, response_to: 0, op_code: OP_MSG };
        let mut out = Vec::new();
        header.write(&mut out);
        out.extend_from_slice(&flags.to_le_bytes());
        out.push(0u8);
        out.extend_from_slice(&doc_bytes);
        out
    }

    #[test]
    fn round_trip_framing() {
        let cmd = doc! { "ping": 1, "$db": "admin" };
        let bytes = build_op_msg(&cmd, 7);
        let message = parse(&bytes).unwrap();
        assert_eq!(message.header.request_id, 7);
        assert_eq!(message.header.message_length as usize, bytes.len());

        let extracted = extract(&message).unwrap();
        assert_eq!(extracted.command_name, "ping");
        assert_eq!(extracted.db, "admin");
    }

    #[test]
    fn streaming_extraction_across_chunks() {
        let cmd = doc! { "ping": 1, "$db": "admin" };
        let bytes = build_op_msg(&cmd, 1);

        let mut acc = FrameAccumulator::new();
        assert!(acc.try_next().unwrap().is_none());

        let chunk_sizes = [3usize, 7, 1, 50, 59];
        let mut offset = 0;
        for size in chunk_sizes {
            let end = (offset + size).min(bytes.len());
            acc.feed(&bytes[offset..end]);
            offset = end;
        }
        acc.feed(&bytes[offset..]);

        let message = acc.try_next().unwrap().expect("complete message");
        let extracted = extract(&message).unwrap();
        assert_eq!(extracted.command_name, "ping");
        assert!(acc.try_next().unwrap().is_none());
    }

    #[test]
    fn kind1_document_sequence_merges_by_identifier() {
        let cmd = doc! { "insert": "users", "$db": "test" };
        let cmd_bytes = bson::to_vec(&cmd).unwrap();

        let identifier = b"documents\0";
        let doc1 = bson::to_vec(&doc! { "_id": 1 }).unwrap();
        let doc2 = bson::to_vec(&doc! { "_id": 2 }).unwrap();
        let mut seq_payload = Vec::new();
        seq_payload.extend_from_slice(identifier);
        seq_payload.extend_from_slice(&doc1);
        seq_payload.extend_from_slice(&doc2);
        let seq_size = (4 + seq_payload.len()) as i32;

        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes()); // flags
        body.push(0u8);
        body.extend_from_slice(&cmd_bytes);
        body.push(1u8);
        body.extend_from_slice(&seq_size.to_le_bytes());
        body.extend_from_slice(&seq_payload);

        let message_length = (HEADER_LEN + body.len()) as i32;
        let header = MessageHeader { message_length, request_id: 1, response_to: 0, op_code: OP_MSG };
        let mut bytes = Vec::new();
        header.write(&mut bytes);
        bytes.extend_from_slice(&body);

        let message = parse(&bytes).unwrap();
        let extracted = extract(&message).unwrap();
        assert_eq!(extracted.command_name, "insert");
        let docs = extracted.document_sequences.get("documents").unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn malformed_header_is_rejected() {
        let bytes = vec![0u8; 10];
        assert!(parse(&bytes).is_err());
    }
}
