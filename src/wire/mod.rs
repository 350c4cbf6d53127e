/*!
 * @file wire/mod.rs
 * @brief Wire protocol module: framing, opcode constants, and codec
 */

pub mod codec;
pub mod message;

pub use codec::{extract, parse, serialize_error_reply, serialize_reply, ExtractedCommand, FrameAccumulator};
pub use message::{Message, MessageHeader, HEADER_LEN, OP_MSG, OP_QUERY, OP_REPLY};
