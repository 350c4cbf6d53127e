/*!
 * @file wire/message.rs
 * @brief Wire message header and opcode constants
 */

use crate::error::{FauxDBError, Result};

pub const OP_REPLY: i32 = 1;
pub const OP_QUERY: i32 = 2004;
pub const OP_MSG: i32 = 2013;

pub const HEADER_LEN: usize = 16;

/// `{ length, requestID, responseTo, opCode }`, always little-endian (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MessageHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(FauxDBError::WireProtocol("header too short".to_string()));
        }

        let message_length = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let request_id = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let response_to = i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let op_code = i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);

        if message_length < HEADER_LEN as i32 {
            return Err(FauxDBError::WireProtocol(format!(
                "invalid message length {}",
                message_length
            )));
        }

        Ok(Self {
            message_length,
            request_id,
            response_to,
            op_code,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.message_length.to_le_bytes());
        out.extend_from_slice(&self.request_id.to_le_bytes());
        out.extend_from_slice(&self.response_to.to_le_bytes());
        out.extend_from_slice(&self.op_code.to_le_bytes());
    }
}

/// A single framed message, header plus the opcode-specific body (§3.1).
#[derive(Debug, Clone)]
pub struct Message {
    pub header: MessageHeader,
    pub body: Vec<u8>,
}

impl Message {
    pub fn is_op_msg(&self) -> bool {
        self.header.op_code == OP_MSG
    }

    pub fn is_op_query(&self) -> bool {
        self.header.op_code == OP_QUERY
    }
}
