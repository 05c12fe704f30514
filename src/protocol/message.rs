//! Protocol message types

use super::constants::{consistency, opcodes, startup, DEFAULT_CQL_VERSION};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version byte, including the direction bit
    pub version: u8,
    /// Header flags
    pub flags: u8,
    /// Stream id; negative for server pushed events
    pub stream: i8,
    /// Message opcode
    pub opcode: u8,
    /// Body length in bytes
    pub length: usize,
}

/// One complete protocol frame received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol version byte
    pub version: u8,
    /// Header flags
    pub flags: u8,
    /// Stream id; negative for server pushed events
    pub stream: i8,
    /// Message opcode
    pub opcode: u8,
    /// Raw body
    pub body: Bytes,
}

impl Frame {
    /// Whether this frame was pushed by the server rather than answering a request
    pub fn is_event(&self) -> bool {
        self.stream < 0
    }
}

/// Request message (client → server), before a stream id is assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message opcode
    pub opcode: u8,
    /// Encoded body
    pub body: Bytes,
}

impl Message {
    /// Message with an arbitrary opcode and pre-encoded body
    pub fn new(opcode: u8, body: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            body: body.into(),
        }
    }

    /// OPTIONS request (empty body)
    pub fn options() -> Self {
        Self::new(opcodes::OPTIONS, Bytes::new())
    }

    /// STARTUP request carrying the CQL version
    pub fn startup(cql_version: &str) -> Self {
        let mut body = BytesMut::new();
        let version = if cql_version.is_empty() {
            DEFAULT_CQL_VERSION
        } else {
            cql_version
        };
        super::encode::encode_string_map(&mut body, &[(startup::CQL_VERSION, version)]);
        Self::new(opcodes::STARTUP, body.freeze())
    }

    /// QUERY request at consistency ONE with no values
    pub fn query(statement: &str) -> Self {
        Self::query_with_consistency(statement, consistency::ONE)
    }

    /// QUERY request with an explicit consistency level
    pub fn query_with_consistency(statement: &str, consistency: u16) -> Self {
        let mut body = BytesMut::with_capacity(statement.len() + 7);
        body.put_i32(statement.len() as i32);
        body.put_slice(statement.as_bytes());
        body.put_u16(consistency);
        body.put_u8(0);
        Self::new(opcodes::QUERY, body.freeze())
    }
}

/// Decoded ERROR body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Protocol error code
    pub code: i32,
    /// Server supplied message
    pub message: String,
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:04X})", self.message, self.code)
    }
}

/// Decoded SUPPORTED body
pub type SupportedOptions = HashMap<String, Vec<String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_has_empty_body() {
        let msg = Message::options();
        assert_eq!(msg.opcode, opcodes::OPTIONS);
        assert!(msg.body.is_empty());
    }

    #[test]
    fn test_startup_body_carries_version() {
        let msg = Message::startup("3.0.0");
        assert_eq!(msg.opcode, opcodes::STARTUP);
        // 1 pair: n(2) + key(2 + 11) + value(2 + 5)
        assert_eq!(msg.body.len(), 22);
        assert_eq!(&msg.body[0..2], &[0, 1]);
        assert_eq!(&msg.body[4..15], b"CQL_VERSION");
        assert_eq!(&msg.body[17..22], b"3.0.0");
    }

    #[test]
    fn test_startup_falls_back_to_default_version() {
        assert_eq!(Message::startup(""), Message::startup(DEFAULT_CQL_VERSION));
    }

    #[test]
    fn test_query_layout() {
        let msg = Message::query("SELECT 1");
        assert_eq!(msg.opcode, opcodes::QUERY);
        assert_eq!(&msg.body[0..4], &8i32.to_be_bytes());
        assert_eq!(&msg.body[4..12], b"SELECT 1");
        assert_eq!(&msg.body[12..14], &consistency::ONE.to_be_bytes());
        assert_eq!(msg.body[14], 0);
    }

    #[test]
    fn test_event_frame_detection() {
        let frame = Frame {
            version: 0x82,
            flags: 0,
            stream: -1,
            opcode: opcodes::EVENT,
            body: Bytes::new(),
        };
        assert!(frame.is_event());
    }
}
