//! CQL native protocol constants

/// Native protocol version spoken by this client
pub const PROTOCOL_VERSION: u8 = 0x02;

/// Direction bit set on every server → client frame
pub const RESPONSE_FLAG: u8 = 0x80;

/// Frame header size for protocol versions 1 and 2
pub const HEADER_LENGTH: usize = 8;

/// Largest body accepted in either direction (256 MB)
pub const MAX_BODY_LENGTH: usize = 256 * 1024 * 1024;

/// Number of concurrent streams available with a one-byte stream id
pub const MAX_STREAMS: usize = 128;

/// Default CQL language version sent in STARTUP
pub const DEFAULT_CQL_VERSION: &str = "3.0.0";

/// STARTUP option keys
pub mod startup {
    /// CQL language version
    pub const CQL_VERSION: &str = "CQL_VERSION";
}

/// Message opcodes
pub mod opcodes {
    /// Error response
    pub const ERROR: u8 = 0x00;

    /// Connection initialization
    pub const STARTUP: u8 = 0x01;

    /// Startup acknowledged
    pub const READY: u8 = 0x02;

    /// Server requires authentication
    pub const AUTHENTICATE: u8 = 0x03;

    /// Ask for supported STARTUP options
    pub const OPTIONS: u8 = 0x05;

    /// Supported STARTUP options
    pub const SUPPORTED: u8 = 0x06;

    /// CQL query
    pub const QUERY: u8 = 0x07;

    /// Query result
    pub const RESULT: u8 = 0x08;

    /// Prepare a statement
    pub const PREPARE: u8 = 0x09;

    /// Execute a prepared statement
    pub const EXECUTE: u8 = 0x0A;

    /// Register for server events
    pub const REGISTER: u8 = 0x0B;

    /// Server pushed event
    pub const EVENT: u8 = 0x0C;

    /// Batch of statements
    pub const BATCH: u8 = 0x0D;

    /// SASL challenge
    pub const AUTH_CHALLENGE: u8 = 0x0E;

    /// SASL response
    pub const AUTH_RESPONSE: u8 = 0x0F;

    /// SASL success
    pub const AUTH_SUCCESS: u8 = 0x10;
}

/// Consistency levels used by the QUERY convenience constructor
pub mod consistency {
    /// ONE
    pub const ONE: u16 = 0x0001;

    /// QUORUM
    pub const QUORUM: u16 = 0x0004;

    /// LOCAL_QUORUM
    pub const LOCAL_QUORUM: u16 = 0x0006;
}

/// Human readable opcode name for logs
pub fn opcode_name(opcode: u8) -> &'static str {
    match opcode {
        opcodes::ERROR => "ERROR",
        opcodes::STARTUP => "STARTUP",
        opcodes::READY => "READY",
        opcodes::AUTHENTICATE => "AUTHENTICATE",
        opcodes::OPTIONS => "OPTIONS",
        opcodes::SUPPORTED => "SUPPORTED",
        opcodes::QUERY => "QUERY",
        opcodes::RESULT => "RESULT",
        opcodes::PREPARE => "PREPARE",
        opcodes::EXECUTE => "EXECUTE",
        opcodes::REGISTER => "REGISTER",
        opcodes::EVENT => "EVENT",
        opcodes::BATCH => "BATCH",
        opcodes::AUTH_CHALLENGE => "AUTH_CHALLENGE",
        opcodes::AUTH_RESPONSE => "AUTH_RESPONSE",
        opcodes::AUTH_SUCCESS => "AUTH_SUCCESS",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_names() {
        assert_eq!(opcode_name(opcodes::OPTIONS), "OPTIONS");
        assert_eq!(opcode_name(opcodes::READY), "READY");
        assert_eq!(opcode_name(0x7F), "UNKNOWN");
    }
}
