//! CQL native protocol framing
//!
//! This module handles:
//! * Frame header encoding and validation
//! * Incremental frame assembly from a byte stream
//! * The few message bodies the connection core needs (STARTUP, ERROR, SUPPORTED)

pub mod assembler;
pub mod constants;
pub mod decode;
pub mod encode;
mod message;

pub use assembler::FrameAssembler;
pub use constants::opcode_name;
pub use decode::{decode_error_response, decode_header, decode_supported};
pub use encode::{encode_frame, encode_request};
pub use message::{ErrorResponse, Frame, FrameHeader, Message, SupportedOptions};
