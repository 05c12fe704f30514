//! Protocol frame encoding

use super::constants::{MAX_BODY_LENGTH, PROTOCOL_VERSION};
use super::message::{FrameHeader, Message};
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode a request message on `stream` into a complete frame
///
/// Fails with `InvalidInput` when the body exceeds the protocol maximum.
pub fn encode_request(stream: i8, message: &Message) -> io::Result<BytesMut> {
    if message.body.len() > MAX_BODY_LENGTH {
        return Err(body_too_large(message.body.len()));
    }
    let header = FrameHeader {
        version: PROTOCOL_VERSION,
        flags: 0,
        stream,
        opcode: message.opcode,
        length: message.body.len(),
    };
    let mut buf = BytesMut::with_capacity(super::constants::HEADER_LENGTH + message.body.len());
    encode_frame(&header, &message.body, &mut buf)?;
    Ok(buf)
}

/// Encode a frame header followed by its body
///
/// `header.length` is ignored; the body length is written instead.
pub fn encode_frame(header: &FrameHeader, body: &[u8], buf: &mut BytesMut) -> io::Result<()> {
    if body.len() > MAX_BODY_LENGTH {
        return Err(body_too_large(body.len()));
    }

    buf.put_u8(header.version);
    buf.put_u8(header.flags);
    buf.put_i8(header.stream);
    buf.put_u8(header.opcode);
    buf.put_i32(body.len() as i32);
    buf.put_slice(body);
    Ok(())
}

fn body_too_large(len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
            "frame body of {} bytes exceeds maximum allowed {}",
            len, MAX_BODY_LENGTH
        ),
    )
}

/// Encode a `[string]`: u16 length followed by UTF-8 bytes
pub fn encode_string(buf: &mut BytesMut, value: &str) {
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
}

/// Encode a `[string map]`
pub fn encode_string_map(buf: &mut BytesMut, entries: &[(&str, &str)]) {
    buf.put_u16(entries.len() as u16);
    for (key, value) in entries {
        encode_string(buf, key);
        encode_string(buf, value);
    }
}

/// Encode a `[string multimap]`
pub fn encode_string_multimap(buf: &mut BytesMut, entries: &[(&str, &[&str])]) {
    buf.put_u16(entries.len() as u16);
    for (key, values) in entries {
        encode_string(buf, key);
        buf.put_u16(values.len() as u16);
        for value in values.iter() {
            encode_string(buf, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::opcodes;

    #[test]
    fn test_encode_options() {
        let buf = encode_request(3, &Message::options()).unwrap();

        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[..], &[0x02, 0x00, 0x03, opcodes::OPTIONS, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_negative_stream() {
        let header = FrameHeader {
            version: 0x82,
            flags: 0,
            stream: -1,
            opcode: opcodes::EVENT,
            length: 0,
        };
        let mut buf = BytesMut::new();
        encode_frame(&header, b"abc", &mut buf).unwrap();

        assert_eq!(buf[2], 0xFF);
        assert_eq!(&buf[4..8], &[0, 0, 0, 3]);
        assert_eq!(&buf[8..], b"abc");
    }

    #[test]
    fn test_encode_string_map() {
        let mut buf = BytesMut::new();
        encode_string_map(&mut buf, &[("A", "bc")]);
        assert_eq!(&buf[..], &[0, 1, 0, 1, b'A', 0, 2, b'b', b'c']);
    }
}
