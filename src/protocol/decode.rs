//! Protocol frame decoding

use super::constants::{HEADER_LENGTH, MAX_BODY_LENGTH, RESPONSE_FLAG};
use super::message::{ErrorResponse, FrameHeader, SupportedOptions};
use std::io;

/// Decode a response frame header
///
/// Rejects frames without the response direction bit, unknown protocol versions,
/// and body lengths that are negative or above [`MAX_BODY_LENGTH`].
pub fn decode_header(data: &[u8; HEADER_LENGTH]) -> io::Result<FrameHeader> {
    let version = data[0];
    if version & RESPONSE_FLAG == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame version 0x{:02X} is not a response", version),
        ));
    }
    let number = version & !RESPONSE_FLAG;
    if !(1..=2).contains(&number) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported protocol version {}", number),
        ));
    }

    let length = i32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if length < 0 || length as usize > MAX_BODY_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "frame length {} outside allowed range 0..={}",
                length, MAX_BODY_LENGTH
            ),
        ));
    }

    Ok(FrameHeader {
        version,
        flags: data[1],
        stream: data[2] as i8,
        opcode: data[3],
        length: length as usize,
    })
}

/// Decode an ERROR body: `[int] code` then `[string] message`
pub fn decode_error_response(data: &[u8]) -> io::Result<ErrorResponse> {
    let mut reader = BodyReader::new(data);
    let code = reader.read_int()?;
    let message = reader.read_string()?;
    Ok(ErrorResponse { code, message })
}

/// Decode a SUPPORTED body: `[string multimap]`
pub fn decode_supported(data: &[u8]) -> io::Result<SupportedOptions> {
    let mut reader = BodyReader::new(data);
    let count = reader.read_short()? as usize;
    let mut options = SupportedOptions::with_capacity(count);
    for _ in 0..count {
        let key = reader.read_string()?;
        let values = reader.read_string_list()?;
        options.insert(key, values);
    }
    Ok(options)
}

/// Cursor over a frame body
struct BodyReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BodyReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> io::Result<&'a [u8]> {
        if self.offset + len > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, what.to_string()));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_short(&mut self) -> io::Result<u16> {
        let b = self.take(2, "short")?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_int(&mut self) -> io::Result<i32> {
        let b = self.take(4, "int")?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_string(&mut self) -> io::Result<String> {
        let len = self.read_short()? as usize;
        let bytes = self.take(len, "string")?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid UTF-8 in string: {}", e),
            )
        })
    }

    fn read_string_list(&mut self) -> io::Result<Vec<String>> {
        let count = self.read_short()? as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_string()?);
        }
        Ok(values)
    }
}
