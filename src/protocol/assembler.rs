//! Incremental frame assembly
//!
//! Socket reads deliver arbitrary byte runs: a frame may be split across many reads
//! and one read may carry several frames. [`FrameAssembler::consume`] takes as much of a
//! run as the current frame needs and reports how many bytes it used, so the caller
//! advances its cursor and calls again with the remainder.

use super::constants::HEADER_LENGTH;
use super::decode::decode_header;
use super::message::{Frame, FrameHeader};
use bytes::BytesMut;
use std::io;

/// Builds one frame at a time from a byte stream
#[derive(Debug, Default)]
pub struct FrameAssembler {
    header_buf: [u8; HEADER_LENGTH],
    header_len: usize,
    header: Option<FrameHeader>,
    body: BytesMut,
}

impl FrameAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning how many were consumed
    ///
    /// Consumption stops at the end of the current frame. Once
    /// [`is_body_ready`](Self::is_body_ready) is true, further calls consume nothing
    /// until the frame is taken.
    pub fn consume(&mut self, input: &[u8]) -> io::Result<usize> {
        if self.is_body_ready() {
            return Ok(0);
        }

        let mut consumed = 0;

        let header = match self.header {
            Some(header) => header,
            None => {
                let wanted = HEADER_LENGTH - self.header_len;
                let n = wanted.min(input.len());
                self.header_buf[self.header_len..self.header_len + n].copy_from_slice(&input[..n]);
                self.header_len += n;
                consumed += n;

                if self.header_len < HEADER_LENGTH {
                    return Ok(consumed);
                }

                let header = decode_header(&self.header_buf)?;
                // the length is untrusted; grow with the bytes that actually arrive
                self.body.reserve(header.length.min(input.len() - consumed));
                self.header = Some(header);
                header
            }
        };

        let wanted = header.length - self.body.len();
        let n = wanted.min(input.len() - consumed);
        self.body.extend_from_slice(&input[consumed..consumed + n]);
        consumed += n;

        Ok(consumed)
    }

    /// Whether a complete frame is waiting to be taken
    pub fn is_body_ready(&self) -> bool {
        matches!(self.header, Some(header) if self.body.len() == header.length)
    }

    /// Take the completed frame and reset for the next one
    pub fn take_frame(&mut self) -> Option<Frame> {
        if !self.is_body_ready() {
            return None;
        }
        let header = self.header.take()?;
        self.header_len = 0;
        Some(Frame {
            version: header.version,
            flags: header.flags,
            stream: header.stream,
            opcode: header.opcode,
            body: self.body.split().freeze(),
        })
    }

    /// Drop any partially assembled frame
    pub fn reset(&mut self) {
        self.header = None;
        self.header_len = 0;
        self.body.clear();
    }

    /// Whether part of a frame has been received
    pub fn is_partial(&self) -> bool {
        self.header_len > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{opcodes, MAX_BODY_LENGTH};
    use crate::protocol::encode::encode_frame;

    fn response(stream: i8, opcode: u8, body: &[u8]) -> BytesMut {
        let header = FrameHeader {
            version: 0x82,
            flags: 0,
            stream,
            opcode,
            length: body.len(),
        };
        let mut buf = BytesMut::new();
        encode_frame(&header, body, &mut buf).unwrap();
        buf
    }

    fn feed_all(assembler: &mut FrameAssembler, mut input: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        while !input.is_empty() {
            let n = assembler.consume(input).unwrap();
            input = &input[n..];
            if let Some(frame) = assembler.take_frame() {
                frames.push(frame);
            }
        }
        frames
    }

    #[test]
    fn test_single_frame_in_one_call() {
        let data = response(4, opcodes::RESULT, b"\x00\x00\x00\x01");
        let mut assembler = FrameAssembler::new();

        let consumed = assembler.consume(&data).unwrap();
        assert_eq!(consumed, data.len());
        assert!(assembler.is_body_ready());

        let frame = assembler.take_frame().unwrap();
        assert_eq!(frame.stream, 4);
        assert_eq!(frame.opcode, opcodes::RESULT);
        assert_eq!(&frame.body[..], b"\x00\x00\x00\x01");
        assert!(!assembler.is_partial());
    }

    #[test]
    fn test_one_byte_chunks_match_single_delivery() {
        let data = response(9, opcodes::SUPPORTED, b"some supported payload");

        let mut whole = FrameAssembler::new();
        let expected = feed_all(&mut whole, &data);
        assert_eq!(expected.len(), 1);

        let mut assembler = FrameAssembler::new();
        let mut ready_signals = 0;
        let mut frames = Vec::new();
        for byte in data.iter() {
            let n = assembler.consume(std::slice::from_ref(byte)).unwrap();
            assert_eq!(n, 1);
            if assembler.is_body_ready() {
                ready_signals += 1;
                frames.push(assembler.take_frame().unwrap());
            }
        }

        assert_eq!(ready_signals, 1);
        assert_eq!(frames, expected);
    }

    #[test]
    fn test_multiple_frames_in_one_delivery() {
        let mut data = response(1, opcodes::RESULT, b"first");
        data.extend_from_slice(&response(2, opcodes::READY, b""));
        data.extend_from_slice(&response(-1, opcodes::EVENT, b"evt"));

        let mut assembler = FrameAssembler::new();
        let frames = feed_all(&mut assembler, &data);

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].stream, 1);
        assert_eq!(&frames[0].body[..], b"first");
        assert_eq!(frames[1].opcode, opcodes::READY);
        assert!(frames[1].body.is_empty());
        assert!(frames[2].is_event());
    }

    #[test]
    fn test_consume_stops_at_frame_boundary() {
        let mut data = response(1, opcodes::RESULT, b"abc");
        let first_len = data.len();
        data.extend_from_slice(&response(2, opcodes::RESULT, b"def"));

        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.consume(&data).unwrap(), first_len);
        assert_eq!(assembler.consume(&data[first_len..]).unwrap(), 0);
        assert!(assembler.take_frame().is_some());
        assert_eq!(assembler.consume(&data[first_len..]).unwrap(), data.len() - first_len);
    }

    #[test]
    fn test_header_split_across_reads() {
        let data = response(3, opcodes::RESULT, b"xyz");
        let mut assembler = FrameAssembler::new();

        assert_eq!(assembler.consume(&data[..5]).unwrap(), 5);
        assert!(assembler.is_partial());
        assert!(!assembler.is_body_ready());
        assert_eq!(assembler.consume(&data[5..]).unwrap(), data.len() - 5);
        assert_eq!(&assembler.take_frame().unwrap().body[..], b"xyz");
    }

    #[test]
    fn test_invalid_header_and_reset() {
        let mut assembler = FrameAssembler::new();
        let err = assembler
            .consume(&[0x02, 0, 0, opcodes::RESULT, 0, 0, 0, 0])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        assembler.reset();
        let data = response(0, opcodes::READY, b"");
        assert_eq!(feed_all(&mut assembler, &data).len(), 1);
    }

    #[test]
    fn test_declared_length_does_not_preallocate() {
        let mut header = vec![0x82, 0, 0, opcodes::RESULT];
        header.extend_from_slice(&(MAX_BODY_LENGTH as i32).to_be_bytes());
        let mut assembler = FrameAssembler::new();

        assert_eq!(assembler.consume(&header).unwrap(), 8);
        assert!(assembler.body.capacity() < 64 * 1024);

        assert_eq!(assembler.consume(&[7u8; 100]).unwrap(), 100);
        assert!(assembler.body.capacity() < 64 * 1024);
        assert!(!assembler.is_body_ready());

        assembler.reset();
        assert_eq!(assembler.consume(&header).unwrap(), 8);
        assert!(assembler.body.capacity() < 64 * 1024);
    }
}
