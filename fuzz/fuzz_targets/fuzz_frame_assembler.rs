#![no_main]

use cql_wire::protocol::FrameAssembler;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut assembler = FrameAssembler::new();
    let mut input = data;

    // Several frames may arrive in a single read
    while !input.is_empty() {
        match assembler.consume(input) {
            Ok(consumed) => {
                input = &input[consumed..];
                if let Some(frame) = assembler.take_frame() {
                    assert!(frame.version & 0x80 != 0);
                } else if consumed == 0 {
                    break;
                }
            }
            Err(_) => {
                assembler.reset();
                break;
            }
        }
    }
});
