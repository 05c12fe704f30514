#![no_main]

use bytes::Bytes;
use cql_wire::protocol::FrameAssembler;
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;

#[derive(Debug)]
struct StreamingInput {
    data: Vec<u8>,
    split_points: Vec<u8>,
}

impl<'a> Arbitrary<'a> for StreamingInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        let data: Vec<u8> = u.arbitrary()?;
        let split_points: Vec<u8> = u.arbitrary()?;
        Ok(Self { data, split_points })
    }
}

/// Run the assembler over `chunks`, returning the frames and whether it errored
fn assemble<'a>(chunks: impl Iterator<Item = &'a [u8]>) -> (Vec<(i8, u8, Bytes)>, bool) {
    let mut assembler = FrameAssembler::new();
    let mut frames = Vec::new();
    for chunk in chunks {
        let mut input = chunk;
        while !input.is_empty() {
            match assembler.consume(input) {
                Ok(consumed) => {
                    input = &input[consumed..];
                    if let Some(frame) = assembler.take_frame() {
                        frames.push((frame.stream, frame.opcode, frame.body));
                    }
                }
                Err(_) => return (frames, true),
            }
        }
    }
    (frames, false)
}

fuzz_target!(|input: StreamingInput| {
    if input.data.is_empty() {
        return;
    }

    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(0);
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    // Fragmentation must not change what is assembled
    let whole = assemble(std::iter::once(&input.data[..]));
    let split = assemble(splits.windows(2).map(|w| &input.data[w[0]..w[1]]));
    assert_eq!(whole, split);
});
