#![no_main]

use cql_wire::protocol::{decode_error_response, decode_supported};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(error) = decode_error_response(data) {
        let _ = error.to_string();
    }
    let _ = decode_supported(data);
});
