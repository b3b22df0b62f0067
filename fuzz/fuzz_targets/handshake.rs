#![no_main]

use libfuzzer_sys::fuzz_target;
use wsengine::draft::{Draft, Rfc6455};

// Fuzzes the server-side handshake parser directly on raw bytes — no
// socket or runtime needed, since `accept_handshake_as_server` is
// synchronous. Only property checked is "never panics"; `Err` is an
// expected, common outcome for malformed input.
fuzz_target!(|data: &[u8]| {
    let _ = Rfc6455.accept_handshake_as_server(data);
});
