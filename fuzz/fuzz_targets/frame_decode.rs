#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use wsengine::codec::FrameCodec;

// Fuzzes the streaming frame decoder. Feeds the whole input as one window,
// then keeps decoding frames out of it until `Incomplete` or an `Err` —
// either is a normal outcome; a panic is the only failure this checks for.
fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    loop {
        match FrameCodec::decode(&mut buf) {
            Ok(wsengine::codec::Decoded::Frame(_)) => continue,
            Ok(wsengine::codec::Decoded::Incomplete) => break,
            Err(_) => break,
        }
    }
});
