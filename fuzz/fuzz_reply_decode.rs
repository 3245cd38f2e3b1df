//! Fuzz target for reply framing and decoding.
//!
//! Run with: cargo +nightly fuzz run fuzz_reply_decode
//!
//! Feeds arbitrary bytes through every framing mode's reader and then the
//! message decoder, the same path a reply from an untrusted peer takes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use unixcall_core::exchange::{Framing, Message};

const LIMIT: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");

    for framing in [Framing::Unframed, Framing::Newline, Framing::LengthPrefixed] {
        let mut input = data;
        let frame = runtime.block_on(framing.read_frame(&mut input, LIMIT));
        if let Ok(bytes) = frame {
            assert!(bytes.len() <= LIMIT);
            if let Ok(message) = Message::decode(&bytes) {
                let encoded = message.encode().expect("re-encode");
                assert_eq!(Message::decode(&encoded).ok(), Some(message));
            }
        }
    }
});
