#![no_main]
use libfuzzer_sys::fuzz_target;
use solid_archive::BlockBuffer;
use std::io::Read;

fuzz_target!(|chunks: Vec<Vec<u8>>| {
    let mut buffer = match BlockBuffer::with_block_size(64) {
        Ok(b) => b,
        Err(_) => return,
    };
    let mut reader = buffer.open_reader();
    let mut expected = Vec::new();

    for chunk in &chunks {
        buffer.append(chunk);
        expected.extend_from_slice(chunk);
    }

    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, expected);
    assert_eq!(buffer.size(), expected.len() as u64);
});
