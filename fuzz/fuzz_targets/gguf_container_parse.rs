#![no_main]

use std::io::Cursor;

use gguf_container::{GgufContainer, parse_header};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let header = parse_header(data);

    // Parsing must never panic; whatever parses must serialize to exactly
    // the size it reports and re-serialize to the same bytes.
    let Ok(c) = GgufContainer::read_from(Cursor::new(data)) else {
        return;
    };
    assert!(header.is_ok(), "container parsed past a rejected header");
    for t in c.tensors() {
        assert!(c.data_offset().checked_add(t.offset + t.size).is_some());
    }
    let bytes = c.meta_bytes();
    assert_eq!(bytes.len() as u64, c.meta_size());

    let back = GgufContainer::read_from(Cursor::new(&bytes)).expect("re-parse of serialized header");
    assert_eq!(back.tensors(), c.tensors());
    assert_eq!(back.meta_bytes(), bytes);
});
