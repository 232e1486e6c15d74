//! File-level tests for `GgufContainer`: serialize, write to disk, parse back.

use std::io::Cursor;

use gguf_container::{
    GgmlType, GgufContainer, GgufError, GgufValue, GgufValueType, TensorInfo, parse_header,
};
use proptest::prelude::*;

fn sample() -> GgufContainer {
    let mut c = GgufContainer::new();
    c.set("general.architecture", GgufValue::String("llama".into()));
    c.set("llama.context_length", GgufValue::Uint32(4096));
    c.set("llama.rope.freq_base", GgufValue::Float32(10000.0));
    c.set(
        "tokenizer.ggml.tokens",
        GgufValue::Array(
            GgufValueType::String,
            vec![GgufValue::String("<s>".into()), GgufValue::String("</s>".into())],
        ),
    );
    c.add_tensor(&TensorInfo::new("token_embd.weight", vec![64, 8], GgmlType::F16).unwrap())
        .unwrap();
    c.add_tensor(&TensorInfo::new("blk.0.attn_q.weight", vec![256, 2], GgmlType::Q8_0).unwrap())
        .unwrap();
    c
}

#[test]
fn written_file_parses_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.gguf");
    let c = sample();

    let mut bytes = c.meta_bytes();
    for t in c.tensors() {
        bytes.resize(c.meta_size() as usize + (t.offset + t.size) as usize, 0xAB);
    }
    std::fs::write(&path, &bytes).unwrap();

    let back = GgufContainer::open(&path).unwrap();
    assert_eq!(back.kv(), c.kv());
    assert_eq!(back.tensors(), c.tensors());
    assert_eq!(back.data_offset(), c.meta_size());
    assert_eq!(back.tensors()[1].offset, 1024);
    assert_eq!(back.tensors()[1].size, 2 * 8 * 34);

    let info = parse_header(&bytes).unwrap();
    assert_eq!((info.version, info.tensor_count, info.metadata_count), (back.version(), 2, 4));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = GgufContainer::open(dir.path().join("absent.gguf")).unwrap_err();
    assert!(err.is_io(), "{err}");
}

#[test]
fn v2_files_are_accepted() {
    let mut bytes = sample().meta_bytes();
    bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
    let c = GgufContainer::read_from(Cursor::new(bytes)).unwrap();
    assert_eq!(c.version(), 2);
}

#[test]
fn unaligned_tensor_offset_is_malformed() {
    let t = TensorInfo::new("w", vec![8], GgmlType::F32).unwrap();
    let mut c = GgufContainer::new();
    c.add_tensor(&t).unwrap();
    let mut bytes = c.meta_bytes();

    // no metadata, so the only descriptor follows the fixed header and its
    // offset is its last field
    let desc_end = 24 + t.encoded_len();
    bytes[desc_end - 8..desc_end].copy_from_slice(&1u64.to_le_bytes());

    let err = GgufContainer::read_from(Cursor::new(bytes)).unwrap_err();
    insta::assert_snapshot!(err, @"malformed container: tensor 'w' offset 1 is not aligned to 32");
}

fn with_offset(offset: u64) -> Vec<u8> {
    let t = TensorInfo::new("w", vec![32], GgmlType::I8).unwrap();
    let mut c = GgufContainer::new();
    c.add_tensor(&t).unwrap();
    let mut bytes = c.meta_bytes();
    let desc_end = 24 + t.encoded_len();
    bytes[desc_end - 8..desc_end].copy_from_slice(&offset.to_le_bytes());
    bytes
}

#[test]
fn tensor_end_past_u64_is_malformed() {
    let err = GgufContainer::read_from(Cursor::new(with_offset(u64::MAX - 31))).unwrap_err();
    insta::assert_snapshot!(err, @"malformed container: tensor 'w' at offset 18446744073709551584 with 32 bytes overflows the data section");
}

#[test]
fn data_section_past_u64_is_malformed() {
    // payload end fits in u64 on its own but not after the header
    let err = GgufContainer::read_from(Cursor::new(with_offset(u64::MAX - 63))).unwrap_err();
    assert!(err.to_string().contains("does not fit after"), "{err}");
}

#[test]
fn short_file_is_a_short_header() {
    let err = GgufContainer::read_from(Cursor::new(b"GGUF\x03\x00".to_vec())).unwrap_err();
    assert!(matches!(err, GgufError::ShortHeader(6)), "{err}");
}

#[test]
fn duplicate_key_is_malformed() {
    let mut c = GgufContainer::new();
    c.set("a", GgufValue::Uint8(1));
    c.set("b", GgufValue::Uint8(2));
    let mut bytes = c.meta_bytes();
    // rename "b" to "a"
    let pos = bytes.iter().rposition(|&x| x == b'b').unwrap();
    bytes[pos] = b'a';

    let err = GgufContainer::read_from(Cursor::new(bytes)).unwrap_err();
    insta::assert_snapshot!(err, @"malformed container: duplicate key 'a'");
}

fn value_strategy() -> impl Strategy<Value = GgufValue> {
    prop_oneof![
        any::<u8>().prop_map(GgufValue::Uint8),
        any::<i16>().prop_map(GgufValue::Int16),
        any::<u32>().prop_map(GgufValue::Uint32),
        any::<i64>().prop_map(GgufValue::Int64),
        (-1.0e6f32..1.0e6).prop_map(GgufValue::Float32),
        any::<bool>().prop_map(GgufValue::Bool),
        "[ -~]{0,32}".prop_map(GgufValue::String),
        prop::collection::vec(any::<u32>(), 0..8).prop_map(|v| {
            GgufValue::Array(GgufValueType::Uint32, v.into_iter().map(GgufValue::Uint32).collect())
        }),
    ]
}

proptest! {
    /// Anything the container builds, it parses back unchanged.
    #[test]
    fn prop_built_container_parses_back(
        kv in prop::collection::btree_map("[a-z]{1,6}(\\.[a-z]{1,6}){0,2}", value_strategy(), 0..12),
        dims in prop::collection::vec((1u64..64, 1u64..4), 0..10),
    ) {
        let mut c = GgufContainer::new();
        for (k, v) in &kv {
            c.set(k.clone(), v.clone());
        }
        for (i, (cols, rows)) in dims.iter().enumerate() {
            let t = TensorInfo::new(format!("t{i}"), vec![*cols, *rows], GgmlType::F32).unwrap();
            c.add_tensor(&t).unwrap();
        }

        let bytes = c.meta_bytes();
        prop_assert_eq!(bytes.len() as u64, c.meta_size());
        prop_assert_eq!(bytes.len() as u64 % c.alignment(), 0);

        let back = GgufContainer::read_from(Cursor::new(&bytes)).unwrap();
        prop_assert_eq!(back.kv(), c.kv());
        prop_assert_eq!(back.tensors(), c.tensors());
        prop_assert_eq!(back.data_offset(), c.meta_size());
    }

    /// Arbitrary bytes after a valid magic never panic the parser.
    #[test]
    fn prop_read_from_never_panics(tail in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut bytes = b"GGUF\x03\x00\x00\x00".to_vec();
        bytes.extend(tail);
        let _ = GgufContainer::read_from(Cursor::new(bytes));
    }

    /// Truncating a valid header anywhere is reported as a format error.
    #[test]
    fn prop_truncated_header_is_malformed(cut in 0usize..1000) {
        let bytes = sample().meta_bytes();
        let cut = cut % bytes.len();
        let index_end = bytes.len() - bytes.iter().rev().take_while(|&&b| b == 0).count();
        prop_assume!(cut < index_end);
        let err = GgufContainer::read_from(Cursor::new(&bytes[..cut])).unwrap_err();
        prop_assert!(!matches!(err, GgufError::Io(_)), "{}", err);
    }
}
