//! Synthetic GGUF archives for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use gguf_container::{GgmlType, GgufContainer, GgufValue, TensorInfo, align_up};

pub struct Fixture {
    pub header: GgufContainer,
    /// Unpadded payload of each tensor, in order.
    pub payloads: Vec<Vec<u8>>,
}

impl Fixture {
    /// Archive with one F32 tensor per entry of `n_f32`, named `blk.{i}.weight`.
    pub fn f32_tensors(n_f32: &[u64]) -> Self {
        let mut header = GgufContainer::new();
        header.set("general.architecture", GgufValue::String("llama".into()));
        header.set("general.name", GgufValue::String("fixture".into()));
        header.set("llama.block_count", GgufValue::Uint32(n_f32.len() as u32));
        header.set(
            "tokenizer.ggml.scores",
            GgufValue::Array(
                gguf_container::GgufValueType::Float32,
                vec![GgufValue::Float32(0.5), GgufValue::Float32(-1.0)],
            ),
        );

        let mut payloads = Vec::with_capacity(n_f32.len());
        for (i, &n) in n_f32.iter().enumerate() {
            let t = TensorInfo::new(format!("blk.{i}.weight"), vec![n], GgmlType::F32).unwrap();
            payloads.push(pattern(i, t.size as usize));
            header.add_tensor(&t).unwrap();
        }
        Self { header, payloads }
    }

    /// Ten tensors of 100 bytes each.
    pub fn ten_by_hundred() -> Self {
        Self::f32_tensors(&[25; 10])
    }

    pub fn with_kv(mut self, key: &str, value: GgufValue) -> Self {
        self.header.set(key, value);
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut out = self.header.meta_bytes();
        let alignment = self.header.alignment();
        for p in &self.payloads {
            out.extend_from_slice(p);
            let padded = align_up(p.len() as u64, alignment) as usize;
            out.resize(out.len() + padded - p.len(), 0);
        }
        out
    }

    pub fn write(&self, path: &Path) -> PathBuf {
        std::fs::write(path, self.bytes()).unwrap();
        path.to_path_buf()
    }
}

/// Distinct, non-zero-heavy bytes per tensor.
pub fn pattern(tensor: usize, len: usize) -> Vec<u8> {
    (0..len).map(|j| (tensor * 37 + j * 7 + 1) as u8).collect()
}

/// Payload of every tensor in `path`, read back through the parsed index.
pub fn read_payloads(path: &Path) -> Vec<(String, Vec<u8>)> {
    let c = GgufContainer::open(path).unwrap();
    let data = std::fs::read(path).unwrap();
    c.tensors()
        .iter()
        .map(|t| {
            let start = (c.data_offset() + t.offset) as usize;
            (t.name.clone(), data[start..start + t.size as usize].to_vec())
        })
        .collect()
}

/// Metadata of `path` without the split bookkeeping keys.
pub fn user_kv(c: &GgufContainer) -> Vec<(String, GgufValue)> {
    c.kv()
        .iter()
        .filter(|kv| !kv.key.starts_with("split."))
        .map(|kv| (kv.key.clone(), kv.value.clone()))
        .collect()
}

pub fn prefix(dir: &Path, name: &str) -> String {
    dir.join(name).to_str().unwrap().to_owned()
}
