//! Shard headers and the placeholder/patch write protocol.
//!
//! A shard's header size depends on the descriptors it lists, so the header
//! is built in memory first, its exact size is reserved as zeros at the start
//! of the file, the tensor payloads are streamed after it, and finally the
//! real header is written over the reservation.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use gguf_container::{GgufContainer, TensorInfo};
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SplitError};
use crate::streamer::write_zeros;

pub const KEY_SPLIT_NO: &str = "split.no";
pub const KEY_SPLIT_COUNT: &str = "split.count";
pub const KEY_SPLIT_TENSORS_COUNT: &str = "split.tensors.count";

/// One shard of a split, as planned or as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardDescriptor {
    pub index: usize,
    pub count: usize,
    /// Global indices of the tensors stored in this shard.
    pub tensors: Range<usize>,
    pub path: PathBuf,
    /// Header size including its alignment padding.
    pub header_bytes: u64,
    /// Unpadded tensor payload bytes.
    pub payload_bytes: u64,
    /// Final file size.
    pub file_bytes: u64,
}

impl ShardDescriptor {
    pub fn has_data(&self) -> bool {
        !self.tensors.is_empty()
    }
}

/// Build the header of shard `index` of `count`.
///
/// Shard 0 carries every key of `source`; later shards only the split
/// bookkeeping. Every shard records `n_tensors`, the tensor total of the
/// whole archive.
pub fn shard_header(
    source: &GgufContainer,
    source_path: &Path,
    index: usize,
    count: usize,
    tensors: &[TensorInfo],
) -> Result<GgufContainer> {
    let split_no = to_u16(index, "shard index")?;
    let split_count = to_u16(count, "shard count")?;
    let n_tensors = i32::try_from(source.tensor_count()).map_err(|_| {
        SplitError::Config(format!("{} tensors do not fit in {KEY_SPLIT_TENSORS_COUNT}", source.tensor_count()))
    })?;

    let mut header = GgufContainer::new();
    if index == 0 {
        header.copy_kv_from(source);
    }
    header.set_u16(KEY_SPLIT_NO, split_no);
    header.set_u16(KEY_SPLIT_COUNT, split_count);
    header.set_i32(KEY_SPLIT_TENSORS_COUNT, n_tensors);

    for t in tensors {
        header.add_tensor(t).map_err(|e| SplitError::codec(source_path, e))?;
    }
    Ok(header)
}

fn to_u16(n: usize, what: &str) -> Result<u16> {
    u16::try_from(n).map_err(|_| SplitError::Config(format!("{what} {n} exceeds {}", u16::MAX)))
}

/// Output file whose header space is reserved but not yet written.
#[derive(Debug)]
pub struct ShardWriter {
    header: GgufContainer,
    out: BufWriter<File>,
    path: PathBuf,
    reserved: u64,
    payload_bytes: u64,
    written: u64,
}

impl ShardWriter {
    /// Create `path` and reserve `header.meta_size()` zero bytes.
    pub fn create(path: &Path, header: GgufContainer) -> Result<Self> {
        let file = File::create(path).map_err(|e| SplitError::io(path, e))?;
        let mut out = BufWriter::new(file);
        let reserved = header.meta_size();
        write_zeros(&mut out, reserved).map_err(|e| SplitError::io(path, e))?;
        debug!(path = %path.display(), reserved, n_tensors = header.tensor_count(), "reserved shard header");
        Ok(Self {
            header,
            out,
            path: path.to_path_buf(),
            reserved,
            payload_bytes: 0,
            written: reserved,
        })
    }

    /// Alignment used to pad every payload in this file.
    pub fn alignment(&self) -> u64 {
        self.header.alignment()
    }

    /// Destination for tensor payloads, positioned after the reservation.
    pub fn data(&mut self) -> &mut BufWriter<File> {
        &mut self.out
    }

    /// Account for one payload of `size` bytes occupying `on_disk` bytes.
    pub fn record(&mut self, size: u64, on_disk: u64) {
        self.payload_bytes += size;
        self.written += on_disk;
    }

    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }

    /// Overwrite the reservation with the real header and sync the file.
    /// Returns `(header_bytes, file_bytes)`.
    pub fn finish(self) -> Result<(u64, u64)> {
        let Self { header, mut out, path, reserved, written, .. } = self;

        let meta = header.meta_bytes();
        let actual = meta.len() as u64;
        if actual != reserved {
            return Err(SplitError::PlaceholderMismatch { path, reserved, actual });
        }

        let io_err = |e| SplitError::io(&path, e);
        out.flush().map_err(io_err)?;
        out.seek(SeekFrom::Start(0)).map_err(io_err)?;
        out.write_all(&meta).map_err(io_err)?;
        let file = out.into_inner().map_err(|e| io_err(e.into_error()))?;
        file.sync_all().map_err(io_err)?;

        debug!(path = %path.display(), header = actual, bytes = written, "patched shard header");
        Ok((actual, written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gguf_container::{GgmlType, GgufValue};

    fn source(n: usize) -> GgufContainer {
        let mut c = GgufContainer::new();
        c.set("general.name", GgufValue::String("tiny".into()));
        for i in 0..n {
            c.add_tensor(&TensorInfo::new(format!("t{i}"), vec![25], GgmlType::F32).unwrap()).unwrap();
        }
        c
    }

    #[test]
    fn first_shard_carries_source_metadata() {
        let src = source(4);
        let h = shard_header(&src, Path::new("src.gguf"), 0, 2, &src.tensors()[..2]).unwrap();
        assert_eq!(h.get("general.name").and_then(GgufValue::as_str), Some("tiny"));
        assert_eq!(h.get_u16(KEY_SPLIT_NO), Some(0));
        assert_eq!(h.get_u16(KEY_SPLIT_COUNT), Some(2));
        assert_eq!(h.get_i32(KEY_SPLIT_TENSORS_COUNT), Some(4));
        assert_eq!(h.tensor_count(), 2);
    }

    #[test]
    fn later_shards_carry_only_bookkeeping() {
        let src = source(4);
        let h = shard_header(&src, Path::new("src.gguf"), 1, 2, &src.tensors()[2..]).unwrap();
        assert_eq!(h.kv().len(), 3);
        assert!(h.get("general.name").is_none());
        assert_eq!(h.tensors()[0].name, "t2");
        assert_eq!(h.tensors()[0].offset, 0);
        assert_eq!(h.tensors()[1].offset, 128);
    }

    #[test]
    fn shard_count_must_fit_u16() {
        let src = source(0);
        assert!(matches!(shard_header(&src, Path::new("src.gguf"), 0, 70_000, &[]), Err(SplitError::Config(_))));
    }

    #[test]
    fn finish_patches_reserved_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.gguf");
        let src = source(1);
        let header = shard_header(&src, Path::new("src.gguf"), 0, 1, &[]).unwrap();
        let expected = header.meta_bytes();

        let mut w = ShardWriter::create(&path, header).unwrap();
        w.data().write_all(&[9u8; 32]).unwrap();
        w.record(32, 32);
        let (header_bytes, file_bytes) = w.finish().unwrap();

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(header_bytes, expected.len() as u64);
        assert_eq!(file_bytes, on_disk.len() as u64);
        assert_eq!(&on_disk[..expected.len()], &expected[..]);
        assert!(on_disk[expected.len()..].iter().all(|&b| b == 9));
    }

    #[test]
    fn create_fails_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("s.gguf");
        let err = ShardWriter::create(&path, GgufContainer::new()).unwrap_err();
        assert!(matches!(err, SplitError::Io { .. }));
    }
}
