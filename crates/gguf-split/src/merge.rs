//! Merge orchestration: reassemble one archive from a complete shard set.
//!
//! Pass 1 parses every shard and builds the merged header; pass 2 streams
//! the tensor payloads shard by shard into the single output file.

use std::path::{Path, PathBuf};

use gguf_container::GgufContainer;
use serde::Serialize;
use tracing::{debug, info};

use crate::assembler::{KEY_SPLIT_COUNT, KEY_SPLIT_NO, KEY_SPLIT_TENSORS_COUNT, ShardWriter};
use crate::error::{Result, SplitError};
use crate::naming::{expect_split_prefix, split_path};
use crate::streamer::{TensorSource, TensorStreamer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub output: PathBuf,
    pub inputs: Vec<PathBuf>,
    pub n_tensors: usize,
    /// Unpadded payload bytes copied.
    pub payload_bytes: u64,
    pub file_bytes: u64,
}

/// Parsed shard set, in shard order.
#[derive(Debug)]
pub struct ShardSet {
    prefix: String,
    shards: Vec<(PathBuf, GgufContainer)>,
}

impl ShardSet {
    /// Parse the first shard at `first`, then every sibling it names.
    pub fn open(first: &Path) -> Result<Self> {
        let head = GgufContainer::open(first).map_err(|e| SplitError::codec(first, e))?;
        let count = match head.get_u16(KEY_SPLIT_COUNT) {
            Some(0) | None => {
                return Err(SplitError::NotSplitArchive {
                    path: first.to_path_buf(),
                    key: KEY_SPLIT_COUNT,
                });
            }
            Some(n) => usize::from(n),
        };
        let prefix = expect_split_prefix(first, 0, count)?;
        info!(first = %first.display(), count, prefix = %prefix, "reading shard set");

        let mut shards = Vec::with_capacity(count);
        shards.push((first.to_path_buf(), head));
        for index in 1..count {
            let path = split_path(&prefix, index, count);
            let shard = GgufContainer::open(&path).map_err(|e| SplitError::codec(&path, e))?;
            debug!(path = %path.display(), n_tensors = shard.tensor_count(), "read shard");
            shards.push((path, shard));
        }

        let set = Self { prefix, shards };
        set.validate()?;
        Ok(set)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn n_tensors(&self) -> usize {
        self.shards.iter().map(|(_, c)| c.tensor_count()).sum()
    }

    /// Every shard agrees on its position and the set covers the recorded
    /// tensor total.
    fn validate(&self) -> Result<()> {
        let count = self.shards.len();
        for (index, (path, shard)) in self.shards.iter().enumerate() {
            let invalid = |reason: String| SplitError::InvalidSplit { path: path.clone(), reason };
            if let Some(no) = shard.get_u16(KEY_SPLIT_NO)
                && usize::from(no) != index
            {
                return Err(invalid(format!("{KEY_SPLIT_NO} is {no}, expected {index}")));
            }
            if let Some(n) = shard.get_u16(KEY_SPLIT_COUNT)
                && usize::from(n) != count
            {
                return Err(invalid(format!("{KEY_SPLIT_COUNT} is {n}, expected {count}")));
            }
        }

        let (first, head) = &self.shards[0];
        if let Some(expected) = head.get_i32(KEY_SPLIT_TENSORS_COUNT) {
            let found = self.n_tensors();
            if i64::from(expected) != found as i64 {
                return Err(SplitError::InvalidSplit {
                    path: first.clone(),
                    reason: format!(
                        "{KEY_SPLIT_TENSORS_COUNT} is {expected} but the shards hold {found} tensors"
                    ),
                });
            }
        }
        Ok(())
    }

    /// Header of the merged archive: shard 0's metadata marked as not split,
    /// followed by every tensor descriptor in shard order.
    pub fn merged_header(&self) -> Result<GgufContainer> {
        let mut merged = GgufContainer::new();
        let mut head = self.shards[0].1.clone();
        head.set_u16(KEY_SPLIT_COUNT, 0);
        merged.copy_kv_from(&head);
        for (path, shard) in &self.shards {
            for t in shard.tensors() {
                merged.add_tensor(t).map_err(|e| SplitError::codec(path, e))?;
            }
        }
        Ok(merged)
    }
}

/// Merge the shard set whose first shard is `first` into `output`.
pub fn merge(first: &Path, output: &Path) -> Result<MergeSummary> {
    let set = ShardSet::open(first)?;
    let header = set.merged_header()?;
    info!(
        output = %output.display(),
        n_shards = set.len(),
        n_tensors = header.tensor_count(),
        "merging"
    );

    let mut writer = ShardWriter::create(output, header)?;
    let alignment = writer.alignment();
    let mut streamer = TensorStreamer::new();
    for (path, shard) in &set.shards {
        let mut src = TensorSource::open(path, shard.data_offset())?;
        for t in shard.tensors() {
            let on_disk = streamer.copy_tensor(&mut src, t, writer.data(), output, alignment)?;
            writer.record(t.size, on_disk);
        }
        debug!(path = %path.display(), n_tensors = shard.tensor_count(), "copied shard");
    }

    let n_tensors = set.n_tensors();
    let payload_bytes = writer.payload_bytes();
    let (_, file_bytes) = writer.finish()?;
    info!(output = %output.display(), file_bytes, "merge complete");

    Ok(MergeSummary {
        output: output.to_path_buf(),
        inputs: set.shards.into_iter().map(|(p, _)| p).collect(),
        n_tensors,
        payload_bytes,
        file_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gguf_container::{GgmlType, GgufValue, TensorInfo};

    fn shard(index: u16, count: u16, total: i32, names: &[&str]) -> GgufContainer {
        let mut c = GgufContainer::new();
        if index == 0 {
            c.set("general.name", GgufValue::String("m".into()));
        }
        c.set_u16(KEY_SPLIT_NO, index);
        c.set_u16(KEY_SPLIT_COUNT, count);
        c.set_i32(KEY_SPLIT_TENSORS_COUNT, total);
        for n in names {
            c.add_tensor(&TensorInfo::new(*n, vec![8], GgmlType::F32).unwrap()).unwrap();
        }
        c
    }

    fn set(shards: Vec<GgufContainer>) -> ShardSet {
        let n = shards.len();
        ShardSet {
            prefix: "m".into(),
            shards: shards
                .into_iter()
                .enumerate()
                .map(|(i, c)| (split_path("m", i, n), c))
                .collect(),
        }
    }

    #[test]
    fn merged_header_clears_split_count_and_keeps_order() {
        let s = set(vec![shard(0, 2, 3, &["a", "b"]), shard(1, 2, 3, &["c"])]);
        s.validate().unwrap();
        let h = s.merged_header().unwrap();
        assert_eq!(h.get_u16(KEY_SPLIT_COUNT), Some(0));
        assert_eq!(h.get("general.name").and_then(GgufValue::as_str), Some("m"));
        let names: Vec<_> = h.tensors().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(h.tensors()[2].offset, 64);
    }

    #[test]
    fn out_of_order_shard_is_rejected() {
        let s = set(vec![shard(0, 2, 2, &["a"]), shard(0, 2, 2, &["b"])]);
        let err = s.validate().unwrap_err();
        assert!(matches!(err, SplitError::InvalidSplit { .. }), "{err}");
    }

    #[test]
    fn tensor_total_must_match() {
        let s = set(vec![shard(0, 2, 5, &["a"]), shard(1, 2, 5, &["b"])]);
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("shards hold 2 tensors"), "{err}");
    }

    #[test]
    fn duplicate_tensor_across_shards_is_a_format_error() {
        let s = set(vec![shard(0, 2, 2, &["a"]), shard(1, 2, 2, &["a"])]);
        assert!(matches!(s.merged_header(), Err(SplitError::SourceFormat { .. })));
    }
}
