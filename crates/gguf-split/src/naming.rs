//! Shard file naming: `<prefix>-NNNNN-of-MMMMM.gguf`, numbered from 1.

use std::path::{Path, PathBuf};

use crate::error::{Result, SplitError};

/// Path of shard `index` (0-based) out of `count`.
pub fn split_path(prefix: &str, index: usize, count: usize) -> PathBuf {
    PathBuf::from(format!("{prefix}{}", split_suffix(index, count)))
}

/// Recover the prefix from the path of shard `index` of `count`.
///
/// Returns `None` unless `path` ends with exactly the expected suffix.
pub fn split_prefix(path: &str, index: usize, count: usize) -> Option<&str> {
    path.strip_suffix(split_suffix(index, count).as_str())
}

/// Like [`split_prefix`] but fails with a naming error for the given path.
pub fn expect_split_prefix(path: &Path, index: usize, count: usize) -> Result<String> {
    let mismatch = || SplitError::NamingMismatch { path: path.to_path_buf(), index, count };
    let s = path.to_str().ok_or_else(mismatch)?;
    split_prefix(s, index, count).map(str::to_owned).ok_or_else(mismatch)
}

fn split_suffix(index: usize, count: usize) -> String {
    format!("-{:05}-of-{:05}.gguf", index + 1, count)
}
