//! Error type shared by the split and merge engines.

use std::io;
use std::path::{Path, PathBuf};

use gguf_container::GgufError;
use thiserror::Error;

use crate::exit;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SplitError {
    /// Bad option value: zero tensor cap, malformed size, unreadable config.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Input is not a usable GGUF container.
    #[error("{}: {source}", path.display())]
    SourceFormat {
        path: PathBuf,
        #[source]
        source: GgufError,
    },

    /// Input parses but its split bookkeeping is missing or inconsistent.
    #[error("{}: {reason}", path.display())]
    InvalidSplit { path: PathBuf, reason: String },

    #[error("{}: input file does not contain {key} metadata, not a split archive", path.display())]
    NotSplitArchive { path: PathBuf, key: &'static str },

    #[error(
        "--split-max-size too small for tensor {tensor_index} ('{name}'): {needed} > {limit} bytes"
    )]
    SizeLimit { tensor_index: usize, name: String, needed: u64, limit: u64 },

    #[error("unexpected input file name: {} (split {index} of {count})", path.display())]
    NamingMismatch { path: PathBuf, index: usize, count: usize },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: short read for tensor '{name}': wanted {wanted} bytes at offset {offset}", path.display())]
    ShortRead { path: PathBuf, name: String, offset: u64, wanted: u64 },

    /// Internal consistency check of the placeholder/patch protocol.
    #[error("{}: header is {actual} bytes but {reserved} were reserved", path.display())]
    PlaceholderMismatch { path: PathBuf, reserved: u64, actual: u64 },

    /// The planner's boundary decision disagreed with a shard's header.
    #[error("shard {shard}: planner boundary disagrees with header after tensor {tensor_index}")]
    PlanMismatch { shard: usize, tensor_index: usize },
}

pub type Result<T> = std::result::Result<T, SplitError>;

impl SplitError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }

    /// Classify a codec failure on `path`: I/O stays I/O, everything else is
    /// a source-format problem.
    pub(crate) fn codec(path: &Path, source: GgufError) -> Self {
        match source {
            GgufError::Io(e) => Self::io(path, e),
            other => Self::SourceFormat { path: path.to_path_buf(), source: other },
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => exit::EXIT_CONFIG,
            Self::SourceFormat { .. } | Self::InvalidSplit { .. } | Self::NotSplitArchive { .. } => {
                exit::EXIT_SOURCE_FORMAT
            }
            Self::SizeLimit { .. } => exit::EXIT_SIZE_LIMIT,
            Self::NamingMismatch { .. } => exit::EXIT_NAMING,
            Self::Io { .. } | Self::ShortRead { .. } => exit::EXIT_IO,
            Self::PlaceholderMismatch { .. } | Self::PlanMismatch { .. } => exit::EXIT_GENERIC_FAIL,
        }
    }
}
