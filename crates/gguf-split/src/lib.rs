//! Split a GGUF archive into shards and merge a shard set back together.
//!
//! Shards are complete GGUF files named `<prefix>-NNNNN-of-MMMMM.gguf`. The
//! first shard carries the full metadata of the source archive; every shard
//! records `split.no`, `split.count` and `split.tensors.count`.
//!
//! # Example
//!
//! ```no_run
//! use gguf_split::{SplitConfig, merge, split};
//! use std::path::Path;
//!
//! let config = SplitConfig { max_tensors: 64, ..Default::default() };
//! let summary = split(Path::new("model.gguf"), "out/model", &config).unwrap();
//! println!("wrote {} shards", summary.n_shards());
//!
//! let first = &summary.shards[0].path;
//! merge(first, Path::new("merged.gguf")).unwrap();
//! ```

pub mod assembler;
pub mod config;
pub mod error;
pub mod exit;
pub mod merge;
pub mod naming;
pub mod planner;
pub mod split;
pub mod streamer;

pub use assembler::{
    KEY_SPLIT_COUNT, KEY_SPLIT_NO, KEY_SPLIT_TENSORS_COUNT, ShardDescriptor, ShardWriter,
    shard_header,
};
pub use config::{
    ConfigBuilder, DEFAULT_MAX_TENSORS, SplitConfig, SplitOperation, SplitPolicy, parse_split_size,
};
pub use error::{Result, SplitError};
pub use merge::{MergeSummary, ShardSet, merge};
pub use naming::{expect_split_prefix, split_path, split_prefix};
pub use planner::{ShardPlanState, ShardPlanner};
pub use split::{SplitOptions, SplitSummary, Splitter, plan_split, split};
pub use streamer::{TensorSource, TensorStreamer, padding};
