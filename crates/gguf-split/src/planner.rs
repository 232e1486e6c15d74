//! Shard planning: which tensors go into which shard.
//!
//! Tensors are always consumed in archive order. A shard's tensor set is
//! decided when the shard is opened ([`ShardPlanner::collect_shard`]) by
//! asking [`ShardPlanner::include_tensor`] for each candidate; after every
//! tensor is written, [`ShardPlanner::should_start_new_shard`] decides from
//! committed state whether the open shard is finished.
//!
//! The size policy keeps two accumulators: the candidate sum used while
//! collecting a shard, and the committed `bytes_written` in
//! [`ShardPlanState`] used for the boundary decision. They are reset at the
//! same time but advance at different moments and must not be merged.

use std::ops::Range;

use gguf_container::TensorInfo;
use tracing::debug;

use crate::config::SplitPolicy;
use crate::error::{Result, SplitError};

/// Progress of a split, advanced monotonically by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlanState {
    /// Next tensor to be written.
    pub tensor_index: usize,
    /// Shard currently open.
    pub shard_index: usize,
    /// Index of the open shard among shards that carry tensor data.
    pub data_shard_index: usize,
    /// Unpadded bytes written into the open shard.
    pub bytes_written: u64,
    pub n_tensors: usize,
    pub total_bytes: u64,
}

impl ShardPlanState {
    pub fn new(tensors: &[TensorInfo]) -> Self {
        Self {
            tensor_index: 0,
            shard_index: 0,
            data_shard_index: 0,
            bytes_written: 0,
            n_tensors: tensors.len(),
            total_bytes: tensors.iter().fold(0, |acc, t| acc.saturating_add(t.size)),
        }
    }

    /// Enter shard `shard_index`. With a metadata-only first shard, data
    /// shards are numbered one behind.
    pub fn open_shard(&mut self, shard_index: usize, metadata_only_first: bool) {
        self.shard_index = shard_index;
        self.data_shard_index =
            if metadata_only_first { shard_index.saturating_sub(1) } else { shard_index };
        self.bytes_written = 0;
    }

    /// Record that the tensor at `tensor_index` is on disk.
    pub fn commit(&mut self, size: u64) {
        self.tensor_index += 1;
        self.bytes_written = self.bytes_written.saturating_add(size);
    }

    pub fn is_done(&self) -> bool {
        self.tensor_index >= self.n_tensors
    }
}

/// Shard policy together with its per-shard scratch state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardPlanner {
    MaxTensors { max_tensors: usize },
    MaxSize { max_bytes: u64, candidate_bytes: u64 },
}

impl ShardPlanner {
    pub fn new(policy: SplitPolicy) -> Result<Self> {
        match policy {
            SplitPolicy::MaxTensors(0) => {
                Err(SplitError::Config("--split-max-tensors must be at least 1".into()))
            }
            SplitPolicy::MaxTensors(max_tensors) => Ok(Self::MaxTensors { max_tensors }),
            SplitPolicy::MaxSize(0) => {
                Err(SplitError::Config("--split-max-size must be positive".into()))
            }
            SplitPolicy::MaxSize(max_bytes) => Ok(Self::MaxSize { max_bytes, candidate_bytes: 0 }),
        }
    }

    pub fn policy(&self) -> SplitPolicy {
        match *self {
            Self::MaxTensors { max_tensors } => SplitPolicy::MaxTensors(max_tensors),
            Self::MaxSize { max_bytes, .. } => SplitPolicy::MaxSize(max_bytes),
        }
    }

    /// Shard count from totals alone. Exact for the tensor policy; a lower
    /// bound for the size policy, where packing may need more shards.
    pub fn estimated_shard_count(&self, tensors: &[TensorInfo]) -> usize {
        let n = tensors.len();
        match *self {
            Self::MaxTensors { max_tensors } => n.div_ceil(max_tensors),
            Self::MaxSize { max_bytes, .. } => {
                let total = tensors.iter().fold(0u64, |acc, t| acc.saturating_add(t.size));
                (total.div_ceil(max_bytes) as usize).min(n)
            }
        }
    }

    /// Number of shards carrying tensor data, at least 1.
    ///
    /// For the size policy this packs every tensor once without touching
    /// the disk, so an oversized tensor fails here before any file exists.
    pub fn shard_count(&self, tensors: &[TensorInfo]) -> Result<usize> {
        let estimate = self.estimated_shard_count(tensors);
        let count = match self {
            Self::MaxTensors { .. } => estimate,
            Self::MaxSize { .. } => self.plan_ranges(tensors)?.len(),
        };
        debug!(estimate, count, "planned data shards");
        Ok(count.max(1))
    }

    /// Tensor range of every data shard, in order.
    pub fn plan_ranges(&self, tensors: &[TensorInfo]) -> Result<Vec<Range<usize>>> {
        let mut sim = self.clone();
        let mut state = ShardPlanState::new(tensors);
        let mut ranges = Vec::new();
        while !state.is_done() {
            state.open_shard(ranges.len(), false);
            let range = sim.collect_shard(&state, tensors)?;
            state.tensor_index = range.end;
            ranges.push(range);
        }
        Ok(ranges)
    }

    /// Reset per-shard scratch state.
    pub fn begin_shard(&mut self) {
        if let Self::MaxSize { candidate_bytes, .. } = self {
            *candidate_bytes = 0;
        }
    }

    /// Select the tensors for the shard described by `state`, starting at
    /// `state.tensor_index`.
    pub fn collect_shard(
        &mut self,
        state: &ShardPlanState,
        tensors: &[TensorInfo],
    ) -> Result<Range<usize>> {
        self.begin_shard();
        let start = state.tensor_index;
        let mut end = start;
        for (idx, t) in tensors.iter().enumerate().skip(start) {
            if !self.include_tensor(state, idx, t)? {
                break;
            }
            end = idx + 1;
        }
        Ok(start..end)
    }

    /// Whether tensor `idx` still belongs to the shard being collected.
    pub fn include_tensor(
        &mut self,
        state: &ShardPlanState,
        idx: usize,
        t: &TensorInfo,
    ) -> Result<bool> {
        match self {
            Self::MaxTensors { max_tensors } => {
                Ok(idx < (state.data_shard_index + 1) * *max_tensors)
            }
            Self::MaxSize { max_bytes, candidate_bytes } => {
                let needed = candidate_bytes.saturating_add(t.size);
                let include = candidate_bytes.checked_add(t.size).is_some_and(|n| n <= *max_bytes);
                if !include && idx == state.tensor_index {
                    return Err(SplitError::SizeLimit {
                        tensor_index: idx,
                        name: t.name.clone(),
                        needed,
                        limit: *max_bytes,
                    });
                }
                *candidate_bytes = needed;
                Ok(include)
            }
        }
    }

    /// After a write: does `next` start a new shard?
    pub fn should_start_new_shard(&self, state: &ShardPlanState, next: &TensorInfo) -> bool {
        match *self {
            Self::MaxTensors { max_tensors } => state.tensor_index % max_tensors == 0,
            Self::MaxSize { max_bytes, .. } => {
                state.bytes_written.checked_add(next.size).is_none_or(|n| n > max_bytes)
            }
        }
    }
}
