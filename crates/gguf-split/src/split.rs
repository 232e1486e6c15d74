//! Split orchestration: plan the shards, then write them one at a time.

use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};

use gguf_container::{GgufContainer, TensorInfo, align_up};
use serde::Serialize;
use tracing::{debug, info};

use crate::assembler::{ShardDescriptor, ShardWriter, shard_header};
use crate::config::{SplitConfig, SplitPolicy};
use crate::error::{Result, SplitError};
use crate::naming::split_path;
use crate::planner::{ShardPlanState, ShardPlanner};
use crate::streamer::{TensorSource, TensorStreamer};

/// Settings that shape a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitOptions {
    pub policy: SplitPolicy,
    /// Emit a first shard holding metadata only.
    pub no_tensor_in_metadata: bool,
}

impl SplitOptions {
    pub fn new(policy: SplitPolicy) -> Self {
        Self { policy, no_tensor_in_metadata: false }
    }

    pub fn with_no_tensor_in_metadata(mut self, on: bool) -> Self {
        self.no_tensor_in_metadata = on;
        self
    }

    pub fn from_config(config: &SplitConfig) -> Result<Self> {
        Ok(Self::new(config.policy()?).with_no_tensor_in_metadata(config.no_tensor_in_metadata))
    }
}

/// Outcome of a split, or the plan of one when nothing was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitSummary {
    pub input: PathBuf,
    pub output_prefix: String,
    pub options: SplitOptions,
    pub n_tensors: usize,
    /// Unpadded payload bytes over all tensors.
    pub total_bytes: u64,
    pub dry_run: bool,
    pub shards: Vec<ShardDescriptor>,
}

impl SplitSummary {
    pub fn n_shards(&self) -> usize {
        self.shards.len()
    }
}

/// A parsed source archive ready to be split.
#[derive(Debug)]
pub struct Splitter {
    input: PathBuf,
    source: GgufContainer,
    planner: ShardPlanner,
    options: SplitOptions,
}

impl Splitter {
    /// Parse `input` and validate the policy. Nothing is written.
    pub fn open(input: &Path, options: SplitOptions) -> Result<Self> {
        let planner = ShardPlanner::new(options.policy)?;
        let source = GgufContainer::open(input).map_err(|e| SplitError::codec(input, e))?;
        info!(
            input = %input.display(),
            n_tensors = source.tensor_count(),
            n_kv = source.kv().len(),
            total_bytes = source.total_tensor_bytes(),
            "loaded source archive"
        );
        Ok(Self { input: input.to_path_buf(), source, planner, options })
    }

    pub fn source(&self) -> &GgufContainer {
        &self.source
    }

    /// Tensor range of every shard, including a leading empty range when
    /// the first shard holds metadata only.
    pub fn shard_ranges(&self) -> Result<Vec<Range<usize>>> {
        let tensors = self.source.tensors();
        let mut ranges = Vec::new();
        if self.options.no_tensor_in_metadata {
            ranges.push(0..0);
        }
        let data = self.planner.plan_ranges(tensors)?;
        if data.is_empty() {
            ranges.push(0..0);
        } else {
            ranges.extend(data);
        }
        debug_assert_eq!(
            ranges.len(),
            self.planner.shard_count(tensors).unwrap_or(0) + usize::from(self.options.no_tensor_in_metadata)
        );

        if ranges.len() > usize::from(u16::MAX) {
            return Err(SplitError::Config(format!(
                "{} shards exceed the limit of {}",
                ranges.len(),
                u16::MAX
            )));
        }
        Ok(ranges)
    }

    /// Describe the shards a split to `output_prefix` would write.
    pub fn plan(&self, output_prefix: &str) -> Result<SplitSummary> {
        let tensors = self.source.tensors();
        let ranges = self.shard_ranges()?;
        let count = ranges.len();

        let mut shards = Vec::with_capacity(count);
        for (index, range) in ranges.into_iter().enumerate() {
            let header =
                shard_header(&self.source, &self.input, index, count, &tensors[range.clone()])?;
            let header_bytes = header.meta_size();
            let slice = &tensors[range.clone()];
            let payload_bytes: u64 = slice.iter().map(|t| t.size).sum();
            let padded: u64 = slice.iter().map(|t| align_up(t.size, header.alignment())).sum();
            shards.push(ShardDescriptor {
                index,
                count,
                tensors: range,
                path: split_path(output_prefix, index, count),
                header_bytes,
                payload_bytes,
                file_bytes: header_bytes + padded,
            });
        }
        Ok(self.summary(output_prefix, true, shards))
    }

    /// Write every shard to `<output_prefix>-NNNNN-of-MMMMM.gguf`.
    pub fn run(&self, output_prefix: &str) -> Result<SplitSummary> {
        let tensors = self.source.tensors();
        let planned = self.shard_ranges()?;
        let count = planned.len();
        let meta_first = self.options.no_tensor_in_metadata;
        info!(
            n_shards = count,
            estimate = self.planner.estimated_shard_count(tensors) + usize::from(meta_first),
            "splitting"
        );

        let mut run = ShardRun {
            splitter: self,
            output_prefix,
            count,
            planner: self.planner.clone(),
            state: ShardPlanState::new(tensors),
            streamer: TensorStreamer::new(),
            src: TensorSource::open(&self.input, self.source.data_offset())?,
        };
        let mut shards = Vec::with_capacity(count);

        for (index, expected) in planned.into_iter().enumerate() {
            run.state.open_shard(index, meta_first);
            let range = if meta_first && index == 0 {
                run.state.tensor_index..run.state.tensor_index
            } else {
                run.planner.collect_shard(&run.state, tensors)?
            };
            if range != expected {
                return Err(SplitError::PlanMismatch { shard: index, tensor_index: range.end });
            }
            shards.push(run.write_shard(index, range)?);
        }

        if !run.state.is_done() {
            return Err(SplitError::PlanMismatch { shard: count, tensor_index: run.state.tensor_index });
        }
        info!(n_shards = shards.len(), n_tensors = run.state.n_tensors, "split complete");
        Ok(self.summary(output_prefix, false, shards))
    }

    fn summary(&self, output_prefix: &str, dry_run: bool, shards: Vec<ShardDescriptor>) -> SplitSummary {
        SplitSummary {
            input: self.input.clone(),
            output_prefix: output_prefix.to_owned(),
            options: self.options,
            n_tensors: self.source.tensor_count(),
            total_bytes: self.source.total_tensor_bytes(),
            dry_run,
            shards,
        }
    }
}

/// Mutable state of one split run.
struct ShardRun<'a> {
    splitter: &'a Splitter,
    output_prefix: &'a str,
    count: usize,
    planner: ShardPlanner,
    state: ShardPlanState,
    streamer: TensorStreamer,
    src: TensorSource<File>,
}

impl ShardRun<'_> {
    fn write_shard(&mut self, index: usize, range: Range<usize>) -> Result<ShardDescriptor> {
        let Splitter { input, source, .. } = self.splitter;
        let tensors = source.tensors();
        let path = split_path(self.output_prefix, index, self.count);
        let header = shard_header(source, input, index, self.count, &tensors[range.clone()])?;
        info!(
            shard = index + 1,
            of = self.count,
            path = %path.display(),
            n_tensors = range.len(),
            "writing shard"
        );

        let mut writer = ShardWriter::create(&path, header)?;
        let alignment = writer.alignment();
        for t in &tensors[range.clone()] {
            let on_disk = self.streamer.copy_tensor(&mut self.src, t, writer.data(), &path, alignment)?;
            writer.record(t.size, on_disk);
            self.state.commit(t.size);
            check_boundary(&self.planner, &self.state, tensors, &range, index)?;
        }

        let payload_bytes = writer.payload_bytes();
        let (header_bytes, file_bytes) = writer.finish()?;
        debug!(shard = index, header_bytes, payload_bytes, file_bytes, "closed shard");
        Ok(ShardDescriptor {
            index,
            count: self.count,
            tensors: range,
            path,
            header_bytes,
            payload_bytes,
            file_bytes,
        })
    }
}

/// The planner's boundary decision after a write must agree with the range
/// already recorded in the shard header.
fn check_boundary(
    planner: &ShardPlanner,
    state: &ShardPlanState,
    tensors: &[TensorInfo],
    range: &Range<usize>,
    shard: usize,
) -> Result<()> {
    let Some(next) = tensors.get(state.tensor_index) else {
        return Ok(());
    };
    let header_ends = state.tensor_index == range.end;
    if planner.should_start_new_shard(state, next) != header_ends {
        return Err(SplitError::PlanMismatch { shard, tensor_index: state.tensor_index - 1 });
    }
    Ok(())
}

/// Split `input` into shards named after `output_prefix`.
pub fn split(input: &Path, output_prefix: &str, config: &SplitConfig) -> Result<SplitSummary> {
    Splitter::open(input, SplitOptions::from_config(config)?)?.run(output_prefix)
}

/// Plan a split of `input` without writing anything.
pub fn plan_split(input: &Path, output_prefix: &str, config: &SplitConfig) -> Result<SplitSummary> {
    Splitter::open(input, SplitOptions::from_config(config)?)?.plan(output_prefix)
}
