//! Configuration with file and environment variable support

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, SplitError};

/// Default `--split-max-tensors`.
pub const DEFAULT_MAX_TENSORS: usize = 128;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Which direction to run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SplitOperation {
    #[default]
    Split,
    Merge,
}

impl FromStr for SplitOperation {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "split" => Ok(Self::Split),
            "merge" => Ok(Self::Merge),
            other => Err(SplitError::Config(format!("unknown operation '{other}'"))),
        }
    }
}

/// How tensors are distributed across shards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SplitPolicy {
    /// At most this many tensors per shard.
    MaxTensors(usize),
    /// Soft cap on the unpadded tensor bytes of each shard.
    MaxSize(u64),
}

/// Parse `--split-max-size`: a positive integer followed by `M` (MiB) or `G` (GiB).
pub fn parse_split_size(s: &str) -> Result<u64> {
    let invalid = || SplitError::Config(format!("invalid max size '{s}', expected N followed by M or G"));

    let s_trim = s.trim();
    let unit = s_trim.chars().last().ok_or_else(invalid)?;
    let multiplier = match unit {
        'M' => MIB,
        'G' => GIB,
        _ => return Err(invalid()),
    };
    let value: u64 = s_trim[..s_trim.len() - 1].parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Resolved settings for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SplitConfig {
    pub operation: SplitOperation,
    /// Tensor cap per shard, used when `max_size` is unset.
    pub max_tensors: usize,
    /// Byte cap per shard, e.g. `"4G"`; takes precedence over `max_tensors`.
    pub max_size: Option<String>,
    /// First shard carries metadata only.
    pub no_tensor_in_metadata: bool,
    /// Plan only, write nothing.
    pub dry_run: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            operation: SplitOperation::Split,
            max_tensors: DEFAULT_MAX_TENSORS,
            max_size: None,
            no_tensor_in_metadata: false,
            dry_run: false,
        }
    }
}

impl SplitConfig {
    /// The shard policy these settings select.
    pub fn policy(&self) -> Result<SplitPolicy> {
        match &self.max_size {
            Some(size) => Ok(SplitPolicy::MaxSize(parse_split_size(size)?)),
            None if self.max_tensors > 0 => Ok(SplitPolicy::MaxTensors(self.max_tensors)),
            None => Err(SplitError::Config("--split-max-tensors must be at least 1".into())),
        }
    }
}

/// Builds a [`SplitConfig`] from defaults, a TOML file, the environment and
/// explicit overrides, in increasing order of precedence.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: SplitConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self { config: SplitConfig::default() }
    }

    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SplitError::io(path, e))?;
        self.config = toml::from_str(&content)
            .map_err(|e| SplitError::Config(format!("{}: {e}", path.display())))?;
        Ok(self)
    }

    /// Load configuration from environment variables
    pub fn from_env(mut self) -> Result<Self> {
        if let Ok(n) = env::var("GGUF_SPLIT_MAX_TENSORS") {
            self.config.max_tensors = n
                .parse()
                .map_err(|_| SplitError::Config(format!("GGUF_SPLIT_MAX_TENSORS='{n}'")))?;
        }

        if let Ok(size) = env::var("GGUF_SPLIT_MAX_SIZE") {
            self.config.max_size = Some(size);
        }

        if let Ok(flag) = env::var("GGUF_SPLIT_NO_TENSOR_IN_METADATA") {
            self.config.no_tensor_in_metadata = parse_bool(&flag).ok_or_else(|| {
                SplitError::Config(format!("GGUF_SPLIT_NO_TENSOR_IN_METADATA='{flag}'"))
            })?;
        }

        Ok(self)
    }

    pub fn with_operation(mut self, op: SplitOperation) -> Self {
        self.config.operation = op;
        self
    }

    pub fn with_max_tensors(mut self, n: usize) -> Self {
        self.config.max_tensors = n;
        self
    }

    pub fn with_max_size(mut self, size: impl Into<String>) -> Self {
        self.config.max_size = Some(size.into());
        self
    }

    pub fn with_no_tensor_in_metadata(mut self, on: bool) -> Self {
        self.config.no_tensor_in_metadata = on;
        self
    }

    pub fn with_dry_run(mut self, on: bool) -> Self {
        self.config.dry_run = on;
        self
    }

    /// Validate configuration
    pub fn validate(self) -> Result<Self> {
        let config = &self.config;

        if config.operation == SplitOperation::Split {
            config.policy()?;
        }

        if config.operation == SplitOperation::Merge && config.dry_run {
            return Err(SplitError::Config("--dry-run applies to --split only".into()));
        }

        Ok(self)
    }

    pub fn build(self) -> SplitConfig {
        self.config
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
