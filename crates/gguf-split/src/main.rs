//! GGUF split/merge tool
//!
//! # Usage
//!
//! ```bash
//! # At most 64 tensors per shard
//! gguf-split --split --split-max-tensors 64 model.gguf out/model
//!
//! # At most 4 GiB of tensor data per shard, metadata in a shard of its own
//! gguf-split --split-max-size 4G --no-tensor-in-metadata model.gguf out/model
//!
//! # Show the shard plan without writing anything
//! gguf-split --dry-run --split-max-size 500M model.gguf out/model
//!
//! # Merge a shard set back into one file
//! gguf-split --merge out/model-00001-of-00003.gguf merged.gguf
//! ```
//!
//! Settings are layered: defaults, then `--config FILE`, then
//! `GGUF_SPLIT_*` environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use gguf_split::exit::{EXIT_GENERIC_FAIL, EXIT_SUCCESS};
use gguf_split::{
    ConfigBuilder, SplitConfig, SplitError, SplitOperation, SplitOptions, Splitter, merge,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "gguf-split")]
#[command(about = "Split a GGUF file into shards or merge shards back into one file")]
#[command(version)]
struct Args {
    /// Split INPUT into shards named OUTPUT-NNNNN-of-MMMMM.gguf (default)
    #[arg(long, conflicts_with = "merge")]
    split: bool,

    /// Merge the shard set starting at INPUT into OUTPUT
    #[arg(long)]
    merge: bool,

    /// Maximum number of tensors per shard
    #[arg(long, value_name = "N")]
    split_max_tensors: Option<usize>,

    /// Maximum tensor bytes per shard, e.g. 500M or 4G
    #[arg(long, value_name = "N(M|G)")]
    split_max_size: Option<String>,

    /// Put only metadata in the first shard
    #[arg(long)]
    no_tensor_in_metadata: bool,

    /// Print the shard plan as JSON and exit without writing
    #[arg(long)]
    dry_run: bool,

    /// TOML configuration file
    #[arg(long, value_name = "PATH", env = "GGUF_SPLIT_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    /// Source file, or the first shard when merging
    input: PathBuf,

    /// Output prefix when splitting, output file when merging
    output: String,
}

fn main() {
    let args = Args::parse();

    // RUST_LOG wins; -v only moves the default
    let level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();

    let code = match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            error!("{e:#}");
            e.downcast_ref::<SplitError>().map_or(EXIT_GENERIC_FAIL, SplitError::exit_code)
        }
    };
    std::process::exit(code);
}

fn resolve_config(args: &Args) -> Result<SplitConfig> {
    let mut builder = ConfigBuilder::new();
    if let Some(path) = &args.config {
        builder = builder.from_file(path)?;
    }
    builder = builder.from_env()?;

    if args.merge {
        builder = builder.with_operation(SplitOperation::Merge);
    } else if args.split {
        builder = builder.with_operation(SplitOperation::Split);
    }
    if let Some(n) = args.split_max_tensors {
        builder = builder.with_max_tensors(n);
    }
    if let Some(size) = &args.split_max_size {
        builder = builder.with_max_size(size.clone());
    }
    if args.no_tensor_in_metadata {
        builder = builder.with_no_tensor_in_metadata(true);
    }
    if args.dry_run {
        builder = builder.with_dry_run(true);
    }

    Ok(builder.validate()?.build())
}

fn run(args: &Args) -> Result<()> {
    let config = resolve_config(args)?;
    info!(operation = ?config.operation, input = %args.input.display(), output = %args.output, "starting");

    match config.operation {
        SplitOperation::Split => {
            let splitter = Splitter::open(&args.input, SplitOptions::from_config(&config)?)?;
            if config.dry_run {
                let plan = splitter.plan(&args.output)?;
                let json = serde_json::to_string_pretty(&plan).context("serializing shard plan")?;
                println!("{json}");
                return Ok(());
            }
            let summary = splitter.run(&args.output)?;
            println!(
                "{} shards written with a total of {} tensors",
                summary.n_shards(),
                summary.n_tensors
            );
        }
        SplitOperation::Merge => {
            let summary = merge(&args.input, Path::new(&args.output))?;
            println!(
                "{} merged from {} shards with a total of {} tensors",
                summary.output.display(),
                summary.inputs.len(),
                summary.n_tensors
            );
        }
    }
    Ok(())
}
