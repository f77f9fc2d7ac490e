//! Strata CLI
//!
//! Command-line tools for strata data directories and segment files.
//!
//! # Commands
//!
//! - `compress` / `uncompress` - Convert between segments and interchange streams
//! - `decompress-speed` - Time a full scan of a segment
//! - `bt-search` - Look a key up through a `.bt`/`.vi`/`.efi` index
//! - `diff` - Compare the words of two segments
//! - `index` - Build missing indices
//! - `merge` - Run the merge loop
//! - `inspect` - List registered file sets
//! - `debug` - Show where a key appears
//! - `rm-all-state-snapshots` / `rm-state-snapshots` - Delete snapshot files

mod commands;

use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use strata_core::DEFAULT_DOMAINS;
use tracing_subscriber::EnvFilter;

/// Strata snapshot tools.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    datadir: Option<PathBuf>,

    /// TxNums per step
    #[arg(global = true, long, default_value_t = 1_562_500)]
    step_size: u64,

    /// Comma-separated domain names
    #[arg(global = true, long, value_delimiter = ',')]
    domains: Vec<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a segment from an interchange stream on stdin
    Compress {
        /// Output segment file
        file: PathBuf,

        /// Worker threads
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Minimum pattern score
        #[arg(long)]
        min_pattern_score: Option<u64>,

        /// Append a word offset table
        #[arg(long)]
        offsets: bool,
    },

    /// Write a segment's words to stdout as an interchange stream
    Uncompress {
        /// Segment file
        file: PathBuf,
    },

    /// Time a full scan of a segment
    DecompressSpeed {
        /// Segment file
        file: PathBuf,
    },

    /// Look a key up through an index file
    BtSearch {
        /// Index file (.bt, .vi or .efi)
        #[arg(long)]
        src: PathBuf,

        /// Key as hex
        #[arg(long)]
        key: String,
    },

    /// Compare the words of two segments
    Diff {
        /// First segment
        #[arg(long)]
        src: PathBuf,

        /// Second segment
        #[arg(long)]
        dst: PathBuf,
    },

    /// Build missing indices, including optional ones
    Index,

    /// Merge file sets until no candidate is left
    Merge,

    /// List registered file sets
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show every source that mentions a key
    Debug {
        /// Domain name
        #[arg(long)]
        domain: String,

        /// Key as hex
        #[arg(long)]
        key: String,
    },

    /// Delete every snapshot file
    RmAllStateSnapshots,

    /// Delete the snapshot files of one step range
    RmStateSnapshots {
        /// Step range, e.g. `0-64`
        #[arg(long)]
        step: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let domains = if cli.domains.is_empty() {
        DEFAULT_DOMAINS.iter().map(|d| d.to_string()).collect()
    } else {
        cli.domains
    };
    let datadir = cli.datadir;
    let open = |what: &str| -> Result<commands::AggregatorArgs, Box<dyn std::error::Error>> {
        let path = datadir
            .clone()
            .ok_or_else(|| format!("Data directory required for {what}"))?;
        Ok(commands::AggregatorArgs {
            path,
            step_size: cli.step_size,
            domains: domains.clone(),
        })
    };

    match cli.command {
        Commands::Compress {
            file,
            workers,
            min_pattern_score,
            offsets,
        } => {
            let stats = commands::segment::compress(
                &file,
                io::stdin().lock(),
                workers,
                min_pattern_score,
                offsets,
            )?;
            println!(
                "{} words, {} patterns, {} -> {} bytes",
                stats.words, stats.patterns, stats.input_bytes, stats.output_bytes
            );
        }
        Commands::Uncompress { file } => {
            commands::segment::uncompress(&file, io::stdout().lock())?;
        }
        Commands::DecompressSpeed { file } => {
            commands::segment::decompress_speed(&file)?;
        }
        Commands::BtSearch { src, key } => {
            commands::bt_search::run(&src, &key)?;
        }
        Commands::Diff { src, dst } => {
            let same = commands::segment::diff(&src, &dst)?;
            if !same {
                return Err("segments differ".into());
            }
        }
        Commands::Index => commands::maintain::index(&open("index")?)?,
        Commands::Merge => commands::maintain::merge(&open("merge")?)?,
        Commands::Inspect { format } => commands::inspect::run(&open("inspect")?, &format)?,
        Commands::Debug { domain, key } => commands::debug::run(&open("debug")?, &domain, &key)?,
        Commands::RmAllStateSnapshots => {
            let args = open("rm-all-state-snapshots")?;
            commands::remove::run(&args.path, None)?;
        }
        Commands::RmStateSnapshots { step } => {
            let args = open("rm-state-snapshots")?;
            commands::remove::run(&args.path, Some(step.parse()?))?;
        }
    }

    Ok(())
}
