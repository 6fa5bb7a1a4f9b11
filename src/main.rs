//! # Convo Harness CLI (`cvh`)
//!
//! The `cvh` binary drives the reconstruction pipeline from the command
//! line: it reads one raw JSON export, runs the adapter and grouping
//! pipeline for the declared source kind, and writes the resulting
//! conversation blocks as JSON to stdout. The ingest summary goes to
//! stderr so stdout stays pipeable.
//!
//! ## Usage
//!
//! ```bash
//! cvh ingest --source forum --input thread.json > blocks.json
//! cvh ingest --source facebook --input scrape.json --pretty
//! cvh ingest --source whatsapp --input wati_events.json --config cvh.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use convo_harness::config::{load_config, PipelineConfig};
use convo_harness::models::SourceKind;
use convo_harness::pipeline::run_pipeline;

/// Convo Harness — a conversation reconstruction pipeline for
/// customer-facing chat and forum exports.
#[derive(Parser)]
#[command(
    name = "cvh",
    about = "Convo Harness — reconstruct conversation blocks from chat and forum exports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over one raw export file.
    ///
    /// Reads the file as the declared source's JSON shape, reconstructs
    /// conversation blocks, and prints them as a JSON array.
    Ingest {
        /// Source kind: forum, facebook, or whatsapp.
        #[arg(long)]
        source: String,

        /// Path to the raw JSON export.
        #[arg(long)]
        input: PathBuf,

        /// Pretty-print the output JSON.
        #[arg(long)]
        pretty: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Ingest {
            source,
            input,
            pretty,
        } => {
            let kind = SourceKind::from_str(&source)?;
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read input file: {}", input.display()))?;
            let raw: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("Input file is not valid JSON: {}", input.display()))?;

            let output = run_pipeline(&config, kind, &raw)?;

            let rendered = if pretty {
                serde_json::to_string_pretty(&output.blocks)?
            } else {
                serde_json::to_string(&output.blocks)?
            };
            println!("{}", rendered);

            let stats = &output.stats;
            eprintln!("ingest {}", kind.as_str());
            eprintln!("  records seen: {}", stats.records_seen);
            eprintln!("  posts kept: {}", stats.posts_kept);
            eprintln!("  blocks: {}", output.blocks.len());
            eprintln!("  skipped malformed: {}", stats.skipped_malformed);
            eprintln!("  dropped empty: {}", stats.dropped_empty);
            eprintln!("  duplicate ids: {}", stats.duplicate_ids);
            eprintln!("  missing timestamps: {}", stats.missing_timestamps);
            if stats.records_seen > 0 && output.blocks.is_empty() {
                eprintln!("  warning: non-empty input produced zero blocks");
            }
            eprintln!("ok");
        }
    }

    Ok(())
}
