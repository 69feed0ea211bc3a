//! ak42 CLI - Export transformer checkpoints to the ak42 binary format.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod checkpoint;
mod common;
mod config;
mod export;
mod inspect;

#[derive(Parser)]
#[command(name = "ak42")]
#[command(about = "CLI tool for exporting model checkpoints to ak42 files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a SafeTensors checkpoint to an ak42 file
    Export {
        /// Path to the checkpoint file or shard folder
        #[arg(short, long)]
        model: Option<String>,

        /// Path to params.json (default: next to the checkpoint)
        #[arg(short, long)]
        params: Option<String>,

        /// Path to export config JSON (optional)
        #[arg(short, long)]
        config: Option<String>,

        /// Output path (default: model.bin, or export_config.json with --generate-config)
        #[arg(short, long)]
        output: Option<String>,

        /// Format version: 1 (fp32), 2 (int8), 3 (int4). Overrides the config
        #[arg(long)]
        version: Option<i32>,

        /// Quantization group size. Overrides the config
        #[arg(short, long)]
        group_size: Option<usize>,

        /// Write the per-tensor error report as JSON
        #[arg(long)]
        report: Option<String>,

        /// Generate a template config instead of exporting
        #[arg(long)]
        generate_config: bool,
    },

    /// Print the header of an ak42 file
    Inspect {
        /// Path to the ak42 file
        #[arg(short, long)]
        model: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            model,
            params,
            config,
            output,
            version,
            group_size,
            report,
            generate_config,
        } => {
            if generate_config {
                export::generate_config_template(output.as_deref())?;
            } else {
                let model = model.ok_or_else(|| {
                    anyhow::anyhow!("--model is required unless --generate-config is given")
                })?;
                export::run(&export::ExportArgs {
                    model: &model,
                    params: params.as_deref(),
                    config: config.as_deref(),
                    output: output.as_deref(),
                    version,
                    group_size,
                    report: report.as_deref(),
                })?;
            }
        }
        Commands::Inspect { model } => inspect::run(&model)?,
    }

    Ok(())
}
