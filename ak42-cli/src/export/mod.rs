//! Export command - safetensors checkpoint to ak42 binary.

use ak42_format::export_with_observer;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::checkpoint::{build_model, load_tensors};
use crate::common::progress::ConsoleProgress;
use crate::common::{load_config, load_json};
use crate::config::export_config::{ExportConfig, ParamsFile};

pub const DEFAULT_CONFIG_PATH: &str = "export_config.json";
pub const DEFAULT_OUTPUT_PATH: &str = "model.bin";

/// Command-line inputs of `ak42 export`.
#[derive(Debug, Default)]
pub struct ExportArgs<'a> {
    pub model: &'a str,
    pub params: Option<&'a str>,
    pub config: Option<&'a str>,
    pub output: Option<&'a str>,
    pub version: Option<i32>,
    pub group_size: Option<usize>,
    pub report: Option<&'a str>,
}

/// Write a template config with default values.
pub fn generate_config_template(output: Option<&str>) -> Result<()> {
    let path = output.unwrap_or(DEFAULT_CONFIG_PATH);
    let config = ExportConfig::default();
    fs::write(path, serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("Failed to write: {}", path))?;
    println!("Generated {}", path);
    Ok(())
}

/// `params.json` beside the checkpoint file, or inside the checkpoint directory.
pub fn default_params_path(model: &Path) -> PathBuf {
    if model.is_dir() {
        model.join("params.json")
    } else {
        model
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("params.json")
    }
}

pub fn run(args: &ExportArgs<'_>) -> Result<()> {
    let config: ExportConfig =
        load_config::<ExportConfig>(args.config)?.with_overrides(args.version, args.group_size);

    let model_path = Path::new(args.model);
    let params_path = args
        .params
        .map(PathBuf::from)
        .unwrap_or_else(|| default_params_path(model_path));
    let params: ParamsFile = load_json(&params_path)?;

    let tensors = load_tensors(model_path, &config.strip_prefixes)?;
    println!("Loaded {} tensors from {}", tensors.len(), model_path.display());

    let weights = build_model(tensors, &params, config.max_seq_len)?;
    let output = args.output.unwrap_or(DEFAULT_OUTPUT_PATH);
    println!(
        "Exporting {} layers (dim {}, vocab {}) as version {}",
        weights.layers.len(),
        weights.args.dim,
        weights.args.vocab_size,
        config.version
    );

    let mut progress = ConsoleProgress::new();
    let report = export_with_observer(
        &weights,
        output,
        config.version,
        config.group_size,
        &mut progress,
    )
    .with_context(|| format!("Failed to export to {}", output))?;

    if let Some(line) = progress.summary(report.header.group_size) {
        println!("{}", line);
    }
    if let Some(worst) = report.worst() {
        println!(
            "Max quantization error: {:.5} ({})",
            worst.max_error, worst.name
        );
    }
    if report.header.shared_classifier {
        println!("Classifier shared with token embedding");
    }
    println!("Wrote {} bytes to {}", report.bytes_written, output);

    if let Some(path) = args.report {
        fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write report: {}", path))?;
        println!("Report written to {}", path);
    }

    Ok(())
}
