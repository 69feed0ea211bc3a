//! Inspect command - print the header of an ak42 file.

use ak42_format::{ExportHeader, read_header};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Human-readable header summary, one field per line.
pub fn describe(header: &ExportHeader, file_len: u64) -> String {
    let mut lines = vec![
        format!("version: {}", header.version.as_i32()),
        format!("file size: {} bytes", file_len),
    ];
    for (name, value) in header.params.fields() {
        lines.push(format!("{}: {}", name, value));
    }
    lines.push(format!("shared_classifier: {}", header.shared_classifier));
    if let Some(gs) = header.group_size {
        lines.push(format!("group_size: {}", gs));
    }
    lines.join("\n")
}

pub fn run(model: &str) -> Result<()> {
    let path = Path::new(model);
    let file = File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
    let file_len = file.metadata()?.len();
    let header = read_header(&mut BufReader::new(file))
        .with_context(|| format!("Not an ak42 file: {}", path.display()))?;

    println!("{}", describe(&header, file_len));
    Ok(())
}
