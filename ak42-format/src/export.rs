//! Export orchestration: model weights to an ak42 file.
//!
//! All validation (version, group size, shapes, group alignment) happens
//! before the first byte is written. File exports go through a temporary
//! file in the destination directory that replaces the target only once
//! the payload is complete, so a failed export leaves no partial file.

use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::formats::{ExportHeader, FormatVersion, HEADER_SIZE};
use crate::model::ModelWeights;
use crate::ordering::{NamedTensor, WeightOrdering};
use crate::quant::{self, QuantCodec};
use crate::tensor_io;

/// Per-tensor quantization outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorReport {
    pub name: String,
    pub shape: Vec<usize>,
    pub codec: QuantCodec,
    pub max_error: f32,
}

/// Outcome of one export. Not persisted in the file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportReport {
    pub header: ExportHeader,
    pub bytes_written: u64,
    /// One entry per quantized tensor, in payload order. Empty for v1.
    pub tensors: Vec<TensorReport>,
}

impl ExportReport {
    /// Tensor with the largest quantization error.
    pub fn worst(&self) -> Option<&TensorReport> {
        self.tensors
            .iter()
            .max_by(|a, b| a.max_error.total_cmp(&b.max_error))
    }

    /// Largest group error across all quantized weights.
    pub fn max_error(&self) -> Option<f32> {
        self.worst().map(|t| t.max_error)
    }
}

/// Receives progress notifications during an export.
pub trait ExportObserver {
    /// The requested group size did not divide `dim` and was reduced.
    fn group_size_backoff(&mut self, _requested: usize, _effective: usize) {}

    /// Tensor `index` (1-based) of `total` was quantized and written.
    fn tensor_quantized(&mut self, _index: usize, _total: usize, _report: &TensorReport) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ExportObserver for NoopObserver {}

/// How heavy weights are encoded for a given version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Fp32,
    Grouped { codec: QuantCodec, group_size: usize },
}

/// Validated export, ready to be written.
struct ExportPlan<'a> {
    header: ExportHeader,
    ordering: WeightOrdering<'a>,
    encoding: Encoding,
}

impl<'a> ExportPlan<'a> {
    fn new(
        model: &'a ModelWeights,
        version: i32,
        group_size: usize,
        observer: &mut dyn ExportObserver,
    ) -> Result<Self> {
        let version = FormatVersion::try_from(version)?;
        let codec = match version {
            FormatVersion::V1 => None,
            FormatVersion::V2 => Some(QuantCodec::Q8_0),
            FormatVersion::V3 => Some(QuantCodec::Q4_0),
        };
        if codec.is_some() {
            quant::validate_group_size(group_size)?;
        }

        let params = model.params()?;
        model.validate(&params)?;
        let ordering = WeightOrdering::new(model)?;

        let encoding = match codec {
            None => Encoding::Fp32,
            Some(codec) => {
                let effective = quant::effective_group_size(params.dim, group_size)?;
                if effective != group_size {
                    warn!(
                        requested = group_size,
                        effective,
                        dim = params.dim,
                        "BACKOFF: reducing group size to fit dim"
                    );
                    observer.group_size_backoff(group_size, effective);
                }
                ordering.check_group_alignment(effective)?;
                Encoding::Grouped {
                    codec,
                    group_size: effective,
                }
            }
        };

        let header = ExportHeader {
            version,
            params,
            shared_classifier: ordering.shared_classifier,
            group_size: match encoding {
                Encoding::Fp32 => None,
                Encoding::Grouped { group_size, .. } => Some(group_size),
            },
        };

        Ok(Self {
            header,
            ordering,
            encoding,
        })
    }

    fn write_to<W: Write>(
        self,
        w: &mut W,
        observer: &mut dyn ExportObserver,
    ) -> Result<ExportReport> {
        self.header.write_to(w)?;
        let mut bytes_written = HEADER_SIZE as u64;

        for norm in &self.ordering.norms {
            bytes_written += tensor_io::write_f32(w, norm.tensor.data())?;
        }

        let total = self.ordering.weights.len();
        let mut tensors = Vec::new();
        for (i, weight) in self.ordering.weights.iter().enumerate() {
            match self.encoding {
                Encoding::Fp32 => {
                    bytes_written += tensor_io::write_f32(w, weight.tensor.data())?;
                }
                Encoding::Grouped { codec, group_size } => {
                    let (n, report) = write_grouped(w, weight, codec, group_size)?;
                    bytes_written += n;
                    debug!(
                        tensor = %report.name,
                        max_error = report.max_error,
                        "{}/{} quantized to {}",
                        i + 1,
                        total,
                        codec
                    );
                    observer.tensor_quantized(i + 1, total, &report);
                    tensors.push(report);
                }
            }
        }
        w.flush()?;

        Ok(ExportReport {
            header: self.header,
            bytes_written,
            tensors,
        })
    }
}

/// Quantize one weight and write values then scales.
fn write_grouped<W: Write>(
    w: &mut W,
    weight: &NamedTensor<'_>,
    codec: QuantCodec,
    group_size: usize,
) -> Result<(u64, TensorReport)> {
    let q = quant::quantize(weight.tensor.data(), group_size, codec)?;
    let n = tensor_io::write_quantized(w, &q)?;
    let report = TensorReport {
        name: weight.name(),
        shape: weight.tensor.shape().to_vec(),
        codec,
        max_error: q.max_error,
    };
    Ok((n, report))
}

/// Export `model` to any byte sink.
///
/// `version` is 1 (fp32), 2 (Q8_0) or 3 (Q4_0). `group_size` is ignored for
/// version 1 and reduced by halving until it divides `dim` otherwise.
pub fn export_to_writer<W: Write>(
    model: &ModelWeights,
    writer: &mut W,
    version: i32,
    group_size: usize,
    observer: &mut dyn ExportObserver,
) -> Result<ExportReport> {
    let plan = ExportPlan::new(model, version, group_size, observer)?;
    plan.write_to(writer, observer)
}

/// Export `model` to `path`, replacing it atomically on success.
pub fn export(
    model: &ModelWeights,
    path: impl AsRef<Path>,
    version: i32,
    group_size: usize,
) -> Result<ExportReport> {
    export_with_observer(model, path, version, group_size, &mut NoopObserver)
}

/// [`export`] with progress notifications.
pub fn export_with_observer(
    model: &ModelWeights,
    path: impl AsRef<Path>,
    version: i32,
    group_size: usize,
    observer: &mut dyn ExportObserver,
) -> Result<ExportReport> {
    let path = path.as_ref();
    let plan = ExportPlan::new(model, version, group_size, observer)?;

    info!(
        path = %path.display(),
        version,
        tensors = plan.ordering.norms.len() + plan.ordering.weights.len(),
        "exporting model"
    );

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut writer = BufWriter::new(NamedTempFile::new_in(dir)?);
    let report = plan.write_to(&mut writer, observer)?;

    let tmp = writer.into_inner().map_err(|e| e.into_error())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    info!(
        path = %path.display(),
        bytes = report.bytes_written,
        max_error = report.max_error(),
        "wrote model"
    );
    Ok(report)
}
