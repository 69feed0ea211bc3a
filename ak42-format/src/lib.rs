//! ak42 Format - Compact binary export of transformer weights.
//!
//! Writes a model as a fixed 256-byte header followed by raw tensor data in
//! a position-indexed order, readable by a minimal runtime without a
//! tensor library.
//!
//! # Versions
//! - `1`: every tensor as fp32
//! - `2`: heavy weights as int8 (Q8_0) with one fp32 scale per group,
//!   norm weights fp32
//! - `3`: heavy weights as int4 (Q4_0), two values per byte, with one fp32
//!   scale per group, norm weights fp32
//!
//! # Usage
//! ```ignore
//! use ak42_format::{export, ModelWeights};
//!
//! let model: ModelWeights = load_somehow()?;
//! let report = export(&model, "model.bin", 2, 64)?;
//! println!("max quantization error: {:?}", report.max_error());
//! ```

pub mod error;
pub mod export;
pub mod formats;
pub mod model;
pub mod ordering;
pub mod quant;
pub mod reader;
pub mod tensor_io;

// Re-exports
pub use error::{Error, Result};
pub use export::{
    ExportObserver, ExportReport, NoopObserver, TensorReport, export, export_to_writer,
    export_with_observer,
};
pub use formats::{AK42_MAGIC, DEFAULT_GROUP_SIZE, ExportHeader, FormatVersion, HEADER_SIZE};
pub use model::{LayerWeights, ModelArgs, ModelParams, ModelWeights, Tensor, TensorRole};
pub use ordering::{Layout, NamedTensor, TensorSlot, WeightOrdering};
pub use quant::{QuantCodec, QuantizedTensor};
pub use reader::{read_header, read_model, read_model_file};
