//! Error types for export and read operations.

use thiserror::Error;

/// Result type alias for ak42 operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Export and read error types.
///
/// Configuration errors are raised before any byte reaches the sink.
/// Precondition errors describe a model that cannot be laid out in the
/// format. Everything is fatal to the current call.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested format version is not 1, 2 or 3.
    #[error("unknown version {0}: expected 1 (fp32), 2 (Q8_0) or 3 (Q4_0)")]
    UnknownVersion(i32),

    /// Group size is zero or not a power of two.
    #[error("invalid group size {0}: must be a power of two")]
    InvalidGroupSize(usize),

    /// Tensor element count is not a multiple of the group size.
    #[error("weight {name} has numel {numel}, not a multiple of group_size {group_size}")]
    GroupMisaligned {
        name: String,
        numel: usize,
        group_size: usize,
    },

    /// Tensor shape differs from what the reader will assume.
    #[error("tensor {name}: expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Model has no transformer layers, so hidden_dim cannot be derived.
    #[error("model has no layers")]
    MissingLayers,

    /// Number of layer weight sets differs from n_layers.
    #[error("expected {expected} layers, got {actual}")]
    LayerCountMismatch { expected: usize, actual: usize },

    /// A header integer does not fit in int32.
    #[error("{field} = {value} does not fit in a 32-bit header field")]
    FieldOverflow { field: &'static str, value: usize },

    /// Buffer length does not match the declared shape.
    #[error("buffer of {len} elements does not match shape {shape:?}")]
    BufferLength { len: usize, shape: Vec<usize> },

    /// File does not start with the ak42 magic.
    #[error("bad magic 0x{0:08x}: not an ak42 file")]
    BadMagic(u32),

    /// Header fields are inconsistent.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// I/O error from the underlying sink or source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors raised before any I/O takes place.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::UnknownVersion(_) | Error::InvalidGroupSize(_))
    }
}
