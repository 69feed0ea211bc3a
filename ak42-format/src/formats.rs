//! Binary layout of ak42 model files.
//!
//! Defines the fixed 256-byte header and the format version tags.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ModelParams;

/// ak42 magic: ASCII "ak42" read as a big-endian u32, stored little-endian.
pub const AK42_MAGIC: u32 = 0x616B_3432;

/// Header size in bytes for every version; tensor payload starts here.
pub const HEADER_SIZE: usize = 256;

/// Offset of the shared-classifier flag.
pub const SHARED_CLASSIFIER_OFFSET: usize = 36;

/// Offset of the group-size field (versions 2 and 3 only).
pub const GROUP_SIZE_OFFSET: usize = 37;

/// Default quantization group size.
pub const DEFAULT_GROUP_SIZE: usize = 64;

/// Format version written to the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatVersion {
    /// Everything as fp32.
    V1,
    /// Weights as int8 Q8_0 in groups, norms fp32.
    V2,
    /// Weights as packed int4 Q4_0 in groups, norms fp32.
    V3,
}

impl FormatVersion {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Whether the header carries a group size.
    pub fn is_quantized(self) -> bool {
        !matches!(self, Self::V1)
    }
}

impl TryFrom<i32> for FormatVersion {
    type Error = Error;

    fn try_from(v: i32) -> Result<Self> {
        match v {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            other => Err(Error::UnknownVersion(other)),
        }
    }
}

/// ak42 file header.
///
/// Layout (all integers little-endian):
/// - 0: magic u32 (0x616B3432)
/// - 4: version i32
/// - 8..36: dim, hidden_dim, n_layers, n_heads, n_kv_heads, vocab_size,
///   max_seq_len as i32
/// - 36: shared classifier flag u8
/// - 37: group_size i32 (v2/v3 only)
/// - remainder zero-filled to 256 bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportHeader {
    pub version: FormatVersion,
    pub params: ModelParams,
    pub shared_classifier: bool,
    /// Present exactly when `version.is_quantized()`.
    pub group_size: Option<usize>,
}

impl ExportHeader {
    /// Encode the header into its fixed 256-byte form.
    pub fn to_bytes(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&AK42_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.as_i32().to_le_bytes());

        for (i, (field, value)) in self.params.fields().into_iter().enumerate() {
            let off = 8 + i * 4;
            buf[off..off + 4].copy_from_slice(&to_i32(field, value)?.to_le_bytes());
        }

        buf[SHARED_CLASSIFIER_OFFSET] = u8::from(self.shared_classifier);

        if self.version.is_quantized() {
            let gs = self.group_size.ok_or_else(|| {
                Error::InvalidHeader(format!(
                    "version {} requires a group size",
                    self.version.as_i32()
                ))
            })?;
            let off = GROUP_SIZE_OFFSET;
            buf[off..off + 4].copy_from_slice(&to_i32("group_size", gs)?.to_le_bytes());
        }

        Ok(buf)
    }

    /// Write header to writer
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    /// Decode a header from its 256-byte form.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let magic = u32::from_le_bytes(word(buf, 0));
        if magic != AK42_MAGIC {
            return Err(Error::BadMagic(magic));
        }

        let version = FormatVersion::try_from(i32::from_le_bytes(word(buf, 4)))?;

        let mut ints = [0usize; 7];
        for (i, slot) in ints.iter_mut().enumerate() {
            *slot = from_i32(i32::from_le_bytes(word(buf, 8 + i * 4)))?;
        }
        let [dim, hidden_dim, n_layers, n_heads, n_kv_heads, vocab_size, max_seq_len] = ints;

        let shared_classifier = match buf[SHARED_CLASSIFIER_OFFSET] {
            0 => false,
            1 => true,
            other => {
                return Err(Error::InvalidHeader(format!(
                    "shared classifier flag must be 0 or 1, got {other}"
                )));
            }
        };

        let group_size = if version.is_quantized() {
            let gs = from_i32(i32::from_le_bytes(word(buf, GROUP_SIZE_OFFSET)))?;
            if gs == 0 {
                return Err(Error::InvalidHeader("group size is zero".to_string()));
            }
            Some(gs)
        } else {
            None
        };

        Ok(Self {
            version,
            params: ModelParams {
                dim,
                hidden_dim,
                n_layers,
                n_heads,
                n_kv_heads,
                vocab_size,
                max_seq_len,
            },
            shared_classifier,
            group_size,
        })
    }

    /// Read header from reader
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        r.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }
}

fn word(buf: &[u8; HEADER_SIZE], off: usize) -> [u8; 4] {
    [buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]
}

fn to_i32(field: &'static str, value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::FieldOverflow { field, value })
}

fn from_i32(value: i32) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::InvalidHeader(format!("negative header field {value}")))
}
