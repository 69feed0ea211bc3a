//! Quantization codec and result types.

use serde::{Deserialize, Serialize};

/// Symmetric grouped codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum QuantCodec {
    /// int8 in [-127, 127], one byte per value
    Q8_0,
    /// int4 in [-7, 7], two values per byte
    Q4_0,
}

impl QuantCodec {
    /// Largest representable magnitude.
    pub fn q_max(&self) -> i8 {
        match self {
            Self::Q8_0 => 127,
            Self::Q4_0 => 7,
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            Self::Q8_0 => 8,
            Self::Q4_0 => 4,
        }
    }

    /// Bytes taken by `numel` quantized values, scales excluded.
    pub fn values_len(&self, numel: usize) -> usize {
        match self {
            Self::Q8_0 => numel,
            Self::Q4_0 => numel.div_ceil(2),
        }
    }

    /// Bytes taken by a tensor of `numel` values: values then fp32 scales.
    pub fn encoded_len(&self, numel: usize, group_size: usize) -> usize {
        self.values_len(numel) + (numel / group_size) * 4
    }
}

impl std::fmt::Display for QuantCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Q8_0 => f.write_str("Q8_0"),
            Self::Q4_0 => f.write_str("Q4_0"),
        }
    }
}

/// Quantized form of one tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    pub codec: QuantCodec,
    pub group_size: usize,
    /// One value per original element, in `[-q_max, q_max]`.
    pub values: Vec<i8>,
    /// One scale per group.
    pub scales: Vec<f32>,
    /// Largest `|q * scale - w|` over all groups.
    pub max_error: f32,
}

impl QuantizedTensor {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reconstruct `q * scale` per element.
    pub fn dequantize(&self) -> Vec<f32> {
        dequantize(&self.values, &self.scales, self.group_size)
    }
}

/// Reconstruct `q * scale` per element from grouped values.
pub fn dequantize(values: &[i8], scales: &[f32], group_size: usize) -> Vec<f32> {
    values
        .chunks(group_size)
        .zip(scales)
        .flat_map(|(group, &scale)| group.iter().map(move |&q| q as f32 * scale))
        .collect()
}
