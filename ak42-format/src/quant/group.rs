//! Group quantizer shared by both codecs.

use rayon::prelude::*;

use super::types::{QuantCodec, QuantizedTensor};
use crate::error::{Error, Result};

/// Reject group sizes that are zero or not a power of two.
pub fn validate_group_size(group_size: usize) -> Result<()> {
    if group_size == 0 || !group_size.is_power_of_two() {
        return Err(Error::InvalidGroupSize(group_size));
    }
    Ok(())
}

/// Halve `requested` until it divides `dim`.
///
/// For a power-of-two request this yields the largest power-of-two divisor
/// of `requested` that also divides `dim`, bottoming out at 1.
pub fn effective_group_size(dim: usize, requested: usize) -> Result<usize> {
    validate_group_size(requested)?;
    let mut group_size = requested;
    while !dim.is_multiple_of(group_size) {
        group_size /= 2;
    }
    Ok(group_size)
}

/// Quantize a flat buffer in groups of `group_size`.
///
/// Groups are independent and processed in parallel; results are gathered
/// in group order so output does not depend on scheduling.
pub fn quantize(data: &[f32], group_size: usize, codec: QuantCodec) -> Result<QuantizedTensor> {
    validate_group_size(group_size)?;
    if !data.len().is_multiple_of(group_size) {
        return Err(Error::GroupMisaligned {
            name: "<buffer>".to_string(),
            numel: data.len(),
            group_size,
        });
    }

    let q_max = codec.q_max();
    let mut values = vec![0i8; data.len()];

    let (scales, errors): (Vec<f32>, Vec<f32>) = values
        .par_chunks_mut(group_size)
        .zip(data.par_chunks(group_size))
        .map(|(out, group)| quantize_group(group, q_max, out))
        .unzip();

    let max_error = errors.into_iter().fold(0.0f32, f32::max);

    Ok(QuantizedTensor {
        codec,
        group_size,
        values,
        scales,
        max_error,
    })
}

/// Quantize one group into `out`, returning `(scale, max_abs_error)`.
///
/// `scale = max|w| / q_max`; values are `round(w / scale)` (half away from
/// zero) clamped to `[-q_max, q_max]`. A zero scale maps every value to 0.
#[inline]
fn quantize_group(group: &[f32], q_max: i8, out: &mut [i8]) -> (f32, f32) {
    let wmax = group.iter().fold(0.0f32, |m, &w| m.max(w.abs()));
    let limit = q_max as f32;
    let scale = wmax / limit;

    if scale == 0.0 {
        out.fill(0);
        // Only nonzero when wmax is subnormal and the scale underflowed.
        return (0.0, wmax);
    }

    let mut err = 0.0f32;
    for (q, &w) in out.iter_mut().zip(group) {
        let v = (w / scale).round().clamp(-limit, limit) as i8;
        *q = v;
        err = err.max((v as f32 * scale - w).abs());
    }
    (scale, err)
}
