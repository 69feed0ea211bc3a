//! Raw tensor payload encoding.
//!
//! Tensors are written back to back with no length prefix; the reader
//! derives every size from the header. All values are little-endian.

use std::io::{self, Read, Write};

use crate::quant::{QuantCodec, QuantizedTensor, pack_nibbles, packed_len, unpack_nibbles};

/// Write fp32 values, returning the byte count.
pub fn write_f32<W: Write>(w: &mut W, values: &[f32]) -> io::Result<u64> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    w.write_all(&buf)?;
    Ok(buf.len() as u64)
}

/// Write int8 values, one byte each.
pub fn write_i8<W: Write>(w: &mut W, values: &[i8]) -> io::Result<u64> {
    let buf: Vec<u8> = values.iter().map(|&v| v as u8).collect();
    w.write_all(&buf)?;
    Ok(buf.len() as u64)
}

/// Write int4 values packed two per byte.
pub fn write_i4<W: Write>(w: &mut W, values: &[i8]) -> io::Result<u64> {
    let buf = pack_nibbles(values);
    w.write_all(&buf)?;
    Ok(buf.len() as u64)
}

/// Write a quantized tensor: its values in codec encoding, then its scales.
pub fn write_quantized<W: Write>(w: &mut W, q: &QuantizedTensor) -> io::Result<u64> {
    let values = match q.codec {
        QuantCodec::Q8_0 => write_i8(w, &q.values)?,
        QuantCodec::Q4_0 => write_i4(w, &q.values)?,
    };
    let scales = write_f32(w, &q.scales)?;
    Ok(values + scales)
}

/// Read exactly `len` bytes without sizing the buffer up front, so a
/// header that promises more than the input holds fails with EOF.
fn read_bytes<R: Read>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, got {}", len, buf.len()),
        ));
    }
    Ok(buf)
}

/// Read `count` fp32 values.
pub fn read_f32<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<f32>> {
    let len = count.checked_mul(4).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{count} fp32 values overflow the address space"),
        )
    })?;
    let buf = read_bytes(r, len)?;
    Ok(buf
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Read `count` int8 values.
pub fn read_i8<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<i8>> {
    let buf = read_bytes(r, count)?;
    Ok(buf.into_iter().map(|b| b as i8).collect())
}

/// Read `count` nibble-packed int4 values.
pub fn read_i4<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<i8>> {
    let buf = read_bytes(r, packed_len(count))?;
    Ok(unpack_nibbles(&buf, count))
}

/// Read a quantized tensor of `numel` values and return its values and scales.
pub fn read_quantized<R: Read>(
    r: &mut R,
    codec: QuantCodec,
    numel: usize,
    group_size: usize,
) -> io::Result<(Vec<i8>, Vec<f32>)> {
    let values = match codec {
        QuantCodec::Q8_0 => read_i8(r, numel)?,
        QuantCodec::Q4_0 => read_i4(r, numel)?,
    };
    let scales = read_f32(r, numel / group_size)?;
    Ok((values, scales))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::quantize;

    #[test]
    fn test_f32_little_endian() {
        let mut out = Vec::new();
        let n = write_f32(&mut out, &[1.0, -2.5]).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&out[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&out[4..8], &(-2.5f32).to_le_bytes());
        assert_eq!(read_f32(&mut out.as_slice(), 2).unwrap(), vec![1.0, -2.5]);
    }

    #[test]
    fn test_i8_two_complement() {
        let mut out = Vec::new();
        write_i8(&mut out, &[-127, -1, 0, 127]).unwrap();
        assert_eq!(out, vec![0x81, 0xFF, 0x00, 0x7F]);
    }

    #[test]
    fn test_quantized_values_then_scales() {
        let data: Vec<f32> = (0..8).map(|i| i as f32 - 4.0).collect();

        let q8 = quantize(&data, 4, QuantCodec::Q8_0).unwrap();
        let mut out = Vec::new();
        let n = write_quantized(&mut out, &q8).unwrap();
        assert_eq!(n as usize, out.len());
        assert_eq!(out.len(), 8 + 2 * 4);
        assert_eq!(out[0], q8.values[0] as u8);
        assert_eq!(&out[8..12], &q8.scales[0].to_le_bytes());

        let q4 = quantize(&data, 4, QuantCodec::Q4_0).unwrap();
        let mut out = Vec::new();
        write_quantized(&mut out, &q4).unwrap();
        assert_eq!(out.len(), 4 + 2 * 4);
        assert_eq!(&out[4..8], &q4.scales[0].to_le_bytes());

        let (values, scales) = read_quantized(&mut out.as_slice(), QuantCodec::Q4_0, 8, 4).unwrap();
        assert_eq!(values, q4.values);
        assert_eq!(scales, q4.scales);
    }

    #[test]
    fn test_read_short_input() {
        let bytes = [0u8; 6];
        let err = read_f32(&mut &bytes[..], 2).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_huge_count_fails_without_allocating() {
        // A count far beyond the input must not be allocated up front
        let bytes = [0u8; 16];
        let err = read_f32(&mut &bytes[..], 1 << 40).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
        let err = read_i8(&mut &bytes[..], usize::MAX).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
        let err = read_i4(&mut &bytes[..], usize::MAX).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_overflowing_count() {
        let err = read_f32(&mut &[][..], usize::MAX).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
