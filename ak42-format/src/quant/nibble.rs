//! Nibble packing for the Q4_0 codec.
//!
//! Element `2k` goes to the low nibble of byte `k`, element `2k + 1` to the
//! high nibble. Each nibble is the 4-bit two's complement of the value
//! (`v & 0x0F`). An odd trailing element gets a zero high nibble.

/// Packed byte count for `count` values.
#[inline]
pub fn packed_len(count: usize) -> usize {
    count.div_ceil(2)
}

/// Pack values in `[-8, 7]` two per byte.
pub fn pack_nibbles(values: &[i8]) -> Vec<u8> {
    values
        .chunks(2)
        .map(|pair| {
            let lo = to_nibble(pair[0]);
            let hi = pair.get(1).copied().map(to_nibble).unwrap_or(0);
            lo | (hi << 4)
        })
        .collect()
}

/// Unpack `count` values from nibble-packed bytes.
pub fn unpack_nibbles(bytes: &[u8], count: usize) -> Vec<i8> {
    bytes
        .iter()
        .flat_map(|&b| [sign_extend(b & 0x0F), sign_extend(b >> 4)])
        .take(count)
        .collect()
}

#[inline(always)]
fn to_nibble(v: i8) -> u8 {
    debug_assert!((-8..=7).contains(&v), "value {v} does not fit in 4 bits");
    (v as u8) & 0x0F
}

#[inline(always)]
fn sign_extend(nibble: u8) -> i8 {
    ((nibble << 4) as i8) >> 4
}
