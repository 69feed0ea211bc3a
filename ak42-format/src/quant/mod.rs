//! Grouped symmetric quantization (Q8_0, Q4_0).
//!
//! Every contiguous run of `group_size` weights shares one fp32 scale with
//! `weight ≈ q * scale`, `q` in `[-q_max, q_max]`. The 4-bit codec is
//! stored two values per byte, see [`pack_nibbles`].

mod group;
mod nibble;
mod types;

pub use group::{effective_group_size, quantize, validate_group_size};
pub use nibble::{pack_nibbles, packed_len, unpack_nibbles};
pub use types::*;
