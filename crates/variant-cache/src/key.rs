//! Variant identity derivation
//!
//! An identity is `hash(source_id) + width*C + height*C*C + hash(format)` in
//! wrapping `u64` arithmetic, where the string hashes are the first eight
//! bytes of a SHA-256 digest. Height carries the extra factor of `C` so a
//! rotated variant (`w`/`h` swapped) of the same source gets its own
//! identity. The result is stable across runs and platforms, but it is not
//! collision free: distinct `(source_id, width, height, format)` tuples can
//! still land on the same value, and a colliding put is treated as already
//! cached.

use crate::types::ImageFormat;
use sha2::{Digest, Sha256};

/// Odd multiplier applied to the dimensions
pub const IDENTITY_MULTIPLIER: u64 = 31;

fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Derive the identity of one variant of `source_id`.
pub fn identity(source_id: &str, width: u32, height: u32, format: ImageFormat) -> u64 {
    let width_term = u64::from(width).wrapping_mul(IDENTITY_MULTIPLIER);
    let height_term = u64::from(height)
        .wrapping_mul(IDENTITY_MULTIPLIER)
        .wrapping_mul(IDENTITY_MULTIPLIER);

    stable_hash(source_id)
        .wrapping_add(width_term)
        .wrapping_add(height_term)
        .wrapping_add(stable_hash(format.as_str()))
}
