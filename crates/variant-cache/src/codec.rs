//! Codec seam
//!
//! The engine does not know how pixels become bytes; it calls an
//! [`Encoder`] on a background worker and stores whatever comes back.

use crate::error::{CacheError, Result};
use crate::types::ImageFormat;

pub trait Encoder: Send + Sync {
    fn encode(&self, pixels: &[u8], format: ImageFormat, quality: u8) -> Result<Vec<u8>>;
}

/// Stores the given bytes unchanged. Used when callers hand in data that
/// is already encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughEncoder;

impl Encoder for PassthroughEncoder {
    fn encode(&self, pixels: &[u8], _format: ImageFormat, _quality: u8) -> Result<Vec<u8>> {
        if pixels.is_empty() {
            return Err(CacheError::Encode("no image data".to_string()));
        }
        Ok(pixels.to_vec())
    }
}
