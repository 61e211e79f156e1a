//! Approximate variant matching
//!
//! A request names a target size where either side may be `0` for
//! "unspecified". A side that is given must equal one of the entry's
//! dimensions, so a rotated request still matches, but when both sides are
//! given the orientation has to agree with the entry.

use crate::types::{CacheEntry, ImageFormat};

/// Whether `entry` satisfies a `(target_x, target_y, format)` request
pub fn is_match(entry: &CacheEntry, target_x: u32, target_y: u32, format: ImageFormat) -> bool {
    if target_x == 0 && target_y == 0 {
        return false;
    }
    if target_x != 0 && target_y != 0 && (target_x >= target_y) != entry.is_landscape() {
        return false;
    }
    if entry.format() != format {
        return false;
    }

    let fits = |target: u32| target == 0 || target == entry.width() || target == entry.height();
    fits(target_x) && fits(target_y)
}

/// First entry in `entries` that matches, in list order
pub fn find_match<'a, I>(
    entries: I,
    target_x: u32,
    target_y: u32,
    format: ImageFormat,
) -> Option<&'a CacheEntry>
where
    I: IntoIterator<Item = &'a CacheEntry>,
{
    entries
        .into_iter()
        .find(|entry| is_match(entry, target_x, target_y, format))
}
