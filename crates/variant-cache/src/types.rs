//! Cache types

use crate::key;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Encoding or pixel layout of a stored variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    #[serde(rename = "RGBA_8888")]
    Rgba8888,
    #[serde(rename = "RGB_565")]
    Rgb565,
    #[serde(rename = "ALPHA_8")]
    Alpha8,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 6] = [
        ImageFormat::Jpeg,
        ImageFormat::Png,
        ImageFormat::Webp,
        ImageFormat::Rgba8888,
        ImageFormat::Rgb565,
        ImageFormat::Alpha8,
    ];

    /// Name persisted in the journal
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Png => "PNG",
            ImageFormat::Webp => "WEBP",
            ImageFormat::Rgba8888 => "RGBA_8888",
            ImageFormat::Rgb565 => "RGB_565",
            ImageFormat::Alpha8 => "ALPHA_8",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
            _ => "application/octet-stream",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageFormat::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown image format: {}", s))
    }
}

/// Location of a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(PathBuf);

impl BlobRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for BlobRef {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// One cached variant. Immutable once built; the identity and orientation
/// are derived from the other fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    source_id: String,
    identity: u64,
    blob: BlobRef,
    width: u32,
    height: u32,
    format: ImageFormat,
    byte_size: u64,
    is_landscape: bool,
}

impl CacheEntry {
    pub fn new(
        source_id: impl Into<String>,
        blob: BlobRef,
        width: u32,
        height: u32,
        format: ImageFormat,
        byte_size: u64,
    ) -> Self {
        let source_id = source_id.into();
        let identity = key::identity(&source_id, width, height, format);
        Self {
            source_id,
            identity,
            blob,
            width,
            height,
            format,
            byte_size,
            is_landscape: width >= height,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn identity(&self) -> u64 {
        self.identity
    }

    pub fn blob(&self) -> &BlobRef {
        &self.blob
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// Square variants count as landscape.
    pub fn is_landscape(&self) -> bool {
        self.is_landscape
    }
}

impl fmt::Display for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} {} ({} bytes)",
            self.source_id, self.width, self.height, self.format, self.byte_size
        )
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub capacity: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn test_entry_derives_identity_and_orientation() {
        let entry = CacheEntry::new(
            "img1",
            BlobRef::new("/cache/img1"),
            100,
            50,
            ImageFormat::Jpeg,
            4096,
        );
        assert_eq!(
            entry.identity(),
            key::identity("img1", 100, 50, ImageFormat::Jpeg)
        );
        assert!(entry.is_landscape());

        let square = CacheEntry::new("img1", BlobRef::new("/x"), 64, 64, ImageFormat::Png, 1);
        assert!(square.is_landscape());

        let portrait = CacheEntry::new("img1", BlobRef::new("/y"), 50, 100, ImageFormat::Png, 1);
        assert!(!portrait.is_landscape());
    }

    #[test]
    fn test_format_round_trips_through_name() {
        for format in ImageFormat::ALL {
            assert_eq!(format.as_str().parse::<ImageFormat>(), Ok(format));
        }
        assert_eq!("jpeg".parse::<ImageFormat>(), Ok(ImageFormat::Jpeg));
        assert!("TIFF".parse::<ImageFormat>().is_err());
    }

    #[test]
    fn test_cache_entry_serialization() {
        let entry = CacheEntry::new(
            "img1",
            BlobRef::new("/cache/img1123"),
            800,
            600,
            ImageFormat::Jpeg,
            12345,
        );

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["source_id"], "img1");
        assert_eq!(json["blob"], "/cache/img1123");
        assert_eq!(json["format"], "JPEG");
        assert_eq!(json["byte_size"], 12345);
        assert_eq!(json["is_landscape"], true);
    }
}
