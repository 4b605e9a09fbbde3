//! Shared types used across the pipeline.
//!
//! [`ImageAsset`] is what the folder-enumeration collaborator hands in;
//! [`Fingerprint`], [`StyleHash`] and [`CacheKey`] are the identities the
//! cache and the scheduler work with.

use crate::imaging::{self, Dimensions, FormatKind, ImageBackend, ThumbnailStyle};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Height/width ratio assumed for items whose dimensions are unknown.
pub const DEFAULT_HEIGHT_RATIO: f64 = 1.2;

/// A discovered image file. Immutable once built; identity is the path.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub path: PathBuf,
    pub file_size: u64,
    pub modified: SystemTime,
    /// From EXIF when cheaply available.
    pub capture_time: Option<NaiveDateTime>,
    /// Upright pixel dimensions, when known.
    pub dimensions: Option<Dimensions>,
    pub format: FormatKind,
}

impl ImageAsset {
    /// Build from file metadata and a signature sniff; no pixel decode.
    pub fn stat(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mut header = Vec::with_capacity(imaging::format::SNIFF_LEN);
        std::fs::File::open(path)?
            .take(imaging::format::SNIFF_LEN as u64)
            .read_to_end(&mut header)?;

        Ok(Self {
            path: path.to_path_buf(),
            file_size: meta.len(),
            modified: meta.modified()?,
            capture_time: None,
            dimensions: None,
            format: imaging::format::sniff(path, &header),
        })
    }

    /// [`stat`](Self::stat) plus dimensions and capture time from the
    /// backend's cheap probe. Probe failures leave those fields empty.
    pub fn probe(path: &Path, backend: &dyn ImageBackend) -> std::io::Result<Self> {
        let mut asset = Self::stat(path)?;
        match backend.identify(path) {
            Ok(info) => {
                asset.dimensions = Some(info.dimensions);
                asset.capture_time = info.capture_time;
                asset.format = info.format;
            }
            Err(e) => log::debug!("probe {}: {e}", path.display()),
        }
        Ok(asset)
    }

    /// Capture time, falling back to the file's modification time.
    pub fn effective_capture_time(&self) -> NaiveDateTime {
        self.capture_time
            .unwrap_or_else(|| DateTime::<Local>::from(self.modified).naive_local())
    }

    /// Width / height when dimensions are known.
    pub fn aspect_ratio(&self) -> Option<f64> {
        self.dimensions
            .filter(|d| d.width > 0 && d.height > 0)
            .map(|d| f64::from(d.width) / f64::from(d.height))
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.path, self.file_size, self.modified)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Content-version identity: SHA-256 over (path, size, mtime).
///
/// A file touched or rewritten on disk gets a new fingerprint, so stale
/// thumbnails are never served.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(#[serde(with = "hex32")] pub [u8; 32]);

impl Fingerprint {
    pub fn new(path: &Path, file_size: u64, modified: SystemTime) -> Self {
        let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(b"fingerprint\0");
        hasher.update(path.as_os_str().as_encoded_bytes());
        hasher.update(b"\0");
        hasher.update(file_size.to_le_bytes());
        hasher.update(since_epoch.as_secs().to_le_bytes());
        hasher.update(since_epoch.subsec_nanos().to_le_bytes());
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

/// Identity of a style configuration, including the target size.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StyleHash(#[serde(with = "hex32")] pub [u8; 32]);

impl StyleHash {
    pub fn new(target_size: u32, style: &ThumbnailStyle) -> Self {
        Self(style.digest(target_size))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for StyleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StyleHash({})", &self.to_hex()[..12])
    }
}

/// Cache identity: a content version rendered with a given style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: Fingerprint,
    pub style: StyleHash,
}

impl CacheKey {
    pub fn new(fingerprint: Fingerprint, style: StyleHash) -> Self {
        Self { fingerprint, style }
    }

    /// Stable SHA-256 of both halves, used as the disk file name.
    pub fn digest_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.fingerprint.0);
        hasher.update(self.style.0);
        hex::encode(hasher.finalize())
    }
}

/// Lowercase hex (de)serialisation for 32-byte digests.
mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(&s, &mut out)
            .map_err(|e| D::Error::custom(format!("invalid digest {s:?}: {e}")))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{Border, Color};
    use crate::test_helpers::create_test_jpeg;
    use std::time::Duration;
    use tempfile::TempDir;

    fn t(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    // =========================================================================
    // Fingerprint
    // =========================================================================

    #[test]
    fn fingerprint_is_deterministic() {
        let a = Fingerprint::new(Path::new("/a.jpg"), 100, t(1000));
        let b = Fingerprint::new(Path::new("/a.jpg"), 100, t(1000));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_each_input() {
        let base = Fingerprint::new(Path::new("/a.jpg"), 100, t(1000));
        assert_ne!(base, Fingerprint::new(Path::new("/b.jpg"), 100, t(1000)));
        assert_ne!(base, Fingerprint::new(Path::new("/a.jpg"), 101, t(1000)));
        assert_ne!(base, Fingerprint::new(Path::new("/a.jpg"), 100, t(1001)));
        assert_ne!(
            base,
            Fingerprint::new(
                Path::new("/a.jpg"),
                100,
                t(1000) + Duration::from_nanos(1)
            )
        );
    }

    #[test]
    fn fingerprint_serde_is_hex() {
        let fp = Fingerprint::new(Path::new("/a.jpg"), 1, t(1));
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn bad_hex_rejected() {
        assert!(serde_json::from_str::<Fingerprint>("\"abc\"").is_err());
        let not_hex = format!("\"{}\"", "zz".repeat(32));
        assert!(serde_json::from_str::<Fingerprint>(&not_hex).is_err());
        let too_long = format!("\"{}\"", "00".repeat(33));
        assert!(serde_json::from_str::<StyleHash>(&too_long).is_err());
    }

    #[test]
    fn digest_hex_is_lowercase_sha256() {
        let key = CacheKey::new(Fingerprint([1; 32]), StyleHash([2; 32]));
        let hex = key.digest_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    // =========================================================================
    // StyleHash / CacheKey
    // =========================================================================

    #[test]
    fn style_hash_depends_on_size_and_style() {
        let plain = ThumbnailStyle::plain();
        let bordered = ThumbnailStyle {
            border: Some(Border {
                width: 1,
                color: Color::rgb(0, 0, 0),
            }),
            ..plain
        };
        assert_eq!(StyleHash::new(300, &plain), StyleHash::new(300, &plain));
        assert_ne!(StyleHash::new(300, &plain), StyleHash::new(200, &plain));
        assert_ne!(StyleHash::new(300, &plain), StyleHash::new(300, &bordered));
    }

    #[test]
    fn cache_key_digest_separates_styles() {
        let fp = Fingerprint::new(Path::new("/a.jpg"), 1, t(1));
        let k1 = CacheKey::new(fp, StyleHash::new(300, &ThumbnailStyle::plain()));
        let k2 = CacheKey::new(fp, StyleHash::new(301, &ThumbnailStyle::plain()));
        assert_ne!(k1.digest_hex(), k2.digest_hex());
        assert_eq!(k1.digest_hex().len(), 64);
    }

    // =========================================================================
    // ImageAsset
    // =========================================================================

    #[test]
    fn stat_reads_size_and_sniffs_format() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photo.png");
        create_test_jpeg(&path, 40, 30);

        let asset = ImageAsset::stat(&path).unwrap();
        assert_eq!(asset.file_size, std::fs::metadata(&path).unwrap().len());
        assert_eq!(
            asset.format,
            FormatKind::Standard(image::ImageFormat::Jpeg)
        );
        assert!(asset.dimensions.is_none());
        assert!(asset.aspect_ratio().is_none());
    }

    #[test]
    fn probe_fills_dimensions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photo.jpg");
        create_test_jpeg(&path, 40, 30);

        let asset = ImageAsset::probe(&path, &crate::imaging::RustBackend::new()).unwrap();
        assert_eq!(
            asset.dimensions,
            Some(Dimensions {
                width: 40,
                height: 30
            })
        );
        assert!((asset.aspect_ratio().unwrap() - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn stat_missing_file_errors() {
        assert!(ImageAsset::stat(Path::new("/nonexistent/x.jpg")).is_err());
    }

    #[test]
    fn effective_capture_time_falls_back_to_mtime() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photo.jpg");
        create_test_jpeg(&path, 4, 4);
        let mut asset = ImageAsset::stat(&path).unwrap();

        let from_mtime = asset.effective_capture_time();
        assert_eq!(
            from_mtime,
            DateTime::<Local>::from(asset.modified).naive_local()
        );

        let shot = chrono::NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        asset.capture_time = Some(shot);
        assert_eq!(asset.effective_capture_time(), shot);
    }

    #[test]
    fn fingerprint_follows_file_changes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photo.jpg");
        create_test_jpeg(&path, 10, 10);
        let before = ImageAsset::stat(&path).unwrap().fingerprint();

        create_test_jpeg(&path, 20, 10);
        let after = ImageAsset::stat(&path).unwrap().fingerprint();
        // Size differs even when mtime granularity hides the rewrite.
        assert_ne!(before, after);
    }
}
