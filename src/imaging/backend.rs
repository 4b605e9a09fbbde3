//! Decode backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations every decoder must
//! support: identify (cheap header and metadata probe) and decode (pixels,
//! either full resolution or the camera-embedded preview).
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), which dispatches on the
//! [`FormatKind`] sniffed from the file signature.

use super::format::FormatKind;
use chrono::NaiveDateTime;
use image::DynamicImage;
use std::path::Path;
use thiserror::Error;

/// Why a file could not be turned into pixels.
///
/// Decode errors never abort the pipeline: the coordinator substitutes a
/// placeholder thumbnail and logs the error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("corrupt image: {0}")]
    Corrupt(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("truncated image: {0}")]
    Truncated(String),
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => DecodeError::Truncated(err.to_string()),
            _ => DecodeError::Corrupt(err.to_string()),
        }
    }
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        use image::ImageError;
        match err {
            ImageError::Unsupported(e) => DecodeError::UnsupportedFormat(e.to_string()),
            ImageError::IoError(e) => e.into(),
            ImageError::Limits(e) => DecodeError::Corrupt(e.to_string()),
            ImageError::Decoding(e) => classify_decoding_error(&e),
            other => DecodeError::Corrupt(other.to_string()),
        }
    }
}

/// Decoders report premature end of data in their message only.
fn classify_decoding_error(err: &image::error::DecodingError) -> DecodeError {
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("eof")
        || lower.contains("end of file")
        || lower.contains("unexpected end")
        || lower.contains("truncated")
        || lower.contains("not enough data")
    {
        DecodeError::Truncated(msg)
    } else {
        DecodeError::Corrupt(msg)
    }
}

/// Which pixels a decode should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeMode {
    /// Full-resolution pixels (demosaiced for RAW).
    Full,
    /// Camera-embedded preview for RAW; identical to `Full` for raster files.
    Preview,
}

/// Pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Dimensions after applying an EXIF orientation (5–8 swap the axes).
    pub fn oriented(self, orientation: u8) -> Self {
        if (5..=8).contains(&orientation) {
            Dimensions {
                width: self.height,
                height: self.width,
            }
        } else {
            self
        }
    }
}

/// Result of a cheap probe: no pixel decode.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub format: FormatKind,
    /// Display dimensions, orientation already applied.
    pub dimensions: Dimensions,
    /// EXIF orientation, 1 when absent.
    pub orientation: u8,
    pub capture_time: Option<NaiveDateTime>,
}

/// Normalised pixels ready for thumbnail generation.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Upright pixels; orientation has already been applied.
    pub image: DynamicImage,
    /// Display dimensions of the source image (upright).
    pub source_dimensions: Dimensions,
    /// The EXIF orientation that was applied to `image`.
    pub orientation_applied: u8,
    /// Whether the pixels came from an embedded preview.
    pub from_preview: bool,
    pub capture_time: Option<NaiveDateTime>,
}

/// Trait for decode backends.
///
/// Implementations must be `Send + Sync`: a single backend is shared by every
/// worker thread of the scheduler.
pub trait ImageBackend: Send + Sync {
    /// Probe format, dimensions, orientation and capture time.
    fn identify(&self, path: &Path) -> Result<ImageInfo, DecodeError>;

    /// Decode pixels, normalised to upright orientation.
    fn decode(&self, path: &Path, mode: DecodeMode) -> Result<DecodedImage, DecodeError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Condvar, Mutex};

    /// Scripted outcome for a single path.
    #[derive(Debug, Clone)]
    pub enum Scripted {
        Fail(DecodeError),
        Panic,
    }

    /// Mock backend that records operations and renders solid-colour images.
    /// Uses Mutex (not RefCell) so it is Sync and usable from worker threads.
    pub struct MockBackend {
        pub operations: Mutex<Vec<RecordedOp>>,
        pub scripted: Mutex<HashMap<PathBuf, Scripted>>,
        pub dimensions: Dimensions,
        gate: Mutex<bool>,
        gate_cv: Condvar,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify(String),
        Decode { path: String, mode: DecodeMode },
    }

    impl Default for MockBackend {
        fn default() -> Self {
            Self {
                operations: Mutex::new(Vec::new()),
                scripted: Mutex::new(HashMap::new()),
                dimensions: Dimensions {
                    width: 640,
                    height: 480,
                },
                gate: Mutex::new(true),
                gate_cv: Condvar::new(),
            }
        }
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_dimensions(width: u32, height: u32) -> Self {
            Self {
                dimensions: Dimensions { width, height },
                ..Self::default()
            }
        }

        /// A backend whose decodes block until [`release`](Self::release).
        pub fn blocked() -> Self {
            let backend = Self::default();
            *backend.gate.lock().unwrap() = false;
            backend
        }

        pub fn release(&self) {
            *self.gate.lock().unwrap() = true;
            self.gate_cv.notify_all();
        }

        pub fn script(&self, path: impl Into<PathBuf>, outcome: Scripted) {
            self.scripted.lock().unwrap().insert(path.into(), outcome);
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn decode_count(&self) -> usize {
            self.operations
                .lock()
                .unwrap()
                .iter()
                .filter(|op| matches!(op, RecordedOp::Decode { .. }))
                .count()
        }

        fn wait_for_gate(&self) {
            let mut open = self.gate.lock().unwrap();
            while !*open {
                open = self.gate_cv.wait(open).unwrap();
            }
        }
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, path: &Path) -> Result<ImageInfo, DecodeError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Identify(path.to_string_lossy().to_string()));

            Ok(ImageInfo {
                format: FormatKind::Standard(image::ImageFormat::Jpeg),
                dimensions: self.dimensions,
                orientation: 1,
                capture_time: None,
            })
        }

        fn decode(&self, path: &Path, mode: DecodeMode) -> Result<DecodedImage, DecodeError> {
            self.operations.lock().unwrap().push(RecordedOp::Decode {
                path: path.to_string_lossy().to_string(),
                mode,
            });
            self.wait_for_gate();

            let scripted = self.scripted.lock().unwrap().get(path).cloned();
            match scripted {
                Some(Scripted::Fail(err)) => return Err(err),
                Some(Scripted::Panic) => panic!("mock decoder panicked on {}", path.display()),
                None => {}
            }

            let Dimensions { width, height } = self.dimensions;
            Ok(DecodedImage {
                image: DynamicImage::ImageRgb8(RgbImage::from_pixel(
                    width,
                    height,
                    Rgb([90, 140, 200]),
                )),
                source_dimensions: self.dimensions,
                orientation_applied: 1,
                from_preview: mode == DecodeMode::Preview,
                capture_time: None,
            })
        }
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::with_dimensions(800, 600);

        let info = backend.identify(Path::new("/test/image.jpg")).unwrap();
        assert_eq!(info.dimensions.width, 800);
        assert_eq!(info.dimensions.height, 600);

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], RecordedOp::Identify(p) if p == "/test/image.jpg"));
    }

    #[test]
    fn mock_records_decode_mode() {
        let backend = MockBackend::new();
        let decoded = backend
            .decode(Path::new("/a.nef"), DecodeMode::Preview)
            .unwrap();
        assert!(decoded.from_preview);
        assert_eq!(decoded.image.width(), 640);
        assert_eq!(backend.decode_count(), 1);
        assert!(matches!(
            &backend.get_operations()[0],
            RecordedOp::Decode {
                mode: DecodeMode::Preview,
                ..
            }
        ));
    }

    #[test]
    fn mock_scripted_failure() {
        let backend = MockBackend::new();
        backend.script("/bad.jpg", Scripted::Fail(DecodeError::Corrupt("x".into())));
        let err = backend
            .decode(Path::new("/bad.jpg"), DecodeMode::Full)
            .unwrap_err();
        assert_eq!(err, DecodeError::Corrupt("x".into()));
    }

    // =========================================================================
    // Error mapping
    // =========================================================================

    #[test]
    fn unexpected_eof_maps_to_truncated() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(DecodeError::from(io), DecodeError::Truncated(_)));
    }

    #[test]
    fn other_io_maps_to_corrupt() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad");
        assert!(matches!(DecodeError::from(io), DecodeError::Corrupt(_)));
    }

    #[test]
    fn oriented_dimensions_swap_for_rotations() {
        let dims = Dimensions {
            width: 600,
            height: 400,
        };
        assert_eq!(dims.oriented(1), dims);
        assert_eq!(dims.oriented(3), dims);
        assert_eq!(
            dims.oriented(6),
            Dimensions {
                width: 400,
                height: 600
            }
        );
    }
}
