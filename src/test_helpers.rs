//! Shared test utilities for the thumbflow test suite.
//!
//! Builds small synthetic images in memory so tests never depend on fixture
//! files: plain JPEG/PNG encodes, JPEGs carrying a hand-assembled EXIF block,
//! and minimal RAW containers wrapping an embedded preview.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! create_test_jpeg(&tmp.path().join("a.jpg"), 120, 80);
//! std::fs::write(tmp.path().join("b.nef"), tiff_raw_with_preview(&jpeg_bytes(90, 60), 6)).unwrap();
//! ```

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;

// =========================================================================
// Plain encodes
// =========================================================================

/// A gradient so encoders have something non-trivial to compress.
fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

/// Baseline JPEG bytes (JFIF, no EXIF).
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&gradient(width, height))
        .unwrap();
    out
}

/// JPEG of deterministic noise. Unlike the gradient it does not compress,
/// so even small dimensions give a file of several KiB.
pub fn noisy_jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut seed: u32 = 0x9E37_79B9;
    let img = RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (seed >> 24) as u8
        };
        Rgb([next(), next(), next()])
    });
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&img)
        .unwrap();
    out
}

pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::write(path, jpeg_bytes(width, height)).unwrap();
}

pub fn create_test_png(path: &Path, width: u32, height: u32) {
    let mut out = Cursor::new(Vec::new());
    gradient(width, height)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    std::fs::write(path, out.into_inner()).unwrap();
}

// =========================================================================
// EXIF
// =========================================================================

/// Little-endian IFD entry: tag, type, count, value-or-offset.
fn ifd_entry(out: &mut Vec<u8>, tag: u16, typ: u16, count: u32, value: u32) {
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&typ.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
}

const SHORT: u16 = 3;
const LONG: u16 = 4;
const ASCII: u16 = 2;

/// A TIFF block with IFD0 holding the orientation and, when given, an Exif
/// sub-IFD holding `DateTimeOriginal` (`"YYYY:MM:DD HH:MM:SS"`).
fn exif_tiff(orientation: u16, date_time: Option<&str>) -> Vec<u8> {
    let mut tiff = b"II*\0".to_vec();
    tiff.extend_from_slice(&8u32.to_le_bytes());

    let ifd0_entries: u16 = if date_time.is_some() { 2 } else { 1 };
    let exif_ifd = 8 + 2 + 12 * u32::from(ifd0_entries) + 4;

    tiff.extend_from_slice(&ifd0_entries.to_le_bytes());
    ifd_entry(&mut tiff, 0x0112, SHORT, 1, u32::from(orientation));
    if date_time.is_some() {
        ifd_entry(&mut tiff, 0x8769, LONG, 1, exif_ifd);
    }
    tiff.extend_from_slice(&0u32.to_le_bytes());

    if let Some(dt) = date_time {
        let mut ascii = dt.as_bytes().to_vec();
        ascii.push(0);
        let data_at = exif_ifd + 2 + 12 + 4;
        tiff.extend_from_slice(&1u16.to_le_bytes());
        ifd_entry(&mut tiff, 0x9003, ASCII, ascii.len() as u32, data_at);
        tiff.extend_from_slice(&0u32.to_le_bytes());
        tiff.extend_from_slice(&ascii);
    }
    tiff
}

/// JPEG with an APP1 Exif segment inserted right after SOI.
pub fn jpeg_with_exif(
    width: u32,
    height: u32,
    orientation: u16,
    date_time: Option<&str>,
) -> Vec<u8> {
    let jpeg = jpeg_bytes(width, height);
    let mut payload = b"Exif\0\0".to_vec();
    payload.extend_from_slice(&exif_tiff(orientation, date_time));

    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&jpeg[2..]);
    out
}

// =========================================================================
// RAW containers
// =========================================================================

/// Minimal TIFF-structured RAW: IFD0 carries orientation plus a
/// JPEGInterchangeFormat pointer to `jpeg`, which sits at the end of the file.
pub fn tiff_raw_with_preview(jpeg: &[u8], orientation: u16) -> Vec<u8> {
    let mut raw = b"II*\0".to_vec();
    raw.extend_from_slice(&8u32.to_le_bytes());

    let jpeg_at: u32 = 8 + 2 + 3 * 12 + 4;
    raw.extend_from_slice(&3u16.to_le_bytes());
    ifd_entry(&mut raw, 0x0112, SHORT, 1, u32::from(orientation));
    ifd_entry(&mut raw, 0x0201, LONG, 1, jpeg_at);
    ifd_entry(&mut raw, 0x0202, LONG, 1, jpeg.len() as u32);
    raw.extend_from_slice(&0u32.to_le_bytes());

    assert_eq!(raw.len(), jpeg_at as usize);
    raw.extend_from_slice(jpeg);
    raw
}

/// Fuji RAF header with the preview offset/length fields (big-endian at
/// bytes 84 and 88) pointing at `jpeg` placed at byte 100.
pub fn raf_with_preview(jpeg: &[u8]) -> Vec<u8> {
    let mut raf = b"FUJIFILMCCD-RAW 0201FF383501".to_vec();
    raf.resize(100, 0);
    raf[84..88].copy_from_slice(&100u32.to_be_bytes());
    raf[88..92].copy_from_slice(&(jpeg.len() as u32).to_be_bytes());
    raf.extend_from_slice(jpeg);
    raf
}
