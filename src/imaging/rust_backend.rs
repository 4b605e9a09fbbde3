//! Pure Rust decode backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Format dispatch | [`format::sniff`](super::format::sniff) on the first bytes |
//! | Decode (JPEG, PNG, TIFF, WebP, GIF, BMP) | `image::load_from_memory_with_format` |
//! | RAW preview | [`raw_preview`](super::raw_preview) candidates, decoded as JPEG |
//! | RAW full decode | `rawloader` sensor data, half-size 2x2 develop |
//! | Orientation / capture time | `kamadak-exif` via [`metadata`](super::metadata) |

use super::backend::{DecodeError, DecodeMode, DecodedImage, Dimensions, ImageBackend, ImageInfo};
use super::format::{self, FormatKind, RawFamily};
use super::metadata::{ExifSummary, apply_orientation, read_exif_summary};
use super::raw_preview::{PreviewCandidate, find_previews};
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use log::debug;
use std::io::Cursor;
use std::path::Path;

/// Display gamma applied to linear sensor values.
const RAW_GAMMA: f32 = 2.2;

/// Pure Rust backend using the `image`, `rawloader` and `kamadak-exif` crates.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, DecodeError> {
    let data = std::fs::read(path)?;
    if data.is_empty() {
        return Err(DecodeError::Truncated(format!("{} is empty", path.display())));
    }
    Ok(data)
}

fn classify(path: &Path, data: &[u8]) -> FormatKind {
    let header = &data[..data.len().min(format::SNIFF_LEN)];
    format::sniff(path, header)
}

/// Whether the buffer lacks the trailer its format requires.
fn missing_end_marker(data: &[u8], fmt: ImageFormat) -> bool {
    match fmt {
        ImageFormat::Jpeg => {
            let trimmed = match data.iter().rposition(|&b| b != 0) {
                Some(last) => &data[..=last],
                None => data,
            };
            !trimmed.ends_with(&[0xFF, 0xD9])
        }
        ImageFormat::Png => !data.ends_with(b"IEND\xAE\x42\x60\x82"),
        ImageFormat::Gif => !data.ends_with(&[0x3B]),
        _ => false,
    }
}

fn decode_raster(path: &Path, data: &[u8], fmt: ImageFormat) -> Result<DecodedImage, DecodeError> {
    let img = image::load_from_memory_with_format(data, fmt).map_err(|e| {
        if missing_end_marker(data, fmt) {
            DecodeError::Truncated(format!("{}: {e}", path.display()))
        } else {
            DecodeError::from(e)
        }
    })?;
    let exif = read_exif_summary(data);
    Ok(finish(img, exif, false))
}

/// Apply orientation and package the result.
fn finish(img: DynamicImage, exif: ExifSummary, from_preview: bool) -> DecodedImage {
    let orientation = exif.orientation_or_default();
    let image = apply_orientation(img, orientation);
    DecodedImage {
        source_dimensions: Dimensions {
            width: image.width(),
            height: image.height(),
        },
        image,
        orientation_applied: orientation,
        from_preview,
        capture_time: exif.capture_time,
    }
}

// ---------------------------------------------------------------------------
// RAW
// ---------------------------------------------------------------------------

/// Decode the largest embedded JPEG that actually decodes.
fn decode_best_preview<'a>(
    data: &'a [u8],
    candidates: &[PreviewCandidate],
) -> Option<(DynamicImage, &'a [u8])> {
    candidates.iter().find_map(|c| {
        let bytes = &data[c.range.clone()];
        match image::load_from_memory_with_format(bytes, ImageFormat::Jpeg) {
            Ok(img) => Some((img, bytes)),
            Err(e) => {
                debug!("skipping embedded preview at {:?}: {e}", c.range);
                None
            }
        }
    })
}

/// Container EXIF, completed from the first embedded preview's EXIF.
fn raw_exif(data: &[u8], candidates: &[PreviewCandidate]) -> ExifSummary {
    let container = read_exif_summary(data);
    if container.orientation.is_some() && container.capture_time.is_some() {
        return container;
    }
    candidates
        .first()
        .map(|c| container.or(read_exif_summary(&data[c.range.clone()])))
        .unwrap_or(container)
}

fn decode_raw(
    path: &Path,
    data: &[u8],
    family: RawFamily,
    mode: DecodeMode,
) -> Result<DecodedImage, DecodeError> {
    let candidates = find_previews(data, family);
    let exif = raw_exif(data, &candidates);

    if mode == DecodeMode::Preview {
        if let Some((img, _)) = decode_best_preview(data, &candidates) {
            return Ok(finish(img, exif, true));
        }
        debug!("{}: no usable embedded preview, developing sensor data", path.display());
    }

    match develop_raw(path) {
        Ok(img) => Ok(finish(DynamicImage::ImageRgb8(img), exif, false)),
        // Cameras rawloader does not know still carry a usable preview.
        Err(err) if mode == DecodeMode::Full => match decode_best_preview(data, &candidates) {
            Some((img, _)) => {
                debug!("{}: sensor decode failed ({err}), using preview", path.display());
                Ok(finish(img, exif, true))
            }
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

fn map_rawloader_error(path: &Path, err: impl std::fmt::Debug) -> DecodeError {
    let msg = format!("{}: {err:?}", path.display());
    let lower = msg.to_ascii_lowercase();
    if lower.contains("couldn't find camera")
        || lower.contains("unsupported")
        || lower.contains("not supported")
    {
        DecodeError::UnsupportedFormat(msg)
    } else if lower.contains("eof") || lower.contains("end of file") {
        DecodeError::Truncated(msg)
    } else {
        DecodeError::Corrupt(msg)
    }
}

/// Parse a RAW file with rawloader's shared camera database.
fn load_raw(path: &Path) -> Result<rawloader::RawImage, DecodeError> {
    // rawloader panics on some malformed inputs.
    std::panic::catch_unwind(|| rawloader::decode_file(path))
        .map_err(|_| DecodeError::Corrupt(format!("{}: raw decoder panicked", path.display())))?
        .map_err(|e| map_rawloader_error(path, e))
}

/// Sensor area left after the camera's crop margins.
fn cropped_area(raw: &rawloader::RawImage, path: &Path) -> Result<(usize, usize), DecodeError> {
    let [top, right, bottom, left] = raw.crops;
    let width = raw.width.saturating_sub(left + right);
    let height = raw.height.saturating_sub(top + bottom);
    if width < 2 || height < 2 {
        return Err(DecodeError::Corrupt(format!(
            "{}: sensor area {width}x{height} too small",
            path.display()
        )));
    }
    Ok((width, height))
}

/// Decode sensor data and develop it at half resolution.
///
/// Each 2x2 CFA block becomes one RGB pixel: no interpolation, so the result
/// is soft but colour-correct enough for a thumbnail.
fn develop_raw(path: &Path) -> Result<RgbImage, DecodeError> {
    let raw = load_raw(path)?;
    let [top, _, _, left] = raw.crops;
    let (width, height) = cropped_area(&raw, path)?;

    let expected = raw.width * raw.height * raw.cpp;
    let sample = |idx: usize, channel: usize| -> f32 {
        let black = f32::from(raw.blacklevels[channel.min(3)]);
        let white = f32::from(raw.whitelevels[channel.min(3)]).max(black + 1.0);
        match &raw.data {
            rawloader::RawImageData::Integer(v) => {
                ((f32::from(v[idx]) - black) / (white - black)).clamp(0.0, 1.0)
            }
            rawloader::RawImageData::Float(v) => v[idx].clamp(0.0, 1.0),
        }
    };
    let len = match &raw.data {
        rawloader::RawImageData::Integer(v) => v.len(),
        rawloader::RawImageData::Float(v) => v.len(),
    };
    if len < expected {
        return Err(DecodeError::Truncated(format!(
            "{}: sensor data holds {len} of {expected} samples",
            path.display()
        )));
    }

    let wb = white_balance(&raw.wb_coeffs);
    let (out_w, out_h) = (width / 2, height / 2);
    let mut out = RgbImage::new(out_w as u32, out_h as u32);

    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sum = [0f32; 3];
            let mut n = [0u32; 3];
            for dy in 0..2 {
                for dx in 0..2 {
                    let row = top + oy * 2 + dy;
                    let col = left + ox * 2 + dx;
                    let base = (row * raw.width + col) * raw.cpp;
                    if raw.cpp >= 3 {
                        for (c, s) in sum.iter_mut().enumerate() {
                            *s += sample(base + c, c);
                            n[c] += 1;
                        }
                    } else {
                        // Colour 3 is the second green (or emerald) site.
                        let color = raw.cfa.color_at(row, col);
                        let c = if color == 3 { 1 } else { color.min(2) };
                        sum[c] += sample(base, color);
                        n[c] += 1;
                    }
                }
            }
            let px = std::array::from_fn(|c| {
                let linear = if n[c] == 0 { 0.0 } else { sum[c] / n[c] as f32 };
                let balanced = (linear * wb[c]).clamp(0.0, 1.0);
                (balanced.powf(1.0 / RAW_GAMMA) * 255.0).round() as u8
            });
            out.put_pixel(ox as u32, oy as u32, image::Rgb(px));
        }
    }
    Ok(out)
}

/// Camera white balance normalised to green; NaN or missing → neutral.
fn white_balance(coeffs: &[f32; 4]) -> [f32; 3] {
    let valid = |v: f32| v.is_finite() && v > 0.0;
    if !valid(coeffs[0]) || !valid(coeffs[1]) || !valid(coeffs[2]) {
        return [1.0, 1.0, 1.0];
    }
    [coeffs[0] / coeffs[1], 1.0, coeffs[2] / coeffs[1]]
}

fn raw_info(path: &Path, data: &[u8], family: RawFamily) -> Result<ImageInfo, DecodeError> {
    let candidates = find_previews(data, family);
    let exif = raw_exif(data, &candidates);
    let orientation = exif.orientation_or_default();

    let dimensions = match decode_best_preview(data, &candidates) {
        Some((img, _)) => Dimensions {
            width: img.width(),
            height: img.height(),
        },
        // Same size a develop would give, without developing.
        None => {
            let raw = load_raw(path)?;
            let (width, height) = cropped_area(&raw, path)?;
            Dimensions {
                width: (width / 2) as u32,
                height: (height / 2) as u32,
            }
        }
    };

    Ok(ImageInfo {
        format: FormatKind::Raw(family),
        dimensions: dimensions.oriented(orientation),
        orientation,
        capture_time: exif.capture_time,
    })
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<ImageInfo, DecodeError> {
        let data = read_file(path)?;
        match classify(path, &data) {
            FormatKind::Standard(fmt) => {
                let (width, height) = ImageReader::with_format(Cursor::new(&data), fmt)
                    .into_dimensions()
                    .map_err(DecodeError::from)?;
                let exif = read_exif_summary(&data);
                let orientation = exif.orientation_or_default();
                Ok(ImageInfo {
                    format: FormatKind::Standard(fmt),
                    dimensions: Dimensions { width, height }.oriented(orientation),
                    orientation,
                    capture_time: exif.capture_time,
                })
            }
            FormatKind::Raw(family) => raw_info(path, &data, family),
            FormatKind::Unknown => Err(DecodeError::UnsupportedFormat(format!(
                "{}: unrecognised signature",
                path.display()
            ))),
        }
    }

    fn decode(&self, path: &Path, mode: DecodeMode) -> Result<DecodedImage, DecodeError> {
        let data = read_file(path)?;
        match classify(path, &data) {
            FormatKind::Standard(ImageFormat::Tiff) => {
                decode_raster(path, &data, ImageFormat::Tiff).or_else(|err| {
                    // Unlisted RAW formats often reuse the plain TIFF header.
                    decode_raw(path, &data, RawFamily::TiffBased, mode).map_err(|_| err)
                })
            }
            FormatKind::Standard(fmt) => decode_raster(path, &data, fmt),
            FormatKind::Raw(family) => decode_raw(path, &data, family, mode),
            FormatKind::Unknown => Err(DecodeError::UnsupportedFormat(format!(
                "{}: unrecognised signature",
                path.display()
            ))),
        }
    }
}
