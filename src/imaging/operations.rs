//! High-level thumbnail operations.
//!
//! These functions combine calculations, style post-processing and backend
//! execution: decode through an [`ImageBackend`], scale, then style.

use super::backend::{DecodeError, DecodeMode, DecodedImage, Dimensions, ImageBackend};
use super::calculations::fit_longest_edge;
use super::style::{ThumbnailStyle, apply_style};
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ImageEncoder, ImageFormat, Rgba, RgbaImage};
use std::path::Path;

/// Result type for thumbnail operations.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Height/width ratio of the placeholder tile.
const PLACEHOLDER_RATIO: f64 = 1.2;
const PLACEHOLDER_FILL: Rgba<u8> = Rgba([0xee, 0xee, 0xee, 0xff]);
const PLACEHOLDER_MARK: Rgba<u8> = Rgba([0xcc, 0xcc, 0xcc, 0xff]);

/// A rendered, styled thumbnail bitmap.
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    pub image: RgbaImage,
    /// Upright dimensions of the image the thumbnail was rendered from.
    pub source_dimensions: Dimensions,
    /// Neutral tile standing in for a file that could not be decoded.
    pub placeholder: bool,
}

impl Thumbnail {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Approximate resident size of the pixel buffer.
    pub fn byte_size(&self) -> usize {
        self.image.as_raw().len()
    }

    /// Lossless PNG encoding used for the disk tier.
    pub fn encode_png(&self) -> std::result::Result<Vec<u8>, image::ImageError> {
        let mut out = Vec::new();
        PngEncoder::new(&mut out).write_image(
            self.image.as_raw(),
            self.image.width(),
            self.image.height(),
            image::ExtendedColorType::Rgba8,
        )?;
        Ok(out)
    }

    pub fn decode_png(
        bytes: &[u8],
        source_dimensions: Dimensions,
    ) -> std::result::Result<Self, image::ImageError> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)?.into_rgba8();
        Ok(Self {
            image,
            source_dimensions,
            placeholder: false,
        })
    }
}

/// Scale so the longer edge equals `target_size`.
///
/// Downscaling uses area averaging (`imageops::thumbnail`), which does not
/// alias on large reductions; upscaling uses Lanczos3.
pub fn scale_to_target(image: &image::DynamicImage, target_size: u32) -> RgbaImage {
    let (src_w, src_h) = (image.width(), image.height());
    let (w, h) = fit_longest_edge((src_w, src_h), target_size);
    if (w, h) == (src_w, src_h) {
        image.to_rgba8()
    } else if w <= src_w && h <= src_h {
        imageops::thumbnail(image, w, h)
    } else {
        imageops::resize(image, w, h, FilterType::Lanczos3)
    }
}

/// Render a styled thumbnail from decoded pixels.
pub fn generate_thumbnail(
    decoded: &DecodedImage,
    target_size: u32,
    style: &ThumbnailStyle,
) -> Thumbnail {
    let scaled = scale_to_target(&decoded.image, target_size);
    Thumbnail {
        image: apply_style(scaled, style),
        source_dimensions: decoded.source_dimensions,
        placeholder: false,
    }
}

/// The neutral tile delivered for files that fail to decode.
///
/// Portrait at the default 1:1.2 ratio with a centred mark, styled like any
/// other thumbnail so it sits naturally in the grid.
pub fn placeholder_thumbnail(target_size: u32, style: &ThumbnailStyle) -> Thumbnail {
    let height = target_size.max(1);
    let width = ((f64::from(height) / PLACEHOLDER_RATIO).round() as u32).max(1);
    let mut tile = RgbaImage::from_pixel(width, height, PLACEHOLDER_FILL);

    let mark = (width.min(height) / 4).max(1);
    let (mx, my) = ((width - mark) / 2, (height - mark) / 2);
    for y in my..my + mark {
        for x in mx..mx + mark {
            tile.put_pixel(x, y, PLACEHOLDER_MARK);
        }
    }

    Thumbnail {
        image: apply_style(tile, style),
        source_dimensions: Dimensions { width, height },
        placeholder: true,
    }
}

/// Decode a file and render its thumbnail.
pub fn render_thumbnail(
    backend: &dyn ImageBackend,
    path: &Path,
    mode: DecodeMode,
    target_size: u32,
    style: &ThumbnailStyle,
) -> Result<Thumbnail> {
    let decoded = backend.decode(path, mode)?;
    Ok(generate_thumbnail(&decoded, target_size, style))
}
