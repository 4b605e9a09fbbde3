//! Thumbnail style post-processing: border, drop shadow, rounded corners.
//!
//! The pipeline order is fixed:
//!
//! 1. **Border**: a solid frame of `width` pixels around the scaled image.
//! 2. **Shadow**: the card silhouette, offset by half the blur size and
//!    blurred, drawn on a canvas that grows to hold it.
//! 3. **Rounded clip**: the card (image + border) is masked to a rounded
//!    rectangle with anti-aliased corners. The shadow uses the same mask,
//!    so corners stay consistent.
//!
//! Applying a style is deterministic: the same input and style always give
//! the same pixels, which is what makes style-keyed caching sound.

use super::calculations::{rounded_rect_coverage, shadow_offset};
use image::{Rgba, RgbaImage, imageops};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// An RGBA colour written as `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color([r, g, b, 255])
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba(self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid colour {0:?}: expected #rrggbb or #rrggbbaa")]
pub struct ColorParseError(String);

impl FromStr for Color {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ColorParseError(s.to_string());
        let hex = s.strip_prefix('#').ok_or_else(err)?;
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(err());
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| err());
        let alpha = if hex.len() == 8 { byte(6)? } else { 255 };
        Ok(Color([byte(0)?, byte(2)?, byte(4)?, alpha]))
    }
}

impl TryFrom<String> for Color {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(c: Color) -> String {
        c.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{r:02x}{g:02x}{b:02x}")
        } else {
            write!(f, "#{r:02x}{g:02x}{b:02x}{a:02x}")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Border {
    pub width: u32,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shadow {
    /// Blur size in pixels; the offset is half of it, rounded up.
    pub size: u32,
    pub color: Color,
}

/// Style parameters applied after scaling. `None` disables a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbnailStyle {
    pub border: Option<Border>,
    pub shadow: Option<Shadow>,
    pub corner_radius: Option<u32>,
}

impl ThumbnailStyle {
    /// No post-processing at all.
    pub fn plain() -> Self {
        Self::default()
    }

    /// Extra pixels the style adds to each dimension of the scaled image.
    pub fn added_size(&self) -> u32 {
        let border = self.border.map_or(0, |b| b.width * 2);
        let shadow = self
            .shadow
            .filter(|s| s.size > 0)
            .map_or(0, |s| s.size * 2 + shadow_offset(s.size));
        border + shadow
    }

    /// SHA-256 over the target size and every style parameter.
    pub fn digest(&self, target_size: u32) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"style\0");
        hasher.update(target_size.to_le_bytes());
        self.hash_into(&mut hasher);
        hasher.finalize().into()
    }

    /// Each stage is tagged so that disabling one can never collide with
    /// another's values.
    fn hash_into(&self, hasher: &mut Sha256) {
        match self.border {
            Some(b) => {
                hasher.update(b"\x01border");
                hasher.update(b.width.to_le_bytes());
                hasher.update(b.color.0);
            }
            None => hasher.update(b"\x00border"),
        }
        match self.shadow {
            Some(s) => {
                hasher.update(b"\x01shadow");
                hasher.update(s.size.to_le_bytes());
                hasher.update(s.color.0);
            }
            None => hasher.update(b"\x00shadow"),
        }
        match self.corner_radius {
            Some(r) => {
                hasher.update(b"\x01rounded");
                hasher.update(r.to_le_bytes());
            }
            None => hasher.update(b"\x00rounded"),
        }
    }
}

/// Run the full style pipeline over a scaled image.
pub fn apply_style(image: RgbaImage, style: &ThumbnailStyle) -> RgbaImage {
    let card = match style.border {
        Some(border) if border.width > 0 => draw_border(&image, border),
        _ => image,
    };
    let radius = style.corner_radius.unwrap_or(0);
    let card = clip_rounded(card, radius);

    match style.shadow {
        Some(shadow) if shadow.size > 0 => drop_shadow(&card, shadow, radius),
        _ => card,
    }
}

fn draw_border(image: &RgbaImage, border: Border) -> RgbaImage {
    let w = border.width;
    let mut framed = RgbaImage::from_pixel(
        image.width() + w * 2,
        image.height() + w * 2,
        border.color.to_rgba(),
    );
    imageops::replace(&mut framed, image, i64::from(w), i64::from(w));
    framed
}

/// Multiply alpha by the rounded-rectangle coverage.
fn clip_rounded(mut card: RgbaImage, radius: u32) -> RgbaImage {
    if radius == 0 {
        return card;
    }
    let (w, h) = card.dimensions();
    for (x, y, px) in card.enumerate_pixels_mut() {
        let coverage = rounded_rect_coverage(x, y, w, h, radius);
        if coverage < 1.0 {
            px.0[3] = (f32::from(px.0[3]) * coverage).round() as u8;
        }
    }
    card
}

/// Place the card on a larger canvas above its blurred, offset silhouette.
fn drop_shadow(card: &RgbaImage, shadow: Shadow, radius: u32) -> RgbaImage {
    let blur = shadow.size;
    let offset = shadow_offset(blur);
    let (cw, ch) = card.dimensions();
    let (canvas_w, canvas_h) = (cw + blur * 2 + offset, ch + blur * 2 + offset);

    // Uniform colour with varying alpha, so blurring never darkens fringes.
    let [r, g, b, a] = shadow.color.0;
    let mut silhouette = RgbaImage::from_pixel(canvas_w, canvas_h, Rgba([r, g, b, 0]));
    let origin = blur + offset;
    for y in 0..ch {
        for x in 0..cw {
            let coverage = rounded_rect_coverage(x, y, cw, ch, radius);
            let alpha = (f32::from(a) * coverage).round() as u8;
            silhouette.put_pixel(origin + x, origin + y, Rgba([r, g, b, alpha]));
        }
    }

    let mut canvas = imageops::blur(&silhouette, blur as f32 / 2.0);
    imageops::overlay(&mut canvas, card, i64::from(blur), i64::from(blur));
    canvas
}
