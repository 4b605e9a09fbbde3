//! Image decoding and thumbnail rendering in pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Format dispatch** | signature sniff ([`format`]) |
//! | **Raster decode** | `image` crate decoders |
//! | **RAW preview** | custom TIFF IFD / RAF / marker-scan extractor |
//! | **RAW full decode** | `rawloader` + half-size develop |
//! | **Orientation, capture time** | `kamadak-exif` |
//! | **Thumbnail** | `imageops::thumbnail` (area average) / Lanczos3 upscale |
//! | **Style** | border, blurred drop shadow, anti-aliased rounded clip |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension and mask math (unit testable)
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Style**: [`ThumbnailStyle`] and the post-processing pipeline
//! - **Operations**: High-level functions combining decode, scale and style

pub mod backend;
mod calculations;
pub mod format;
pub mod metadata;
pub mod operations;
pub mod raw_preview;
pub mod rust_backend;
pub mod style;

pub use backend::{DecodeError, DecodeMode, DecodedImage, Dimensions, ImageBackend, ImageInfo};
pub use calculations::{fit_longest_edge, fit_within, shadow_offset};
pub use format::{FormatKind, RawFamily, is_supported, supported_extensions};
pub use operations::{
    Thumbnail, generate_thumbnail, placeholder_thumbnail, render_thumbnail, scale_to_target,
};
pub use rust_backend::RustBackend;
pub use style::{Border, Color, Shadow, ThumbnailStyle, apply_style};
