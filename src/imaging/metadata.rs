//! EXIF orientation and capture time.
//!
//! Read with `kamadak-exif` straight from the container bytes (JPEG, TIFF,
//! PNG, WebP and the TIFF-structured RAWs it understands). Callers fall back
//! to the embedded preview's EXIF when the container itself is opaque.

use chrono::{NaiveDate, NaiveDateTime};
use image::DynamicImage;
use std::io::Cursor;

/// EXIF fields the pipeline cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExifSummary {
    /// 1–8, or `None` when no valid tag exists.
    pub orientation: Option<u8>,
    pub capture_time: Option<NaiveDateTime>,
}

impl ExifSummary {
    pub fn orientation_or_default(&self) -> u8 {
        self.orientation.unwrap_or(1)
    }

    /// Prefer fields from `self`, fill gaps from `other`.
    pub fn or(self, other: ExifSummary) -> ExifSummary {
        ExifSummary {
            orientation: self.orientation.or(other.orientation),
            capture_time: self.capture_time.or(other.capture_time),
        }
    }
}

/// Parse EXIF from a whole container. Missing or unreadable EXIF is not an
/// error: most PNGs and many scans have none.
pub fn read_exif_summary(data: &[u8]) -> ExifSummary {
    let mut cursor = Cursor::new(data);
    match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => summarize(&exif),
        Err(_) => ExifSummary::default(),
    }
}

fn summarize(exif: &exif::Exif) -> ExifSummary {
    let orientation = exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .and_then(|v| match v {
            1..=8 => Some(v as u8),
            _ => None,
        });

    let capture_time = [exif::Tag::DateTimeOriginal, exif::Tag::DateTime]
        .into_iter()
        .find_map(|tag| {
            let field = exif.get_field(tag, exif::In::PRIMARY)?;
            parse_exif_datetime(&field.value)
        });

    ExifSummary {
        orientation,
        capture_time,
    }
}

fn parse_exif_datetime(value: &exif::Value) -> Option<NaiveDateTime> {
    let exif::Value::Ascii(parts) = value else {
        return None;
    };
    let raw = parts.first()?;
    let dt = exif::DateTime::from_ascii(raw).ok()?;
    NaiveDate::from_ymd_opt(i32::from(dt.year), u32::from(dt.month), u32::from(dt.day))?
        .and_hms_opt(
            u32::from(dt.hour),
            u32::from(dt.minute),
            u32::from(dt.second),
        )
}

/// Rotate/flip pixels so that an image tagged with `orientation` displays
/// upright. Values outside 2..=8 leave the image untouched.
pub fn apply_orientation(img: DynamicImage, orientation: u8) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
