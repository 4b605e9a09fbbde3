//! File-format identification by signature.
//!
//! Photo folders are full of misnamed files: JPEGs saved as `.png`, RAF files
//! renamed to `.jpg` by careless import tools, TIFF-structured RAWs with a
//! `.tif` extension. Dispatch therefore looks at the first bytes of the file
//! and only consults the extension where the signature is ambiguous (a plain
//! TIFF header is shared by TIFF images and most RAW formats).
//!
//! | Family | Signature |
//! |---|---|
//! | Canon CR2 | TIFF header + `CR` at byte 8 |
//! | Canon CR3 | ISO-BMFF `ftyp` brand `crx ` |
//! | Canon CRW | `HEAPCCDR` at byte 6 |
//! | Fuji RAF | `FUJIFILMCCD-RAW` |
//! | Olympus ORF | `IIRO` / `IIRS` / `MMOR` |
//! | Panasonic RW2 | `IIU\0` |
//! | Sigma X3F | `FOVb` |
//! | Minolta MRW | `\0MRM` |
//! | Other RAWs (NEF, ARW, DNG, PEF, ...) | TIFF header + RAW extension |

use image::ImageFormat;
use std::path::Path;

/// Raster extensions decoded through the `image` crate.
const RASTER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tiff", "tif", "webp"];

/// Camera RAW extensions recognised by the browser.
const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "arw", "dng", "orf", "rw2", "pef", "srw", "raf", "3fr", "fff", "dcr", "kdc",
    "mdc", "mos", "mrw", "nrw", "ptx", "r3d", "rwl", "rwz", "x3f", "bay", "crw",
];

/// Camera RAW container families with distinct preview layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawFamily {
    /// Generic TIFF-structured RAW (NEF, ARW, DNG, PEF, SRW, ...).
    TiffBased,
    CanonCr2,
    CanonCr3,
    CanonCrw,
    FujiRaf,
    OlympusOrf,
    PanasonicRw2,
    SigmaX3f,
    MinoltaMrw,
}

impl RawFamily {
    /// Whether the container is walkable as a TIFF IFD chain.
    pub fn is_tiff_structured(self) -> bool {
        matches!(
            self,
            RawFamily::TiffBased
                | RawFamily::CanonCr2
                | RawFamily::OlympusOrf
                | RawFamily::PanasonicRw2
        )
    }
}

/// Closed set of decode variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Standard(ImageFormat),
    Raw(RawFamily),
    Unknown,
}

impl FormatKind {
    pub fn is_raw(self) -> bool {
        matches!(self, FormatKind::Raw(_))
    }

    /// Short human-readable label, used by the CLI.
    pub fn label(self) -> String {
        match self {
            FormatKind::Standard(fmt) => fmt
                .extensions_str()
                .first()
                .map(|e| e.to_uppercase())
                .unwrap_or_else(|| format!("{fmt:?}")),
            FormatKind::Raw(family) => format!("RAW/{family:?}"),
            FormatKind::Unknown => "unknown".to_string(),
        }
    }
}

/// Every extension the browser lists, raster first.
pub fn supported_extensions() -> impl Iterator<Item = &'static str> {
    RASTER_EXTENSIONS.iter().chain(RAW_EXTENSIONS).copied()
}

fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether a path carries an extension the browser lists.
pub fn is_supported(path: &Path) -> bool {
    extension_lower(path).is_some_and(|e| supported_extensions().any(|s| s == e))
}

pub fn has_raw_extension(path: &Path) -> bool {
    extension_lower(path).is_some_and(|e| RAW_EXTENSIONS.contains(&e.as_str()))
}

fn is_tiff_header(data: &[u8]) -> bool {
    data.starts_with(b"II*\0") || data.starts_with(b"MM\0*")
}

/// Identify a RAW family from its leading bytes, if the signature is unique.
fn sniff_raw_signature(data: &[u8]) -> Option<RawFamily> {
    if data.starts_with(b"FUJIFILMCCD-RAW") {
        return Some(RawFamily::FujiRaf);
    }
    if data.starts_with(b"IIRO") || data.starts_with(b"IIRS") || data.starts_with(b"MMOR") {
        return Some(RawFamily::OlympusOrf);
    }
    if data.starts_with(b"IIU\0") {
        return Some(RawFamily::PanasonicRw2);
    }
    if data.starts_with(b"FOVb") {
        return Some(RawFamily::SigmaX3f);
    }
    if data.starts_with(b"\0MRM") {
        return Some(RawFamily::MinoltaMrw);
    }
    if data.len() >= 14 && &data[6..14] == b"HEAPCCDR" {
        return Some(RawFamily::CanonCrw);
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" && &data[8..12] == b"crx " {
        return Some(RawFamily::CanonCr3);
    }
    if is_tiff_header(data) && data.len() >= 10 && &data[8..10] == b"CR" {
        return Some(RawFamily::CanonCr2);
    }
    None
}

/// Classify a file from its header bytes, using the extension only to split
/// TIFF images from TIFF-structured RAWs.
pub fn sniff(path: &Path, header: &[u8]) -> FormatKind {
    if let Some(family) = sniff_raw_signature(header) {
        return FormatKind::Raw(family);
    }
    if is_tiff_header(header) && has_raw_extension(path) {
        return FormatKind::Raw(RawFamily::TiffBased);
    }
    match image::guess_format(header) {
        Ok(fmt) if fmt.reading_enabled() => FormatKind::Standard(fmt),
        _ => FormatKind::Unknown,
    }
}

/// Number of header bytes [`sniff`] needs.
pub const SNIFF_LEN: usize = 32;
