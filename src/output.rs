//! CLI output formatting.
//!
//! Output is **information-centric**: each image leads with its positional
//! index and file name, with paths, sizes and errors shown as indented
//! context lines underneath.
//!
//! # Output Format
//!
//! ## Scan
//!
//! ```text
//! Photos (3 photos)
//! 001 dawn.jpg
//!     Source: trips/dawn.jpg
//!     Size: 4000x3000 JPG
//! 002 DSC_0042.NEF
//!     Source: DSC_0042.NEF
//!     Size: unknown RAW/TiffBased
//! ```
//!
//! ## Warm
//!
//! ```text
//! 001 dawn.jpg: 300x225
//! 002 broken.jpg: placeholder
//!     Error: unsupported format: /photos/broken.jpg: unrecognised signature
//!
//! Warmed 2 thumbnails in 0.42s (1 failed)
//! Cache: 0 from memory, 0 from disk, 2 rendered (2 total)
//! ```
//!
//! ## Layout
//!
//! ```text
//! Layout: 3 columns x 200px, gutter 10, height 1240
//! 001 dawn.jpg  col 0  (10, 10)  200x150
//! 002 tall.jpg  col 1  (220, 10)  200x300
//! ```
//!
//! ## Cache
//!
//! ```text
//! Cache: /home/me/.cache/thumbflow/v1
//!     Entries: 128
//!     Size: 6.2 MiB of 512.0 MiB (1%)
//! ```
//!
//! # Architecture
//!
//! Each display has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::cache::{CacheStats, DiskTier};
use crate::coordinator::ThumbnailEvent;
use crate::imaging::Thumbnail;
use crate::layout::WaterfallLayout;
use crate::types::ImageAsset;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count using binary units.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Path relative to `root` when it lives under it, otherwise as given.
fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ============================================================================
// Scan
// ============================================================================

/// Format the scanned folder as an inventory.
pub fn format_scan_output(assets: &[ImageAsset], root: &Path) -> Vec<String> {
    let title = root
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());
    let mut lines = vec![format!("{} ({} photos)", title, assets.len())];

    for (i, asset) in assets.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), asset.file_name()));
        lines.push(format!(
            "{}Source: {}",
            indent(1),
            display_relative(&asset.path, root)
        ));
        let size = match asset.dimensions {
            Some(d) => format!("{}x{}", d.width, d.height),
            None => "unknown".to_string(),
        };
        lines.push(format!("{}Size: {} {}", indent(1), size, asset.format.label()));
    }
    lines
}

pub fn print_scan_output(assets: &[ImageAsset], root: &Path) {
    for line in format_scan_output(assets, root) {
        println!("{}", line);
    }
}

// ============================================================================
// Warm
// ============================================================================

/// Format one completed thumbnail request.
///
/// `index` is the 1-based position of the image in the scanned folder.
pub fn format_thumbnail_event(index: usize, event: &ThumbnailEvent) -> Vec<String> {
    let name = file_name(&event.path);
    let mut lines = Vec::new();
    if event.is_placeholder() {
        lines.push(format!("{} {}: placeholder", format_index(index), name));
    } else {
        lines.push(format!(
            "{} {}: {}x{}",
            format_index(index),
            name,
            event.thumbnail.width(),
            event.thumbnail.height()
        ));
    }
    if let Some(err) = &event.error {
        lines.push(format!("{}Error: {}", indent(1), err));
    }
    lines
}

/// Format a request answered straight from memory.
pub fn format_cached_thumbnail(index: usize, path: &Path, thumbnail: &Thumbnail) -> Vec<String> {
    vec![format!(
        "{} {}: {}x{} (memory)",
        format_index(index),
        file_name(path),
        thumbnail.width(),
        thumbnail.height()
    )]
}

/// Closing summary for a warm run.
pub fn format_warm_summary(
    completed: usize,
    failed: usize,
    elapsed: Duration,
    stats: &CacheStats,
) -> Vec<String> {
    let mut headline = format!(
        "Warmed {} thumbnails in {:.2}s",
        completed,
        elapsed.as_secs_f64()
    );
    if failed > 0 {
        headline.push_str(&format!(" ({} failed)", failed));
    }
    vec![String::new(), headline, format!("Cache: {}", stats)]
}

pub fn print_warm_summary(completed: usize, failed: usize, elapsed: Duration, stats: &CacheStats) {
    for line in format_warm_summary(completed, failed, elapsed, stats) {
        println!("{}", line);
    }
}

// ============================================================================
// Layout
// ============================================================================

/// Format the computed waterfall placement, one line per item.
///
/// `assets` and the layout's slots share indices; extra slots without an
/// asset are labelled by index only.
pub fn format_layout(layout: &WaterfallLayout, assets: &[ImageAsset]) -> Vec<String> {
    let mut lines = vec![format!(
        "Layout: {} columns x {}px, gutter {}, height {}",
        layout.columns(),
        layout.column_width(),
        layout.config().gutter,
        layout.content_height()
    )];
    for slot in layout.slots() {
        let name = assets
            .get(slot.index)
            .map(ImageAsset::file_name)
            .unwrap_or_default();
        lines.push(format!(
            "{} {}  col {}  ({}, {})  {}x{}",
            format_index(slot.index + 1),
            name,
            slot.column,
            slot.x,
            slot.y,
            slot.width,
            slot.height
        ));
    }
    lines
}

pub fn print_layout(layout: &WaterfallLayout, assets: &[ImageAsset]) {
    for line in format_layout(layout, assets) {
        println!("{}", line);
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Format the on-disk tier's occupancy.
pub fn format_disk_summary(disk: &DiskTier) -> Vec<String> {
    let total = disk.total_bytes();
    let budget = disk.budget();
    let percent = if budget == 0 {
        0
    } else {
        total.saturating_mul(100) / budget
    };
    vec![
        format!("Cache: {}", disk.root().display()),
        format!("{}Entries: {}", indent(1), disk.len()),
        format!(
            "{}Size: {} of {} ({}%)",
            indent(1),
            format_bytes(total),
            format_bytes(budget),
            percent
        ),
    ]
}

pub fn print_disk_summary(disk: &DiskTier) {
    for line in format_disk_summary(disk) {
        println!("{}", line);
    }
}
