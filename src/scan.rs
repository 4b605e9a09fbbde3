//! Folder enumeration.
//!
//! Turns a directory into the ordered list of [`ImageAsset`]s the layout and
//! the request coordinator work from. Only cheap work happens here: each file
//! is `stat`ed and its header sniffed. Dimensions come later, from
//! [`probe_assets`], because they need a (partial) decode.
//!
//! ## What counts as an image
//!
//! Files whose extension is in [`imaging::supported_extensions`]. Hidden
//! entries (leading `.`) are skipped, and so is anything the walk cannot
//! read: a broken symlink or an unreadable subdirectory is logged and left
//! out rather than failing the whole folder.
//!
//! ## Ordering
//!
//! [`SortOrder::Path`] (the default) sorts by full path, so results are
//! stable across runs. The other orders mirror what a browser offers:
//! case-insensitive file name, newest first, largest first.

use crate::imaging::{self, ImageBackend};
use crate::types::ImageAsset;
use rayon::prelude::*;
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How [`scan_folder`] results are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Path,
    /// Case-insensitive file name.
    Name,
    /// Most recently modified first.
    Modified,
    /// Largest first.
    Size,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "path" => Ok(Self::Path),
            "name" => Ok(Self::Name),
            "modified" | "mtime" => Ok(Self::Modified),
            "size" => Ok(Self::Size),
            other => Err(format!(
                "unknown sort order '{other}' (expected path, name, modified or size)"
            )),
        }
    }
}

/// Enumerate supported images under `root`, sorted by path.
///
/// With `recursive` false only direct children are considered.
pub fn scan_folder(root: &Path, recursive: bool) -> Result<Vec<ImageAsset>, ScanError> {
    scan_folder_sorted(root, recursive, SortOrder::Path)
}

/// [`scan_folder`] with an explicit ordering.
pub fn scan_folder_sorted(
    root: &Path,
    recursive: bool,
    order: SortOrder,
) -> Result<Vec<ImageAsset>, ScanError> {
    if !std::fs::metadata(root)?.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut assets: Vec<ImageAsset> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|e| e.file_type().is_file() && imaging::is_supported(e.path()))
        .filter_map(|e| match ImageAsset::stat(e.path()) {
            Ok(asset) => Some(asset),
            Err(err) => {
                log::warn!("skipping {}: {err}", e.path().display());
                None
            }
        })
        .collect();

    sort_assets(&mut assets, order);
    log::debug!("scanned {}: {} images", root.display(), assets.len());
    Ok(assets)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Reorder in place. Ties always fall back to path order.
pub fn sort_assets(assets: &mut [ImageAsset], order: SortOrder) {
    match order {
        SortOrder::Path => assets.sort_by(|a, b| a.path.cmp(&b.path)),
        SortOrder::Name => assets.sort_by(|a, b| {
            a.file_name()
                .to_lowercase()
                .cmp(&b.file_name().to_lowercase())
                .then_with(|| a.path.cmp(&b.path))
        }),
        SortOrder::Modified => assets.sort_by_key(|a| (Reverse(a.modified), a.path.clone())),
        SortOrder::Size => assets.sort_by_key(|a| (Reverse(a.file_size), a.path.clone())),
    }
}

/// Fill in dimensions and capture time using the backend's cheap probe,
/// in parallel. Files that vanished since the scan are dropped; probe
/// failures keep the asset with unknown dimensions.
pub fn probe_assets(assets: Vec<ImageAsset>, backend: &dyn ImageBackend) -> Vec<ImageAsset> {
    assets
        .into_par_iter()
        .filter_map(|asset| match ImageAsset::probe(&asset.path, backend) {
            Ok(probed) => Some(probed),
            Err(e) => {
                log::warn!("skipping {}: {e}", asset.path.display());
                None
            }
        })
        .collect()
}
