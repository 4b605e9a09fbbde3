//! Browser configuration.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! serialised to a TOML table and the user's file is merged on top of it, so
//! a config only needs the keys it wants to override.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! thumbnail_size = 300                # Longer edge of a thumbnail, pixels
//! cache_size = 3000                   # In-memory thumbnails
//! disk_cache_size_bytes = 536870912   # On-disk budget (512 MiB)
//! initial_load_count = 30             # Thumbnails requested on folder open
//!
//! image_border = true
//! border_width = 1
//! border_color = "#e0e0e0"
//!
//! image_shadow = true
//! shadow_size = 3
//! shadow_color = "#e0e0e0"
//!
//! image_rounded = true
//! rounded_size = 6
//!
//! preview_scale = 80                  # Viewer fit-to-screen, percent
//!
//! [layout]
//! mode = "waterfall"                  # or "grid": square cells
//! target_column_width = 200
//! max_columns = 6
//! grid_columns = 6
//! grid_min_column_width = 100
//! gutter = 10
//! prefetch_above = 10
//! prefetch_below = 20
//!
//! [pipeline]
//! # workers = 4                       # Default: CPU cores
//! # task_timeout_ms = 30000
//! # cache_dir = "/var/cache/thumbflow"
//! prefer_embedded_preview = true
//! ```
//!
//! ## Partial Configuration
//!
//! ```toml
//! thumbnail_size = 240
//! image_shadow = false
//!
//! [layout]
//! max_columns = 4
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{Border, Color, Dimensions, Shadow, ThumbnailStyle, fit_within};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File name looked up inside a config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Browser configuration loaded from `config.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserConfig {
    /// Target longer edge of a thumbnail in pixels.
    pub thumbnail_size: u32,
    /// Tier-1 capacity in thumbnails.
    pub cache_size: usize,
    /// Tier-2 budget in bytes.
    pub disk_cache_size_bytes: u64,
    /// Items requested at `VISIBLE` priority when a folder opens.
    pub initial_load_count: usize,
    pub image_border: bool,
    pub border_width: u32,
    pub border_color: Color,
    pub image_shadow: bool,
    pub shadow_size: u32,
    pub shadow_color: Color,
    pub image_rounded: bool,
    pub rounded_size: u32,
    /// Viewer fit-to-screen scale in percent (1-100).
    pub preview_scale: u32,
    pub layout: LayoutConfig,
    pub pipeline: PipelineConfig,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        let rule = Color::rgb(0xe0, 0xe0, 0xe0);
        Self {
            thumbnail_size: 300,
            cache_size: 3000,
            disk_cache_size_bytes: 512 * 1024 * 1024,
            initial_load_count: 30,
            image_border: true,
            border_width: 1,
            border_color: rule,
            image_shadow: true,
            shadow_size: 3,
            shadow_color: rule,
            image_rounded: true,
            rounded_size: 6,
            preview_scale: 80,
            layout: LayoutConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl BrowserConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thumbnail_size == 0 {
            return Err(ConfigError::Validation(
                "thumbnail_size must be non-zero".into(),
            ));
        }
        if self.cache_size == 0 {
            return Err(ConfigError::Validation("cache_size must be non-zero".into()));
        }
        if self.disk_cache_size_bytes == 0 {
            return Err(ConfigError::Validation(
                "disk_cache_size_bytes must be non-zero".into(),
            ));
        }
        if !(1..=100).contains(&self.preview_scale) {
            return Err(ConfigError::Validation(
                "preview_scale must be 1-100".into(),
            ));
        }
        if self.layout.max_columns == 0 {
            return Err(ConfigError::Validation(
                "layout.max_columns must be non-zero".into(),
            ));
        }
        if self.layout.target_column_width == 0 {
            return Err(ConfigError::Validation(
                "layout.target_column_width must be non-zero".into(),
            ));
        }
        if self.layout.grid_columns == 0 || self.layout.grid_min_column_width == 0 {
            return Err(ConfigError::Validation(
                "layout.grid_columns and layout.grid_min_column_width must be non-zero".into(),
            ));
        }
        if self.pipeline.workers == Some(0) {
            return Err(ConfigError::Validation(
                "pipeline.workers must be at least 1".into(),
            ));
        }
        if self.pipeline.task_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "pipeline.task_timeout_ms must be non-zero (omit it to disable the timeout)".into(),
            ));
        }
        Ok(())
    }

    /// The style every thumbnail is rendered with.
    ///
    /// A stage that is switched off, or sized zero, is left out entirely so
    /// it does not change the style hash.
    pub fn style(&self) -> ThumbnailStyle {
        ThumbnailStyle {
            border: (self.image_border && self.border_width > 0).then_some(Border {
                width: self.border_width,
                color: self.border_color,
            }),
            shadow: (self.image_shadow && self.shadow_size > 0).then_some(Shadow {
                size: self.shadow_size,
                color: self.shadow_color,
            }),
            corner_radius: (self.image_rounded && self.rounded_size > 0)
                .then_some(self.rounded_size),
        }
    }

    /// Size the viewer shows an image at: fit inside `preview_scale` percent
    /// of the screen, never enlarged.
    pub fn preview_bounds(&self, screen: Dimensions, image: Dimensions) -> Dimensions {
        let scale = |v: u32| ((u64::from(v) * u64::from(self.preview_scale)) / 100) as u32;
        let (width, height) = fit_within(
            (image.width, image.height),
            (scale(screen.width).max(1), scale(screen.height).max(1)),
        );
        Dimensions { width, height }
    }
}

/// How items are placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// Shortest-column masonry; item height follows the aspect ratio.
    #[default]
    Waterfall,
    /// Square cells in row-major order.
    Grid,
}

/// Grid geometry and prefetch window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    pub mode: LayoutMode,
    /// Preferred column width in waterfall mode; the column count is
    /// derived from it.
    pub target_column_width: u32,
    pub max_columns: u32,
    /// Column count in grid mode, reduced when the window is too narrow.
    pub grid_columns: u32,
    /// Grid columns never get narrower than this.
    pub grid_min_column_width: u32,
    /// Space between columns and around the grid.
    pub gutter: u32,
    /// Items above the visible range that are prefetched.
    pub prefetch_above: usize,
    /// Items below the visible range that are prefetched.
    pub prefetch_below: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            mode: LayoutMode::Waterfall,
            target_column_width: 200,
            max_columns: 6,
            grid_columns: 6,
            grid_min_column_width: 100,
            gutter: 10,
            prefetch_above: 10,
            prefetch_below: 20,
        }
    }
}

/// Worker pool and disk cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum number of decode workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub workers: Option<usize>,
    /// Per-task timeout in milliseconds. Absent means no timeout.
    pub task_timeout_ms: Option<u64>,
    /// Tier-2 directory. Defaults to the user cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Decode RAW files from their embedded JPEG preview when one exists.
    pub prefer_embedded_preview: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            task_timeout_ms: None,
            cache_dir: None,
            prefer_embedded_preview: true,
        }
    }
}

impl PipelineConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    /// Configured cache directory, else `<user cache dir>/thumbflow`, else a
    /// directory under the system temp dir.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("thumbflow"),
        }
    }
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_workers(config: &PipelineConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.workers.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(BrowserConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// Tables merge key by key; any other overlay value replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist, `Err` if it exists but is
/// not valid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<BrowserConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: BrowserConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a file, or the stock defaults when it does not exist.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(path: &Path) -> Result<BrowserConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Default location of the user config file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("thumbflow").join(CONFIG_FILE_NAME))
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# thumbflow configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Longer edge of a thumbnail in pixels. Changing it invalidates cached
# thumbnails (they are keyed by size and style).
thumbnail_size = 300

# Thumbnails kept in memory.
cache_size = 3000

# On-disk thumbnail budget in bytes (512 MiB). The least recently used
# entries are evicted when it is exceeded.
disk_cache_size_bytes = 536870912

# Thumbnails requested as soon as a folder is opened.
initial_load_count = 30

# ---------------------------------------------------------------------------
# Thumbnail style
# ---------------------------------------------------------------------------
# Solid frame around each thumbnail.
image_border = true
border_width = 1
border_color = "#e0e0e0"

# Blurred drop shadow. The offset is half the size, rounded up.
image_shadow = true
shadow_size = 3
shadow_color = "#e0e0e0"   # #rrggbb or #rrggbbaa

# Rounded corners, radius in pixels.
image_rounded = true
rounded_size = 6

# Viewer fit-to-screen scale, percent of the screen (1-100).
preview_scale = 80

# ---------------------------------------------------------------------------
# Layout
# ---------------------------------------------------------------------------
[layout]
# "waterfall" keeps each image's aspect ratio; "grid" uses square cells.
mode = "waterfall"

# Waterfall: preferred column width; the column count follows from the
# window width.
target_column_width = 200
max_columns = 6

# Grid: fixed column count, reduced when columns would get narrower than
# grid_min_column_width.
grid_columns = 6
grid_min_column_width = 100

# Space between columns and around the grid.
gutter = 10

# Items around the visible range that are fetched ahead of scrolling.
prefetch_above = 10
prefetch_below = 20

# ---------------------------------------------------------------------------
# Pipeline
# ---------------------------------------------------------------------------
[pipeline]
# Maximum parallel decode workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# workers = 4

# Abandon a thumbnail that takes longer than this (milliseconds).
# task_timeout_ms = 30000

# Where thumbnails are stored on disk. Default: the user cache directory.
# cache_dir = "/var/cache/thumbflow"

# Render RAW thumbnails from the embedded JPEG preview when one exists.
prefer_embedded_preview = true
"##
}
