//! Waterfall (masonry) layout.
//!
//! Items keep their order and each goes into the currently shortest
//! column, ties going to the leftmost. Columns have a fixed width; an item's
//! height follows from its aspect ratio. The grid has an outer margin equal
//! to the gutter:
//!
//! ```text
//! |g|  col 0  |g|  col 1  |g|  col 2  |g|
//! ```
//!
//! Only aspect ratios are needed, so the layout can settle from file
//! metadata before any thumbnail has been rendered.
//!
//! In [`LayoutMode::Grid`] every cell is a square one column wide. With
//! equal heights the shortest-column rule fills rows left to right, so the
//! same placer serves both modes.

use crate::config::{LayoutConfig, LayoutMode};
use crate::types::{DEFAULT_HEIGHT_RATIO, ImageAsset};
use serde::Serialize;
use std::ops::Range;

/// Narrowest aspect ratio (width / height) laid out as is.
pub const MIN_ASPECT: f64 = 0.4;
/// Widest aspect ratio laid out as is.
pub const MAX_ASPECT: f64 = 2.5;
/// Used when the aspect ratio is unknown.
pub const DEFAULT_ASPECT: f64 = 1.0 / DEFAULT_HEIGHT_RATIO;

/// Position of one item in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayoutSlot {
    pub index: usize,
    pub column: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl LayoutSlot {
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Clamp an aspect ratio into the supported range; non-finite or
/// non-positive values fall back to [`DEFAULT_ASPECT`].
pub fn normalize_aspect(aspect: f64) -> f64 {
    if aspect.is_finite() && aspect > 0.0 {
        aspect.clamp(MIN_ASPECT, MAX_ASPECT)
    } else {
        DEFAULT_ASPECT
    }
}

/// Aspect ratio of an asset for layout purposes.
pub fn asset_aspect(asset: &ImageAsset) -> f64 {
    asset.aspect_ratio().map_or(DEFAULT_ASPECT, normalize_aspect)
}

/// Number of columns that fit `container_width`.
///
/// Waterfall mode fits columns of `target_column_width` up to
/// `max_columns`; grid mode wants `grid_columns` and drops columns that
/// would be narrower than `grid_min_column_width`.
///
/// # Examples
/// ```
/// # use thumbflow::config::LayoutConfig;
/// # use thumbflow::layout::column_count;
/// let config = LayoutConfig::default(); // 200px columns, 10px gutter, max 6
/// assert_eq!(column_count(1000, &config), 4);
/// assert_eq!(column_count(100, &config), 1);
/// assert_eq!(column_count(5000, &config), 6);
/// ```
pub fn column_count(container_width: u32, config: &LayoutConfig) -> usize {
    let (min_width, wanted) = match config.mode {
        LayoutMode::Waterfall => (config.target_column_width, config.max_columns),
        LayoutMode::Grid => (config.grid_min_column_width, config.grid_columns),
    };
    let usable = container_width.saturating_sub(config.gutter);
    let per_column = min_width + config.gutter;
    let fit = usable / per_column.max(1);
    fit.clamp(1, wanted.max(1)) as usize
}

/// Width of each column once the gutters are taken out.
pub fn column_width(container_width: u32, columns: usize, gutter: u32) -> u32 {
    let columns = columns.max(1) as u32;
    let gutters = (columns + 1) * gutter;
    (container_width.saturating_sub(gutters) / columns).max(1)
}

/// Running state of a placement pass.
#[derive(Debug, Clone)]
struct Placer {
    mode: LayoutMode,
    gutter: u32,
    column_width: u32,
    heights: Vec<u32>,
}

impl Placer {
    fn new(container_width: u32, columns: usize, gutter: u32, mode: LayoutMode) -> Self {
        Self {
            mode,
            gutter,
            column_width: column_width(container_width, columns, gutter),
            heights: vec![gutter; columns.max(1)],
        }
    }

    fn place(&mut self, index: usize, aspect: f64) -> LayoutSlot {
        // min_by_key keeps the first of equal minima: ties go left.
        let (column, &y) = self
            .heights
            .iter()
            .enumerate()
            .min_by_key(|&(_, h)| *h)
            .unwrap_or((0, &self.gutter));
        let height = match self.mode {
            LayoutMode::Waterfall => {
                ((f64::from(self.column_width) / normalize_aspect(aspect)).round() as u32).max(1)
            }
            LayoutMode::Grid => self.column_width,
        };
        if let Some(h) = self.heights.get_mut(column) {
            *h = y + height + self.gutter;
        }
        LayoutSlot {
            index,
            column,
            x: self.gutter + column as u32 * (self.column_width + self.gutter),
            y,
            width: self.column_width,
            height,
        }
    }

    fn content_height(&self) -> u32 {
        self.heights.iter().copied().max().unwrap_or(self.gutter)
    }

    /// Upper bound on the height of any slot.
    fn tallest(&self) -> u32 {
        match self.mode {
            LayoutMode::Waterfall => (f64::from(self.column_width) / MIN_ASPECT).ceil() as u32,
            LayoutMode::Grid => self.column_width,
        }
    }
}

/// Lay out items from scratch in waterfall mode.
///
/// Deterministic: the same aspect ratios, width, column count and gutter
/// always give the same slots.
pub fn layout(
    aspects: &[f64],
    container_width: u32,
    column_count: usize,
    gutter: u32,
) -> Vec<LayoutSlot> {
    layout_in_mode(aspects, container_width, column_count, gutter, LayoutMode::Waterfall)
}

/// [`layout`] for either mode. Grid mode ignores the aspect ratios.
pub fn layout_in_mode(
    aspects: &[f64],
    container_width: u32,
    column_count: usize,
    gutter: u32,
    mode: LayoutMode,
) -> Vec<LayoutSlot> {
    let mut placer = Placer::new(container_width, column_count, gutter, mode);
    aspects
        .iter()
        .enumerate()
        .map(|(i, &a)| placer.place(i, a))
        .collect()
}

/// Incremental layout for a growing list of items.
#[derive(Debug, Clone)]
pub struct WaterfallLayout {
    config: LayoutConfig,
    container_width: u32,
    columns: usize,
    placer: Placer,
    aspects: Vec<f64>,
    slots: Vec<LayoutSlot>,
}

impl WaterfallLayout {
    pub fn new(config: LayoutConfig, container_width: u32) -> Self {
        let columns = column_count(container_width, &config);
        Self {
            placer: Placer::new(container_width, columns, config.gutter, config.mode),
            config,
            container_width,
            columns,
            aspects: Vec::new(),
            slots: Vec::new(),
        }
    }

    /// Place new items after the existing ones and return their slots.
    pub fn append(&mut self, aspects: &[f64]) -> &[LayoutSlot] {
        let start = self.slots.len();
        for (offset, &aspect) in aspects.iter().enumerate() {
            let slot = self.placer.place(start + offset, aspect);
            self.slots.push(slot);
        }
        self.aspects.extend_from_slice(aspects);
        &self.slots[start..]
    }

    /// Re-run placement for a new container width. Item order is kept.
    ///
    /// Returns whether the column count changed.
    pub fn resize(&mut self, container_width: u32) -> bool {
        let columns = column_count(container_width, &self.config);
        let changed = columns != self.columns;
        self.container_width = container_width;
        self.relayout();
        changed
    }

    /// Switch between waterfall and grid, re-placing every item.
    ///
    /// Returns `false`, doing nothing, when the mode is unchanged.
    pub fn set_mode(&mut self, mode: LayoutMode) -> bool {
        if self.config.mode == mode {
            return false;
        }
        self.config.mode = mode;
        self.relayout();
        true
    }

    pub fn mode(&self) -> LayoutMode {
        self.config.mode
    }

    pub fn clear(&mut self) {
        self.aspects.clear();
        self.slots.clear();
        self.placer = Placer::new(
            self.container_width,
            self.columns,
            self.config.gutter,
            self.config.mode,
        );
    }

    fn relayout(&mut self) {
        self.columns = column_count(self.container_width, &self.config);
        self.placer = Placer::new(
            self.container_width,
            self.columns,
            self.config.gutter,
            self.config.mode,
        );
        self.slots = self
            .aspects
            .iter()
            .enumerate()
            .map(|(i, &a)| self.placer.place(i, a))
            .collect();
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn slots(&self) -> &[LayoutSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn column_width(&self) -> u32 {
        self.placer.column_width
    }

    pub fn container_width(&self) -> u32 {
        self.container_width
    }

    /// Height of the tallest column, bottom margin included.
    pub fn content_height(&self) -> u32 {
        self.placer.content_height()
    }

    /// Indices of the items intersecting the band `[top, bottom)`.
    ///
    /// Slot `y` never decreases with the index (each item starts at the
    /// shortest column, and columns only grow), so the range is found by
    /// binary search. It may include a few hidden items between visible
    /// ones; it never leaves out a visible one.
    pub fn visible_range(&self, top: u32, bottom: u32) -> Range<usize> {
        let end = self.slots.partition_point(|s| s.y < bottom);
        // The tallest possible item bounds how far above `top` a visible
        // item can start.
        let tallest = self.placer.tallest();
        let mut start = self
            .slots
            .partition_point(|s| s.y.saturating_add(tallest) <= top);
        while start < end && self.slots[start].bottom() <= top {
            start += 1;
        }
        start..end.max(start)
    }

    /// The visible range widened by the configured prefetch window.
    pub fn prefetch_range(&self, top: u32, bottom: u32) -> Range<usize> {
        let visible = self.visible_range(top, bottom);
        let start = visible.start.saturating_sub(self.config.prefetch_above);
        let end = (visible.end + self.config.prefetch_below).min(self.slots.len());
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: [f64; 5] = [0.5, 2.0, 1.0, 1.0, 0.5];

    fn config(target: u32, gutter: u32) -> LayoutConfig {
        LayoutConfig {
            target_column_width: target,
            max_columns: 6,
            gutter,
            prefetch_above: 1,
            prefetch_below: 2,
            ..LayoutConfig::default()
        }
    }

    fn grid_config(gutter: u32) -> LayoutConfig {
        LayoutConfig {
            mode: LayoutMode::Grid,
            gutter,
            ..LayoutConfig::default()
        }
    }

    // =========================================================================
    // layout()
    // =========================================================================

    #[test]
    fn scenario_two_columns_of_300() {
        let slots = layout(&SCENARIO, 600, 2, 0);
        let columns: Vec<usize> = slots.iter().map(|s| s.column).collect();
        assert_eq!(columns, vec![0, 1, 1, 1, 0]);
        let heights: Vec<u32> = slots.iter().map(|s| s.height).collect();
        assert_eq!(heights, vec![600, 150, 300, 300, 600]);
        assert!(slots.iter().all(|s| s.width == 300));

        let col0: u32 = slots.iter().filter(|s| s.column == 0).map(|s| s.height).sum();
        let col1: u32 = slots.iter().filter(|s| s.column == 1).map(|s| s.height).sum();
        assert_eq!((col0, col1), (1200, 750));
        // Within one item height of each other
        assert!(col0.abs_diff(col1) <= 600);
    }

    #[test]
    fn gutter_is_outer_margin_and_spacing() {
        let slots = layout(&[1.0, 1.0, 1.0], 320, 2, 10);
        // (320 - 3 * 10) / 2 = 145
        assert_eq!(slots[0].width, 145);
        assert_eq!((slots[0].x, slots[0].y), (10, 10));
        assert_eq!((slots[1].x, slots[1].y), (165, 10));
        assert_eq!((slots[2].x, slots[2].y), (10, 165));
    }

    #[test]
    fn ties_go_to_leftmost_column() {
        let slots = layout(&[1.0; 4], 400, 4, 0);
        let columns: Vec<usize> = slots.iter().map(|s| s.column).collect();
        assert_eq!(columns, vec![0, 1, 2, 3]);
    }

    #[test]
    fn layout_is_deterministic() {
        let aspects = [0.7, 1.3, 0.9, 2.2, 0.45, 1.0, 1.6];
        assert_eq!(layout(&aspects, 900, 3, 8), layout(&aspects, 900, 3, 8));
    }

    #[test]
    fn aspects_are_clamped_and_defaulted() {
        let slots = layout(&[0.1, 10.0, f64::NAN, -1.0], 200, 1, 0);
        assert_eq!(slots[0].height, 500); // 200 / 0.4
        assert_eq!(slots[1].height, 80); // 200 / 2.5
        assert_eq!(slots[2].height, 240); // 200 * 1.2
        assert_eq!(slots[3].height, 240);
    }

    #[test]
    fn column_count_adapts_to_width() {
        let c = config(200, 10);
        assert_eq!(column_count(0, &c), 1);
        // Two columns need 2 * 200 + 3 * 10
        assert_eq!(column_count(429, &c), 1);
        assert_eq!(column_count(430, &c), 2);
        assert_eq!(column_count(640, &c), 3);
        assert_eq!(column_count(100_000, &c), 6);
    }

    // =========================================================================
    // WaterfallLayout
    // =========================================================================

    #[test]
    fn append_matches_full_layout() {
        let mut waterfall = WaterfallLayout::new(config(200, 10), 650);
        waterfall.append(&SCENARIO[..2]);
        let tail = waterfall.append(&SCENARIO[2..]).to_vec();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].index, 2);

        let full = layout(&SCENARIO, 650, waterfall.columns(), 10);
        assert_eq!(waterfall.slots(), full.as_slice());
    }

    #[test]
    fn resize_changes_columns_but_keeps_order() {
        let aspects = [0.7, 1.3, 0.9, 2.2, 0.45, 1.0, 1.6, 0.8];
        let mut waterfall = WaterfallLayout::new(config(200, 10), 1300);
        waterfall.append(&aspects);
        let before = waterfall.columns();

        assert!(waterfall.resize(430));
        assert_ne!(waterfall.columns(), before);
        let indices: Vec<usize> = waterfall.slots().iter().map(|s| s.index).collect();
        assert_eq!(indices, (0..aspects.len()).collect::<Vec<_>>());
        assert_eq!(
            waterfall.slots(),
            layout(&aspects, 430, waterfall.columns(), 10).as_slice()
        );
        assert!(!waterfall.resize(431));
    }

    #[test]
    fn content_height_is_tallest_column() {
        let mut waterfall = WaterfallLayout::new(config(300, 0), 600);
        waterfall.append(&SCENARIO);
        assert_eq!(waterfall.content_height(), 1200);
        waterfall.clear();
        assert!(waterfall.is_empty());
        assert_eq!(waterfall.content_height(), 0);
    }

    #[test]
    fn visible_range_covers_band() {
        // One column of 200x200 squares, no gutter
        let mut waterfall = WaterfallLayout::new(config(200, 0), 200);
        waterfall.append(&[1.0; 10]);
        assert_eq!(waterfall.visible_range(0, 200), 0..1);
        assert_eq!(waterfall.visible_range(450, 900), 2..5);
        assert_eq!(waterfall.visible_range(5000, 6000), 10..10);
    }

    #[test]
    fn visible_range_includes_tall_item_started_above() {
        let mut waterfall = WaterfallLayout::new(config(300, 0), 600);
        waterfall.append(&SCENARIO);
        // Item 0 spans 0..600 in column 0, item 3 spans 450..750 in column 1
        let range = waterfall.visible_range(500, 520);
        assert!(range.contains(&0));
        assert!(range.contains(&3));
        assert!(!range.contains(&4));
    }

    #[test]
    fn prefetch_range_widens_and_clamps() {
        let mut waterfall = WaterfallLayout::new(config(200, 0), 200);
        waterfall.append(&[1.0; 10]);
        assert_eq!(waterfall.prefetch_range(450, 900), 1..7);
        assert_eq!(waterfall.prefetch_range(0, 100), 0..3);
        assert_eq!(waterfall.prefetch_range(1700, 2000), 7..10);
    }

    // =========================================================================
    // Grid mode
    // =========================================================================

    #[test]
    fn grid_column_count_respects_minimum_width() {
        let c = grid_config(10);
        // Six columns need 6 * 100 + 7 * 10
        assert_eq!(column_count(670, &c), 6);
        assert_eq!(column_count(669, &c), 5);
        assert_eq!(column_count(5000, &c), 6);
        assert_eq!(column_count(50, &c), 1);
    }

    #[test]
    fn grid_cells_are_square_and_row_major() {
        let mut grid = WaterfallLayout::new(grid_config(10), 640);
        assert_eq!(grid.columns(), 5);
        // (640 - 6 * 10) / 5 = 116
        assert_eq!(grid.column_width(), 116);
        grid.append(&[0.5, 2.0, 1.0, 0.4, 2.5, 1.3, f64::NAN]);

        let slots = grid.slots();
        assert!(slots.iter().all(|s| s.width == 116 && s.height == 116));
        let columns: Vec<usize> = slots.iter().map(|s| s.column).collect();
        assert_eq!(columns, vec![0, 1, 2, 3, 4, 0, 1]);
        assert_eq!((slots[5].x, slots[5].y), (10, 136));
        assert_eq!(grid.content_height(), 10 + 2 * (116 + 10));
    }

    #[test]
    fn set_mode_relays_existing_items() {
        let aspects = [0.5, 2.0, 1.0];
        let mut view = WaterfallLayout::new(config(200, 10), 640);
        view.append(&aspects);
        let waterfall = view.slots().to_vec();

        assert!(view.set_mode(LayoutMode::Grid));
        assert!(!view.set_mode(LayoutMode::Grid));
        assert_eq!(view.mode(), LayoutMode::Grid);
        assert_eq!(
            view.slots(),
            layout_in_mode(&aspects, 640, view.columns(), 10, LayoutMode::Grid).as_slice()
        );
        assert!(view.slots().iter().all(|s| s.height == s.width));

        assert!(view.set_mode(LayoutMode::Waterfall));
        assert_eq!(view.slots(), waterfall.as_slice());
    }

    #[test]
    fn grid_visible_range_uses_row_bounds() {
        // One 200px column of squares, no gutter
        let c = LayoutConfig {
            grid_columns: 1,
            ..grid_config(0)
        };
        let mut grid = WaterfallLayout::new(c, 200);
        grid.append(&[1.0; 10]);
        assert_eq!(grid.visible_range(450, 900), 2..5);
    }
}
