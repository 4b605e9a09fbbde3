//! Pure calculation functions for image dimensions and masks.
//!
//! All functions here are pure and testable without any I/O or images.

/// Scale dimensions so the longer edge equals `target`.
///
/// Preserves the aspect ratio; the shorter edge is rounded and never drops
/// below one pixel. Works for both downscaling and upscaling.
///
/// # Examples
/// ```
/// # use thumbflow::imaging::fit_longest_edge;
/// // 4000x3000 landscape into a 300px thumbnail → 300x225
/// assert_eq!(fit_longest_edge((4000, 3000), 300), (300, 225));
///
/// // 1000x2500 portrait → 120x300
/// assert_eq!(fit_longest_edge((1000, 2500), 300), (120, 300));
/// ```
pub fn fit_longest_edge(source: (u32, u32), target: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    if src_w == 0 || src_h == 0 {
        return (target, target);
    }

    if src_w >= src_h {
        let h = (target as f64 * src_h as f64 / src_w as f64).round() as u32;
        (target, h.max(1))
    } else {
        let w = (target as f64 * src_w as f64 / src_h as f64).round() as u32;
        (w.max(1), target)
    }
}

/// Largest size with the source aspect ratio that fits inside `bounds`.
///
/// Never upscales: a source already inside the bounds is returned unchanged.
///
/// # Examples
/// ```
/// # use thumbflow::imaging::fit_within;
/// assert_eq!(fit_within((4000, 2000), (1000, 1000)), (1000, 500));
/// assert_eq!(fit_within((800, 600), (1920, 1080)), (800, 600));
/// ```
pub fn fit_within(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (max_w, max_h) = bounds;
    if src_w == 0 || src_h == 0 || (src_w <= max_w && src_h <= max_h) {
        return source;
    }
    let scale = (max_w as f64 / src_w as f64).min(max_h as f64 / src_h as f64);
    (
        ((src_w as f64 * scale) as u32).max(1),
        ((src_h as f64 * scale) as u32).max(1),
    )
}

/// Shadow offset for a given blur size: half the blur, rounded up.
pub fn shadow_offset(shadow_size: u32) -> u32 {
    shadow_size.div_ceil(2)
}

/// Anti-aliased coverage of pixel `(x, y)` by a rounded rectangle that fills
/// a `width` x `height` area with corner `radius`.
///
/// Returns 1.0 inside, 0.0 outside, and a linear ramp across the one-pixel
/// band on the curved edge. The radius is clamped to half the shorter side.
pub fn rounded_rect_coverage(x: u32, y: u32, width: u32, height: u32, radius: u32) -> f32 {
    if x >= width || y >= height {
        return 0.0;
    }
    let r = radius.min(width / 2).min(height / 2) as f32;
    if r <= 0.0 {
        return 1.0;
    }

    // Pixel centre, distance into the nearest corner square.
    let px = x as f32 + 0.5;
    let py = y as f32 + 0.5;
    let (w, h) = (width as f32, height as f32);
    let cx = if px < r {
        r
    } else if px > w - r {
        w - r
    } else {
        return 1.0;
    };
    let cy = if py < r {
        r
    } else if py > h - r {
        h - r
    } else {
        return 1.0;
    };

    let dist = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();
    (r - dist + 0.5).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // fit_longest_edge tests
    // =========================================================================

    #[test]
    fn fit_landscape() {
        assert_eq!(fit_longest_edge((1600, 900), 300), (300, 169));
    }

    #[test]
    fn fit_portrait() {
        assert_eq!(fit_longest_edge((900, 1600), 300), (169, 300));
    }

    #[test]
    fn fit_square() {
        assert_eq!(fit_longest_edge((500, 500), 300), (300, 300));
    }

    #[test]
    fn fit_upscales_small_sources() {
        assert_eq!(fit_longest_edge((100, 50), 300), (300, 150));
    }

    #[test]
    fn fit_extreme_panorama_keeps_one_pixel() {
        assert_eq!(fit_longest_edge((30000, 10), 300), (300, 1));
    }

    #[test]
    fn fit_degenerate_source() {
        assert_eq!(fit_longest_edge((0, 10), 300), (300, 300));
    }

    // =========================================================================
    // fit_within tests
    // =========================================================================

    #[test]
    fn fit_within_limits_by_tighter_axis() {
        assert_eq!(fit_within((3000, 1000), (1500, 1500)), (1500, 500));
        assert_eq!(fit_within((1000, 3000), (1500, 1500)), (500, 1500));
    }

    #[test]
    fn fit_within_never_upscales() {
        assert_eq!(fit_within((200, 100), (1000, 1000)), (200, 100));
    }

    // =========================================================================
    // shadow / mask tests
    // =========================================================================

    #[test]
    fn shadow_offset_rounds_up() {
        assert_eq!(shadow_offset(0), 0);
        assert_eq!(shadow_offset(3), 2);
        assert_eq!(shadow_offset(4), 2);
    }

    #[test]
    fn coverage_centre_and_edges() {
        assert_eq!(rounded_rect_coverage(50, 50, 100, 100, 10), 1.0);
        // Straight edge midway along the top is fully covered
        assert_eq!(rounded_rect_coverage(50, 0, 100, 100, 10), 1.0);
    }

    #[test]
    fn coverage_corner_is_cut() {
        assert_eq!(rounded_rect_coverage(0, 0, 100, 100, 10), 0.0);
        assert_eq!(rounded_rect_coverage(99, 99, 100, 100, 10), 0.0);
    }

    #[test]
    fn coverage_outside_is_zero() {
        assert_eq!(rounded_rect_coverage(100, 5, 100, 100, 10), 0.0);
    }

    #[test]
    fn coverage_zero_radius_is_full() {
        assert_eq!(rounded_rect_coverage(0, 0, 10, 10, 0), 1.0);
    }

    #[test]
    fn coverage_is_symmetric() {
        for (x, y) in [(1, 2), (3, 0), (2, 2)] {
            let a = rounded_rect_coverage(x, y, 40, 30, 8);
            let b = rounded_rect_coverage(39 - x, 29 - y, 40, 30, 8);
            assert!((a - b).abs() < 1e-6, "({x},{y}): {a} vs {b}");
        }
    }
}
