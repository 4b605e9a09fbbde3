//! End-to-end tests: real files on disk, the pure-Rust backend, a real
//! worker pool and a disk cache that outlives the coordinator.
//!
//! Run with: cargo test --test pipeline

use image::{ImageFormat, Rgb, RgbImage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use thumbflow::config::{BrowserConfig, PipelineConfig};
use thumbflow::coordinator::{Ensure, RequestCoordinator, ThumbnailEvent};
use thumbflow::imaging::{ImageBackend, RustBackend};
use thumbflow::layout::{WaterfallLayout, asset_aspect};
use thumbflow::scan;
use thumbflow::scheduler::Priority;
use thumbflow::types::ImageAsset;

const WAIT: Duration = Duration::from_secs(30);

fn write_image(path: &Path, width: u32, height: u32, format: ImageFormat) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 90])
    });
    img.save_with_format(path, format).unwrap();
}

/// Three good images (one landscape, one portrait, one square) and one
/// file that only pretends to be a JPEG.
fn photo_folder() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_image(&tmp.path().join("a_wide.jpg"), 160, 80, ImageFormat::Jpeg);
    write_image(&tmp.path().join("b_tall.png"), 60, 120, ImageFormat::Png);
    write_image(&tmp.path().join("c_square.jpg"), 100, 100, ImageFormat::Jpeg);
    std::fs::write(tmp.path().join("d_broken.jpg"), b"definitely not a jpeg").unwrap();
    tmp
}

fn config(cache: &TempDir) -> BrowserConfig {
    BrowserConfig {
        thumbnail_size: 48,
        cache_size: 32,
        pipeline: PipelineConfig {
            workers: Some(2),
            cache_dir: Some(cache.path().to_path_buf()),
            ..PipelineConfig::default()
        },
        ..BrowserConfig::default()
    }
}

fn coordinator(config: BrowserConfig) -> RequestCoordinator {
    let backend: Arc<dyn ImageBackend> = Arc::new(RustBackend::new());
    RequestCoordinator::new(config, backend).unwrap()
}

/// Ensure every asset and collect one event per pending request.
fn warm_all(coordinator: &mut RequestCoordinator, assets: &[ImageAsset]) -> Vec<ThumbnailEvent> {
    let mut pending = 0;
    for asset in assets {
        if let Ensure::Pending(_) = coordinator.ensure(asset, Priority::VISIBLE) {
            pending += 1;
        }
    }
    let events = coordinator.wait_idle(WAIT);
    assert_eq!(events.len(), pending, "every request must complete");
    events
}

fn event_for<'a>(events: &'a [ThumbnailEvent], name: &str) -> &'a ThumbnailEvent {
    events
        .iter()
        .find(|e| e.path.file_name().is_some_and(|f| f == name))
        .unwrap_or_else(|| panic!("no event for {name}"))
}

#[test]
fn cold_warm_renders_and_broken_file_gets_placeholder() {
    let photos = photo_folder();
    let cache = TempDir::new().unwrap();
    let assets = scan::scan_folder(photos.path(), false).unwrap();
    assert_eq!(assets.len(), 4);

    let mut coordinator = coordinator(config(&cache));
    let events = warm_all(&mut coordinator, &assets);

    let wide = event_for(&events, "a_wide.jpg");
    assert!(wide.error.is_none());
    assert!(!wide.is_placeholder());
    assert_eq!(wide.thumbnail.source_dimensions.width, 160);

    let broken = event_for(&events, "d_broken.jpg");
    assert!(broken.is_placeholder());
    assert!(broken.error.is_some());

    let stats = coordinator.stats();
    assert_eq!(stats.misses, 4);
    assert_eq!(stats.hits(), 0);

    // Second pass in the same session is answered from memory.
    for asset in &assets[..3] {
        assert!(coordinator.ensure(asset, Priority::VISIBLE).is_immediate());
    }
    coordinator.shutdown().unwrap();
}

#[test]
fn disk_tier_survives_restart() {
    let photos = photo_folder();
    let cache = TempDir::new().unwrap();
    let assets = scan::scan_folder(photos.path(), false).unwrap();
    let good = &assets[..3];

    let first = {
        let mut coordinator = coordinator(config(&cache));
        let events = warm_all(&mut coordinator, good);
        coordinator.shutdown().unwrap();
        events
    };

    let mut coordinator = coordinator(config(&cache));
    let second = warm_all(&mut coordinator, good);
    let stats = coordinator.stats();
    assert_eq!(stats.disk_hits, 3);
    assert_eq!(stats.misses, 0);

    for name in ["a_wide.jpg", "b_tall.png", "c_square.jpg"] {
        assert_eq!(
            event_for(&first, name).thumbnail.image,
            event_for(&second, name).thumbnail.image,
            "{name} must round-trip through the disk tier unchanged"
        );
    }
}

#[test]
fn rewritten_file_is_rendered_again() {
    let photos = photo_folder();
    let cache = TempDir::new().unwrap();
    let path = photos.path().join("c_square.jpg");

    let mut coordinator = coordinator(config(&cache));
    let before = ImageAsset::stat(&path).unwrap();
    warm_all(&mut coordinator, std::slice::from_ref(&before));

    write_image(&path, 90, 30, ImageFormat::Jpeg);
    let after = ImageAsset::stat(&path).unwrap();
    assert_ne!(before.fingerprint(), after.fingerprint());

    let events = warm_all(&mut coordinator, std::slice::from_ref(&after));
    assert_eq!(events.len(), 1, "a changed file must not be served from cache");
    assert_eq!(events[0].thumbnail.source_dimensions.width, 90);
    assert_eq!(coordinator.stats().misses, 2);
}

#[test]
fn style_change_does_not_reuse_old_thumbnails() {
    let photos = photo_folder();
    let cache = TempDir::new().unwrap();
    let assets = scan::scan_folder(photos.path(), false).unwrap();
    let good = &assets[..3];

    {
        let mut coordinator = coordinator(config(&cache));
        warm_all(&mut coordinator, good);
        coordinator.shutdown().unwrap();
    }

    let mut restyled = config(&cache);
    restyled.image_rounded = !restyled.image_rounded;
    let mut coordinator = coordinator(restyled);
    warm_all(&mut coordinator, good);
    let stats = coordinator.stats();
    assert_eq!(stats.disk_hits, 0);
    assert_eq!(stats.misses, 3);
}

#[test]
fn layout_from_probed_folder() {
    let photos = photo_folder();
    let assets = scan::probe_assets(
        scan::scan_folder(photos.path(), false).unwrap(),
        &RustBackend::new(),
    );
    let config = BrowserConfig::default();
    let mut layout = WaterfallLayout::new(config.layout.clone(), 640);
    let aspects: Vec<f64> = assets.iter().map(asset_aspect).collect();
    layout.append(&aspects);

    assert_eq!(layout.columns(), 3);
    let slots = layout.slots();
    assert_eq!(slots.len(), 4);
    // Three first items fill the three columns left to right.
    assert_eq!(
        slots[..3].iter().map(|s| s.column).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    // Wide image is half as tall as it is wide.
    assert_eq!(slots[0].height, slots[0].width / 2);
    // The broken file still gets a slot at the default ratio.
    assert!(slots[3].height > 0);
    assert_eq!(slots[3].column, 0, "shortest column after a wide image");
}
