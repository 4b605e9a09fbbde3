use clap::{Parser, Subcommand};
use flexi_logger::Logger;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thumbflow::cache::DiskTier;
use thumbflow::config::{self, BrowserConfig, LayoutMode};
use thumbflow::coordinator::{Ensure, RequestCoordinator};
use thumbflow::imaging::RustBackend;
use thumbflow::layout::{WaterfallLayout, asset_aspect};
use thumbflow::scan::{self, SortOrder};
use thumbflow::scheduler::Priority;
use thumbflow::{output, types::ImageAsset};

#[derive(Parser)]
#[command(name = "thumbflow")]
#[command(about = "Thumbnail cache and image pipeline for waterfall photo browsers")]
#[command(long_about = "\
Thumbnail cache and image pipeline for waterfall photo browsers

Thumbnails are rendered on a worker pool, kept in an in-memory LRU and
persisted to a content-addressed disk cache keyed by file identity and
thumbnail style. A file that is touched on disk gets a fresh thumbnail.

Supported inputs: JPEG, PNG, BMP, GIF, TIFF, WebP and camera RAW files
(CR2, CR3, NEF, ARW, DNG, RAF, ORF, RW2, PEF, SRW, X3F and more). RAW
thumbnails come from the embedded preview when one exists.

Run 'thumbflow gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the disk cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Shared flags for commands that enumerate a folder.
#[derive(clap::Args, Clone)]
struct FolderArgs {
    /// Folder of images
    dir: PathBuf,

    /// Descend into subfolders
    #[arg(long, short)]
    recursive: bool,

    /// Ordering: path, name, modified or size
    #[arg(long, default_value = "path")]
    sort: SortOrder,
}

#[derive(Subcommand)]
enum Command {
    /// List the images a folder contains
    Scan {
        #[command(flatten)]
        folder: FolderArgs,

        /// Read dimensions and capture time as well
        #[arg(long)]
        probe: bool,
    },
    /// Render every thumbnail of a folder into the disk cache
    Warm(FolderArgs),
    /// Print the waterfall placement for a folder at a given width
    Layout {
        #[command(flatten)]
        folder: FolderArgs,

        /// Container width in pixels
        #[arg(long, default_value_t = 1200)]
        width: u32,

        /// Square cells instead of the waterfall (overrides layout.mode)
        #[arg(long)]
        grid: bool,
    },
    /// Inspect or maintain the disk cache
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show location and occupancy
    Stats,
    /// Evict least recently used entries until the cache fits its budget
    Prune {
        /// Budget in bytes (defaults to disk_cache_size_bytes)
        #[arg(long)]
        max_bytes: Option<u64>,
    },
    /// Delete every cached thumbnail
    Clear,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let _logger = Logger::try_with_env_or_str("info")?
        .format(flexi_logger::colored_default_format)
        .start()?;

    let settings = Settings {
        config: cli.config,
        cache_dir: cli.cache_dir,
    };

    match cli.command {
        Command::Scan { folder, probe } => {
            let config = settings.load()?;
            let assets = scan_folder(&folder, probe, &config)?;
            output::print_scan_output(&assets, &folder.dir);
        }
        Command::Warm(folder) => {
            let config = settings.load()?;
            let assets = scan_folder(&folder, false, &config)?;
            warm(config, &assets)?;
        }
        Command::Layout {
            folder,
            width,
            grid,
        } => {
            let config = settings.load()?;
            let assets = scan_folder(&folder, true, &config)?;
            let mut layout_config = config.layout.clone();
            if grid {
                layout_config.mode = LayoutMode::Grid;
            }
            let mut layout = WaterfallLayout::new(layout_config, width);
            let aspects: Vec<f64> = assets.iter().map(asset_aspect).collect();
            layout.append(&aspects);
            output::print_layout(&layout, &assets);
        }
        Command::Cache(command) => {
            let config = settings.load()?;
            let dir = config.pipeline.resolved_cache_dir();
            match command {
                // Only prune may evict; the others inspect.
                CacheCommand::Stats => {
                    let disk = DiskTier::inspect(&dir, config.disk_cache_size_bytes)?;
                    output::print_disk_summary(&disk);
                }
                CacheCommand::Prune { max_bytes } => {
                    let budget = max_bytes.unwrap_or(config.disk_cache_size_bytes);
                    let disk = DiskTier::open(&dir, budget)?;
                    println!("Pruned {} entries", disk.evicted());
                    output::print_disk_summary(&disk);
                }
                CacheCommand::Clear => {
                    let disk = DiskTier::inspect(&dir, config.disk_cache_size_bytes)?;
                    let removed = disk.clear()?;
                    println!("Removed {} entries from {}", removed, disk.root().display());
                }
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Global flags that shape the effective config.
struct Settings {
    config: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
}

impl Settings {
    /// Stock defaults, overlaid with the config file, then `--cache-dir`.
    ///
    /// An explicit `--config` must exist; the per-user default is optional.
    fn load(&self) -> Result<BrowserConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) if !path.exists() => {
                return Err(format!("config file not found: {}", path.display()).into());
            }
            Some(path) => config::load_config(path)?,
            None => match config::default_config_path() {
                Some(path) => config::load_config(&path)?,
                None => BrowserConfig::default(),
            },
        };
        if let Some(dir) = &self.cache_dir {
            config.pipeline.cache_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

fn scan_folder(
    folder: &FolderArgs,
    probe: bool,
    config: &BrowserConfig,
) -> Result<Vec<ImageAsset>, Box<dyn std::error::Error>> {
    let assets = scan::scan_folder_sorted(&folder.dir, folder.recursive, folder.sort)?;
    if !probe {
        return Ok(assets);
    }
    init_thread_pool(config);
    let probed = scan::probe_assets(assets, &RustBackend::new());
    Ok(probed)
}

/// Render every asset, printing each result as it lands.
///
/// The first `initial_load_count` items go in at visible priority, the rest
/// as prefetch, the same split a browser makes on opening a folder.
fn warm(config: BrowserConfig, assets: &[ImageAsset]) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let initial = config.initial_load_count.min(assets.len());
    let mut coordinator = RequestCoordinator::new(config, Arc::new(RustBackend::new()))?;

    let positions: HashMap<&Path, usize> = assets
        .iter()
        .enumerate()
        .map(|(i, a)| (a.path.as_path(), i + 1))
        .collect();

    let mut completed = 0;
    let mut failed = 0;
    let mut ensures = coordinator.load_initial(assets);
    ensures.extend(
        assets[initial..]
            .iter()
            .map(|asset| coordinator.ensure(asset, Priority::PREFETCH)),
    );
    for (asset, ensure) in assets.iter().zip(&ensures) {
        if let Ensure::Immediate(thumbnail) = ensure {
            completed += 1;
            let index = positions.get(asset.path.as_path()).copied().unwrap_or(0);
            for line in output::format_cached_thumbnail(index, &asset.path, thumbnail) {
                println!("{}", line);
            }
        }
    }

    while coordinator.pending() > 0 {
        let Some(event) = coordinator.wait_event(Duration::from_secs(1)) else {
            continue;
        };
        completed += 1;
        if event.error.is_some() {
            failed += 1;
        }
        let index = positions.get(event.path.as_path()).copied().unwrap_or(0);
        for line in output::format_thumbnail_event(index, &event) {
            println!("{}", line);
        }
    }

    coordinator.shutdown()?;
    output::print_warm_summary(completed, failed, started.elapsed(), &coordinator.stats());
    Ok(())
}

/// Size the global rayon pool used for probing. Caps at the number of
/// available cores; the config can constrain down, not up.
fn init_thread_pool(config: &BrowserConfig) {
    let threads = config::effective_workers(&config.pipeline);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
