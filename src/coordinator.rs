//! The single entry point the UI talks to.
//!
//! [`RequestCoordinator::ensure`] answers from tier 1 straight away or
//! schedules a job and returns a handle. Jobs run on the scheduler's pool
//! and report back over a `crossbeam-channel`; the coordinating thread
//! drains it with [`poll_events`](RequestCoordinator::poll_events) or
//! [`wait_event`](RequestCoordinator::wait_event). Only that thread touches
//! tier 1. Workers read and write tier 2 directly.
//!
//! A job, on a worker thread:
//!
//! 1. tier-2 lookup (another session may have rendered it already);
//! 2. decode, from the embedded preview when configured;
//! 3. scale and style;
//! 4. tier-2 write. A failed write is logged and the thumbnail is still
//!    delivered.
//!
//! Failures never propagate: the waiter gets a placeholder tile plus the
//! error that caused it.

use crate::cache::{CacheError, CacheStats, CacheStore, DiskTier};
use crate::config::{BrowserConfig, ConfigError, effective_workers};
use crate::imaging::{
    DecodeError, DecodeMode, ImageBackend, Thumbnail, ThumbnailStyle, placeholder_thumbnail,
    render_thumbnail,
};
use crate::scheduler::{Priority, SchedulerError, StartError, TaskHandle, TaskScheduler};
use crate::types::{CacheKey, ImageAsset, StyleHash};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Fatal problems at initialisation. Nothing else is fatal.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
    #[error("worker pool: {0}")]
    Pool(#[from] StartError),
}

/// Why a delivered thumbnail is a placeholder, or what went wrong after
/// rendering.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Cache(Arc<CacheError>),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Result of [`RequestCoordinator::ensure`].
#[derive(Debug, Clone)]
pub enum Ensure {
    /// Served from memory.
    Immediate(Arc<Thumbnail>),
    /// A [`ThumbnailEvent`] with this handle will follow.
    Pending(TaskHandle),
}

impl Ensure {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Ensure::Immediate(_))
    }
}

/// One delivery to one waiter.
#[derive(Debug, Clone)]
pub struct ThumbnailEvent {
    pub handle: TaskHandle,
    pub path: PathBuf,
    /// The rendered thumbnail, or the placeholder when `error` explains why
    /// rendering failed.
    pub thumbnail: Arc<Thumbnail>,
    pub error: Option<PipelineError>,
}

impl ThumbnailEvent {
    pub fn is_placeholder(&self) -> bool {
        self.thumbnail.placeholder
    }
}

/// What a worker hands back.
#[derive(Debug, Clone)]
struct Rendered {
    thumbnail: Arc<Thumbnail>,
    from_disk: bool,
    write_error: Option<Arc<CacheError>>,
}

type JobResult = Result<Rendered, DecodeError>;

struct Completion {
    handle: TaskHandle,
    result: Result<JobResult, SchedulerError>,
}

struct PendingRequest {
    path: PathBuf,
    key: CacheKey,
    priority: Priority,
}

/// Everything a job needs, cloned out of the coordinator.
#[derive(Clone)]
struct RenderContext {
    backend: Arc<dyn ImageBackend>,
    disk: Arc<DiskTier>,
    style: ThumbnailStyle,
    target_size: u32,
    mode: DecodeMode,
}

impl RenderContext {
    fn run(&self, path: &Path, key: &CacheKey) -> JobResult {
        if let Some(cached) = self.disk.get(key) {
            return Ok(Rendered {
                thumbnail: Arc::new(cached),
                from_disk: true,
                write_error: None,
            });
        }
        let thumbnail = render_thumbnail(
            self.backend.as_ref(),
            path,
            self.mode,
            self.target_size,
            &self.style,
        )?;
        let write_error = match self.disk.put(key, self.target_size, &self.style, &thumbnail) {
            Ok(()) => None,
            Err(e) => {
                warn!("{}: {e}", path.display());
                Some(Arc::new(e))
            }
        };
        Ok(Rendered {
            thumbnail: Arc::new(thumbnail),
            from_disk: false,
            write_error,
        })
    }
}

/// Owns the cache, the scheduler and the completion channel.
///
/// Lives on the coordinating thread; every method takes `&mut self`.
pub struct RequestCoordinator {
    config: BrowserConfig,
    style_hash: StyleHash,
    context: RenderContext,
    cache: CacheStore,
    scheduler: TaskScheduler<JobResult>,
    events_tx: Sender<Completion>,
    events_rx: Receiver<Completion>,
    pending: HashMap<TaskHandle, PendingRequest>,
    placeholder: Arc<Thumbnail>,
    closed: bool,
}

impl RequestCoordinator {
    /// Validate the config, open the cache and start the worker pool.
    pub fn new(config: BrowserConfig, backend: Arc<dyn ImageBackend>) -> Result<Self, InitError> {
        config.validate()?;
        let cache_dir = config.pipeline.resolved_cache_dir();
        let cache = CacheStore::open(&cache_dir, config.cache_size, config.disk_cache_size_bytes)?;
        let workers = effective_workers(&config.pipeline);
        let scheduler = TaskScheduler::new(workers, config.pipeline.task_timeout())?;
        info!(
            "pipeline ready: {workers} workers, cache at {}",
            cache_dir.display()
        );

        let style = config.style();
        let (events_tx, events_rx) = unbounded();
        Ok(Self {
            style_hash: StyleHash::new(config.thumbnail_size, &style),
            placeholder: Arc::new(placeholder_thumbnail(config.thumbnail_size, &style)),
            context: RenderContext {
                backend,
                disk: cache.disk(),
                style,
                target_size: config.thumbnail_size,
                mode: if config.pipeline.prefer_embedded_preview {
                    DecodeMode::Preview
                } else {
                    DecodeMode::Full
                },
            },
            config,
            cache,
            scheduler,
            events_tx,
            events_rx,
            pending: HashMap::new(),
            closed: false,
        })
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub fn style_hash(&self) -> StyleHash {
        self.style_hash
    }

    /// The tile delivered for files that cannot be rendered.
    pub fn placeholder(&self) -> Arc<Thumbnail> {
        Arc::clone(&self.placeholder)
    }

    pub fn cache_key(&self, asset: &ImageAsset) -> CacheKey {
        CacheKey::new(asset.fingerprint(), self.style_hash)
    }

    /// Serve from tier 1, or schedule a job and return its handle.
    ///
    /// Concurrent requests for the same file share one job; each gets its
    /// own handle and its own event.
    pub fn ensure(&mut self, asset: &ImageAsset, priority: Priority) -> Ensure {
        let key = self.cache_key(asset);
        if let Some(hit) = self.cache.get_memory(&key) {
            return Ensure::Immediate(hit);
        }

        let context = self.context.clone();
        let path = asset.path.clone();
        let tx = self.events_tx.clone();
        let handle = self.scheduler.submit(
            key.fingerprint,
            priority,
            move || context.run(&path, &key),
            move |handle, result| {
                // The receiver is gone only after the coordinator is dropped.
                let _ = tx.send(Completion { handle, result });
            },
        );
        self.pending.insert(
            handle,
            PendingRequest {
                path: asset.path.clone(),
                key,
                priority,
            },
        );
        Ensure::Pending(handle)
    }

    /// [`ensure`](Self::ensure) for a bare path. A file that cannot be
    /// stat'ed gets the placeholder immediately.
    pub fn ensure_path(&mut self, path: &Path, priority: Priority) -> Ensure {
        match ImageAsset::stat(path) {
            Ok(asset) => self.ensure(&asset, priority),
            Err(e) => {
                warn!("{}: {e}", path.display());
                Ensure::Immediate(self.placeholder())
            }
        }
    }

    /// Request the first `initial_load_count` items at visible priority.
    pub fn load_initial(&mut self, assets: &[ImageAsset]) -> Vec<Ensure> {
        let count = self.config.initial_load_count.min(assets.len());
        assets[..count]
            .iter()
            .map(|asset| self.ensure(asset, Priority::VISIBLE))
            .collect()
    }

    /// Re-prioritise for a new scroll position.
    ///
    /// Pending requests move to visible, near or prefetch priority (see
    /// [`viewport_priority`]), or to background if they left both ranges. Items in range that were never
    /// requested are requested now. Returns the ones tier 1 already had, by
    /// index.
    pub fn update_viewport(
        &mut self,
        assets: &[ImageAsset],
        visible: Range<usize>,
        prefetch: Range<usize>,
    ) -> Vec<(usize, Arc<Thumbnail>)> {
        let clamp = |r: Range<usize>| r.start.min(assets.len())..r.end.min(assets.len());
        let (visible, prefetch) = (clamp(visible), clamp(prefetch));
        let wanted_priority = |i: usize| viewport_priority(i, &visible);
        let wanted: HashMap<&Path, Priority> = visible
            .clone()
            .chain(prefetch.clone())
            .map(|i| (assets[i].path.as_path(), wanted_priority(i)))
            .collect();

        let mut requested = HashSet::new();
        for (handle, request) in &mut self.pending {
            let priority = wanted
                .get(request.path.as_path())
                .copied()
                .unwrap_or(Priority::BACKGROUND);
            if priority != request.priority && self.scheduler.set_priority(*handle, priority) {
                request.priority = priority;
            }
            requested.insert(request.path.clone());
        }

        let mut ready = Vec::new();
        for i in visible.clone().chain(prefetch.clone()) {
            let asset = &assets[i];
            if requested.insert(asset.path.clone())
                && let Ensure::Immediate(thumbnail) = self.ensure(asset, wanted_priority(i))
            {
                ready.push((i, thumbnail));
            }
        }
        ready
    }

    /// Detach one request. Its event will not be delivered.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        self.pending.remove(&handle).is_some() && self.scheduler.cancel(handle)
    }

    /// Drop every pending request, for a folder switch. Returns how many
    /// there were.
    pub fn cancel_all(&mut self) -> usize {
        self.scheduler.cancel_all();
        let dropped = self.pending.len();
        self.pending.clear();
        // Anything already in the channel belongs to the old folder.
        while self.events_rx.try_recv().is_ok() {}
        if dropped > 0 {
            debug!("dropped {dropped} pending requests");
        }
        dropped
    }

    /// Requests not yet delivered.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Deliver every completion that has arrived, without blocking.
    pub fn poll_events(&mut self) -> Vec<ThumbnailEvent> {
        let completions: Vec<Completion> = self.events_rx.try_iter().collect();
        completions
            .into_iter()
            .filter_map(|c| self.resolve(c))
            .collect()
    }

    /// Block until the next event or the timeout.
    pub fn wait_event(&mut self, timeout: Duration) -> Option<ThumbnailEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events_rx.recv_timeout(remaining) {
                Ok(completion) => {
                    if let Some(event) = self.resolve(completion) {
                        return Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Wait until nothing is pending or the timeout passes, collecting
    /// every event on the way.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<ThumbnailEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        while !self.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.wait_event(remaining) {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    fn resolve(&mut self, completion: Completion) -> Option<ThumbnailEvent> {
        let request = self.pending.remove(&completion.handle)?;
        let path = request.path;
        let (thumbnail, error) = match completion.result {
            Ok(Ok(rendered)) => {
                self.cache
                    .insert_memory(request.key, Arc::clone(&rendered.thumbnail));
                if rendered.from_disk {
                    debug!("{}: from disk cache", path.display());
                }
                (
                    rendered.thumbnail,
                    rendered.write_error.map(PipelineError::Cache),
                )
            }
            Ok(Err(e)) => {
                warn!("{}: {e}", path.display());
                (self.placeholder(), Some(PipelineError::Decode(e)))
            }
            // A panicking decoder is a corrupt file as far as callers care.
            Err(SchedulerError::WorkerPanicked(message)) => {
                warn!("{}: decoder panicked: {message}", path.display());
                let e = DecodeError::Corrupt(format!("decoder panicked: {message}"));
                (self.placeholder(), Some(PipelineError::Decode(e)))
            }
            Err(e) => {
                warn!("{}: {e}", path.display());
                (self.placeholder(), Some(PipelineError::Scheduler(e)))
            }
        };
        Some(ThumbnailEvent {
            handle: completion.handle,
            path,
            thumbnail,
            error,
        })
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Tasks waiting for a worker and tasks running.
    pub fn load(&self) -> (usize, usize) {
        (self.scheduler.queued(), self.scheduler.in_flight())
    }

    /// Stop the workers' queue and flush the cache.
    ///
    /// Queued requests are delivered as cancelled on the next poll.
    pub fn shutdown(&mut self) -> Result<(), CacheError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.scheduler.shutdown();
        self.cache.close()
    }
}

/// Priority of item `index` for a scroll position. Items within one
/// screenful of the visible range are [`Priority::NEAR`]; the rest of the
/// prefetch window is [`Priority::PREFETCH`].
pub fn viewport_priority(index: usize, visible: &Range<usize>) -> Priority {
    let screen = visible.len();
    if visible.contains(&index) {
        Priority::VISIBLE
    } else if (visible.start.saturating_sub(screen)..visible.end + screen).contains(&index) {
        Priority::NEAR
    } else {
        Priority::PREFETCH
    }
}

impl Drop for RequestCoordinator {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("cache flush failed: {e}");
        }
    }
}
