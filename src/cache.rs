//! Two-tier thumbnail cache.
//!
//! Decoding a RAW file and rendering its styled thumbnail is the bottleneck
//! of browsing a folder. This module keeps rendered thumbnails so each
//! content version is rendered once per style, across restarts.
//!
//! # Design
//!
//! ## Cache keys
//!
//! The cache is keyed by [`CacheKey`]: the file's [`Fingerprint`] (path,
//! size, mtime) plus a [`StyleHash`] (target size and every style
//! parameter). A file rewritten on disk or a changed style setting produces
//! a new key, so stale bitmaps are never served. Old entries are simply
//! orphaned and age out through eviction.
//!
//! ## Tier 1 (memory)
//!
//! An [`lru::LruCache`] of decoded bitmaps owned by the coordinating thread.
//! Hits promote; inserts beyond capacity drop the least recently used
//! entry. Dropping from tier 1 never touches tier 2.
//!
//! ## Tier 2 (disk)
//!
//! [`DiskTier`] is shared with worker threads through an `Arc`. Layout:
//!
//! ```text
//! <cache_dir>/v1/ab/ab12…ef.png    lossless thumbnail
//! <cache_dir>/v1/ab/ab12…ef.json   sidecar (style, sizes, access time)
//! ```
//!
//! The file name is [`CacheKey::digest_hex`]. Writes go to a temp file and
//! are renamed into place, so two workers writing the same key just
//! overwrite each other with identical bytes. The index is rebuilt from the
//! sidecars on open. When the blobs outgrow the byte budget, the entries with
//! the oldest access time are deleted first.
//!
//! ## Corruption
//!
//! A sidecar that does not parse, a missing or undecodable blob, or a blob
//! whose size disagrees with its sidecar is logged, deleted, and treated as
//! a miss.

use crate::imaging::{Dimensions, Thumbnail, ThumbnailStyle};
use crate::types::{CacheKey, Fingerprint, StyleHash};
use log::{debug, warn};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use walkdir::WalkDir;

/// Version of the on-disk layout. Bump this to orphan every existing entry
/// when the blob encoding or the key computation changes.
pub const CACHE_VERSION: u32 = 1;

const BLOB_EXT: &str = "png";
const SIDECAR_EXT: &str = "json";
const TMP_EXT: &str = "tmp";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache capacity must be non-zero: {0}")]
    InvalidCapacity(&'static str),
    #[error("failed to write {path}: {source}")]
    DiskWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt cache entry {path}: {reason}")]
    DiskReadCorrupt { path: PathBuf, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Sidecar stored next to each tier-2 blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub version: u32,
    pub fingerprint: Fingerprint,
    pub style_hash: StyleHash,
    /// Style the blob was rendered with, kept for validation and debugging.
    pub style: ThumbnailStyle,
    pub target_size: u32,
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub source_height: u32,
    /// Blob size on disk.
    pub bytes: u64,
    pub created_ms: u64,
    pub last_access_ms: u64,
}

impl Sidecar {
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.fingerprint, self.style_hash)
    }
}

#[derive(Debug, Default)]
struct DiskIndex {
    entries: HashMap<String, Sidecar>,
    total_bytes: u64,
    /// Entries whose access time changed since the last flush.
    dirty: HashSet<String>,
    /// Last access stamp handed out; stamps are strictly increasing.
    clock: u64,
}

impl DiskIndex {
    fn stamp(&mut self) -> u64 {
        self.clock = now_ms().max(self.clock + 1);
        self.clock
    }

    fn insert(&mut self, digest: String, sidecar: Sidecar) {
        self.total_bytes += sidecar.bytes;
        self.clock = self.clock.max(sidecar.last_access_ms);
        if let Some(old) = self.entries.insert(digest, sidecar) {
            self.total_bytes -= old.bytes;
        }
    }

    fn remove(&mut self, digest: &str) -> Option<Sidecar> {
        let removed = self.entries.remove(digest)?;
        self.total_bytes -= removed.bytes;
        self.dirty.remove(digest);
        Some(removed)
    }
}

/// Persistent, content-addressed tier. Safe to share between threads.
#[derive(Debug)]
pub struct DiskTier {
    root: PathBuf,
    budget: u64,
    index: Mutex<DiskIndex>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl DiskTier {
    /// Open (or create) the tier under `dir` and rebuild its index.
    ///
    /// Entries that fail validation are deleted. If the surviving blobs
    /// exceed `budget`, the oldest are evicted before returning.
    pub fn open(dir: &Path, budget: u64) -> Result<Self, CacheError> {
        let tier = Self::inspect(dir, budget)?;
        tier.evict_if_needed();
        Ok(tier)
    }

    /// Open without evicting. An over-budget cache stays as it is until the
    /// next put or [`evict_if_needed`](Self::evict_if_needed).
    pub fn inspect(dir: &Path, budget: u64) -> Result<Self, CacheError> {
        if budget == 0 {
            return Err(CacheError::InvalidCapacity("disk_cache_size_bytes"));
        }
        let root = dir.join(format!("v{CACHE_VERSION}"));
        fs::create_dir_all(&root)?;

        let tier = Self {
            index: Mutex::new(load_index(&root)),
            root,
            budget,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };
        {
            let index = tier.lock();
            debug!(
                "disk cache at {}: {} entries, {} bytes",
                tier.root.display(),
                index.entries.len(),
                index.total_bytes
            );
        }
        Ok(tier)
    }

    fn lock(&self) -> MutexGuard<'_, DiskIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.root.join(&digest[..2]).join(format!("{digest}.{BLOB_EXT}"))
    }

    fn sidecar_path(&self, digest: &str) -> PathBuf {
        self.root
            .join(&digest[..2])
            .join(format!("{digest}.{SIDECAR_EXT}"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.lock().total_bytes
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains_key(&key.digest_hex())
    }

    /// Entries evicted since open, including any evicted by `open` itself.
    pub fn evicted(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Look up a thumbnail, updating its access time on a hit.
    ///
    /// A corrupt entry is deleted and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Thumbnail> {
        let digest = key.digest_hex();
        let sidecar = self.lock().entries.get(&digest).cloned();
        let Some(sidecar) = sidecar else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match self.read_entry(&digest, key, &sidecar) {
            Ok(thumbnail) => {
                let mut index = self.lock();
                let now = index.stamp();
                if let Some(entry) = index.entries.get_mut(&digest) {
                    entry.last_access_ms = now;
                    index.dirty.insert(digest);
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(thumbnail)
            }
            Err(e) => {
                warn!("{e}; discarding entry");
                self.discard(&digest);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn read_entry(
        &self,
        digest: &str,
        key: &CacheKey,
        sidecar: &Sidecar,
    ) -> Result<Thumbnail, CacheError> {
        let path = self.blob_path(digest);
        let corrupt = |reason: String| CacheError::DiskReadCorrupt {
            path: path.clone(),
            reason,
        };
        if sidecar.key() != *key {
            return Err(corrupt("sidecar does not match key".into()));
        }
        let bytes = fs::read(&path).map_err(|e| corrupt(e.to_string()))?;
        if bytes.len() as u64 != sidecar.bytes {
            return Err(corrupt(format!(
                "blob is {} bytes, sidecar says {}",
                bytes.len(),
                sidecar.bytes
            )));
        }
        let source = Dimensions {
            width: sidecar.source_width,
            height: sidecar.source_height,
        };
        let thumbnail = Thumbnail::decode_png(&bytes, source).map_err(|e| corrupt(e.to_string()))?;
        if (thumbnail.width(), thumbnail.height()) != (sidecar.width, sidecar.height) {
            return Err(corrupt(format!(
                "blob is {}x{}, sidecar says {}x{}",
                thumbnail.width(),
                thumbnail.height(),
                sidecar.width,
                sidecar.height
            )));
        }
        Ok(thumbnail)
    }

    /// Write a thumbnail and its sidecar, then evict if over budget.
    ///
    /// Overwriting an existing key is harmless: the bytes are the same.
    pub fn put(
        &self,
        key: &CacheKey,
        target_size: u32,
        style: &ThumbnailStyle,
        thumbnail: &Thumbnail,
    ) -> Result<(), CacheError> {
        let digest = key.digest_hex();
        let blob_path = self.blob_path(&digest);
        let bytes = thumbnail
            .encode_png()
            .map_err(|e| CacheError::DiskWriteFailed {
                path: blob_path.clone(),
                source: io::Error::other(e),
            })?;
        write_atomic(&blob_path, &bytes)?;

        let now = self.lock().stamp();
        let sidecar = Sidecar {
            version: CACHE_VERSION,
            fingerprint: key.fingerprint,
            style_hash: key.style,
            style: *style,
            target_size,
            width: thumbnail.width(),
            height: thumbnail.height(),
            source_width: thumbnail.source_dimensions.width,
            source_height: thumbnail.source_dimensions.height,
            bytes: bytes.len() as u64,
            created_ms: now,
            last_access_ms: now,
        };
        self.write_sidecar(&digest, &sidecar)?;

        {
            let mut index = self.lock();
            index.dirty.remove(&digest);
            index.insert(digest, sidecar);
        }
        self.evict_if_needed();
        Ok(())
    }

    fn write_sidecar(&self, digest: &str, sidecar: &Sidecar) -> Result<(), CacheError> {
        let path = self.sidecar_path(digest);
        let json = serde_json::to_vec_pretty(sidecar).map_err(|e| CacheError::DiskWriteFailed {
            path: path.clone(),
            source: io::Error::other(e),
        })?;
        write_atomic(&path, &json)
    }

    /// Delete least recently accessed entries until the blobs fit the budget.
    ///
    /// Returns the number of entries removed.
    pub fn evict_if_needed(&self) -> usize {
        let victims: Vec<String> = {
            let mut index = self.lock();
            let mut victims = Vec::new();
            while index.total_bytes > self.budget {
                let Some(oldest) = index
                    .entries
                    .iter()
                    .min_by(|a, b| {
                        (a.1.last_access_ms, a.0.as_str()).cmp(&(b.1.last_access_ms, b.0.as_str()))
                    })
                    .map(|(digest, _)| digest.clone())
                else {
                    break;
                };
                index.remove(&oldest);
                victims.push(oldest);
            }
            victims
        };

        for digest in &victims {
            self.remove_files(digest);
        }
        if !victims.is_empty() {
            debug!("evicted {} disk cache entries", victims.len());
            self.evictions
                .fetch_add(victims.len() as u64, Ordering::Relaxed);
        }
        victims.len()
    }

    /// Persist access times changed since the last flush.
    pub fn flush(&self) -> Result<(), CacheError> {
        let pending: Vec<(String, Sidecar)> = {
            let mut index = self.lock();
            let dirty = std::mem::take(&mut index.dirty);
            dirty
                .into_iter()
                .filter_map(|d| index.entries.get(&d).cloned().map(|s| (d, s)))
                .collect()
        };
        let mut result = Ok(());
        for (digest, sidecar) in pending {
            if let Err(e) = self.write_sidecar(&digest, &sidecar) {
                warn!("{e}");
                result = Err(e);
            }
        }
        result
    }

    /// Delete every entry. Returns how many there were.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut index = self.lock();
        let count = index.entries.len();
        *index = DiskIndex {
            clock: index.clock,
            ..DiskIndex::default()
        };
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(count)
    }

    fn discard(&self, digest: &str) {
        self.lock().remove(digest);
        self.remove_files(digest);
    }

    fn remove_files(&self, digest: &str) {
        for path in [self.blob_path(digest), self.sidecar_path(digest)] {
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!("failed to remove {}: {e}", path.display());
            }
        }
    }

    fn counters(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }
}

/// Rebuild the index from sidecars, deleting anything that does not check out.
fn load_index(root: &Path) -> DiskIndex {
    let mut index = DiskIndex::default();
    let mut blobs = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some(SIDECAR_EXT) => match validate_sidecar(path) {
                Ok((digest, sidecar)) => index.insert(digest, sidecar),
                Err(reason) => {
                    warn!("discarding cache entry {}: {reason}", path.display());
                    let _ = fs::remove_file(path);
                    let _ = fs::remove_file(path.with_extension(BLOB_EXT));
                }
            },
            Some(BLOB_EXT) => blobs.push(path.to_path_buf()),
            Some(TMP_EXT) => {
                let _ = fs::remove_file(path);
            }
            _ => {}
        }
    }

    // Blobs without a live sidecar can never be looked up again.
    for blob in blobs {
        let known = blob
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| index.entries.contains_key(stem));
        if !known {
            debug!("removing orphaned blob {}", blob.display());
            let _ = fs::remove_file(&blob);
        }
    }
    index
}

fn validate_sidecar(path: &Path) -> Result<(String, Sidecar), String> {
    let content = fs::read(path).map_err(|e| e.to_string())?;
    let sidecar: Sidecar = serde_json::from_slice(&content).map_err(|e| e.to_string())?;
    if sidecar.version != CACHE_VERSION {
        return Err(format!("version {}", sidecar.version));
    }
    let digest = sidecar.key().digest_hex();
    if path.file_stem().and_then(|s| s.to_str()) != Some(digest.as_str()) {
        return Err("file name does not match key".into());
    }
    let blob_len = fs::metadata(path.with_extension(BLOB_EXT))
        .map_err(|e| format!("blob: {e}"))?
        .len();
    if blob_len != sidecar.bytes {
        return Err(format!(
            "blob is {blob_len} bytes, sidecar says {}",
            sidecar.bytes
        ));
    }
    Ok((digest, sidecar))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let failed = |source: io::Error| CacheError::DiskWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(failed)?;
    }
    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("{}.{seq}.{TMP_EXT}", std::process::id()));
    if let Err(e) = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(failed(e));
    }
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Hit/miss counters across both tiers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    /// Lookups that missed both tiers and had to render.
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.disk_hits
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits() > 0 {
            write!(
                f,
                "{} from memory, {} from disk, {} rendered ({} total)",
                self.memory_hits,
                self.disk_hits,
                self.misses,
                self.total()
            )?;
        } else {
            write!(f, "{} rendered", self.misses)?;
        }
        if self.evictions > 0 {
            write!(f, ", {} evicted", self.evictions)?;
        }
        Ok(())
    }
}

/// The cache as seen by the coordinating thread: tier 1 in front of a
/// shared [`DiskTier`].
pub struct CacheStore {
    memory: LruCache<CacheKey, Arc<Thumbnail>>,
    disk: Arc<DiskTier>,
    memory_hits: u64,
    memory_evictions: u64,
}

impl CacheStore {
    /// Open the store. Zero capacities are configuration errors.
    pub fn open(dir: &Path, memory_entries: usize, disk_bytes: u64) -> Result<Self, CacheError> {
        let capacity =
            NonZeroUsize::new(memory_entries).ok_or(CacheError::InvalidCapacity("cache_size"))?;
        let disk = DiskTier::open(dir, disk_bytes)?;
        Ok(Self {
            memory: LruCache::new(capacity),
            disk: Arc::new(disk),
            memory_hits: 0,
            memory_evictions: 0,
        })
    }

    /// Handle for worker threads.
    pub fn disk(&self) -> Arc<DiskTier> {
        Arc::clone(&self.disk)
    }

    /// Tier 1, then tier 2. A tier-2 hit is promoted into tier 1.
    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<Thumbnail>> {
        if let Some(hit) = self.get_memory(key) {
            return Some(hit);
        }
        let thumbnail = Arc::new(self.disk.get(key)?);
        self.insert_memory(*key, Arc::clone(&thumbnail));
        Some(thumbnail)
    }

    /// Tier 1 only. Promotes on hit; a miss is not counted since the
    /// lookup continues on a worker.
    pub fn get_memory(&mut self, key: &CacheKey) -> Option<Arc<Thumbnail>> {
        let hit = self.memory.get(key).cloned()?;
        self.memory_hits += 1;
        Some(hit)
    }

    /// Tier-1 membership without touching recency.
    pub fn contains_memory(&self, key: &CacheKey) -> bool {
        self.memory.contains(key)
    }

    /// Store in both tiers.
    ///
    /// Tier 1 is updated even when the disk write fails; the error is
    /// returned for logging.
    pub fn put(
        &mut self,
        key: CacheKey,
        target_size: u32,
        style: &ThumbnailStyle,
        thumbnail: Arc<Thumbnail>,
    ) -> Result<(), CacheError> {
        let written = self.disk.put(&key, target_size, style, &thumbnail);
        self.insert_memory(key, thumbnail);
        written
    }

    /// Tier 1 only, for results whose tier-2 copy a worker already wrote.
    pub fn insert_memory(&mut self, key: CacheKey, thumbnail: Arc<Thumbnail>) {
        if let Some((evicted, _)) = self.memory.push(key, thumbnail)
            && evicted != key
        {
            self.memory_evictions += 1;
        }
    }

    /// Tier 1 is bounded on every insert; this enforces the disk budget.
    pub fn evict_if_needed(&mut self) -> usize {
        self.disk.evict_if_needed()
    }

    pub fn flush(&self) -> Result<(), CacheError> {
        self.disk.flush()
    }

    /// Teardown: persist access times and drop tier 1.
    pub fn close(&mut self) -> Result<(), CacheError> {
        self.memory.clear();
        self.disk.flush()
    }

    /// Empty both tiers. Returns the number of disk entries removed.
    pub fn clear(&mut self) -> Result<usize, CacheError> {
        self.memory.clear();
        self.disk.clear()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory.cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        let (disk_hits, misses, disk_evictions) = self.disk.counters();
        CacheStats {
            memory_hits: self.memory_hits,
            disk_hits,
            misses,
            evictions: self.memory_evictions + disk_evictions,
        }
    }
}
