//! # thumbflow
//!
//! Thumbnail cache and asynchronous image pipeline for waterfall (masonry)
//! photo browsers. Turns arbitrary image files, common raster formats and
//! camera RAWs alike, into cached, ready-to-display thumbnails fast enough
//! to keep a scrolling grid fluid, inside a bounded memory and disk budget.
//!
//! # Architecture
//!
//! ```text
//!                       ensure(asset, priority)
//!  browser ──────────────────────────────────────▶ RequestCoordinator
//!     ▲                                               │        │
//!     │ ThumbnailEvent          tier-1 hit: Immediate │        │ miss
//!     │                                               ▼        ▼
//!     └──────────────── poll_events ◀──── CacheStore ◀── TaskScheduler
//!                                        (LRU + disk)     (worker pool)
//!                                                              │
//!                                  tier-2 lookup, decode, generate, style
//! ```
//!
//! The coordinating thread owns the in-memory tier. Workers only touch the
//! disk tier (writes are keyed by content and style, so two writers of one
//! key write the same bytes) and hand finished thumbnails back through a
//! channel that [`coordinator::RequestCoordinator::poll_events`] drains.
//!
//! Layout runs independently of pixel work: as soon as an item's aspect
//! ratio is known, [`layout::WaterfallLayout`] can place it.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | `ImageAsset`, content fingerprints, style hashes, cache keys |
//! | [`config`] | Layered `config.toml` loading and validation |
//! | [`imaging`] | Format sniffing, raster and RAW decode, thumbnail scaling and styling |
//! | [`cache`] | Two-tier cache: in-memory LRU over a content-addressed disk store |
//! | [`scheduler`] | Priority worker pool with deduplication, cancellation and timeouts |
//! | [`layout`] | Shortest-column waterfall placement and viewport ranges |
//! | [`coordinator`] | The single entry point a browser talks to |
//! | [`scan`] | Folder enumeration into `ImageAsset`s |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Content-Addressed Keys
//!
//! A cache key is the pair (content fingerprint, style hash). The fingerprint
//! hashes path, size and modification time, so a file rewritten on disk
//! never serves an old thumbnail. The style hash covers the target size and
//! every enabled style stage, so flipping "rounded corners" in the settings
//! renders fresh bitmaps while the old ones age out of the disk tier.
//!
//! ## Failures Become Placeholders
//!
//! A corrupt, truncated or unsupported file yields a neutral placeholder
//! tile plus an error on the completion event. One bad file never stalls a
//! folder, and a panicking decoder is caught on the worker.
//!
//! ## Embedded Previews For RAW
//!
//! Camera RAWs almost always carry a full-size JPEG preview. Thumbnails are
//! rendered from it when present; demosaicing is the fallback, not the rule.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod imaging;
pub mod layout;
pub mod output;
pub mod scan;
pub mod scheduler;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
