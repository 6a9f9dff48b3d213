//! # deck2pdf
//!
//! Capture a paginated web presentation page by page and assemble the pages
//! into a single PDF.
//!
//! ## Why this crate?
//!
//! Hosted slide viewers show one page at a time, hide the page count behind a
//! UI that changes without notice, and throttle clients that move too fast.
//! This crate works out the page count from whatever the view exposes, pulls
//! every page image with a primary and a fallback strategy, backs off when the
//! host rate-limits, and writes one PDF whose pages match the source rasters.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document view
//!  │
//!  ├─ 1. Locate    page label → visible text → thumbnails → inline scripts
//!  ├─ 2. Capture   direct link (page_data/<n> → image URL → bytes)
//!  │               └─ on failure: rendered capture from page 1
//!  ├─ 3. Retry     every fetch: 429 → Retry-After × n, else base × n
//!  ├─ 4. Assemble  one PDF page per image, MediaBox = image size
//!  └─ 5. Deliver   file name from title, atomic write
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deck2pdf::{capture_url_to_dir, CaptureConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CaptureConfig::default();
//!     let (output, path) =
//!         capture_url_to_dir("https://decks.example.com/view/abc123", "out", &config, None).await?;
//!     eprintln!("{} pages via {} → {}", output.page_count, output.strategy, path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `deck2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `browser` | off     | Headless Chrome backend for page discovery and rendered capture |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! deck2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
#[cfg(feature = "browser")]
pub mod browser;
pub mod capture;
pub mod config;
pub mod document;
pub mod error;
pub mod fetch;
pub mod filename;
pub mod locate;
pub mod output;
pub mod progress;
pub mod strategy;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::assemble;
pub use capture::{
    session_active, CaptureRequest, CaptureState, CaptureStatus, Capturer, StrategySet,
    TargetIdentity,
};
pub use config::{CaptureConfig, CaptureConfigBuilder, RetryPolicy};
pub use document::{capture_url, capture_url_to_dir, inspect, DocumentInfo};
pub use error::CaptureError;
pub use fetch::{fetch_with_retry, fetch_with_retry_until, HttpTransport, ReqwestTransport, TransportResponse};
pub use locate::{locate_pages, DocumentView, HtmlSnapshot, PagePosition, ViewProbe};
pub use output::{CaptureOutput, CaptureStats, DocumentSink, FileSink};
pub use progress::{
    CaptureEvent, CaptureObserver, ChannelObserver, EventStream, NoopObserver, Observer,
    ProgressEvent,
};
pub use strategy::{
    DirectLinkSource, ImageEncoding, ImageSource, PageImage, PageReporter,
    RenderedCaptureSource, StrategyKind, Viewport,
};
