//! Observer trait for capture progress, completion, and failure.
//!
//! Inject an [`Arc<dyn CaptureObserver>`] into
//! [`crate::capture::Capturer::with_observer`] to receive events as a run
//! moves through its pages.
//!
//! Delivery is best effort. An observer that is slow to render, or a
//! [`ChannelObserver`] whose receiver was dropped, never fails or blocks the
//! capture; events are simply lost.
//!
//! # Example
//!
//! ```rust
//! use deck2pdf::{CaptureObserver, ProgressEvent};
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! struct LastPage(AtomicU32);
//!
//! impl CaptureObserver for LastPage {
//!     fn on_progress(&self, event: ProgressEvent) {
//!         self.0.store(event.current, Ordering::SeqCst);
//!     }
//! }
//!
//! let observer = LastPage(AtomicU32::new(0));
//! observer.on_progress(ProgressEvent { current: 2, total: 5 });
//! assert_eq!(observer.0.load(Ordering::SeqCst), 2);
//! ```

use crate::strategy::StrategyKind;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// One page finished inside the active strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// 1-indexed page just captured.
    pub current: u32,
    /// Total pages in the document.
    pub total: u32,
}

/// Receives events from a capture run.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Methods are called from the task driving the run and
/// must return quickly.
pub trait CaptureObserver: Send + Sync {
    /// Called once the page count is known and the session was accepted.
    fn on_capture_start(&self, total_pages: u32) {
        let _ = total_pages;
    }

    /// Called when a strategy begins (or restarts) from page 1.
    fn on_strategy_start(&self, strategy: StrategyKind) {
        let _ = strategy;
    }

    /// Called after every captured page.
    fn on_progress(&self, event: ProgressEvent) {
        let _ = event;
    }

    /// Called once when the PDF has been assembled.
    fn on_complete(&self) {}

    /// Called once when the run ends in failure.
    ///
    /// # Arguments
    /// * `message`: human-readable error description
    fn on_error(&self, message: &str) {
        let _ = message;
    }
}

/// A no-op observer, used when none is configured.
pub struct NoopObserver;

impl CaptureObserver for NoopObserver {}

/// Convenience alias for the shared observer handle.
pub type Observer = Arc<dyn CaptureObserver>;

// ── Channel-backed observer ──────────────────────────────────────────────

/// Event forwarded by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureEvent {
    Started { total: u32 },
    Strategy { strategy: StrategyKind },
    Progress { current: u32, total: u32 },
    Complete,
    Error { message: String },
}

/// A boxed stream of capture events.
pub type EventStream = Pin<Box<dyn Stream<Item = CaptureEvent> + Send>>;

/// Forwards every callback into an unbounded channel.
///
/// Sends to a closed channel are dropped silently.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<CaptureEvent>,
}

impl ChannelObserver {
    /// Create an observer together with the stream of events it produces.
    pub fn new() -> (Arc<Self>, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self { tx }),
            Box::pin(UnboundedReceiverStream::new(rx)),
        )
    }

    fn emit(&self, event: CaptureEvent) {
        let _ = self.tx.send(event);
    }
}

impl CaptureObserver for ChannelObserver {
    fn on_capture_start(&self, total_pages: u32) {
        self.emit(CaptureEvent::Started { total: total_pages });
    }

    fn on_strategy_start(&self, strategy: StrategyKind) {
        self.emit(CaptureEvent::Strategy { strategy });
    }

    fn on_progress(&self, event: ProgressEvent) {
        self.emit(CaptureEvent::Progress {
            current: event.current,
            total: event.total,
        });
    }

    fn on_complete(&self) {
        self.emit(CaptureEvent::Complete);
    }

    fn on_error(&self, message: &str) {
        self.emit(CaptureEvent::Error {
            message: message.to_string(),
        });
    }
}
