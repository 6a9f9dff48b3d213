//! Error types for the deck2pdf library.
//!
//! Every failure a capture run can end with is a variant of [`CaptureError`].
//! The variants fall into three groups:
//!
//! * **Terminal for the document**: [`CaptureError::GatedAccess`],
//!   [`CaptureError::Undetectable`], [`CaptureError::Assembly`]. Retrying the
//!   same document will not help until something outside the library changes.
//!
//! * **Strategy failures**: [`CaptureError::Network`],
//!   [`CaptureError::MetadataInvalid`], [`CaptureError::PageImageInvalid`],
//!   [`CaptureError::Viewport`]. Raised by an
//!   image source; the orchestrator reacts by falling back to the next
//!   strategy (once) or by failing the run.
//!
//! * **Request-level**: [`CaptureError::Busy`], [`CaptureError::Cancelled`],
//!   [`CaptureError::InvalidConfig`]. These affect only the request that
//!   received them.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the deck2pdf library.
#[derive(Debug, Error)]
pub enum CaptureError {
    // ── Page discovery ────────────────────────────────────────────────────
    /// An access-control prompt (email form, gate container) hides the pages.
    #[error(
        "The document is behind an access gate (email or passcode prompt).\n\
         Open it in a browser, pass the gate, then retry."
    )]
    GatedAccess,

    /// No page-count heuristic recognised the document view.
    #[error("Could not determine the page count: the document view was not recognised")]
    Undetectable,

    // ── Strategy failures ─────────────────────────────────────────────────
    /// A byte fetch failed after every retry attempt.
    #[error("Network error fetching '{url}' after {attempts} attempt(s): {detail}")]
    Network {
        url: String,
        attempts: u32,
        detail: String,
    },

    /// A page-metadata response did not name an image URL.
    #[error("Page {page}: metadata response is unusable: {detail}")]
    MetadataInvalid { page: u32, detail: String },

    /// A downloaded page image could not be decoded.
    #[error("Page {page}: downloaded image is unreadable: {detail}")]
    PageImageInvalid { page: u32, detail: String },

    /// The live view (navigation, readiness, rasterisation) failed.
    #[error("Viewport error: {0}")]
    Viewport(String),

    // ── Assembly ──────────────────────────────────────────────────────────
    /// The image set is empty, malformed, or out of sequence.
    #[error("Could not assemble PDF: {0}")]
    Assembly(String),

    // ── Session ───────────────────────────────────────────────────────────
    /// Another capture is already running.
    #[error("A capture is already in progress; wait for it to finish")]
    Busy,

    /// The run was cancelled between pages.
    #[error("Capture cancelled")]
    Cancelled,

    // ── Config ────────────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output PDF.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CaptureError {
    /// Whether this error ends the current strategy and lets the orchestrator
    /// try the next one.
    ///
    /// A cancelled run stops outright, as do assembly and internal errors.
    pub fn is_strategy_failure(&self) -> bool {
        matches!(
            self,
            CaptureError::Network { .. }
                | CaptureError::MetadataInvalid { .. }
                | CaptureError::PageImageInvalid { .. }
                | CaptureError::Viewport(_)
        )
    }
}
