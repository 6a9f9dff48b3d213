//! Capture orchestration: one session at a time, direct link first, rendered
//! capture as the single fallback.
//!
//! ## State machine
//!
//! ```text
//!  Idle/Done/Failed ──capture()──▶ Locating ──▶ CapturingViaDirectLink ──▶ Assembling ──▶ Done
//!                                     │                 │ strategy failure      ▲
//!                                     │                 ▼                       │
//!                                     │        CapturingViaRenderedCapture ─────┘
//!                                     ▼                 │
//!                                   Failed ◀────────────┘ (any error, cancellation)
//! ```
//!
//! At most one session runs per process, across every [`Capturer`]. A
//! capture requested while another is between `Locating` and `Assembling`
//! is rejected with [`CaptureError::Busy`]; it is never queued and never
//! touches the running session.
//!
//! When the direct-link strategy is disabled or not supplied the run starts
//! in `CapturingViaRenderedCapture`. When no rendered source is supplied a
//! direct-link failure is final.

use crate::assemble::assemble;
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::filename::pdf_filename;
use crate::locate::{locate_pages, DocumentView};
use crate::output::{CaptureOutput, CaptureStats, DocumentSink};
use crate::progress::{CaptureObserver, Observer};
use crate::strategy::{ImageSource, PageImage, PageReporter, StrategyKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ── Session model ────────────────────────────────────────────────────────

/// Lifecycle state of the capture slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Locating,
    CapturingViaDirectLink,
    CapturingViaRenderedCapture,
    Assembling,
    Done,
    Failed,
}

impl CaptureState {
    /// Whether a new capture may start from this state.
    pub fn accepts_new_capture(self) -> bool {
        matches!(
            self,
            CaptureState::Idle | CaptureState::Done | CaptureState::Failed
        )
    }

    fn for_strategy(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::DirectLink => CaptureState::CapturingViaDirectLink,
            StrategyKind::RenderedCapture => CaptureState::CapturingViaRenderedCapture,
        }
    }
}

/// The document a capture is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentity {
    /// Address of the document view.
    pub url: String,
    pub title: Option<String>,
}

/// An accepted capture: target plus its page count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub target: TargetIdentity,
    /// Always ≥ 1.
    pub total_pages: u32,
}

/// Point-in-time view of the capture slot, from [`Capturer::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureStatus {
    pub state: CaptureState,
    pub request: Option<CaptureRequest>,
    pub strategy: Option<StrategyKind>,
    pub pages_captured: u32,
}

/// Image sources available to a run. `None` means "not available here".
#[derive(Clone, Copy, Default)]
pub struct StrategySet<'a> {
    pub direct_link: Option<&'a dyn ImageSource>,
    pub rendered: Option<&'a dyn ImageSource>,
}

impl<'a> StrategySet<'a> {
    pub fn direct_link_only(source: &'a dyn ImageSource) -> Self {
        Self {
            direct_link: Some(source),
            rendered: None,
        }
    }

    pub fn rendered_only(source: &'a dyn ImageSource) -> Self {
        Self {
            direct_link: None,
            rendered: Some(source),
        }
    }

    pub fn with_fallback(direct_link: &'a dyn ImageSource, rendered: &'a dyn ImageSource) -> Self {
        Self {
            direct_link: Some(direct_link),
            rendered: Some(rendered),
        }
    }
}

struct SessionSlot {
    state: CaptureState,
    request: Option<CaptureRequest>,
    strategy: Option<StrategyKind>,
    captured: Arc<AtomicU32>,
    cancel: CancellationToken,
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self {
            state: CaptureState::Idle,
            request: None,
            strategy: None,
            captured: Arc::new(AtomicU32::new(0)),
            cancel: CancellationToken::new(),
        }
    }
}

/// Set while any session in this process is between claim and finish.
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Whether a capture session is running anywhere in this process.
pub fn session_active() -> bool {
    SESSION_ACTIVE.load(Ordering::SeqCst)
}

/// Ownership of [`SESSION_ACTIVE`]; released on drop.
struct ProcessClaim;

impl ProcessClaim {
    fn acquire() -> Option<Self> {
        SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ProcessClaim)
    }
}

impl Drop for ProcessClaim {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::SeqCst);
    }
}

// ── Capturer ─────────────────────────────────────────────────────────────

/// Runs capture sessions, at most one at a time in the whole process.
///
/// Share it between tasks behind an `Arc`; every method takes `&self`.
/// [`Capturer::status`], [`Capturer::is_busy`] and [`Capturer::cancel`]
/// describe this capturer's own session.
pub struct Capturer {
    config: CaptureConfig,
    observer: Option<Observer>,
    slot: Mutex<SessionSlot>,
}

impl Capturer {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            observer: None,
            slot: Mutex::new(SessionSlot::default()),
        }
    }

    /// Attach an observer that receives every run's events.
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Snapshot of the current (or last) session.
    pub fn status(&self) -> CaptureStatus {
        let slot = self.lock_slot();
        CaptureStatus {
            state: slot.state,
            request: slot.request.clone(),
            strategy: slot.strategy,
            pages_captured: slot.captured.load(Ordering::SeqCst),
        }
    }

    /// Whether a session is in progress.
    pub fn is_busy(&self) -> bool {
        !self.lock_slot().state.accepts_new_capture()
    }

    /// Request cancellation of the running session.
    ///
    /// The session stops at its next page boundary or wait and ends with
    /// [`CaptureError::Cancelled`]. Returns `false` when nothing is running.
    pub fn cancel(&self) -> bool {
        let slot = self.lock_slot();
        if slot.state.accepts_new_capture() {
            return false;
        }
        info!("Cancellation requested");
        slot.cancel.cancel();
        true
    }

    /// Capture the document at `url` into a PDF.
    ///
    /// `view` answers page-discovery queries for the loaded document;
    /// `sources` supplies the image strategies available in this environment.
    ///
    /// # Errors
    /// * [`CaptureError::Busy`]: a session is already running in this process (nothing changed)
    /// * [`CaptureError::GatedAccess`] / [`CaptureError::Undetectable`]: page discovery failed
    /// * strategy errors: the last strategy tried failed
    /// * [`CaptureError::Assembly`]: the PDF could not be built
    /// * [`CaptureError::Cancelled`]: [`Capturer::cancel`] was called
    pub async fn capture(
        &self,
        url: &str,
        view: &dyn DocumentView,
        sources: StrategySet<'_>,
    ) -> Result<CaptureOutput, CaptureError> {
        self.run_session(url, view, sources, None)
            .await
            .map(|(output, _)| output)
    }

    /// [`Capturer::capture`], then hand the PDF to `sink`.
    ///
    /// Delivery is part of the session: the run is `Done` (and observers
    /// hear `on_complete`) only after the sink accepted the file. A sink
    /// failure ends the run as `Failed`.
    ///
    /// Returns the output together with the location the sink reported.
    pub async fn capture_to_sink(
        &self,
        url: &str,
        view: &dyn DocumentView,
        sources: StrategySet<'_>,
        sink: &dyn DocumentSink,
    ) -> Result<(CaptureOutput, PathBuf), CaptureError> {
        match self.run_session(url, view, sources, Some(sink)).await? {
            (output, Some(path)) => Ok((output, path)),
            (_, None) => Err(CaptureError::Internal("sink reported no location".into())),
        }
    }

    async fn run_session(
        &self,
        url: &str,
        view: &dyn DocumentView,
        sources: StrategySet<'_>,
        sink: Option<&dyn DocumentSink>,
    ) -> Result<(CaptureOutput, Option<PathBuf>), CaptureError> {
        let (captured, cancel, claim) = self.begin()?;
        let mut guard = SessionGuard {
            capturer: self,
            finished: false,
            _claim: claim,
        };

        let result = match self.run(url, view, sources, captured, cancel).await {
            Ok(output) => match sink {
                Some(sink) => sink
                    .save(&output.filename, &output.pdf)
                    .await
                    .map(|path| (output, Some(path))),
                None => Ok((output, None)),
            },
            Err(e) => Err(e),
        };
        guard.finished = true;

        match result {
            Ok((output, path)) => {
                self.set_state(CaptureState::Done);
                self.notify(|obs| obs.on_complete());
                info!(
                    "Capture done: {} pages via {} in {}ms",
                    output.page_count, output.strategy, output.stats.total_duration_ms
                );
                Ok((output, path))
            }
            Err(e) => {
                self.set_state(CaptureState::Failed);
                warn!("Capture failed: {}", e);
                let message = e.to_string();
                self.notify(|obs| obs.on_error(&message));
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        url: &str,
        view: &dyn DocumentView,
        sources: StrategySet<'_>,
        captured: Arc<AtomicU32>,
        cancel: CancellationToken,
    ) -> Result<CaptureOutput, CaptureError> {
        let total_start = Instant::now();

        // ── Step 1: Locate pages ─────────────────────────────────────────
        let position = locate_pages(view)?;
        let total = position.total;
        let title = view.title();
        {
            let mut slot = self.lock_slot();
            slot.request = Some(CaptureRequest {
                target: TargetIdentity {
                    url: url.to_string(),
                    title: title.clone(),
                },
                total_pages: total,
            });
        }
        info!("Capturing '{}' ({} pages)", title.as_deref().unwrap_or(url), total);
        self.notify(|obs| obs.on_capture_start(total));

        // ── Step 2: Capture pages ────────────────────────────────────────
        let direct = sources.direct_link.filter(|_| self.config.use_direct_link);
        let reporter = PageReporter::new(total, self.observer.clone(), captured, cancel);
        let capture_start = Instant::now();
        let mut fallback_reason = None;

        let (strategy, pages) = match (direct, sources.rendered) {
            (None, None) => {
                return Err(CaptureError::InvalidConfig(
                    "no image source is available for this document".into(),
                ))
            }
            (None, Some(rendered)) => (rendered.kind(), self.run_source(rendered, &reporter).await?),
            (Some(direct), rendered) => match self.run_source(direct, &reporter).await {
                Ok(pages) => (direct.kind(), pages),
                Err(e) => match rendered {
                    Some(rendered) if e.is_strategy_failure() => {
                        warn!("{} failed ({}); restarting with {} from page 1", direct.kind(), e, rendered.kind());
                        fallback_reason = Some(e.to_string());
                        (rendered.kind(), self.run_source(rendered, &reporter).await?)
                    }
                    _ => return Err(e),
                },
            },
        };
        let capture_duration_ms = capture_start.elapsed().as_millis() as u64;

        // ── Step 3: Assemble ─────────────────────────────────────────────
        self.set_state(CaptureState::Assembling);
        let assembly_start = Instant::now();
        let pdf = tokio::task::spawn_blocking(move || assemble(pages))
            .await
            .map_err(|e| CaptureError::Internal(format!("assembly task panicked: {e}")))??;
        let assembly_duration_ms = assembly_start.elapsed().as_millis() as u64;

        Ok(CaptureOutput {
            filename: pdf_filename(title.as_deref(), &self.config.default_filename),
            page_count: total,
            strategy,
            stats: CaptureStats {
                total_duration_ms: total_start.elapsed().as_millis() as u64,
                capture_duration_ms,
                assembly_duration_ms,
                fallback_reason,
                pdf_bytes: pdf.len() as u64,
            },
            pdf,
        })
    }

    async fn run_source(
        &self,
        source: &dyn ImageSource,
        reporter: &PageReporter,
    ) -> Result<Vec<PageImage>, CaptureError> {
        reporter.check_cancelled()?;
        let kind = source.kind();
        {
            let mut slot = self.lock_slot();
            slot.state = CaptureState::for_strategy(kind);
            slot.strategy = Some(kind);
        }
        reporter.restart();
        self.notify(|obs| obs.on_strategy_start(kind));

        let pages = source.fetch_all_pages(reporter.total(), reporter).await?;
        if pages.len() != reporter.total() as usize {
            return Err(CaptureError::Internal(format!(
                "{} returned {} pages, expected {}",
                kind,
                pages.len(),
                reporter.total()
            )));
        }
        Ok(pages)
    }

    /// Atomically claim this capturer's slot and the process-wide session.
    fn begin(&self) -> Result<(Arc<AtomicU32>, CancellationToken, ProcessClaim), CaptureError> {
        let mut slot = self.lock_slot();
        if !slot.state.accepts_new_capture() {
            return Err(CaptureError::Busy);
        }
        let claim = ProcessClaim::acquire().ok_or(CaptureError::Busy)?;
        *slot = SessionSlot {
            state: CaptureState::Locating,
            ..SessionSlot::default()
        };
        Ok((slot.captured.clone(), slot.cancel.clone(), claim))
    }

    fn set_state(&self, state: CaptureState) {
        self.lock_slot().state = state;
    }

    fn lock_slot(&self) -> MutexGuard<'_, SessionSlot> {
        // The slot holds plain data, so a poisoned lock is still consistent.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, f: impl FnOnce(&dyn CaptureObserver)) {
        if let Some(ref obs) = self.observer {
            f(obs.as_ref());
        }
    }
}

/// Marks the slot failed if a capture future is dropped mid-run, and frees
/// the process-wide session either way.
struct SessionGuard<'a> {
    capturer: &'a Capturer,
    finished: bool,
    _claim: ProcessClaim,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Capture abandoned before completion");
            self.capturer.lock_slot().cancel.cancel();
            self.capturer.set_state(CaptureState::Failed);
        }
    }
}
