//! Rendered-capture strategy: rasterise the live view one page at a time.
//!
//! Used when the direct-link strategy is unavailable or has failed. Per page:
//!
//! ```text
//! wait until ready (poll, bounded by load_timeout)
//!   → settle_delay
//!   → capture viewport → decode
//!   → capture_cooldown
//!   → next page (unless last)
//! ```
//!
//! The settle and cooldown delays are applied on every page regardless of
//! how fast the view became ready.

use super::{ImageSource, PageImage, PageReporter, StrategyKind};
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Navigation and rasterisation of a live document view.
///
/// Navigation calls only dispatch the request; completion is observed through
/// [`Viewport::is_page_ready`].
#[async_trait]
pub trait Viewport: Send + Sync {
    /// Jump to page `page` (1-indexed).
    async fn go_to_page(&self, page: u32) -> Result<(), CaptureError>;

    /// Advance one page.
    async fn next_page(&self) -> Result<(), CaptureError>;

    /// Whether the current page has finished loading.
    async fn is_page_ready(&self) -> Result<bool, CaptureError>;

    /// Lossless (PNG) raster of the visible viewport.
    async fn capture_viewport(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Page images captured from a [`Viewport`].
pub struct RenderedCaptureSource {
    viewport: Arc<dyn Viewport>,
    settle_delay: Duration,
    capture_cooldown: Duration,
    load_timeout: Duration,
    load_poll_interval: Duration,
}

impl RenderedCaptureSource {
    pub fn new(viewport: Arc<dyn Viewport>, config: &CaptureConfig) -> Self {
        Self {
            viewport,
            settle_delay: config.settle_delay,
            capture_cooldown: config.capture_cooldown,
            load_timeout: config.load_timeout,
            load_poll_interval: config.load_poll_interval,
        }
    }

    /// Poll readiness until ready or `load_timeout` elapses.
    ///
    /// A timeout is not an error: the page is captured in whatever state it
    /// reached.
    async fn wait_until_ready(&self, page: u32, reporter: &PageReporter) -> Result<(), CaptureError> {
        let deadline = Instant::now() + self.load_timeout;
        loop {
            reporter.check_cancelled()?;
            if self.viewport.is_page_ready().await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(
                    "Page {} not ready after {:?}, capturing anyway",
                    page, self.load_timeout
                );
                return Ok(());
            }
            reporter.pause(self.load_poll_interval).await?;
        }
    }
}

#[async_trait]
impl ImageSource for RenderedCaptureSource {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RenderedCapture
    }

    async fn fetch_all_pages(
        &self,
        total: u32,
        reporter: &PageReporter,
    ) -> Result<Vec<PageImage>, CaptureError> {
        info!("Capturing {} pages from the rendered view", total);
        let mut pages = Vec::with_capacity(total as usize);

        reporter.check_cancelled()?;
        self.viewport.go_to_page(1).await?;

        for page in 1..=total {
            self.wait_until_ready(page, reporter).await?;
            reporter.pause(self.settle_delay).await?;

            let raster = self.viewport.capture_viewport().await?;
            let image = PageImage::decode(page, raster)
                .map_err(|e| CaptureError::Viewport(format!("unusable raster: {e}")))?;
            debug!("Page {}/{}: {}×{}", page, total, image.width, image.height);
            pages.push(image);
            reporter.page_captured(page);

            reporter.pause(self.capture_cooldown).await?;
            if page < total {
                self.viewport.next_page().await?;
            }
        }
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_images::png;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        GoTo(u32),
        Next,
        Capture,
    }

    /// Becomes ready after `polls_until_ready` readiness checks per page.
    struct FakeViewport {
        polls_until_ready: Option<u32>,
        polls: AtomicU32,
        calls: Mutex<Vec<(Call, Instant)>>,
    }

    impl FakeViewport {
        fn new(polls_until_ready: Option<u32>) -> Arc<Self> {
            Arc::new(Self {
                polls_until_ready,
                polls: AtomicU32::new(0),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push((call, Instant::now()));
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }

        fn capture_times(&self) -> Vec<Instant> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| *c == Call::Capture)
                .map(|(_, t)| *t)
                .collect()
        }
    }

    #[async_trait]
    impl Viewport for FakeViewport {
        async fn go_to_page(&self, page: u32) -> Result<(), CaptureError> {
            self.polls.store(0, Ordering::SeqCst);
            self.record(Call::GoTo(page));
            Ok(())
        }

        async fn next_page(&self) -> Result<(), CaptureError> {
            self.polls.store(0, Ordering::SeqCst);
            self.record(Call::Next);
            Ok(())
        }

        async fn is_page_ready(&self) -> Result<bool, CaptureError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(self.polls_until_ready.is_some_and(|ready_at| n >= ready_at))
        }

        async fn capture_viewport(&self) -> Result<Vec<u8>, CaptureError> {
            self.record(Call::Capture);
            Ok(png(640, 480))
        }
    }

    fn config() -> CaptureConfig {
        CaptureConfig::builder()
            .settle_delay(Duration::from_millis(1000))
            .capture_cooldown(Duration::from_millis(600))
            .load_timeout(Duration::from_secs(10))
            .load_poll_interval(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn captures_every_page_from_the_first() {
        let viewport = FakeViewport::new(Some(1));
        let source = RenderedCaptureSource::new(viewport.clone(), &config());
        let reporter = PageReporter::detached(3);

        let pages = source.fetch_all_pages(3, &reporter).await.unwrap();

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2].page_number, 3);
        assert_eq!((pages[0].width, pages[0].height), (640, 480));
        assert_eq!(
            viewport.calls(),
            vec![
                Call::GoTo(1),
                Call::Capture,
                Call::Next,
                Call::Capture,
                Call::Next,
                Call::Capture,
            ]
        );
        assert_eq!(reporter.pages_captured(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_and_cooldown_apply_even_when_ready_at_once() {
        let viewport = FakeViewport::new(Some(1));
        let source = RenderedCaptureSource::new(viewport.clone(), &config());

        let start = Instant::now();
        source
            .fetch_all_pages(2, &PageReporter::detached(2))
            .await
            .unwrap();

        let captures = viewport.capture_times();
        assert_eq!(captures[0] - start, Duration::from_millis(1000));
        assert_eq!(captures[1] - captures[0], Duration::from_millis(1600));
        assert_eq!(start.elapsed(), Duration::from_millis(3200));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_readiness_by_polling() {
        let viewport = FakeViewport::new(Some(4));
        let source = RenderedCaptureSource::new(viewport.clone(), &config());

        let start = Instant::now();
        source
            .fetch_all_pages(1, &PageReporter::detached(1))
            .await
            .unwrap();

        // three unsuccessful polls at 200 ms, then settle
        assert_eq!(viewport.capture_times()[0] - start, Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_page_is_captured_after_timeout() {
        let viewport = FakeViewport::new(None);
        let source = RenderedCaptureSource::new(viewport.clone(), &config());

        let start = Instant::now();
        let pages = source
            .fetch_all_pages(1, &PageReporter::detached(1))
            .await
            .unwrap();

        assert_eq!(pages.len(), 1);
        let waited = viewport.capture_times()[0] - start;
        assert!(waited >= Duration::from_secs(11), "waited {waited:?}");
        assert!(waited < Duration::from_secs(12), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_pages() {
        let viewport = FakeViewport::new(Some(1));
        let source = RenderedCaptureSource::new(viewport.clone(), &config());
        let token = CancellationToken::new();
        let reporter = PageReporter::new(5, None, Arc::new(AtomicU32::new(0)), token.clone());

        let run = source.fetch_all_pages(5, &reporter);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(2000)).await;
            token.cancel();
        };
        let (result, ()) = tokio::join!(run, cancel);

        assert!(matches!(result, Err(CaptureError::Cancelled)));
        assert_eq!(reporter.pages_captured(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_raster_is_a_viewport_error() {
        struct Blank;

        #[async_trait]
        impl Viewport for Blank {
            async fn go_to_page(&self, _page: u32) -> Result<(), CaptureError> {
                Ok(())
            }
            async fn next_page(&self) -> Result<(), CaptureError> {
                Ok(())
            }
            async fn is_page_ready(&self) -> Result<bool, CaptureError> {
                Ok(true)
            }
            async fn capture_viewport(&self) -> Result<Vec<u8>, CaptureError> {
                Ok(Vec::new())
            }
        }

        let source = RenderedCaptureSource::new(Arc::new(Blank), &config());
        let err = source
            .fetch_all_pages(1, &PageReporter::detached(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Viewport(_)));
    }
}
