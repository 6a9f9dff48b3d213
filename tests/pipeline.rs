//! End-to-end capture runs against an in-memory host and viewport.
//!
//! Nothing here touches the network or a browser: [`FakeHost`] answers the
//! direct-link requests and [`FakeViewport`] plays the rendered view. Time is
//! paused so settle and cooldown delays cost nothing.

mod common;

use async_trait::async_trait;
use deck2pdf::{
    CaptureConfig, CaptureError, CaptureEvent, CaptureState, Capturer, ChannelObserver,
    DirectLinkSource, FileSink, HtmlSnapshot, HttpTransport, Observer, RenderedCaptureSource,
    StrategyKind, StrategySet, TransportResponse, Viewport,
};
use deck2pdf::document::capture_url_with;
use futures::StreamExt;
use serial_test::serial;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DOC: &str = "https://decks.example.com/view/q3-review";

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Serves fixed responses by URL; anything unknown is a 404.
#[derive(Default)]
struct FakeHost {
    routes: HashMap<String, TransportResponse>,
    requests: Mutex<Vec<String>>,
    latency: Duration,
}

impl FakeHost {
    /// A host serving `sizes.len()` pages as PNGs of the given sizes.
    fn with_pages(sizes: &[(u32, u32)]) -> Self {
        let mut host = Self::default();
        for (i, &(w, h)) in sizes.iter().enumerate() {
            let n = i + 1;
            host.route(
                &format!("{DOC}/page_data/{n}"),
                TransportResponse::ok(format!(r#"{{"imageUrl": "/images/{n}.png"}}"#)),
            );
            host.route(
                &format!("https://decks.example.com/images/{n}.png"),
                TransportResponse::ok(common::png(w, h)),
            );
        }
        host
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn route(&mut self, url: &str, response: TransportResponse) {
        self.routes.insert(url.to_string(), response);
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for FakeHost {
    async fn get(&self, url: &str) -> Result<TransportResponse, String> {
        self.requests.lock().unwrap().push(url.to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self
            .routes
            .get(url)
            .cloned()
            .unwrap_or_else(|| TransportResponse::status(404)))
    }
}

/// A viewer that shows one page at a time and screenshots it as a PNG.
struct FakeViewport {
    sizes: Vec<(u32, u32)>,
    current: AtomicU32,
}

impl FakeViewport {
    fn new(sizes: &[(u32, u32)]) -> Self {
        Self {
            sizes: sizes.to_vec(),
            current: AtomicU32::new(1),
        }
    }
}

#[async_trait]
impl Viewport for FakeViewport {
    async fn go_to_page(&self, page: u32) -> Result<(), CaptureError> {
        self.current.store(page, Ordering::SeqCst);
        Ok(())
    }

    async fn next_page(&self) -> Result<(), CaptureError> {
        self.current.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_page_ready(&self) -> Result<bool, CaptureError> {
        Ok(true)
    }

    async fn capture_viewport(&self) -> Result<Vec<u8>, CaptureError> {
        let page = self.current.load(Ordering::SeqCst) as usize;
        let (w, h) = self
            .sizes
            .get(page - 1)
            .copied()
            .ok_or_else(|| CaptureError::Viewport(format!("no page {page}")))?;
        Ok(common::png(w, h))
    }
}

fn fast_config() -> CaptureConfig {
    CaptureConfig::builder()
        .max_attempts(2)
        .base_delay(Duration::from_millis(50))
        .build()
        .unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
#[serial]
async fn direct_link_run_produces_one_pdf_page_per_image() {
    let sizes = [(640, 360), (800, 600), (320, 480)];
    let host = Arc::new(FakeHost::with_pages(&sizes));
    let config = fast_config();
    let view = HtmlSnapshot::parse(&common::viewer_html("Q3 Review: Numbers", 1, 3));

    let direct = DirectLinkSource::new(host.clone(), DOC, &config).unwrap();
    let capturer = Capturer::new(config);
    let output = tokio_test::assert_ok!(
        capturer
            .capture(DOC, &view, StrategySet::direct_link_only(&direct))
            .await
    );

    assert_eq!(output.page_count, 3);
    assert_eq!(output.strategy, StrategyKind::DirectLink);
    assert_eq!(output.filename, "Q3-Review-Numbers.pdf");
    assert!(output.stats.fallback_reason.is_none());
    assert_eq!(output.stats.pdf_bytes, output.pdf.len() as u64);
    assert_eq!(
        common::media_boxes(&output.pdf),
        vec![(640, 360), (800, 600), (320, 480)]
    );

    let status = capturer.status();
    assert_eq!(status.state, CaptureState::Done);
    assert_eq!(status.pages_captured, 3);
    assert_eq!(status.request.map(|r| r.total_pages), Some(3));

    let requests = host.requests();
    assert_eq!(requests[0], format!("{DOC}/page_data/1"));
    assert_eq!(requests[1], "https://decks.example.com/images/1.png");
    assert_eq!(requests.len(), 6);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn broken_page_metadata_restarts_with_rendered_capture_from_page_one() {
    let sizes = [(640, 360), (640, 360), (640, 360)];
    let mut host = FakeHost::with_pages(&sizes);
    host.route(
        &format!("{DOC}/page_data/2"),
        TransportResponse::ok(r#"{"thumbnail": "/t/2.png"}"#),
    );
    let host = Arc::new(host);
    let viewport = Arc::new(FakeViewport::new(&[(1280, 720), (1280, 720), (1024, 768)]));
    let config = fast_config();
    let view = HtmlSnapshot::parse(&common::viewer_html("Board deck", 2, 3));

    let direct = DirectLinkSource::new(host.clone(), DOC, &config).unwrap();
    let rendered = RenderedCaptureSource::new(viewport.clone(), &config);
    let (obs, events) = ChannelObserver::new();
    let capturer = Capturer::new(config).with_observer(obs as Observer);

    let output = tokio_test::assert_ok!(
        capturer
            .capture(DOC, &view, StrategySet::with_fallback(&direct, &rendered))
            .await
    );
    drop(capturer);

    assert_eq!(output.strategy, StrategyKind::RenderedCapture);
    assert_eq!(output.page_count, 3);
    let reason = output.stats.fallback_reason.as_deref().unwrap_or_default();
    assert!(reason.contains("Page 2"), "fallback reason: {reason}");

    // Every page comes from the rendered view, none from the partial direct run.
    assert_eq!(
        common::media_boxes(&output.pdf),
        vec![(1280, 720), (1280, 720), (1024, 768)]
    );

    let events: Vec<CaptureEvent> = events.collect().await;
    assert_eq!(
        events,
        vec![
            CaptureEvent::Started { total: 3 },
            CaptureEvent::Strategy { strategy: StrategyKind::DirectLink },
            CaptureEvent::Progress { current: 1, total: 3 },
            CaptureEvent::Strategy { strategy: StrategyKind::RenderedCapture },
            CaptureEvent::Progress { current: 1, total: 3 },
            CaptureEvent::Progress { current: 2, total: 3 },
            CaptureEvent::Progress { current: 3, total: 3 },
            CaptureEvent::Complete,
        ]
    );
}

#[tokio::test(start_paused = true)]
#[serial]
async fn gated_view_fails_before_any_fetch() {
    let host = Arc::new(FakeHost::with_pages(&[(10, 10)]));
    let config = fast_config();
    let view = HtmlSnapshot::parse(common::gated_html());
    let direct = DirectLinkSource::new(host.clone(), DOC, &config).unwrap();
    let capturer = Capturer::new(config);

    let err = tokio_test::assert_err!(
        capturer
            .capture(DOC, &view, StrategySet::direct_link_only(&direct))
            .await
    );

    assert!(matches!(err, CaptureError::GatedAccess));
    assert!(host.requests().is_empty());
    assert_eq!(capturer.status().state, CaptureState::Failed);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn failed_run_leaves_capturer_ready_for_the_next_one() {
    let config = fast_config();
    let view = HtmlSnapshot::parse(&common::viewer_html("Deck", 1, 2));
    let capturer = Capturer::new(config.clone());

    let empty = Arc::new(FakeHost::default());
    let failing = DirectLinkSource::new(empty, DOC, &config).unwrap();
    let err = tokio_test::assert_err!(
        capturer
            .capture(DOC, &view, StrategySet::direct_link_only(&failing))
            .await
    );
    assert!(matches!(err, CaptureError::Network { attempts: 2, .. }));
    assert!(!capturer.is_busy());

    let host = Arc::new(FakeHost::with_pages(&[(200, 100), (200, 100)]));
    let working = DirectLinkSource::new(host, DOC, &config).unwrap();
    let output = tokio_test::assert_ok!(
        capturer
            .capture(DOC, &view, StrategySet::direct_link_only(&working))
            .await
    );
    assert_eq!(output.page_count, 2);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn captured_pdf_lands_in_the_sink_under_the_title() {
    let dir = tempfile::tempdir().unwrap();
    let host = Arc::new(FakeHost::with_pages(&[(300, 200)]));
    let config = fast_config();
    let view = HtmlSnapshot::parse(&common::viewer_html("Launch / Plan?", 1, 1));
    let direct = DirectLinkSource::new(host, DOC, &config).unwrap();
    let capturer = Capturer::new(config);

    let (output, path) = tokio_test::assert_ok!(
        capturer
            .capture_to_sink(
                DOC,
                &view,
                StrategySet::direct_link_only(&direct),
                &FileSink::new(dir.path()),
            )
            .await
    );

    assert_eq!(path, dir.path().join("Launch-Plan.pdf"));
    let written = std::fs::read(&path).unwrap();
    assert_eq!(written, output.pdf);
    assert_eq!(common::media_boxes(&written), vec![(300, 200)]);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn unreadable_direct_image_hands_over_to_rendered_capture() {
    let mut host = FakeHost::with_pages(&[(640, 360), (640, 360)]);
    host.route(
        "https://decks.example.com/images/2.png",
        TransportResponse::ok(b"<html>link expired</html>".to_vec()),
    );
    let host = Arc::new(host);
    let viewport = Arc::new(FakeViewport::new(&[(1280, 720), (1280, 720)]));
    let config = fast_config();
    let view = HtmlSnapshot::parse(&common::viewer_html("Deck", 1, 2));

    let direct = DirectLinkSource::new(host, DOC, &config).unwrap();
    let rendered = RenderedCaptureSource::new(viewport, &config);
    let capturer = Capturer::new(config);

    let output = tokio_test::assert_ok!(
        capturer
            .capture(DOC, &view, StrategySet::with_fallback(&direct, &rendered))
            .await
    );

    assert_eq!(output.strategy, StrategyKind::RenderedCapture);
    let reason = output.stats.fallback_reason.unwrap_or_default();
    assert!(reason.contains("unreadable"), "fallback reason: {reason}");
    assert_eq!(common::media_boxes(&output.pdf), vec![(1280, 720), (1280, 720)]);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn concurrent_http_captures_admit_only_one_session() {
    let mut host = FakeHost::with_pages(&[(100, 100), (100, 100)])
        .with_latency(Duration::from_millis(50));
    host.route(DOC, TransportResponse::ok(common::viewer_html("Deck", 1, 2)));
    let host: Arc<dyn HttpTransport> = Arc::new(host);
    let config = fast_config();

    let (first, second) = tokio::join!(
        capture_url_with(host.clone(), DOC, &config, None),
        capture_url_with(host.clone(), DOC, &config, None)
    );

    let outcomes = [first, second];
    let done = outcomes.iter().filter(|r| r.is_ok()).count();
    let busy = outcomes
        .iter()
        .filter(|r| matches!(r, Err(CaptureError::Busy)))
        .count();
    assert_eq!((done, busy), (1, 1));
    assert!(!deck2pdf::session_active());
}
