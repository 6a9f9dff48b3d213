//! HTTP-only entry points: inspect or capture a document without a browser.
//!
//! The viewer page is fetched through [`fetch_with_retry`], parsed into an
//! [`HtmlSnapshot`] for page discovery, and pages are pulled with the
//! direct-link strategy. There is no rendered-capture fallback on this path;
//! use [`crate::capture::Capturer`] with a [`crate::strategy::Viewport`]
//! (e.g. the `browser` feature's session) when one is needed.

use crate::capture::{Capturer, StrategySet};
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::fetch::{fetch_with_retry, HttpTransport, ReqwestTransport};
use crate::filename::pdf_filename;
use crate::locate::{locate_with_method, DocumentView, HtmlSnapshot, LocateMethod};
use crate::output::{CaptureOutput, FileSink};
use crate::progress::Observer;
use crate::strategy::DirectLinkSource;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// What page discovery found, without capturing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub url: String,
    pub title: Option<String>,
    pub current_page: u32,
    pub total_pages: u32,
    /// Heuristic that produced the page count.
    pub method: LocateMethod,
    /// File name a capture would be saved under.
    pub filename: String,
}

/// GET `url` and parse it as a [`HtmlSnapshot`].
pub async fn fetch_snapshot(
    transport: &dyn HttpTransport,
    url: &str,
    config: &CaptureConfig,
) -> Result<HtmlSnapshot, CaptureError> {
    let body = fetch_with_retry(transport, url, &config.retry).await?;
    let html = String::from_utf8_lossy(&body);
    debug!("Fetched {} ({} bytes of HTML)", url, body.len());
    Ok(HtmlSnapshot::parse(&html))
}

/// Locate pages of the document at `url` over plain HTTP.
///
/// Does not fetch any page image.
pub async fn inspect(url: &str, config: &CaptureConfig) -> Result<DocumentInfo, CaptureError> {
    let transport = ReqwestTransport::new(config.http_timeout_secs, &config.user_agent)?;
    inspect_with(&transport, url, config).await
}

/// [`inspect`] through a caller-supplied transport.
pub async fn inspect_with(
    transport: &dyn HttpTransport,
    url: &str,
    config: &CaptureConfig,
) -> Result<DocumentInfo, CaptureError> {
    let snapshot = fetch_snapshot(transport, url, config).await?;
    let (position, method) = locate_with_method(&snapshot)?;
    let title = snapshot.title();
    Ok(DocumentInfo {
        url: url.to_string(),
        filename: pdf_filename(title.as_deref(), &config.default_filename),
        title,
        current_page: position.current,
        total_pages: position.total,
        method,
    })
}

/// Capture the document at `url` over plain HTTP (direct-link strategy only).
pub async fn capture_url(
    url: &str,
    config: &CaptureConfig,
    observer: Option<Observer>,
) -> Result<CaptureOutput, CaptureError> {
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(config.http_timeout_secs, &config.user_agent)?);
    capture_url_with(transport, url, config, observer).await
}

/// [`capture_url`] through a caller-supplied transport.
///
/// Every capture in the process shares one session: a call made while
/// another capture runs fails with [`CaptureError::Busy`].
pub async fn capture_url_with(
    transport: Arc<dyn HttpTransport>,
    url: &str,
    config: &CaptureConfig,
    observer: Option<Observer>,
) -> Result<CaptureOutput, CaptureError> {
    let (source, snapshot, capturer) = prepare(transport, url, config, observer).await?;
    capturer
        .capture(url, &snapshot, StrategySet::direct_link_only(&source))
        .await
}

/// [`capture_url`], then write the PDF into `output_dir`.
///
/// Returns the output and the path of the written file.
pub async fn capture_url_to_dir(
    url: &str,
    output_dir: impl AsRef<Path>,
    config: &CaptureConfig,
    observer: Option<Observer>,
) -> Result<(CaptureOutput, PathBuf), CaptureError> {
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(config.http_timeout_secs, &config.user_agent)?);
    let (source, snapshot, capturer) = prepare(transport, url, config, observer).await?;
    let sink = FileSink::new(output_dir.as_ref());
    capturer
        .capture_to_sink(url, &snapshot, StrategySet::direct_link_only(&source), &sink)
        .await
}

/// Direct-link source, parsed viewer page, and a capturer for one HTTP run.
async fn prepare(
    transport: Arc<dyn HttpTransport>,
    url: &str,
    config: &CaptureConfig,
    observer: Option<Observer>,
) -> Result<(DirectLinkSource, HtmlSnapshot, Capturer), CaptureError> {
    if !config.use_direct_link {
        return Err(CaptureError::InvalidConfig(
            "direct link is disabled and no rendered view is available over plain HTTP".into(),
        ));
    }
    info!("Capturing {} over HTTP", url);

    let source = DirectLinkSource::new(transport.clone(), url, config)?;
    let snapshot = match fetch_snapshot(transport.as_ref(), url, config).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            if let Some(ref obs) = observer {
                obs.on_error(&e.to_string());
            }
            return Err(e);
        }
    };

    let mut capturer = Capturer::new(config.clone());
    if let Some(obs) = observer {
        capturer = capturer.with_observer(obs);
    }
    Ok((source, snapshot, capturer))
}
