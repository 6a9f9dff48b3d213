//! Direct-link strategy: ask the host where each page image lives.
//!
//! For page `n` the host answers `GET <document-base>/page_data/<n>` with a
//! JSON object naming the page's image URL. The field carrying the URL has
//! changed name over time, so an ordered alias list is searched and the
//! first non-empty string wins.
//!
//! ```text
//! page_data/1 ──▶ {"imageUrl": "…/1.png"} ──▶ GET …/1.png ──▶ PageImage 1
//! page_data/2 ──▶ …
//! ```
//!
//! Pages are fetched strictly one after another; the host's rate limit makes
//! parallel fetches counter-productive.

use super::{ImageSource, PageImage, PageReporter, StrategyKind};
use crate::config::{CaptureConfig, RetryPolicy};
use crate::error::CaptureError;
use crate::fetch::{fetch_with_retry_until, HttpTransport};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Page images fetched by URL from the host's page-metadata endpoint.
pub struct DirectLinkSource {
    transport: Arc<dyn HttpTransport>,
    base: Url,
    policy: RetryPolicy,
    image_url_fields: Vec<String>,
}

impl DirectLinkSource {
    /// Create a source for the document viewed at `document_url`.
    ///
    /// # Errors
    /// [`CaptureError::InvalidConfig`] when `document_url` is not an
    /// absolute http(s) URL.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        document_url: &str,
        config: &CaptureConfig,
    ) -> Result<Self, CaptureError> {
        Ok(Self {
            transport,
            base: document_base(document_url)?,
            policy: config.retry,
            image_url_fields: config.image_url_fields.clone(),
        })
    }

    /// Metadata endpoint for `page`.
    pub fn metadata_url(&self, page: u32) -> String {
        format!(
            "{}/page_data/{}",
            self.base.as_str().trim_end_matches('/'),
            page
        )
    }

    async fn fetch(&self, url: &str, reporter: &PageReporter) -> Result<Vec<u8>, CaptureError> {
        fetch_with_retry_until(self.transport.as_ref(), url, &self.policy, reporter.cancel_token())
            .await
    }

    async fn fetch_page(&self, page: u32, reporter: &PageReporter) -> Result<PageImage, CaptureError> {
        let metadata_url = self.metadata_url(page);
        let body = self.fetch(&metadata_url, reporter).await?;

        let json: Value = serde_json::from_slice(&body).map_err(|e| CaptureError::MetadataInvalid {
            page,
            detail: format!("response is not JSON: {e}"),
        })?;
        let raw = extract_image_url(&json, &self.image_url_fields).ok_or_else(|| {
            CaptureError::MetadataInvalid {
                page,
                detail: format!(
                    "none of the fields [{}] holds an image URL",
                    self.image_url_fields.join(", ")
                ),
            }
        })?;
        let image_url = resolve_image_url(&metadata_url, raw).map_err(|detail| {
            CaptureError::MetadataInvalid { page, detail }
        })?;
        debug!("Page {}: image at {}", page, image_url);

        let bytes = self.fetch(image_url.as_str(), reporter).await?;
        PageImage::decode(page, bytes).map_err(|e| CaptureError::PageImageInvalid {
            page,
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl ImageSource for DirectLinkSource {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectLink
    }

    async fn fetch_all_pages(
        &self,
        total: u32,
        reporter: &PageReporter,
    ) -> Result<Vec<PageImage>, CaptureError> {
        info!("Fetching {} pages via direct link from {}", total, self.base);
        let mut pages = Vec::with_capacity(total as usize);
        for page in 1..=total {
            reporter.check_cancelled()?;
            let image = self.fetch_page(page, reporter).await?;
            debug!(
                "Page {}/{}: {}×{} {:?}",
                page, total, image.width, image.height, image.encoding
            );
            pages.push(image);
            reporter.page_captured(page);
        }
        Ok(pages)
    }
}

// ── URL handling ─────────────────────────────────────────────────────────

/// The document URL without query or fragment, used as the metadata base.
///
/// # Errors
/// [`CaptureError::InvalidConfig`] for unparsable or non-http(s) URLs.
pub fn document_base(document_url: &str) -> Result<Url, CaptureError> {
    let mut url = Url::parse(document_url.trim())
        .map_err(|e| CaptureError::InvalidConfig(format!("invalid document URL '{document_url}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CaptureError::InvalidConfig(format!(
            "document URL must be http or https, got '{}'",
            url.scheme()
        )));
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// First non-empty string among `fields` in a JSON object.
pub fn extract_image_url<'a>(json: &'a Value, fields: &[String]) -> Option<&'a str> {
    let obj = json.as_object()?;
    fields.iter().find_map(|field| {
        obj.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    })
}

fn resolve_image_url(metadata_url: &str, raw: &str) -> Result<Url, String> {
    let base = Url::parse(metadata_url).map_err(|e| format!("bad metadata URL: {e}"))?;
    base.join(raw)
        .map_err(|e| format!("image URL '{raw}' does not resolve: {e}"))
}
