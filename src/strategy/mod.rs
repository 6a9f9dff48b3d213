//! Page image sources.
//!
//! A capture run obtains one raster per page from an [`ImageSource`]. Two
//! implementations exist, tried in this order by the orchestrator:
//!
//! | Strategy | Module | Reads pages from |
//! |----------|--------|------------------|
//! | [`StrategyKind::DirectLink`] | [`direct_link`] | the host's page-metadata endpoint |
//! | [`StrategyKind::RenderedCapture`] | [`rendered`] | rasters of the live view |
//!
//! Each attempt is all-or-nothing: a source either returns every page from
//! 1 to `total` or fails, and a failed attempt's partial pages are dropped.

pub mod direct_link;
pub mod rendered;

use crate::error::CaptureError;
use crate::progress::{Observer, ProgressEvent};
use async_trait::async_trait;
use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use direct_link::DirectLinkSource;
pub use rendered::{RenderedCaptureSource, Viewport};

/// PNG file signature (first 4 bytes).
const PNG_MAGIC: [u8; 4] = [0x89, b'P', b'N', b'G'];

/// Which page image source produced (or is producing) the pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Per-page metadata lookup followed by a direct image download.
    DirectLink,
    /// Navigate the live view and rasterise it page by page.
    RenderedCapture,
}

impl StrategyKind {
    /// Stable snake_case identifier, as used in JSON output.
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::DirectLink => "direct_link",
            StrategyKind::RenderedCapture => "rendered_capture",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyKind::DirectLink => "direct link",
            StrategyKind::RenderedCapture => "rendered capture",
        })
    }
}

// ── Page images ──────────────────────────────────────────────────────────

/// Raster container format of a page image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Png,
    Jpeg,
}

impl ImageEncoding {
    /// Guess the format from the leading bytes: PNG signature, else JPEG.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&PNG_MAGIC) {
            ImageEncoding::Png
        } else {
            ImageEncoding::Jpeg
        }
    }

    /// The other supported format.
    pub fn other(self) -> Self {
        match self {
            ImageEncoding::Png => ImageEncoding::Jpeg,
            ImageEncoding::Jpeg => ImageEncoding::Png,
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            ImageEncoding::Png => ImageFormat::Png,
            ImageEncoding::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// One captured page.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed page this image belongs to.
    pub page_number: u32,
    pub bytes: Vec<u8>,
    pub encoding: ImageEncoding,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("page_number", &self.page_number)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("encoding", &self.encoding)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl PageImage {
    /// Identify the format of `bytes` and read its dimensions.
    ///
    /// The sniffed format is tried first; if its header does not parse, the
    /// other format is tried. Bytes that are neither are rejected.
    ///
    /// # Errors
    /// [`CaptureError::Assembly`] when the bytes are not a readable PNG or JPEG.
    pub fn decode(page_number: u32, bytes: Vec<u8>) -> Result<Self, CaptureError> {
        let guessed = ImageEncoding::sniff(&bytes);
        let (encoding, (width, height)) = match read_dimensions(&bytes, guessed) {
            Ok(dims) => (guessed, dims),
            Err(first) => match read_dimensions(&bytes, guessed.other()) {
                Ok(dims) => {
                    debug!(
                        "Page {}: bytes sniffed as {:?} but decode as {:?}",
                        page_number,
                        guessed,
                        guessed.other()
                    );
                    (guessed.other(), dims)
                }
                Err(_) => {
                    return Err(CaptureError::Assembly(format!(
                        "page {page_number}: not a readable PNG or JPEG ({first})"
                    )))
                }
            },
        };

        if width == 0 || height == 0 {
            return Err(CaptureError::Assembly(format!(
                "page {page_number}: image has zero size ({width}×{height})"
            )));
        }

        Ok(Self {
            page_number,
            bytes,
            encoding,
            width,
            height,
        })
    }
}

fn read_dimensions(bytes: &[u8], encoding: ImageEncoding) -> image::ImageResult<(u32, u32)> {
    ImageReader::with_format(Cursor::new(bytes), encoding.image_format()).into_dimensions()
}

// ── Source trait ─────────────────────────────────────────────────────────

/// Produces every page image of a document.
#[async_trait]
pub trait ImageSource: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Capture pages `1..=total` in order.
    ///
    /// Must call [`PageReporter::page_captured`] after each page and should
    /// check [`PageReporter::check_cancelled`] between pages.
    ///
    /// # Errors
    /// Any failure ends the attempt; no partial result is returned.
    async fn fetch_all_pages(
        &self,
        total: u32,
        reporter: &PageReporter,
    ) -> Result<Vec<PageImage>, CaptureError>;
}

/// Per-run hooks handed to an [`ImageSource`]: progress, session counter,
/// and cancellation.
pub struct PageReporter {
    total: u32,
    observer: Option<Observer>,
    captured: Arc<AtomicU32>,
    cancel: CancellationToken,
}

impl PageReporter {
    pub fn new(
        total: u32,
        observer: Option<Observer>,
        captured: Arc<AtomicU32>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            total,
            observer,
            captured,
            cancel,
        }
    }

    /// A reporter with no observer and a fresh token, for running a source
    /// outside a [`crate::capture::Capturer`].
    pub fn detached(total: u32) -> Self {
        Self::new(
            total,
            None,
            Arc::new(AtomicU32::new(0)),
            CancellationToken::new(),
        )
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Pages captured so far by the current attempt.
    pub fn pages_captured(&self) -> u32 {
        self.captured.load(Ordering::SeqCst)
    }

    /// Reset the counter when a strategy (re)starts from page 1.
    pub fn restart(&self) {
        self.captured.store(0, Ordering::SeqCst);
    }

    /// Record that `page` is done and notify the observer.
    pub fn page_captured(&self, page: u32) {
        self.captured.store(page, Ordering::SeqCst);
        if let Some(ref obs) = self.observer {
            obs.on_progress(ProgressEvent {
                current: page,
                total: self.total,
            });
        }
    }

    /// The run's cancellation token, for waits the reporter does not drive.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// # Errors
    /// [`CaptureError::Cancelled`] once the run's token has been cancelled.
    pub fn check_cancelled(&self) -> Result<(), CaptureError> {
        if self.cancel.is_cancelled() {
            Err(CaptureError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `delay`, waking early with [`CaptureError::Cancelled`] if
    /// the run is cancelled meanwhile.
    pub async fn pause(&self, delay: Duration) -> Result<(), CaptureError> {
        if delay.is_zero() {
            return self.check_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CaptureError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_images {
    //! Small encoded rasters for unit tests.

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, RgbaImage};
    use std::io::Cursor;

    pub fn png(width: u32, height: u32) -> Vec<u8> {
        encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 40]))),
            ImageFormat::Png,
        )
    }

    pub fn png_with_alpha(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, _| image::Rgba([10, 20, 30, (x * 7) as u8]));
        encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
    }

    pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
        encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([20, 90, 160]))),
            ImageFormat::Jpeg,
        )
    }

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).expect("encode test image");
        out.into_inner()
    }
}
