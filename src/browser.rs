//! Live document view in a headless Chrome, driven over CDP.
//!
//! [`BrowserSession`] opens the document in a real browser so both the page
//! locator and the rendered-capture strategy see exactly what a reader sees:
//!
//! * [`BrowserSession::probe`] evaluates [`PROBE_SCRIPT`] and returns the
//!   result as a [`ViewProbe`] (computed visibility, non-zero bounding boxes);
//! * the [`Viewport`] impl navigates with synthetic key and click events and
//!   captures PNG screenshots of the viewport.
//!
//! Only compiled with the `browser` feature. A Chrome or Chromium binary must
//! be installed (or passed via [`BrowserOptions::chrome_path`]).

use crate::error::CaptureError;
use crate::locate::ViewProbe;
use crate::strategy::Viewport;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reports the view state the page locator needs, as a `ViewProbe` JSON object.
pub const PROBE_SCRIPT: &str = r#"
(() => {
    const visible = (el) => {
        if (!el) return false;
        const s = getComputedStyle(el);
        const r = el.getBoundingClientRect();
        return s.display !== 'none' && s.visibility !== 'hidden' && r.width > 0 && r.height > 0;
    };
    const first = (sels) => {
        for (const sel of sels) {
            for (const el of document.querySelectorAll(sel)) {
                if (visible(el) && el.innerText.trim()) return el.innerText.trim();
            }
        }
        return null;
    };
    const count = (sels) => {
        for (const sel of sels) {
            const n = document.querySelectorAll(sel).length;
            if (n > 0) return n;
        }
        return 0;
    };
    const gateSels = ["form input[type='email']", "form[class*='email']", "#prompt",
                      ".email-gate", "[class~='gate']", "[class*='-gate']", "[class*='_gate']",
                      "[class*='passcode']"];
    return {
        pageLabel: first(["[data-testid='page-label']", ".page-label", ".toolbar-page-indicator",
                          "[class*='page-label']", "[class*='pageLabel']", "[class*='page-number']"]),
        visibleText: document.body ? document.body.innerText : "",
        thumbnailCount: count(["[data-testid='page-thumbnail']", ".page-thumbnail", ".thumbnail",
                               "[class*='thumbnail']", "[class*='Thumbnail']"]),
        inlineScripts: Array.from(document.querySelectorAll('script:not([src])'))
            .map((s) => s.textContent).filter((t) => t && t.trim()),
        gateVisible: gateSels.some((sel) => Array.from(document.querySelectorAll(sel)).some(visible)),
        title: document.title || null,
    };
})()
"#;

/// True once no loading indicator is visible and the main page image has loaded.
const READY_SCRIPT: &str = r#"
(() => {
    const spinner = document.querySelector("[class*='loading'], [class*='spinner'], [aria-busy='true']");
    if (spinner && spinner.getBoundingClientRect().height > 0) return false;
    const img = document.querySelector("img.page-view, .page img, [class*='carousel'] img, main img");
    return !img || (img.complete && img.naturalWidth > 0);
})()
"#;

const NEXT_SCRIPT: &str = r#"
(() => {
    const btn = document.querySelector("[aria-label='Next'], [aria-label='Next page'], .next-page, [class*='next']");
    if (btn && !btn.disabled) { btn.click(); return 'click'; }
    document.dispatchEvent(new KeyboardEvent('keydown', { key: 'ArrowRight', code: 'ArrowRight', keyCode: 39, bubbles: true }));
    return 'key';
})()
"#;

fn go_to_script(page: u32) -> String {
    format!(
        r#"
(() => {{
    const key = (k, c) => document.dispatchEvent(new KeyboardEvent('keydown', {{ key: k, code: k, keyCode: c, bubbles: true }}));
    key('Home', 36);
    for (let i = 1; i < {page}; i++) key('ArrowRight', 39);
    return true;
}})()
"#
    )
}

/// How to start the browser.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Chrome binary; looked up on `PATH` when `None`.
    pub chrome_path: Option<PathBuf>,
    /// Run without a window. Default: true.
    pub headless: bool,
    /// Viewport size in CSS pixels. Default: 1600×1000.
    pub window: (u32, u32),
    /// Upper bound on the initial page load. Default: 30 s.
    pub navigation_timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            window: (1600, 1000),
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

/// One browser with one tab showing the document.
pub struct BrowserSession {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    /// Launch a browser and open `url`.
    pub async fn open(url: &str, options: &BrowserOptions) -> Result<Self, CaptureError> {
        info!("Launching browser (headless={})", options.headless);

        let mut builder = BrowserConfig::builder()
            .window_size(options.window.0, options.window.1)
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        if let Some(ref path) = options.chrome_path {
            builder = builder.chrome_executable(path);
        }
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(CaptureError::Viewport)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| CaptureError::Viewport(format!("failed to launch browser: {e}")))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!("Opening {}", url);
        let page = tokio::time::timeout(options.navigation_timeout, async {
            let page = browser.new_page(url).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(page)
        })
        .await
        .map_err(|_| {
            CaptureError::Viewport(format!(
                "navigation timed out after {:?} for {url}",
                options.navigation_timeout
            ))
        })?
        .map_err(|e| CaptureError::Viewport(format!("navigation failed for {url}: {e}")))?;

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            handler,
        })
    }

    /// Evaluate [`PROBE_SCRIPT`] against the current view.
    pub async fn probe(&self) -> Result<ViewProbe, CaptureError> {
        let probe: ViewProbe = self
            .page
            .evaluate(PROBE_SCRIPT.to_string())
            .await
            .map_err(viewport_err)?
            .into_value()
            .map_err(|e| CaptureError::Viewport(format!("probe result unreadable: {e}")))?;
        debug!(
            "Probe: label={:?}, thumbnails={}, gate={}",
            probe.page_label, probe.thumbnail_count, probe.gate_visible
        );
        Ok(probe)
    }

    /// Close the browser and stop its event loop.
    pub async fn close(&self) {
        if let Err(e) = self.browser.lock().await.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
        self.handler.abort();
    }

    async fn eval_bool(&self, script: &str) -> Result<bool, CaptureError> {
        self.page
            .evaluate(script.to_string())
            .await
            .map_err(viewport_err)?
            .into_value::<bool>()
            .map_err(|e| CaptureError::Viewport(e.to_string()))
    }
}

#[async_trait]
impl Viewport for BrowserSession {
    async fn go_to_page(&self, page: u32) -> Result<(), CaptureError> {
        self.eval_bool(&go_to_script(page)).await.map(|_| ())
    }

    async fn next_page(&self) -> Result<(), CaptureError> {
        let how: String = self
            .page
            .evaluate(NEXT_SCRIPT.to_string())
            .await
            .map_err(viewport_err)?
            .into_value()
            .map_err(|e| CaptureError::Viewport(e.to_string()))?;
        debug!("Advanced page via {}", how);
        Ok(())
    }

    async fn is_page_ready(&self) -> Result<bool, CaptureError> {
        self.eval_bool(READY_SCRIPT).await
    }

    async fn capture_viewport(&self) -> Result<Vec<u8>, CaptureError> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(viewport_err)
    }
}

fn viewport_err(e: chromiumoxide::error::CdpError) -> CaptureError {
    CaptureError::Viewport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn go_to_script_presses_right_n_minus_one_times() {
        let script = go_to_script(4);
        assert!(script.contains("i < 4"));
        assert!(script.contains("'Home'"));
    }

    #[test]
    fn default_options_are_headless() {
        let opts = BrowserOptions::default();
        assert!(opts.headless);
        assert!(opts.chrome_path.is_none());
    }
}
