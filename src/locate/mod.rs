//! Page discovery: work out which page is showing and how many exist.
//!
//! The document host offers no stable API for the page count, so
//! [`locate_pages`] runs an ordered cascade of heuristics against a
//! [`DocumentView`] and returns the first answer:
//!
//! ```text
//! 1. page-label control   "3 / 24", "3 of 24"
//! 2. visible text         same pattern, 1 ≤ current ≤ total ≤ 500
//! 3. thumbnails           count > 1  ⇒  total = count, current = 1
//! 4. inline scripts       "page_count": 24, pageCount: 24, …
//! ```
//!
//! The order matters: later heuristics are noisier and must not pre-empt
//! earlier ones. When all four fail the view is checked for a visible access
//! gate so the caller can tell "blocked" apart from "not recognised".

pub mod html;

use crate::error::CaptureError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use html::HtmlSnapshot;

/// Largest page count accepted from free-form visible text.
pub const MAX_TEXT_TOTAL: u32 = 500;

/// Current page and page count of a document view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePosition {
    /// 1-indexed page currently shown.
    pub current: u32,
    /// Number of pages in the document.
    pub total: u32,
}

/// Which heuristic produced a [`PagePosition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateMethod {
    PageLabel,
    VisibleText,
    Thumbnails,
    InlineScript,
}

/// Read-only queries against a loaded document view.
///
/// Implemented by [`HtmlSnapshot`] for static markup, by [`ViewProbe`] for
/// values reported from a live browser, and by test fakes.
pub trait DocumentView: Send + Sync {
    /// Text of the structured page-label control, if the view has one.
    fn page_label(&self) -> Option<String>;

    /// All text a reader can see, in document order.
    fn visible_text(&self) -> String;

    /// Number of sidebar/thumbnail page previews.
    fn thumbnail_count(&self) -> usize;

    /// Bodies of inline (non-`src`) script elements.
    fn inline_scripts(&self) -> Vec<String>;

    /// Whether an access gate (email form, gate container) is rendered and visible.
    fn gate_visible(&self) -> bool;

    /// Document title, used for the output file name.
    fn title(&self) -> Option<String>;
}

/// View state as reported by a live browser probe.
///
/// Field names follow the JSON the probe script returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewProbe {
    pub page_label: Option<String>,
    pub visible_text: String,
    pub thumbnail_count: usize,
    pub inline_scripts: Vec<String>,
    pub gate_visible: bool,
    pub title: Option<String>,
}

impl DocumentView for ViewProbe {
    fn page_label(&self) -> Option<String> {
        self.page_label.clone()
    }

    fn visible_text(&self) -> String {
        self.visible_text.clone()
    }

    fn thumbnail_count(&self) -> usize {
        self.thumbnail_count
    }

    fn inline_scripts(&self) -> Vec<String> {
        self.inline_scripts.clone()
    }

    fn gate_visible(&self) -> bool {
        self.gate_visible
    }

    fn title(&self) -> Option<String> {
        self.title.clone()
    }
}

// ── Cascade ──────────────────────────────────────────────────────────────

/// Determine the current page and page count of `view`.
///
/// # Errors
/// * [`CaptureError::GatedAccess`]: no heuristic matched and a gate is visible
/// * [`CaptureError::Undetectable`]: no heuristic matched
pub fn locate_pages(view: &dyn DocumentView) -> Result<PagePosition, CaptureError> {
    locate_with_method(view).map(|(pos, _)| pos)
}

/// Like [`locate_pages`], also reporting which heuristic matched.
pub fn locate_with_method(
    view: &dyn DocumentView,
) -> Result<(PagePosition, LocateMethod), CaptureError> {
    if let Some(pos) = view.page_label().as_deref().and_then(from_page_label) {
        info!("Located {}/{} pages via page label", pos.current, pos.total);
        return Ok((pos, LocateMethod::PageLabel));
    }

    if let Some(pos) = from_visible_text(&view.visible_text()) {
        info!("Located {}/{} pages via visible text", pos.current, pos.total);
        return Ok((pos, LocateMethod::VisibleText));
    }

    if let Some(pos) = from_thumbnails(view.thumbnail_count()) {
        info!("Located {} pages via thumbnails", pos.total);
        return Ok((pos, LocateMethod::Thumbnails));
    }

    if let Some(pos) = from_inline_scripts(&view.inline_scripts()) {
        info!("Located {} pages via inline script", pos.total);
        return Ok((pos, LocateMethod::InlineScript));
    }

    if view.gate_visible() {
        debug!("No page count found and an access gate is visible");
        Err(CaptureError::GatedAccess)
    } else {
        debug!("No page-count heuristic matched");
        Err(CaptureError::Undetectable)
    }
}

static RE_PAGE_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,5})\s*(?:/|of)\s*(\d{1,5})\b").unwrap());

static RE_SCRIPT_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"["']?(?:page_count|pageCount|totalPages|total_pages|numPages|num_pages)["']?\s*[:=]\s*["']?(\d{1,5})"#,
    )
    .unwrap()
});

/// Heuristic 1: the page-label control.
fn from_page_label(label: &str) -> Option<PagePosition> {
    let caps = RE_PAGE_PAIR.captures(label)?;
    let current: u32 = caps[1].parse().ok()?;
    let total: u32 = caps[2].parse().ok()?;
    (current >= 1 && total >= 1 && current <= total).then_some(PagePosition { current, total })
}

/// Heuristic 2: any `current / total` pair in visible text within bounds.
///
/// Every match is considered in order; out-of-bounds pairs (dates, prices,
/// scores elsewhere on the page) are skipped rather than ending the scan.
fn from_visible_text(text: &str) -> Option<PagePosition> {
    RE_PAGE_PAIR.captures_iter(text).find_map(|caps| {
        let current: u32 = caps[1].parse().ok()?;
        let total: u32 = caps[2].parse().ok()?;
        is_plausible_text_pair(current, total).then_some(PagePosition { current, total })
    })
}

/// Bounds applied to pairs found in free-form text.
pub fn is_plausible_text_pair(current: u32, total: u32) -> bool {
    (1..=MAX_TEXT_TOTAL).contains(&total) && (1..=total).contains(&current)
}

/// Heuristic 3: one thumbnail per page.
fn from_thumbnails(count: usize) -> Option<PagePosition> {
    let total = u32::try_from(count).ok()?;
    (total > 1).then_some(PagePosition { current: 1, total })
}

/// Heuristic 4: a page-count field embedded in inline script data.
fn from_inline_scripts(scripts: &[String]) -> Option<PagePosition> {
    scripts.iter().find_map(|body| {
        RE_SCRIPT_COUNT
            .captures_iter(body)
            .filter_map(|caps| caps[1].parse::<u32>().ok())
            .find(|&total| total >= 1)
            .map(|total| PagePosition { current: 1, total })
    })
}
