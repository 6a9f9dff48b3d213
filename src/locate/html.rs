//! [`DocumentView`] over a static HTML snapshot.
//!
//! Used when no browser is available: the viewer page is fetched over HTTP
//! and inspected as markup. Everything the locator needs is extracted once in
//! [`HtmlSnapshot::parse`]; the parsed DOM is not kept, so the snapshot is
//! `Send + Sync` and cheap to share.
//!
//! Static markup carries no layout, so "visible" means not hidden by the
//! `hidden` attribute, `aria-hidden="true"`, or an inline `display:none` /
//! `visibility:hidden` style on the element or an ancestor.

use super::{DocumentView, ViewProbe};
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

/// Selectors for the structured page-label control, most specific first.
const PAGE_LABEL_SELECTORS: &[&str] = &[
    "[data-testid='page-label']",
    ".page-label",
    ".toolbar-page-indicator",
    "[class*='page-label']",
    "[class*='pageLabel']",
    "[class*='page-number']",
];

/// Selectors for per-page thumbnail previews, most specific first.
const THUMBNAIL_SELECTORS: &[&str] = &[
    "[data-testid='page-thumbnail']",
    ".page-thumbnail",
    ".thumbnail",
    "[class*='thumbnail']",
    "[class*='Thumbnail']",
];

/// Selectors for access gates.
const GATE_SELECTORS: &[&str] = &[
    "form input[type='email']",
    "form[class*='email']",
    "#prompt",
    ".email-gate",
    "[class~='gate']",
    "[class*='-gate']",
    "[class*='_gate']",
    "[class*='passcode']",
];

/// Elements whose text is never rendered.
const NON_RENDERED: &[&str] = &["script", "style", "noscript", "template", "head"];

/// A parsed HTML page reduced to what the page locator reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlSnapshot {
    probe: ViewProbe,
}

impl HtmlSnapshot {
    /// Parse `html` and extract label, text, thumbnails, scripts, gate, and title.
    pub fn parse(html: &str) -> Self {
        let doc = Html::parse_document(html);

        let page_label = first_visible_text(&doc, PAGE_LABEL_SELECTORS);
        let thumbnail_count = best_count(&doc, THUMBNAIL_SELECTORS);
        let gate_visible = GATE_SELECTORS
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .any(|sel| doc.select(&sel).any(is_visible));
        let inline_scripts = select_all(&doc, "script:not([src])")
            .map(|el| el.text().collect::<String>())
            .filter(|body| !body.trim().is_empty())
            .collect();
        let title = select_all(&doc, "title")
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty());

        let mut visible_text = String::new();
        collect_visible_text(doc.root_element(), &mut visible_text);

        debug!(
            "HTML snapshot: label={:?}, thumbnails={}, scripts={}, gate={}",
            page_label,
            thumbnail_count,
            select_all(&doc, "script:not([src])").count(),
            gate_visible
        );

        Self {
            probe: ViewProbe {
                page_label,
                visible_text: collapse_whitespace(&visible_text),
                thumbnail_count,
                inline_scripts,
                gate_visible,
                title,
            },
        }
    }

    /// The extracted values as a plain [`ViewProbe`].
    pub fn probe(&self) -> &ViewProbe {
        &self.probe
    }
}

impl DocumentView for HtmlSnapshot {
    fn page_label(&self) -> Option<String> {
        self.probe.page_label()
    }

    fn visible_text(&self) -> String {
        self.probe.visible_text()
    }

    fn thumbnail_count(&self) -> usize {
        self.probe.thumbnail_count()
    }

    fn inline_scripts(&self) -> Vec<String> {
        self.probe.inline_scripts()
    }

    fn gate_visible(&self) -> bool {
        self.probe.gate_visible()
    }

    fn title(&self) -> Option<String> {
        self.probe.title()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn select_all<'a>(doc: &'a Html, selector: &str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    let sel = Selector::parse(selector).ok();
    sel.into_iter()
        .flat_map(move |sel| doc.select(&sel).collect::<Vec<_>>())
}

fn first_visible_text(doc: &Html, selectors: &[&str]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|sel| {
            doc.select(&sel)
                .filter(|el| is_visible(*el))
                .map(|el| collapse_whitespace(&el.text().collect::<String>()))
                .find(|t| !t.is_empty())
        })
}

/// Count of the first selector that matches anything.
fn best_count(doc: &Html, selectors: &[&str]) -> usize {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .map(|sel| doc.select(&sel).count())
        .find(|&n| n > 0)
        .unwrap_or(0)
}

/// True when neither the element nor any ancestor is statically hidden.
fn is_visible(el: ElementRef<'_>) -> bool {
    std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .all(|e| !is_hidden_element(e))
}

fn is_hidden_element(el: ElementRef<'_>) -> bool {
    let v = el.value();
    if v.attr("hidden").is_some() || v.attr("aria-hidden") == Some("true") {
        return true;
    }
    if let Some(style) = v.attr("style") {
        let style: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        if style.contains("display:none") || style.contains("visibility:hidden") {
            return true;
        }
    }
    false
}

fn collect_visible_text(el: ElementRef<'_>, out: &mut String) {
    if NON_RENDERED.contains(&el.value().name()) || is_hidden_element(el) {
        return;
    }
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_visible_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
