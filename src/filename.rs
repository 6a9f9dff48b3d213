//! Output file naming from a document title.

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest file stem produced, in characters.
pub const MAX_STEM_CHARS: usize = 100;

static RE_ILLEGAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).unwrap());

/// Turn `title` into a file stem (no extension).
///
/// Whitespace runs (tabs and line breaks included) become a single `-`,
/// characters illegal in file names are then dropped, and the result is cut
/// to [`MAX_STEM_CHARS`] characters. An empty result falls back to
/// `default_stem`.
///
/// ```rust
/// use deck2pdf::filename::file_stem;
///
/// assert_eq!(file_stem(Some("Q3 Board: Update / Final"), "presentation"), "Q3-Board-Update-Final");
/// assert_eq!(file_stem(Some("  ???  "), "presentation"), "presentation");
/// ```
pub fn file_stem(title: Option<&str>, default_stem: &str) -> String {
    let dashed = title
        .unwrap_or_default()
        .split_whitespace()
        .map(|word| RE_ILLEGAL.replace_all(word, ""))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let stem: String = dashed.chars().take(MAX_STEM_CHARS).collect();
    let stem = stem.trim_matches(|c| c == '-' || c == '.').to_string();

    if stem.is_empty() {
        default_stem.to_string()
    } else {
        stem
    }
}

/// [`file_stem`] with the `.pdf` extension appended.
pub fn pdf_filename(title: Option<&str>, default_stem: &str) -> String {
    format!("{}.pdf", file_stem(title, default_stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_illegal_characters() {
        assert_eq!(file_stem(Some(r#"a<b>c:d"e/f\g|h?i*j"#), "x"), "abcdefghij");
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(file_stem(Some("Series  A \t Deck\n2025"), "x"), "Series-A-Deck-2025");
    }

    #[test]
    fn line_breaks_between_words_become_hyphens() {
        assert_eq!(file_stem(Some("Board\r\nUpdate\tQ3"), "x"), "Board-Update-Q3");
        assert_eq!(file_stem(Some("Plan\u{7}\nB"), "x"), "Plan-B");
    }

    #[test]
    fn truncates_to_limit() {
        let long = "word ".repeat(60);
        let stem = file_stem(Some(&long), "x");
        assert!(stem.chars().count() <= MAX_STEM_CHARS);
        assert!(stem.starts_with("word-word"));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let title = "é".repeat(150);
        assert_eq!(file_stem(Some(&title), "x").chars().count(), MAX_STEM_CHARS);
    }

    #[test]
    fn empty_or_missing_title_uses_default() {
        assert_eq!(file_stem(None, "presentation"), "presentation");
        assert_eq!(file_stem(Some(""), "presentation"), "presentation");
        assert_eq!(file_stem(Some(" /// "), "deck"), "deck");
    }

    #[test]
    fn pdf_extension_added() {
        assert_eq!(pdf_filename(Some("Roadmap"), "presentation"), "Roadmap.pdf");
    }
}
