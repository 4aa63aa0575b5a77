//! Plain-text rendering and post-processing: truncation, excerpts, counts,
//! hashing.

use ego_tree::iter::Edge;
use scraper::{Html, Node};
use sha2::{Digest, Sha256};

pub const ELLIPSIS: &str = "...";

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption", "figure",
    "h1", "h2", "h3", "h4", "h5", "h6", "hr", "li", "main", "ol", "p", "pre", "section", "table",
    "td", "th", "tr", "ul",
];

/// Visible text of an HTML fragment, one paragraph per block element.
///
/// Walks the tree with an explicit open/close traversal, so nesting depth
/// costs no stack.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut raw = String::new();
    for edge in fragment.root_element().traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Text(text) => raw.push_str(text),
                Node::Element(el) if BLOCK_TAGS.contains(&el.name()) => raw.push('\n'),
                _ => {}
            },
            Edge::Close(node) => {
                if let Node::Element(el) = node.value() {
                    if BLOCK_TAGS.contains(&el.name()) {
                        raw.push('\n');
                    }
                }
            }
        }
    }
    raw.lines()
        .map(normalize_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Collapse every run of whitespace into a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match char_boundary(text, max_chars) {
        Some(end) => format!("{}{ELLIPSIS}", &text[..end]),
        None => text.to_string(),
    }
}

/// Short excerpt from article text.
///
/// The window is the first `window` characters of the whitespace-normalized
/// text. When the text is longer, the cut moves back to the last space if
/// that space lies in the final fifth of the window, and `...` is appended.
///
/// ```
/// use backpocket_extract::text::derive_excerpt;
///
/// assert_eq!(derive_excerpt("  short   text ", 500).as_deref(), Some("short text"));
/// assert_eq!(derive_excerpt("   ", 500), None);
/// let long = "word ".repeat(200);
/// let excerpt = derive_excerpt(&long, 500).unwrap();
/// assert!(excerpt.ends_with("word..."));
/// assert!(excerpt.chars().count() <= 503);
/// ```
pub fn derive_excerpt(text: &str, window: usize) -> Option<String> {
    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return None;
    }
    let Some(end) = char_boundary(&normalized, window) else {
        return Some(normalized);
    };

    let head = &normalized[..end];
    let min_keep = window - window / 5;
    let head = match head.rfind(' ') {
        Some(space) if head[..space].chars().count() >= min_keep => &head[..space],
        _ => head,
    };
    Some(format!("{}{ELLIPSIS}", head.trim_end()))
}

/// Number of whitespace-delimited tokens.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Lowercase hex SHA-256 of the given content.
pub fn content_sha256(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Byte offset of the `n`th char, or `None` when the text has `n` chars or fewer.
fn char_boundary(text: &str, n: usize) -> Option<usize> {
    let (idx, _) = text.char_indices().nth(n)?;
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_become_paragraphs() {
        let text = html_to_text("<h2>Title</h2><p>One <em>two</em>\n   three.</p><ul><li>a</li><li>b</li></ul>");
        assert_eq!(text, "Title\n\nOne two three.\n\na\n\nb");
        assert_eq!(html_to_text("<p>   </p>"), "");
    }

    #[test]
    fn deep_fragments_render_without_recursion() {
        let depth = 20_000;
        let html = format!("{}<p>deep text</p>{}", "<div>".repeat(depth), "</div>".repeat(depth));
        assert_eq!(html_to_text(&html), "deep text");
    }

    #[test]
    fn truncation_marks_the_cut() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("", 3), "");
        assert_eq!(truncate_chars("ééééé", 2), "éé...");
    }

    #[test]
    fn excerpt_of_800_chars_cuts_at_a_late_space() {
        // 9-char words plus a space: spaces every 10 chars.
        let text = "abcdefghi ".repeat(80);
        assert_eq!(text.chars().count(), 800);

        let excerpt = derive_excerpt(&text, 500).unwrap();
        assert!(excerpt.chars().count() <= 503);
        assert!(excerpt.ends_with("..."));
        let body = excerpt.trim_end_matches("...");
        assert!(body.ends_with("abcdefghi"));
        assert!(text.starts_with(&format!("{body} ")));
    }

    #[test]
    fn excerpt_keeps_the_full_window_when_no_late_space() {
        // Only one space, early in the window.
        let text = format!("ab {}", "x".repeat(797));
        let excerpt = derive_excerpt(&text, 500).unwrap();
        assert_eq!(excerpt.chars().count(), 503);
        assert!(excerpt.ends_with("x..."));
    }

    #[test]
    fn excerpt_cut_respects_the_eighty_percent_line() {
        // Last space at char 400, exactly 80% into the window.
        let text = format!("{} {}", "a".repeat(400), "b".repeat(399));
        let excerpt = derive_excerpt(&text, 500).unwrap();
        assert_eq!(excerpt, format!("{}...", "a".repeat(400)));

        // Last space at char 399 lies before the line.
        let text = format!("{} {}", "a".repeat(399), "b".repeat(400));
        let excerpt = derive_excerpt(&text, 500).unwrap();
        assert_eq!(excerpt.chars().count(), 503);
    }

    #[test]
    fn excerpt_of_exact_window_has_no_ellipsis() {
        let text = "z".repeat(500);
        assert_eq!(derive_excerpt(&text, 500).unwrap(), text);
    }

    #[test]
    fn counts_words_across_newlines() {
        assert_eq!(word_count("one two\n\nthree\tfour "), 4);
        assert_eq!(word_count("   "), 0);
    }

    #[test]
    fn sha256_is_lowercase_hex() {
        assert_eq!(
            content_sha256(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_sha256("<p>x</p>").len(), 64);
    }
}
