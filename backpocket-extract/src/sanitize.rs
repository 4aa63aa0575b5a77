//! Allowlist cleanup of extracted article HTML, built on `ammonia`.
//!
//! Tags on [`ALLOWED_TAGS`] survive with only `href`, `src`, `alt` and
//! `title`. Tags on [`DROPPED_TAGS`] vanish with their content; any other
//! tag is unwrapped. Links and images are resolved against the page base and
//! kept only when they are `http(s)`.

use ammonia::{Builder, UrlRelative};
use std::collections::{HashMap, HashSet};
use url::Url;

pub const ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "article", "b", "blockquote", "br", "caption", "cite", "code", "dd", "del",
    "details", "dfn", "div", "dl", "dt", "em", "figcaption", "figure", "h1", "h2", "h3", "h4",
    "h5", "h6", "hr", "i", "img", "ins", "kbd", "li", "mark", "ol", "p", "pre", "q", "s", "samp",
    "section", "small", "strong", "sub", "summary", "sup", "table", "tbody", "td", "tfoot", "th",
    "thead", "time", "tr", "u", "ul",
];

pub const DROPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "iframe", "object", "embed", "applet", "form",
    "button", "select", "textarea", "option", "nav", "aside", "footer", "header", "menu",
    "dialog", "svg", "math", "canvas", "video", "audio", "picture", "map", "title",
];

/// Clean an HTML fragment for storage.
///
/// ```
/// use backpocket_extract::sanitize::clean_fragment;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/posts/1").unwrap();
/// let html = clean_fragment(r#"<p class="lead"><a href="/x" onclick="y()">x</a></p>"#, &base);
/// assert_eq!(html, r#"<p><a href="https://example.com/x">x</a></p>"#);
/// ```
pub fn clean_fragment(html: &str, base: &Url) -> String {
    let mut builder = Builder::empty();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .clean_content_tags(DROPPED_TAGS.iter().copied().collect())
        .generic_attributes(HashSet::from(["title"]))
        .tag_attributes(HashMap::from([
            ("a", HashSet::from(["href"])),
            ("img", HashSet::from(["src", "alt"])),
        ]))
        .url_schemes(HashSet::from(["http", "https"]))
        .url_relative(UrlRelative::RewriteWithBase(base.clone()))
        .link_rel(None)
        .strip_comments(true);
    builder.clean(html).to_string()
}
