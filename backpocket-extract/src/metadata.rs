//! Document-level metadata: `<meta>` lookups, robots directives, base URL,
//! language, and JSON-LD fields.

use crate::text::{normalize_whitespace, word_count};
use ego_tree::iter::Edge;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

const TITLE_SEPARATORS: &[&str] = &[" | ", " - ", " \u{2013} ", " \u{2014} ", " :: ", " / ", " \u{00bb} "];
const BYLINE_MAX_CHARS: usize = 100;
const BYLINE_SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "aside", "footer", "form",
];
const BYLINE_SKIP_HINTS: &[&str] = &["comment", "related", "sidebar"];

/// Content of the first `<meta>` whose `property` or `name` equals `key`
/// (case-insensitive). Blank values are skipped.
pub fn meta_content(doc: &Html, key: &str) -> Option<String> {
    metas(doc).find_map(|meta| {
        let el = meta.value();
        let named = el
            .attr("property")
            .or_else(|| el.attr("name"))
            .is_some_and(|n| n.trim().eq_ignore_ascii_case(key));
        if named { non_blank(el.attr("content")) } else { None }
    })
}

/// First non-blank value among `keys`, in order.
pub fn first_meta(doc: &Html, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| meta_content(doc, key))
}

/// Content of `<meta http-equiv="...">`.
pub fn meta_http_equiv(doc: &Html, key: &str) -> Option<String> {
    metas(doc).find_map(|meta| {
        let el = meta.value();
        let matches = el
            .attr("http-equiv")
            .is_some_and(|n| n.trim().eq_ignore_ascii_case(key));
        if matches { non_blank(el.attr("content")) } else { None }
    })
}

/// True when any `<meta name="robots">` carries the `noarchive` token.
///
/// ```
/// use backpocket_extract::metadata::has_noarchive;
/// use scraper::Html;
///
/// let doc = Html::parse_document(r#"<meta name="ROBOTS" content="index, NoArchive">"#);
/// assert!(has_noarchive(&doc));
/// let doc = Html::parse_document(r#"<meta name="robots" content="noarchived">"#);
/// assert!(!has_noarchive(&doc));
/// ```
pub fn has_noarchive(doc: &Html) -> bool {
    metas(doc)
        .filter(|meta| {
            meta.value()
                .attr("name")
                .is_some_and(|n| n.trim().eq_ignore_ascii_case("robots"))
        })
        .filter_map(|meta| meta.value().attr("content"))
        .any(|content| {
            content
                .split(|c: char| c == ',' || c.is_whitespace())
                .any(|token| token.eq_ignore_ascii_case("noarchive"))
        })
}

/// `<html lang>`.
pub fn html_lang(doc: &Html) -> Option<String> {
    non_blank(doc.root_element().value().attr("lang"))
}

/// Base for resolving relative links: `<base href>` resolved against the
/// page URL, else the page URL itself.
pub fn base_url(doc: &Html, page_url: &Url) -> Url {
    select_first(doc, "base[href]")
        .and_then(|base| base.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .filter(is_http)
        .unwrap_or_else(|| page_url.clone())
}

/// Resolve `raw` against `base`, keeping only `http`/`https` results.
pub fn resolve_http_url(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    base.join(raw).ok().filter(is_http)
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

pub(crate) fn select_first<'a>(doc: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector).next()
}

fn metas(doc: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    doc.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "meta")
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

// ------------------------------
// JSON-LD
// ------------------------------

/// Every JSON object found in `application/ld+json` scripts, with top-level
/// arrays and `@graph` lists flattened. Malformed blocks are skipped.
pub fn json_ld_objects(doc: &Html) -> Vec<Value> {
    let mut out = Vec::new();
    for script in doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "script")
    {
        let is_ld = script
            .value()
            .attr("type")
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("application/ld+json"));
        if !is_ld {
            continue;
        }
        let raw: String = script.text().collect();
        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(value) => flatten_ld(value, &mut out),
            Err(err) => tracing::trace!(error=%err, "extract.json_ld.invalid"),
        }
    }
    out
}

fn flatten_ld(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.into_iter().for_each(|v| flatten_ld(v, out)),
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten_ld(graph, out);
            }
            out.push(Value::Object(map));
        }
        _ => {}
    }
}

/// True when the object's `@type` names an article-like schema.
pub fn is_article_type(obj: &Value) -> bool {
    let is_article = |t: &str| {
        let t = t.to_ascii_lowercase();
        t.ends_with("article") || t.ends_with("posting") || t == "report"
    };
    match obj.get("@type") {
        Some(Value::String(t)) => is_article(t.as_str()),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).any(is_article),
        _ => false,
    }
}

/// A string-ish field: a plain string, or the `name` of a nested object, or
/// the first usable entry of an array.
pub fn ld_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(Some(s.as_str())),
        Value::Object(map) => map.get("name").and_then(ld_name),
        Value::Array(items) => items.iter().find_map(ld_name),
        _ => None,
    }
}

/// First usable `key` across the given objects, article-typed objects first.
pub fn ld_field(objects: &[Value], key: &str) -> Option<String> {
    let (articles, others): (Vec<&Value>, Vec<&Value>) =
        objects.iter().partition(|o| is_article_type(o));
    articles
        .into_iter()
        .chain(others)
        .find_map(|obj| obj.get(key).and_then(ld_name))
}

// ------------------------------
// Title & byline
// ------------------------------

/// Article title: JSON-LD headline or article name, then `og:title` /
/// `twitter:title`, then the extractor's title or `<title>` with the site
/// suffix stripped, then the first `<h1>`.
pub fn article_title(doc: &Html, ld: &[Value], extracted: Option<&str>) -> Option<String> {
    let stripped = |raw: &str| {
        let title = normalize_whitespace(raw);
        (!title.is_empty()).then(|| strip_site_suffix(&title))
    };
    ld_field(ld, "headline")
        .or_else(|| {
            ld.iter()
                .filter(|o| is_article_type(o))
                .find_map(|o| o.get("name").and_then(ld_name))
        })
        .or_else(|| first_meta(doc, &["og:title", "twitter:title"]))
        .or_else(|| extracted.and_then(stripped))
        .or_else(|| select_first(doc, "title").and_then(|t| stripped(&t.text().collect::<String>())))
        .or_else(|| {
            select_first(doc, "h1")
                .map(|h| normalize_whitespace(&h.text().collect::<String>()))
                .filter(|t| !t.is_empty())
        })
}

/// `"Long Article Headline | Site"` becomes `"Long Article Headline"` when
/// the leading part still has three or more words.
pub fn strip_site_suffix(title: &str) -> String {
    let cut = TITLE_SEPARATORS
        .iter()
        .filter_map(|sep| title.rfind(sep))
        .max();
    match cut {
        Some(pos) if word_count(&title[..pos]) >= 3 => title[..pos].trim().to_string(),
        _ => title.to_string(),
    }
}

/// Author: JSON-LD author name, `<meta name="author">`, then the first short
/// element marked up as a byline outside navigation and comment blocks.
pub fn byline(doc: &Html, ld: &[Value]) -> Option<String> {
    ld_field(ld, "author")
        .or_else(|| meta_content(doc, "author"))
        .or_else(|| markup_byline(doc))
}

fn markup_byline(doc: &Html) -> Option<String> {
    let body = select_first(doc, "body")?;
    // open elements inside a skipped subtree, the skipping root included
    let mut skipped = 0usize;
    for edge in body.traverse() {
        match edge {
            Edge::Open(node) => {
                let Some(el) = ElementRef::wrap(node) else {
                    continue;
                };
                if skipped > 0 || skips_byline(el) {
                    skipped += 1;
                    continue;
                }
                if looks_like_byline(el) {
                    if let Some(text) = short_text(el, BYLINE_MAX_CHARS) {
                        return Some(text);
                    }
                }
            }
            Edge::Close(node) => {
                if skipped > 0 && node.value().is_element() {
                    skipped -= 1;
                }
            }
        }
    }
    None
}

fn skips_byline(el: ElementRef<'_>) -> bool {
    if BYLINE_SKIP_TAGS.contains(&el.value().name()) {
        return true;
    }
    [el.value().attr("class"), el.value().attr("id")]
        .into_iter()
        .flatten()
        .map(str::to_ascii_lowercase)
        .any(|h| BYLINE_SKIP_HINTS.iter().any(|hint| h.contains(hint)))
}

fn looks_like_byline(el: ElementRef<'_>) -> bool {
    let v = el.value();
    if v.attr("rel").is_some_and(|r| r.eq_ignore_ascii_case("author")) {
        return true;
    }
    if v.attr("itemprop").is_some_and(|p| p.to_ascii_lowercase().contains("author")) {
        return true;
    }
    [v.attr("class"), v.attr("id")]
        .into_iter()
        .flatten()
        .map(str::to_ascii_lowercase)
        .any(|h| h.contains("byline") || h.contains("author"))
}

/// Normalized text of `el` if it is non-empty and at most `max_chars` long.
/// Stops reading once the raw text is clearly too long.
fn short_text(el: ElementRef<'_>, max_chars: usize) -> Option<String> {
    let mut raw = String::new();
    for piece in el.text() {
        raw.push_str(piece);
        if raw.len() > max_chars * 8 {
            return None;
        }
    }
    let text = normalize_whitespace(&raw);
    (!text.is_empty() && text.chars().count() <= max_chars).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAD: &str = r#"<html lang="en-GB"><head>
        <base href="/static/">
        <meta property="og:title" content="  OG Title ">
        <meta name="twitter:title" content="Twitter Title">
        <meta name="description" content="">
        <meta http-equiv="Content-Language" content="fr">
        <meta name="robots" content="index,follow">
        <script type="application/ld+json">
          {"@context":"https://schema.org","@graph":[
            {"@type":"WebSite","name":"Example Site"},
            {"@type":"NewsArticle","headline":"LD Headline","author":[{"@type":"Person","name":"Ada"}],
             "publisher":{"@type":"Organization","name":"Example News"},"inLanguage":"en"}
          ]}
        </script>
        <script type="application/ld+json">{ not json</script>
        </head><body></body></html>"#;

    #[test]
    fn meta_lookup_by_property_or_name() {
        let doc = Html::parse_document(HEAD);
        assert_eq!(meta_content(&doc, "og:title").as_deref(), Some("OG Title"));
        assert_eq!(meta_content(&doc, "TWITTER:TITLE").as_deref(), Some("Twitter Title"));
        assert_eq!(meta_content(&doc, "description"), None);
        assert_eq!(
            first_meta(&doc, &["description", "twitter:title"]).as_deref(),
            Some("Twitter Title")
        );
        assert_eq!(meta_http_equiv(&doc, "content-language").as_deref(), Some("fr"));
    }

    #[test]
    fn robots_without_noarchive() {
        let doc = Html::parse_document(HEAD);
        assert!(!has_noarchive(&doc));
        let doc = Html::parse_document(r#"<meta name="robots" content="noindex noarchive">"#);
        assert!(has_noarchive(&doc));
        let doc = Html::parse_document(r#"<meta name="googlebot" content="noarchive">"#);
        assert!(!has_noarchive(&doc));
    }

    #[test]
    fn base_href_is_resolved_against_page() {
        let doc = Html::parse_document(HEAD);
        let page = Url::parse("https://example.com/a/b").unwrap();
        assert_eq!(base_url(&doc, &page).as_str(), "https://example.com/static/");

        let doc = Html::parse_document("<p>no base</p>");
        assert_eq!(base_url(&doc, &page), page);
    }

    #[test]
    fn resolves_only_http_urls() {
        let base = Url::parse("https://example.com/post/").unwrap();
        assert_eq!(
            resolve_http_url(&base, "img/a.png").unwrap().as_str(),
            "https://example.com/post/img/a.png"
        );
        assert_eq!(
            resolve_http_url(&base, "//cdn.example.com/x.jpg").unwrap().as_str(),
            "https://cdn.example.com/x.jpg"
        );
        assert!(resolve_http_url(&base, "javascript:alert(1)").is_none());
        assert!(resolve_http_url(&base, "data:image/png;base64,AAAA").is_none());
        assert!(resolve_http_url(&base, "  ").is_none());
    }

    #[test]
    fn json_ld_graph_is_flattened_and_articles_win() {
        let doc = Html::parse_document(HEAD);
        let objects = json_ld_objects(&doc);
        assert_eq!(objects.len(), 3);
        assert_eq!(ld_field(&objects, "headline").as_deref(), Some("LD Headline"));
        assert_eq!(ld_field(&objects, "author").as_deref(), Some("Ada"));
        assert_eq!(ld_field(&objects, "publisher").as_deref(), Some("Example News"));
        assert_eq!(ld_field(&objects, "inLanguage").as_deref(), Some("en"));
        // The article has no `name`; the website's is next.
        assert_eq!(ld_field(&objects, "name").as_deref(), Some("Example Site"));
    }

    fn title_of(html: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        article_title(&doc, &json_ld_objects(&doc), None)
    }

    #[test]
    fn title_sources_in_order() {
        let html = r#"<html><head>
            <meta property="og:title" content="From OG">
            <title>From Title Tag</title>
            <script type="application/ld+json">{"@type":"BlogPosting","headline":"From LD"}</script>
            </head><body><p>x</p></body></html>"#;
        assert_eq!(title_of(html).as_deref(), Some("From LD"));

        let html = r#"<html><head><meta property="og:title" content="From OG"><title>T</title></head>
            <body><p>x</p></body></html>"#;
        assert_eq!(title_of(html).as_deref(), Some("From OG"));

        let html = "<title>A Long Story About Things | Example</title><p>x</p>";
        assert_eq!(title_of(html).as_deref(), Some("A Long Story About Things"));

        let html = "<html><body><h1> Only <em>Heading</em> </h1><p>x</p></body></html>";
        assert_eq!(title_of(html).as_deref(), Some("Only Heading"));
    }

    #[test]
    fn extracted_title_outranks_title_tag() {
        let doc = Html::parse_document("<title>Tag Title</title><p>x</p>");
        let title = article_title(&doc, &[], Some("  Readable   Title Wins Here - Site "));
        assert_eq!(title.as_deref(), Some("Readable Title Wins Here"));
    }

    #[test]
    fn site_suffix_needs_three_leading_words() {
        assert_eq!(strip_site_suffix("How Rust Works - The Blog"), "How Rust Works");
        assert_eq!(strip_site_suffix("Short Title | Site"), "Short Title | Site");
        assert_eq!(strip_site_suffix("No separator here"), "No separator here");
    }

    #[test]
    fn byline_sources() {
        let doc = Html::parse_document(HEAD);
        assert_eq!(byline(&doc, &json_ld_objects(&doc)).as_deref(), Some("Ada"));

        let doc = Html::parse_document(
            r#"<head><meta name="author" content="Meta Author"></head><body><p>Body.</p></body>"#,
        );
        assert_eq!(byline(&doc, &[]).as_deref(), Some("Meta Author"));

        let doc = Html::parse_document(
            r#"<body><div class="comments"><span class="author">Commenter</span></div>
               <span class="post-byline">By  Grace Hopper</span><p>Text.</p></body>"#,
        );
        assert_eq!(byline(&doc, &[]).as_deref(), Some("By Grace Hopper"));
    }

    #[test]
    fn oversized_author_blocks_are_not_bylines() {
        let long = "word ".repeat(100);
        let html = format!(
            r#"<body><div class="author-bio">{long}</div><a rel="author" href="/me">Me</a></body>"#
        );
        let doc = Html::parse_document(&html);
        assert_eq!(byline(&doc, &[]).as_deref(), Some("Me"));
    }

    #[test]
    fn html_lang_attribute() {
        let doc = Html::parse_document(HEAD);
        assert_eq!(html_lang(&doc).as_deref(), Some("en-GB"));
    }
}
