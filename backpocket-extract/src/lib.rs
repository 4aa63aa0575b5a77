//! HTML to article extraction for snapshots.
//!
//! - Main-content extraction behind a swappable trait (`article`)
//! - `<meta>`, robots, JSON-LD, title and byline lookups (`metadata`)
//! - Allowlist HTML cleanup (`sanitize`)
//! - Text rendering and post-processing: truncation, excerpts, counts,
//!   hashing (`text`)
//!
//! [`process_html`] ties them together and is synchronous; the pipeline runs
//! it on a blocking thread.

pub mod metadata;
pub mod article;
pub mod sanitize;
pub mod text;

use backpocket_common::BlockedReason;
use backpocket_config::ExtractConfig;
use ego_tree::iter::Edge;
use scraper::Html;
use serde::Serialize;
use thiserror::Error;
use url::Url;

pub use article::{Article, ArticleExtractor, ReadabilityExtractor};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("publisher opted out of archiving (robots noarchive)")]
    Noarchive,
    #[error("document nests elements deeper than {limit} levels")]
    TooDeep { limit: usize },
    #[error("no readable content found")]
    ParseFailed,
}

impl ExtractError {
    pub fn blocked_reason(&self) -> BlockedReason {
        match self {
            ExtractError::Noarchive => BlockedReason::Noarchive,
            ExtractError::TooDeep { .. } | ExtractError::ParseFailed => BlockedReason::ParseFailed,
        }
    }
}

/// Everything a `ready` snapshot stores about a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedPage {
    pub canonical_url: Url,
    pub title: Option<String>,
    pub byline: Option<String>,
    pub excerpt: Option<String>,
    pub site_name: Option<String>,
    pub language: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub content_html: String,
    pub content_text: String,
    pub word_count: usize,
    pub content_sha256: String,
}

/// Parse `html` fetched from `page_url` and derive the snapshot fields.
///
/// ```
/// use backpocket_config::ExtractConfig;
/// use backpocket_extract::{process_html, ExtractError, ReadabilityExtractor};
/// use url::Url;
///
/// let url = Url::parse("https://example.com/article").unwrap();
/// let cfg = ExtractConfig::default();
/// let extractor = ReadabilityExtractor::from_config(&cfg);
///
/// let page = process_html("<title>Hello</title><p>Hi.</p>", &url, &extractor, &cfg).unwrap();
/// assert_eq!(page.title.as_deref(), Some("Hello"));
///
/// let blocked = r#"<meta name="robots" content="noarchive"><p>Hi.</p>"#;
/// assert_eq!(
///     process_html(blocked, &url, &extractor, &cfg).unwrap_err(),
///     ExtractError::Noarchive
/// );
/// ```
pub fn process_html(
    html: &str,
    page_url: &Url,
    extractor: &dyn ArticleExtractor,
    cfg: &ExtractConfig,
) -> Result<ExtractedPage, ExtractError> {
    let doc = Html::parse_document(html);

    if metadata::has_noarchive(&doc) {
        tracing::debug!(url=%page_url, "extract.noarchive");
        return Err(ExtractError::Noarchive);
    }
    if exceeds_depth(&doc, cfg.max_nesting_depth) {
        tracing::warn!(url=%page_url, limit=cfg.max_nesting_depth, "extract.too_deep");
        return Err(ExtractError::TooDeep {
            limit: cfg.max_nesting_depth,
        });
    }

    let base = metadata::base_url(&doc, page_url);
    let article = extractor
        .extract(html, &base)
        .ok_or(ExtractError::ParseFailed)?;
    let ld = metadata::json_ld_objects(&doc);

    let content_text = text::truncate_chars(&article.text_content, cfg.max_text_chars);
    let excerpt = article
        .excerpt
        .or_else(|| metadata::first_meta(&doc, &["description", "og:description", "twitter:description"]))
        .or_else(|| text::derive_excerpt(&content_text, cfg.excerpt_chars));
    let site_name = article
        .site_name
        .or_else(|| metadata::ld_field(&ld, "publisher"))
        .or_else(|| metadata::first_meta(&doc, &["og:site_name", "twitter:site"]));
    let image_url = metadata::first_meta(&doc, &["og:image", "twitter:image"])
        .and_then(|raw| metadata::resolve_http_url(&base, &raw))
        .map(String::from);
    let description = metadata::first_meta(
        &doc,
        &["og:description", "twitter:description", "description"],
    );
    let language = metadata::html_lang(&doc)
        .or_else(|| metadata::meta_http_equiv(&doc, "content-language"))
        .or(article.language)
        .or_else(|| metadata::ld_field(&ld, "inLanguage"));

    let page = ExtractedPage {
        canonical_url: page_url.clone(),
        title: metadata::article_title(&doc, &ld, article.title.as_deref()),
        byline: article.byline.or_else(|| metadata::byline(&doc, &ld)),
        excerpt,
        site_name,
        language,
        description,
        image_url,
        word_count: text::word_count(&content_text),
        content_sha256: text::content_sha256(&article.content_html),
        content_html: article.content_html,
        content_text,
    };

    tracing::debug!(
        url=%page_url,
        words=page.word_count,
        html_len=page.content_html.len(),
        has_title=page.title.is_some(),
        "extract.done"
    );
    Ok(page)
}

/// True once any element sits more than `limit` levels below the root.
fn exceeds_depth(doc: &Html, limit: usize) -> bool {
    let mut depth = 0usize;
    for edge in doc.root_element().traverse() {
        match edge {
            Edge::Open(node) if node.value().is_element() => {
                depth += 1;
                if depth > limit {
                    return true;
                }
            }
            Edge::Close(node) if node.value().is_element() => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    false
}
