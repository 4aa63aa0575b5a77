//! Main-content extraction on the `readability` crate.
//!
//! The crate picks the best-scoring container. Its output goes through the
//! allowlist cleaner; when the result is shorter than `char_threshold` the
//! whole `<body>` is tried instead and the longer text wins.

use crate::metadata::select_first;
use crate::sanitize::clean_fragment;
use crate::text::{html_to_text, normalize_whitespace};
use backpocket_config::ExtractConfig;
use scraper::Html;
use std::io::Cursor;
use url::Url;

/// Output of an [`ArticleExtractor`]. Every field besides the content is
/// optional; `process_html` fills the gaps from page metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Article {
    pub title: Option<String>,
    pub byline: Option<String>,
    /// Sanitized HTML of the main content.
    pub content_html: String,
    pub text_content: String,
    pub excerpt: Option<String>,
    pub site_name: Option<String>,
    pub language: Option<String>,
}

/// Pluggable content extractor. `None` means nothing readable was found.
pub trait ArticleExtractor: Send + Sync {
    fn extract(&self, html: &str, base: &Url) -> Option<Article>;
}

#[derive(Debug, Clone)]
pub struct ReadabilityExtractor {
    char_threshold: usize,
}

impl Default for ReadabilityExtractor {
    fn default() -> Self {
        Self::new(ExtractConfig::default().char_threshold)
    }
}

impl ReadabilityExtractor {
    pub fn new(char_threshold: usize) -> Self {
        Self { char_threshold }
    }

    pub fn from_config(cfg: &ExtractConfig) -> Self {
        Self::new(cfg.char_threshold)
    }

    fn too_short(&self, text: &str) -> bool {
        text.chars().count() < self.char_threshold
    }
}

impl ArticleExtractor for ReadabilityExtractor {
    fn extract(&self, html: &str, base: &Url) -> Option<Article> {
        let product = match readability::extractor::extract(&mut Cursor::new(html.as_bytes()), base)
        {
            Ok(product) => Some(product),
            Err(err) => {
                tracing::debug!(url=%base, error=%err, "extract.readability.failed");
                None
            }
        };

        let title = product
            .as_ref()
            .map(|p| normalize_whitespace(&p.title))
            .filter(|t| !t.is_empty());
        let mut chosen = product.map(|p| {
            let content_html = clean_fragment(&p.content, base);
            let text = html_to_text(&content_html);
            (content_html, text)
        });

        if chosen.as_ref().is_none_or(|(_, text)| self.too_short(text)) {
            if let Some((body_html, body_text)) = body_content(html, base) {
                let longer = chosen
                    .as_ref()
                    .is_none_or(|(_, text)| body_text.chars().count() > text.chars().count());
                if longer {
                    tracing::trace!(chars = body_text.chars().count(), "extract.readability.body_fallback");
                    chosen = Some((body_html, body_text));
                }
            }
        }

        let (content_html, text_content) = chosen.filter(|(_, text)| !text.trim().is_empty())?;
        Some(Article {
            title,
            content_html,
            text_content,
            ..Article::default()
        })
    }
}

/// Cleaned `<body>` with its text.
fn body_content(html: &str, base: &Url) -> Option<(String, String)> {
    let doc = Html::parse_document(html);
    let body = select_first(&doc, "body")?;
    let content_html = clean_fragment(&body.inner_html(), base);
    let text = html_to_text(&content_html);
    Some((content_html, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> Option<Article> {
        let base = Url::parse("https://example.com/2024/story").unwrap();
        ReadabilityExtractor::new(200).extract(html, &base)
    }

    fn paragraph(n: usize) -> String {
        format!(
            "<p>Paragraph {n} has enough words, commas, and length to be scored as real article \
             content by the extractor, which is what we want here.</p>"
        )
    }

    #[test]
    fn picks_the_article_over_comments() {
        let body: String = (0..6).map(paragraph).collect();
        let html = format!(
            r#"<html><head><title>A Long Story About Things | Example</title></head><body>
              <div class="article-body" style="x">{body}</div>
              <div class="comments"><p>Great post, really enjoyed reading all of it, thanks!</p></div>
            </body></html>"#
        );
        let article = extract(&html).unwrap();
        assert_eq!(article.title.as_deref(), Some("A Long Story About Things | Example"));
        assert!(article.text_content.contains("Paragraph 0"));
        assert!(article.text_content.contains("Paragraph 5"));
        assert!(!article.text_content.contains("Great post"));
        assert!(!article.content_html.contains("style"));
        assert!(!article.content_html.contains("class="));
    }

    #[test]
    fn short_pages_fall_back_to_body() {
        let html = "<html><head><title>Hello</title></head><body><h1>Hello</h1><p>Hi there.</p></body></html>";
        let article = extract(html).unwrap();
        assert_eq!(article.title.as_deref(), Some("Hello"));
        assert!(article.text_content.contains("Hi there."));
        assert!(article.content_html.contains("<h1>Hello</h1>"));
    }

    #[test]
    fn body_fallback_is_sanitized() {
        let html = r#"<body><nav>menu</nav><p onclick="x()">Short <a href="/about">note</a>.</p>
            <script>track()</script></body>"#;
        let article = extract(html).unwrap();
        assert_eq!(article.text_content, "Short note.");
        assert!(article.content_html.contains(r#"<a href="https://example.com/about">note</a>"#));
        assert!(!article.content_html.contains("onclick"));
        assert!(!article.content_html.contains("track"));
    }

    #[test]
    fn empty_body_yields_nothing() {
        assert!(extract("<html><body><script>var x = 1;</script></body></html>").is_none());
        assert!(extract("").is_none());
    }
}
