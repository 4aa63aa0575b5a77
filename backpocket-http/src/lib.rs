//! Single-attempt HTML fetcher for snapshots, with SSRF defenses.
//!
//! - [`guard::HostGuard`] rejects private/internal targets before any I/O
//! - [`resolve::GuardedResolver`] re-checks addresses at DNS resolution time
//!   and pins the connection to an address that passed
//! - every redirect hop is re-validated by the guard
//! - responses are gated on status, content type, and body size
//!
//! Example (no_run):
//! ```rust,no_run
//! # async fn demo() -> Result<(), backpocket_http::FetchError> {
//! use backpocket_config::FetchConfig;
//! use backpocket_http::{HttpFetcher, PageFetcher};
//!
//! let fetcher = HttpFetcher::new(&FetchConfig::default())?;
//! let url = url::Url::parse("https://example.com/article").unwrap();
//! let page = fetcher.fetch(&url).await?;
//! println!("{} bytes from {}", page.html.len(), page.final_url);
//! # Ok(()) }
//! ```
//!
//! Observability: structured `tracing` events are emitted for request start,
//! response headers, and final errors. Query strings are logged with secret
//! parameters redacted.

pub mod guard;
pub mod resolve;

use async_trait::async_trait;
use backpocket_common::BlockedReason;
use backpocket_config::FetchConfig;
use guard::HostGuard;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, redirect};
use resolve::{GuardedResolver, PRIVATE_ADDRESS_MARKER, PrivateAddressError};
use std::error::Error as StdError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

const HTML_CONTENT_TYPES: [&str; 2] = ["text/html", "application/xhtml+xml"];

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

// ==============================
// Errors
// ==============================

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("client build failed: {0}")]
    Build(String),
    /// Refused before or during the request, with the reason the guard gave.
    #[error("target refused by network guard: {detail}")]
    Guard {
        reason: BlockedReason,
        detail: String,
    },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("server refused access with {0}")]
    Forbidden(StatusCode),
    #[error("server returned {0}")]
    Status(StatusCode),
    #[error("unsupported content type: {0:?}")]
    NotHtml(String),
    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

impl FetchError {
    fn ssrf(detail: impl Into<String>) -> Self {
        FetchError::Guard {
            reason: BlockedReason::SsrfBlocked,
            detail: detail.into(),
        }
    }

    /// Snapshot-level classification of this failure.
    pub fn blocked_reason(&self) -> BlockedReason {
        match self {
            FetchError::Guard { reason, .. } => *reason,
            FetchError::Timeout(_) => BlockedReason::Timeout,
            FetchError::Forbidden(_) => BlockedReason::Forbidden,
            FetchError::NotHtml(_) => BlockedReason::NotHtml,
            FetchError::TooLarge { .. } => BlockedReason::TooLarge,
            FetchError::Build(_) | FetchError::Network(_) | FetchError::Status(_) => {
                BlockedReason::FetchError
            }
        }
    }
}

/// Raised from the redirect policy when a hop fails the guard.
#[derive(Debug, Error)]
#[error("redirect to {url} refused: {reason}")]
pub struct RedirectRefused {
    pub url: String,
    pub reason: BlockedReason,
}

// ==============================
// Fetcher
// ==============================

/// A fetched HTML document.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: Url,
    pub status: u16,
    pub content_type: String,
    pub html: String,
}

/// Source of HTML pages. The pipeline only talks to this seam.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    inner: Client,
    guard: HostGuard,
    pub timeout: Duration,
    pub max_body_bytes: u64,
}

impl HttpFetcher {
    /// Build a fetcher from the `fetch` config section.
    ///
    /// ```no_run
    /// use backpocket_config::FetchConfig;
    /// use backpocket_http::{FetchError, HttpFetcher};
    /// use std::time::Duration;
    ///
    /// let fetcher = HttpFetcher::new(&FetchConfig::default())?;
    /// assert_eq!(fetcher.timeout, Duration::from_secs(15));
    /// assert_eq!(fetcher.max_body_bytes, 5 * 1024 * 1024);
    /// # Ok::<(), FetchError>(())
    /// ```
    pub fn new(cfg: &FetchConfig) -> Result<Self, FetchError> {
        let guard = HostGuard::new(cfg.allow_private_networks);

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_str(&cfg.accept).map_err(|e| FetchError::Build(e.to_string()))?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&cfg.accept_language)
                .map_err(|e| FetchError::Build(e.to_string()))?,
        );

        let max_redirects = cfg.max_redirects;
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                return attempt.error(format!("more than {max_redirects} redirects"));
            }
            match guard.check_url(attempt.url()) {
                Ok(()) => attempt.follow(),
                Err(reason) => {
                    let url = attempt.url().to_string();
                    attempt.error(RedirectRefused { url, reason })
                }
            }
        });

        let mut builder = Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .default_headers(headers)
            .connect_timeout(cfg.connect_timeout())
            .redirect(policy);

        if !guard.allows_private() {
            // A proxy would resolve the target itself and bypass the resolver check.
            builder = builder.no_proxy();
            if cfg.resolve_dns {
                builder = builder.dns_resolver(Arc::new(GuardedResolver));
            }
        }

        let inner = builder
            .build()
            .map_err(|e| FetchError::Build(e.to_string()))?;

        Ok(Self {
            inner,
            guard,
            timeout: cfg.timeout(),
            max_body_bytes: cfg.max_body_bytes,
        })
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, dur: Duration) -> Self {
        self.timeout = dur;
        self
    }

    /// Override the body size ceiling.
    pub fn with_max_body_bytes(mut self, limit: u64) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn guard(&self) -> HostGuard {
        self.guard
    }

    /// Replace the pre-flight guard only. Redirect hops and DNS answers are
    /// still checked with the policy the client was built with.
    pub fn with_guard(mut self, guard: HostGuard) -> Self {
        self.guard = guard;
        self
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if let Some(refused) = find_source::<RedirectRefused>(&err) {
            // A redirect to a non-http scheme is the server's fault, not a bad saved URL.
            return match refused.reason {
                BlockedReason::SsrfBlocked => FetchError::ssrf(refused.to_string()),
                _ => FetchError::Network(refused.to_string()),
            };
        }
        if let Some(private) = find_source::<PrivateAddressError>(&err) {
            return FetchError::ssrf(private.to_string());
        }
        if error_chain_contains(&err, PRIVATE_ADDRESS_MARKER) {
            return FetchError::ssrf(err.to_string());
        }
        if err.is_timeout() {
            return FetchError::Timeout(self.timeout);
        }
        FetchError::Network(error_chain_message(&err))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        if let Err(reason) = self.guard.check_url(url) {
            tracing::info!(url=%url, reason=%reason, "http.error.guard");
            return Err(FetchError::Guard {
                reason,
                detail: format!("{url} refused: {reason}"),
            });
        }

        let req_id = format!("f{:x}", REQUEST_SEQ.fetch_add(1, Ordering::Relaxed));
        let (host_path, query) = redact_query(url);
        tracing::debug!(
            req_id=%req_id,
            host_path=%host_path,
            query=?query,
            timeout_ms=self.timeout.as_millis() as u64,
            "http.request.start"
        );

        let t0 = Instant::now();
        let mut resp = match self
            .inner
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                let classified = self.classify(err);
                tracing::warn!(
                    req_id=%req_id,
                    host_path=%host_path,
                    error=%classified,
                    "http.network_error.send"
                );
                return Err(classified);
            }
        };

        let status = resp.status();
        let final_url = resp.url().clone();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let declared_len = resp.content_length();

        tracing::debug!(
            req_id=%req_id,
            %status,
            final_url=%final_url,
            content_type=%content_type,
            content_length=?declared_len,
            duration_ms=t0.elapsed().as_millis() as u64,
            "http.response.headers"
        );

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::info!(req_id=%req_id, %status, "http.error.forbidden");
            return Err(FetchError::Forbidden(status));
        }
        if !status.is_success() {
            tracing::info!(req_id=%req_id, %status, "http.error.status");
            return Err(FetchError::Status(status));
        }
        if !is_html_content_type(&content_type) {
            tracing::info!(req_id=%req_id, content_type=%content_type, "http.error.not_html");
            return Err(FetchError::NotHtml(content_type));
        }
        if declared_len.is_some_and(|len| len > self.max_body_bytes) {
            tracing::info!(
                req_id=%req_id,
                content_length=?declared_len,
                limit=self.max_body_bytes,
                "http.error.too_large"
            );
            return Err(FetchError::TooLarge {
                limit: self.max_body_bytes,
            });
        }

        let limit = usize::try_from(self.max_body_bytes).unwrap_or(usize::MAX);
        let mut body: Vec<u8> = Vec::with_capacity(
            declared_len
                .and_then(|len| usize::try_from(len).ok())
                .unwrap_or(0)
                .min(limit),
        );
        loop {
            let chunk = match resp.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(err) => {
                    let classified = self.classify(err);
                    tracing::warn!(
                        req_id=%req_id,
                        received=body.len(),
                        error=%classified,
                        "http.network_error.body"
                    );
                    return Err(classified);
                }
            };
            if body.len().saturating_add(chunk.len()) > limit {
                tracing::info!(
                    req_id=%req_id,
                    received=body.len(),
                    limit=self.max_body_bytes,
                    "http.error.too_large"
                );
                return Err(FetchError::TooLarge {
                    limit: self.max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(
            req_id=%req_id,
            body_len=body.len(),
            duration_ms=t0.elapsed().as_millis() as u64,
            "http.response.body"
        );
        tracing::trace!(req_id=%req_id, body_snippet=%snip_body(&body), "http.response.body_snippet");

        Ok(FetchedPage {
            final_url,
            status: status.as_u16(),
            content_type,
            html: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

// ==============================
// Helpers
// ==============================

pub fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    HTML_CONTENT_TYPES.iter().any(|t| lower.contains(t))
}

fn find_source<'a, T: StdError + 'static>(err: &'a (dyn StdError + 'static)) -> Option<&'a T> {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = cur {
        if let Some(found) = e.downcast_ref::<T>() {
            return Some(found);
        }
        cur = e.source();
    }
    None
}

fn error_chain_message(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut cur = err.source();
    while let Some(e) = cur {
        let msg = e.to_string();
        if parts.last() != Some(&msg) {
            parts.push(msg);
        }
        cur = e.source();
    }
    parts.join(": ")
}

fn error_chain_contains(err: &(dyn StdError + 'static), needle: &str) -> bool {
    error_chain_message(err).contains(needle)
}

fn snip_body(body: &[u8]) -> String {
    let mut snip = String::from_utf8_lossy(&body[..body.len().min(500)]).to_string();
    if body.len() > 500 {
        snip.push_str("...");
    }
    snip
}

fn redact_query(url: &Url) -> (String, Vec<(String, String)>) {
    // Return "host + path" string and redacted query list for logging
    let host_path = format!("{}{}", url.host_str().unwrap_or("-"), url.path());
    let redacted = url
        .query_pairs()
        .map(|(k, v)| {
            let k = k.to_string();
            let v = v.to_string();
            let is_secret = matches!(
                k.to_ascii_lowercase().as_str(),
                "access_token"
                    | "authorization"
                    | "auth"
                    | "key"
                    | "api_key"
                    | "token"
                    | "secret"
                    | "client_secret"
                    | "signature"
                    | "sig"
            );
            (k, if is_secret { "<redacted>".into() } else { v })
        })
        .collect::<Vec<_>>();
    (host_path, redacted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_content_types() {
        assert!(is_html_content_type("text/html"));
        assert!(is_html_content_type("text/html; charset=utf-8"));
        assert!(is_html_content_type("Application/XHTML+XML"));
        assert!(!is_html_content_type("application/json"));
        assert!(!is_html_content_type(""));
        assert!(!is_html_content_type("text/plain"));
    }

    #[test]
    fn errors_map_to_blocked_reasons() {
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(15)).blocked_reason(),
            BlockedReason::Timeout
        );
        assert_eq!(
            FetchError::Forbidden(StatusCode::UNAUTHORIZED).blocked_reason(),
            BlockedReason::Forbidden
        );
        assert_eq!(
            FetchError::Status(StatusCode::NOT_FOUND).blocked_reason(),
            BlockedReason::FetchError
        );
        assert_eq!(
            FetchError::NotHtml("application/json".into()).blocked_reason(),
            BlockedReason::NotHtml
        );
        assert_eq!(
            FetchError::TooLarge { limit: 1 }.blocked_reason(),
            BlockedReason::TooLarge
        );
        assert_eq!(
            FetchError::ssrf("x").blocked_reason(),
            BlockedReason::SsrfBlocked
        );
        assert_eq!(
            FetchError::Guard {
                reason: BlockedReason::InvalidUrl,
                detail: "ftp://example.com/".into(),
            }
            .blocked_reason(),
            BlockedReason::InvalidUrl
        );
    }

    #[tokio::test]
    async fn preflight_refusal_keeps_the_guard_reason() {
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();

        let ftp = Url::parse("ftp://example.com/file").unwrap();
        let err = fetcher.fetch(&ftp).await.unwrap_err();
        assert_eq!(err.blocked_reason(), BlockedReason::InvalidUrl, "{err:?}");

        let private = Url::parse("http://10.0.0.1/admin").unwrap();
        let err = fetcher.fetch(&private).await.unwrap_err();
        assert_eq!(err.blocked_reason(), BlockedReason::SsrfBlocked, "{err:?}");
    }

    #[test]
    fn redirect_refusal_is_found_in_source_chain() {
        #[derive(Debug, Error)]
        #[error("outer")]
        struct Outer(#[source] RedirectRefused);

        let err = Outer(RedirectRefused {
            url: "http://10.0.0.1/".into(),
            reason: BlockedReason::SsrfBlocked,
        });
        let found = find_source::<RedirectRefused>(&err).expect("found");
        assert_eq!(found.reason, BlockedReason::SsrfBlocked);
        assert!(error_chain_message(&err).contains("10.0.0.1"));
    }

    #[test]
    fn secrets_are_redacted_from_logged_queries() {
        let url = Url::parse("https://example.com/a?token=abc&page=2").unwrap();
        let (host_path, query) = redact_query(&url);
        assert_eq!(host_path, "example.com/a");
        assert!(query.contains(&("token".to_string(), "<redacted>".to_string())));
        assert!(query.contains(&("page".to_string(), "2".to_string())));
    }
}
