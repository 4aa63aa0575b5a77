//! Explicit partial updates for snapshot records.
//!
//! Each column is [`Patch::Keep`] unless a constructor says otherwise, so a
//! transition only touches the fields it names. The constructors are the only
//! way the pipeline builds terminal patches, which keeps `blocked_reason`
//! tied to `blocked` and content tied to `ready`.

use crate::clock::to_millis;
use backpocket_common::{BlockedReason, SnapshotStatus};
use backpocket_extract::ExtractedPage;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> Patch<T> {
    /// `Some` sets, `None` clears.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Set(v),
            None => Patch::Clear,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Patch<U> {
        match self {
            Patch::Keep => Patch::Keep,
            Patch::Set(v) => Patch::Set(f(v)),
            Patch::Clear => Patch::Clear,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPatch {
    pub status: SnapshotStatus,
    pub blocked_reason: Patch<BlockedReason>,
    pub fetched_at: Patch<DateTime<Utc>>,
    pub canonical_url: Patch<String>,
    pub title: Patch<String>,
    pub byline: Patch<String>,
    pub excerpt: Patch<String>,
    pub site_name: Patch<String>,
    pub word_count: Patch<i64>,
    pub language: Patch<String>,
    pub content_sha256: Patch<String>,
    pub description: Patch<String>,
    pub image_url: Patch<String>,
    pub content_html: Patch<String>,
    pub content_text: Patch<String>,
    pub error_message: Patch<String>,
}

impl SnapshotPatch {
    fn status_only(status: SnapshotStatus) -> Self {
        Self {
            status,
            blocked_reason: Patch::Keep,
            fetched_at: Patch::Keep,
            canonical_url: Patch::Keep,
            title: Patch::Keep,
            byline: Patch::Keep,
            excerpt: Patch::Keep,
            site_name: Patch::Keep,
            word_count: Patch::Keep,
            language: Patch::Keep,
            content_sha256: Patch::Keep,
            description: Patch::Keep,
            image_url: Patch::Keep,
            content_html: Patch::Keep,
            content_text: Patch::Keep,
            error_message: Patch::Keep,
        }
    }

    /// Successful extraction: every metadata column is rewritten.
    pub fn ready(page: &ExtractedPage, fetched_at: DateTime<Utc>) -> Self {
        Self {
            blocked_reason: Patch::Clear,
            fetched_at: Patch::Set(fetched_at),
            canonical_url: Patch::Set(page.canonical_url.to_string()),
            title: Patch::from_option(page.title.clone()),
            byline: Patch::from_option(page.byline.clone()),
            excerpt: Patch::from_option(page.excerpt.clone()),
            site_name: Patch::from_option(page.site_name.clone()),
            word_count: Patch::Set(i64::try_from(page.word_count).unwrap_or(i64::MAX)),
            language: Patch::from_option(page.language.clone()),
            content_sha256: Patch::Set(page.content_sha256.clone()),
            description: Patch::from_option(page.description.clone()),
            image_url: Patch::from_option(page.image_url.clone()),
            content_html: Patch::Set(page.content_html.clone()),
            content_text: Patch::Set(page.content_text.clone()),
            error_message: Patch::Clear,
            ..Self::status_only(SnapshotStatus::Ready)
        }
    }

    /// Classified rejection. Metadata from earlier runs is left alone.
    pub fn blocked(reason: BlockedReason, message: impl Into<String>) -> Self {
        Self {
            blocked_reason: Patch::Set(reason),
            content_html: Patch::Clear,
            content_text: Patch::Clear,
            error_message: Patch::Set(message.into()),
            ..Self::status_only(SnapshotStatus::Blocked)
        }
    }

    /// Unclassified failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            blocked_reason: Patch::Clear,
            content_html: Patch::Clear,
            content_text: Patch::Clear,
            error_message: Patch::Set(message.into()),
            ..Self::status_only(SnapshotStatus::Failed)
        }
    }

    /// Append `, column = value` for every non-`Keep` field.
    pub(crate) fn push_assignments(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        push_text(qb, "blocked_reason", self.blocked_reason.clone().map(|r| r.as_str().to_string()));
        push_int(qb, "fetched_at", self.fetched_at.clone().map(to_millis));
        push_text(qb, "canonical_url", self.canonical_url.clone());
        push_text(qb, "title", self.title.clone());
        push_text(qb, "byline", self.byline.clone());
        push_text(qb, "excerpt", self.excerpt.clone());
        push_text(qb, "site_name", self.site_name.clone());
        push_int(qb, "word_count", self.word_count.clone());
        push_text(qb, "language", self.language.clone());
        push_text(qb, "content_sha256", self.content_sha256.clone());
        push_text(qb, "description", self.description.clone());
        push_text(qb, "image_url", self.image_url.clone());
        push_text(qb, "content_html", self.content_html.clone());
        push_text(qb, "content_text", self.content_text.clone());
        push_text(qb, "error_message", self.error_message.clone());
    }
}

fn push_text(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, value: Patch<String>) {
    match value {
        Patch::Keep => {}
        Patch::Set(v) => {
            qb.push(", ").push(column).push(" = ").push_bind(v);
        }
        Patch::Clear => {
            qb.push(", ").push(column).push(" = NULL");
        }
    }
}

fn push_int(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, value: Patch<i64>) {
    match value {
        Patch::Keep => {}
        Patch::Set(v) => {
            qb.push(", ").push(column).push(" = ").push_bind(v);
        }
        Patch::Clear => {
            qb.push(", ").push(column).push(" = NULL");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_patch_touches_only_status_fields() {
        let patch = SnapshotPatch::blocked(BlockedReason::Timeout, "slow");
        assert_eq!(patch.status, SnapshotStatus::Blocked);
        assert_eq!(patch.blocked_reason, Patch::Set(BlockedReason::Timeout));
        assert_eq!(patch.content_html, Patch::Clear);
        assert!(patch.title.is_keep());
        assert!(patch.fetched_at.is_keep());
    }

    #[test]
    fn failed_patch_clears_reason() {
        let patch = SnapshotPatch::failed("boom");
        assert_eq!(patch.blocked_reason, Patch::Clear);
        assert_eq!(patch.error_message, Patch::Set("boom".to_string()));
    }

    #[test]
    fn update_sql_lists_only_touched_columns() {
        let patch = SnapshotPatch::blocked(BlockedReason::NotHtml, "json");
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE snapshots SET status = 'blocked'");
        patch.push_assignments(&mut qb);
        let sql = qb.sql().to_string();
        assert!(sql.contains("blocked_reason = ?"));
        assert!(sql.contains("content_html = NULL"));
        assert!(sql.contains("error_message = ?"));
        assert!(!sql.contains("title"));
        assert!(!sql.contains("fetched_at"));
    }
}
