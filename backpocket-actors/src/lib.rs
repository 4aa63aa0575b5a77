//! Snapshot records, the pipeline that fills them, and the actor that runs it.
//!
//! - `store`: SQLite persistence (spaces, saves, snapshots)
//! - `patch`: explicit partial updates for terminal transitions
//! - `quota`: per-user rolling window for manual refreshes
//! - `pipeline`: guard, fetch, extract, persist, backfill
//! - `worker`: `SnapshotWorker` actor and the scheduler seam
//! - `service`: caller-facing operations with ownership checks

pub mod actor;
pub mod clock;
pub mod patch;
pub mod pipeline;
pub mod quota;
pub mod service;
pub mod store;
pub mod system;
pub mod worker;

use backpocket_common::{BlockedReason, SnapshotStatus, Visibility};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub slug: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveRecord {
    pub id: Uuid,
    pub space_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_name: Option<String>,
    pub image_url: Option<String>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new save.
#[derive(Debug, Clone, Default)]
pub struct NewSave {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub id: Uuid,
    pub save_id: Uuid,
    pub space_id: Uuid,
    pub status: SnapshotStatus,
    pub blocked_reason: Option<BlockedReason>,
    pub attempts: i64,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub canonical_url: Option<String>,
    pub title: Option<String>,
    pub byline: Option<String>,
    pub excerpt: Option<String>,
    pub site_name: Option<String>,
    pub word_count: Option<i64>,
    pub language: Option<String>,
    pub content_sha256: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub content_html: Option<String>,
    pub content_text: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One pipeline run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotJob {
    pub snapshot_id: Uuid,
    pub save_id: Uuid,
    pub url: String,
}

pub enum SnapshotMsg {
    /// Run the pipeline for a job (spawned, bounded by the run semaphore).
    Process(SnapshotJob),
    /// A run reached a terminal state.
    Finished {
        snapshot_id: Uuid,
        status: SnapshotStatus,
    },
    /// Reply once the snapshot is terminal (immediately if it already is).
    Watch {
        snapshot_id: Uuid,
        reply: oneshot::Sender<SnapshotStatus>,
    },
}

/// Read model returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotView {
    pub id: Uuid,
    pub save_id: Uuid,
    pub space_id: Uuid,
    pub status: SnapshotStatus,
    pub blocked_reason: Option<BlockedReason>,
    pub attempts: i64,
    pub fetched_at: Option<DateTime<Utc>>,
    pub canonical_url: Option<String>,
    pub title: Option<String>,
    pub byline: Option<String>,
    pub excerpt: Option<String>,
    pub site_name: Option<String>,
    pub word_count: Option<i64>,
    pub language: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub content_sha256: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<SnapshotContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotContent {
    pub html: String,
    pub text: String,
}

impl SnapshotView {
    /// Content is attached only when requested and the snapshot is `ready`.
    pub fn from_record(rec: SnapshotRecord, include_content: bool) -> Self {
        let content = match (include_content, rec.status, rec.content_html, rec.content_text) {
            (true, SnapshotStatus::Ready, Some(html), Some(text)) => {
                Some(SnapshotContent { html, text })
            }
            _ => None,
        };
        Self {
            id: rec.id,
            save_id: rec.save_id,
            space_id: rec.space_id,
            status: rec.status,
            blocked_reason: rec.blocked_reason,
            attempts: rec.attempts,
            fetched_at: rec.fetched_at,
            canonical_url: rec.canonical_url,
            title: rec.title,
            byline: rec.byline,
            excerpt: rec.excerpt,
            site_name: rec.site_name,
            word_count: rec.word_count,
            language: rec.language,
            description: rec.description,
            image_url: rec.image_url,
            content_sha256: rec.content_sha256,
            error_message: rec.error_message,
            created_at: rec.created_at,
            updated_at: rec.updated_at,
            content,
        }
    }
}

/// Result of a refresh request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshResponse {
    pub snapshot_id: Uuid,
    pub status: SnapshotStatus,
    pub message: String,
    /// Manual refreshes left in the current window.
    pub remaining: u32,
    /// False when the request was a no-op.
    pub scheduled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaUsage {
    pub used: u32,
    pub remaining: u32,
    pub limit: u32,
    /// End of the current window; `None` when no window is open.
    pub resets_at: Option<DateTime<Utc>>,
}
