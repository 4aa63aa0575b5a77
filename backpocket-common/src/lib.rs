//! Common types and utilities shared across Backpocket crates.
//!
//! This crate defines the snapshot status vocabulary, the shared error type, and
//! observability helpers used throughout the workspace. It stays lightweight so
//! that the fetcher, the extractor, and the store can all depend on it.
//!
//! # Overview
//!
//! - [`SnapshotStatus`]: the snapshot state machine's states
//! - [`BlockedReason`]: why a snapshot was refused
//! - [`Visibility`]: public/private flag shared by spaces and saves
//! - [`observability`]: centralised tracing/logging initialisation
//! - [`BackpocketError`] and [`Result`]: shared error handling
//!
//! # Examples
//!
//! ```rust
//! use backpocket_common::{BlockedReason, SnapshotStatus};
//!
//! let reason: BlockedReason = "ssrf_blocked".parse().unwrap();
//! assert_eq!(reason, BlockedReason::SsrfBlocked);
//! assert!(SnapshotStatus::Blocked.is_terminal());
//! assert!(!SnapshotStatus::Processing.is_terminal());
//! ```
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod observability;

/// Lifecycle of a snapshot record.
///
/// `pending -> processing -> {ready | blocked | failed}`; `pending` is also the
/// re-entry state for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Pending,
    Processing,
    Ready,
    Blocked,
    Failed,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Pending => "pending",
            SnapshotStatus::Processing => "processing",
            SnapshotStatus::Ready => "ready",
            SnapshotStatus::Blocked => "blocked",
            SnapshotStatus::Failed => "failed",
        }
    }

    /// Terminal until a new run is requested.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SnapshotStatus::Ready | SnapshotStatus::Blocked | SnapshotStatus::Failed
        )
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotStatus {
    type Err = BackpocketError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SnapshotStatus::Pending),
            "processing" => Ok(SnapshotStatus::Processing),
            "ready" => Ok(SnapshotStatus::Ready),
            "blocked" => Ok(SnapshotStatus::Blocked),
            "failed" => Ok(SnapshotStatus::Failed),
            other => Err(BackpocketError::Invalid(format!(
                "unknown snapshot status: {other}"
            ))),
        }
    }
}

/// Fixed set of reasons a snapshot ends up `blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    InvalidUrl,
    SsrfBlocked,
    Timeout,
    FetchError,
    Forbidden,
    NotHtml,
    TooLarge,
    Noarchive,
    ParseFailed,
}

impl BlockedReason {
    pub const ALL: [BlockedReason; 9] = [
        BlockedReason::InvalidUrl,
        BlockedReason::SsrfBlocked,
        BlockedReason::Timeout,
        BlockedReason::FetchError,
        BlockedReason::Forbidden,
        BlockedReason::NotHtml,
        BlockedReason::TooLarge,
        BlockedReason::Noarchive,
        BlockedReason::ParseFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockedReason::InvalidUrl => "invalid_url",
            BlockedReason::SsrfBlocked => "ssrf_blocked",
            BlockedReason::Timeout => "timeout",
            BlockedReason::FetchError => "fetch_error",
            BlockedReason::Forbidden => "forbidden",
            BlockedReason::NotHtml => "not_html",
            BlockedReason::TooLarge => "too_large",
            BlockedReason::Noarchive => "noarchive",
            BlockedReason::ParseFailed => "parse_failed",
        }
    }

    /// Human-readable explanation suitable for a UI tooltip.
    pub fn describe(&self) -> &'static str {
        match self {
            BlockedReason::InvalidUrl => "The saved URL could not be parsed",
            BlockedReason::SsrfBlocked => "The URL points at a private or internal network",
            BlockedReason::Timeout => "The site took too long to respond",
            BlockedReason::FetchError => "The page could not be fetched",
            BlockedReason::Forbidden => "The site refused access",
            BlockedReason::NotHtml => "The URL does not point at an HTML page",
            BlockedReason::TooLarge => "The page is too large to snapshot",
            BlockedReason::Noarchive => "The publisher asked not to be archived",
            BlockedReason::ParseFailed => "No readable content was found",
        }
    }
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockedReason {
    type Err = BackpocketError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        BlockedReason::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| BackpocketError::Invalid(format!("unknown blocked reason: {s}")))
    }
}

/// Public/private flag for spaces and saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = BackpocketError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(BackpocketError::Invalid(format!("unknown visibility: {other}"))),
        }
    }
}

/// Error types used across the Backpocket system.
#[derive(thiserror::Error, Debug)]
pub enum BackpocketError {
    /// No authenticated caller was supplied.
    #[error("Not authenticated")]
    Unauthenticated,

    /// The caller does not own the requested resource.
    #[error("Not authorized to access {0}")]
    Forbidden(String),

    /// A referenced save could not be located.
    #[error("Save not found: {0}")]
    SaveNotFound(Uuid),

    /// A referenced space could not be located.
    #[error("Space not found: {0}")]
    SpaceNotFound(Uuid),

    /// The manual refresh quota is exhausted for the current window.
    #[error("Snapshot limit of {limit} per day reached; resets at {resets_at}")]
    RateLimited {
        limit: u32,
        resets_at: DateTime<Utc>,
    },

    /// Input or stored value failed validation.
    #[error("Invalid value: {0}")]
    Invalid(String),

    /// Configuration was incomplete or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence or another collaborator failed.
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Convenient alias for results that use [`BackpocketError`].
pub type Result<T> = std::result::Result<T, BackpocketError>;
