//! Per-user rolling window for manual refreshes.
//!
//! A single UPSERT either opens a new window, bumps the counter under the
//! ceiling, or touches nothing. There is no read-then-write, so two concurrent
//! refreshes from one user cannot both take the last slot.
use crate::clock::{from_millis, to_millis};
use crate::QuotaUsage;
use anyhow::Result;
use backpocket_config::QuotaConfig;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::from_config(&QuotaConfig::default())
    }
}

impl QuotaPolicy {
    pub fn from_config(cfg: &QuotaConfig) -> Self {
        let secs = i64::try_from(cfg.window_secs).unwrap_or(i64::MAX / 1_000);
        Self {
            limit: cfg.daily_limit,
            window: Duration::seconds(secs),
        }
    }

    fn window_millis(&self) -> i64 {
        self.window.num_milliseconds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed {
        used: u32,
        remaining: u32,
        resets_at: DateTime<Utc>,
    },
    Rejected {
        limit: u32,
        resets_at: DateTime<Utc>,
    },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed { .. })
    }
}

/// Take one refresh slot for `user_id` at `now`.
pub async fn try_consume(
    pool: &SqlitePool,
    policy: &QuotaPolicy,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<QuotaDecision> {
    let now_ms = to_millis(now);
    let window_ms = policy.window_millis();
    let row = sqlx::query(
        r#"INSERT INTO snapshot_quota (user_id, window_start, count)
           VALUES (?1, ?2, 1)
           ON CONFLICT(user_id) DO UPDATE SET
             window_start = CASE WHEN ?2 > snapshot_quota.window_start + ?3
                                 THEN ?2 ELSE snapshot_quota.window_start END,
             count        = CASE WHEN ?2 > snapshot_quota.window_start + ?3
                                 THEN 1 ELSE snapshot_quota.count + 1 END
           WHERE ?2 > snapshot_quota.window_start + ?3
              OR snapshot_quota.count < ?4
           RETURNING window_start, count"#,
    )
    .bind(user_id)
    .bind(now_ms)
    .bind(window_ms)
    .bind(i64::from(policy.limit))
    .fetch_optional(pool)
    .await?;

    if let Some(r) = row {
        let window_start: i64 = r.try_get("window_start")?;
        let used = count_u32(r.try_get("count")?);
        let decision = QuotaDecision::Allowed {
            used,
            remaining: policy.limit.saturating_sub(used),
            resets_at: from_millis(window_start + window_ms),
        };
        debug!(user_id, used, limit = policy.limit, "quota.consume");
        return Ok(decision);
    }

    let window_start: i64 =
        sqlx::query_scalar("SELECT window_start FROM snapshot_quota WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await?;
    let resets_at = from_millis(window_start + window_ms);
    info!(user_id, limit = policy.limit, resets_at=%resets_at, "quota.rejected");
    Ok(QuotaDecision::Rejected {
        limit: policy.limit,
        resets_at,
    })
}

/// Current usage without consuming. An expired window reads as empty.
pub async fn usage(
    pool: &SqlitePool,
    policy: &QuotaPolicy,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<QuotaUsage> {
    let row = sqlx::query("SELECT window_start, count FROM snapshot_quota WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    let window_ms = policy.window_millis();
    let open = match row {
        Some(r) => {
            let start: i64 = r.try_get("window_start")?;
            let count: i64 = r.try_get("count")?;
            (to_millis(now) <= start + window_ms).then_some((start, count_u32(count)))
        }
        None => None,
    };
    Ok(match open {
        Some((start, used)) => QuotaUsage {
            used,
            remaining: policy.limit.saturating_sub(used),
            limit: policy.limit,
            resets_at: Some(from_millis(start + window_ms)),
        },
        None => QuotaUsage {
            used: 0,
            remaining: policy.limit,
            limit: policy.limit,
            resets_at: None,
        },
    })
}

fn count_u32(count: i64) -> u32 {
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}
