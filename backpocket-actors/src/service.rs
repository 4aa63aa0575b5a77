//! Caller-facing snapshot operations.
//!
//! Every method that acts for a user takes the caller id as `Option<&str>`;
//! `None` or a blank id is [`BackpocketError::Unauthenticated`]. Ownership is
//! always checked through the save's space.
use crate::clock::Clock;
use crate::quota::{self, QuotaDecision, QuotaPolicy};
use crate::store;
use crate::worker::SnapshotScheduler;
use crate::{
    NewSave, QuotaUsage, RefreshResponse, SaveRecord, SnapshotJob, SnapshotView, SpaceRecord,
};
use backpocket_common::{BackpocketError, Result, SnapshotStatus, Visibility};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct SnapshotService {
    pool: SqlitePool,
    scheduler: Arc<dyn SnapshotScheduler>,
    clock: Arc<dyn Clock>,
    quota: QuotaPolicy,
}

impl SnapshotService {
    pub fn new(
        pool: SqlitePool,
        scheduler: Arc<dyn SnapshotScheduler>,
        clock: Arc<dyn Clock>,
        quota: QuotaPolicy,
    ) -> Self {
        Self {
            pool,
            scheduler,
            clock,
            quota,
        }
    }

    pub async fn create_space(
        &self,
        caller: Option<&str>,
        slug: &str,
        visibility: Visibility,
    ) -> Result<SpaceRecord> {
        let user = require_user(caller)?;
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(BackpocketError::Invalid("space slug must not be empty".into()));
        }
        Ok(store::insert_space(&self.pool, user, slug, visibility, self.clock.now()).await?)
    }

    /// Insert a save into a space the caller owns, then start its first snapshot.
    pub async fn create_save(
        &self,
        caller: Option<&str>,
        space_id: Uuid,
        new: NewSave,
    ) -> Result<(SaveRecord, Uuid)> {
        let user = require_user(caller)?;
        let space = store::get_space(&self.pool, space_id)
            .await?
            .ok_or(BackpocketError::SpaceNotFound(space_id))?;
        if space.owner_id != user {
            return Err(BackpocketError::Forbidden(format!("space {space_id}")));
        }
        if new.url.trim().is_empty() {
            return Err(BackpocketError::Invalid("save url must not be empty".into()));
        }
        let save = store::insert_save(&self.pool, space_id, new, self.clock.now()).await?;
        let snapshot_id = self.enqueue_on_creation(save.id, space_id, &save.url).await?;
        Ok((save, snapshot_id))
    }

    /// Insert a `pending` snapshot and hand it to the scheduler. Not subject
    /// to the refresh quota. A scheduling failure is logged; the record stays
    /// `pending` and a later refresh picks it up.
    pub async fn enqueue_on_creation(
        &self,
        save_id: Uuid,
        space_id: Uuid,
        url: &str,
    ) -> Result<Uuid> {
        let snapshot_id =
            store::insert_snapshot(&self.pool, save_id, space_id, self.clock.now()).await?;
        let job = SnapshotJob {
            snapshot_id,
            save_id,
            url: url.to_string(),
        };
        if let Err(err) = self.scheduler.schedule(job).await {
            warn!(snapshot_id=%snapshot_id, error = ?err, "snapshot.schedule.failed");
        }
        Ok(snapshot_id)
    }

    pub async fn request_refresh(
        &self,
        caller: Option<&str>,
        save_id: Uuid,
        force: bool,
    ) -> Result<RefreshResponse> {
        let user = require_user(caller)?;
        let save = self.owned_save(user, save_id).await?;
        let existing = store::latest_snapshot_for_save(&self.pool, save_id).await?;

        if let Some(rec) = &existing {
            let noop = match rec.status {
                SnapshotStatus::Processing => Some("Snapshot is already being processed"),
                SnapshotStatus::Ready if !force => {
                    Some("Snapshot is already up to date; force a refresh to fetch it again")
                }
                _ => None,
            };
            if let Some(message) = noop {
                let usage = quota::usage(&self.pool, &self.quota, user, self.clock.now()).await?;
                info!(save_id=%save_id, status=%rec.status, "snapshot.refresh.noop");
                return Ok(RefreshResponse {
                    snapshot_id: rec.id,
                    status: rec.status,
                    message: message.to_string(),
                    remaining: usage.remaining,
                    scheduled: false,
                });
            }
        }

        let now = self.clock.now();
        let remaining = match quota::try_consume(&self.pool, &self.quota, user, now).await? {
            QuotaDecision::Allowed { remaining, .. } => remaining,
            QuotaDecision::Rejected { limit, resets_at } => {
                info!(user_id = user, save_id=%save_id, "snapshot.refresh.rate_limited");
                return Err(BackpocketError::RateLimited { limit, resets_at });
            }
        };

        let snapshot_id = match existing {
            Some(rec) => {
                if !store::reset_for_refresh(&self.pool, rec.id, now).await? {
                    // a run claimed it between the read and the reset
                    return Ok(RefreshResponse {
                        snapshot_id: rec.id,
                        status: SnapshotStatus::Processing,
                        message: "Snapshot is already being processed".into(),
                        remaining,
                        scheduled: false,
                    });
                }
                rec.id
            }
            None => store::insert_snapshot(&self.pool, save_id, save.space_id, now).await?,
        };

        self.scheduler
            .schedule(SnapshotJob {
                snapshot_id,
                save_id,
                url: save.url.clone(),
            })
            .await?;
        info!(save_id=%save_id, snapshot_id=%snapshot_id, force, remaining, "snapshot.refresh.scheduled");
        Ok(RefreshResponse {
            snapshot_id,
            status: SnapshotStatus::Pending,
            message: "Snapshot refresh scheduled".into(),
            remaining,
            scheduled: true,
        })
    }

    pub async fn get_snapshot(
        &self,
        caller: Option<&str>,
        save_id: Uuid,
        include_content: bool,
    ) -> Result<Option<SnapshotView>> {
        let user = require_user(caller)?;
        self.owned_save(user, save_id).await?;
        let rec = store::latest_snapshot_for_save(&self.pool, save_id).await?;
        Ok(rec.map(|r| SnapshotView::from_record(r, include_content)))
    }

    /// Anonymous read. `None` unless the space and the save are both public
    /// and the save belongs to that space.
    pub async fn get_public_snapshot(
        &self,
        space_id: Uuid,
        save_id: Uuid,
        include_content: bool,
    ) -> Result<Option<SnapshotView>> {
        let Some(space) = store::get_space(&self.pool, space_id).await? else {
            return Ok(None);
        };
        let Some(save) = store::get_save(&self.pool, save_id).await? else {
            return Ok(None);
        };
        if save.space_id != space.id
            || space.visibility != Visibility::Public
            || save.visibility != Visibility::Public
        {
            return Ok(None);
        }
        let rec = store::latest_snapshot_for_save(&self.pool, save_id).await?;
        Ok(rec.map(|r| SnapshotView::from_record(r, include_content)))
    }

    pub async fn get_save(&self, caller: Option<&str>, save_id: Uuid) -> Result<SaveRecord> {
        let user = require_user(caller)?;
        self.owned_save(user, save_id).await
    }

    pub async fn quota(&self, caller: Option<&str>) -> Result<QuotaUsage> {
        let user = require_user(caller)?;
        Ok(quota::usage(&self.pool, &self.quota, user, self.clock.now()).await?)
    }

    /// Remove a save together with its snapshots.
    pub async fn delete_save(&self, caller: Option<&str>, save_id: Uuid) -> Result<()> {
        let user = require_user(caller)?;
        self.owned_save(user, save_id).await?;
        store::delete_save_cascade(&self.pool, save_id).await?;
        Ok(())
    }

    async fn owned_save(&self, user: &str, save_id: Uuid) -> Result<SaveRecord> {
        let save = store::get_save(&self.pool, save_id)
            .await?
            .ok_or(BackpocketError::SaveNotFound(save_id))?;
        let space = store::get_space(&self.pool, save.space_id)
            .await?
            .ok_or(BackpocketError::SpaceNotFound(save.space_id))?;
        if space.owner_id != user {
            warn!(user_id = user, save_id=%save_id, "snapshot.access.denied");
            return Err(BackpocketError::Forbidden(format!("save {save_id}")));
        }
        Ok(save)
    }
}

fn require_user(caller: Option<&str>) -> Result<&str> {
    match caller.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(BackpocketError::Unauthenticated),
    }
}
