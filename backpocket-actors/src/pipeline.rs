//! One snapshot run: claim, guard, fetch, extract, persist, backfill.
//!
//! Every failure after the claim becomes a terminal status on the record. The
//! only error `run` returns is a store failure that left the record unwritten.
use crate::clock::Clock;
use crate::patch::SnapshotPatch;
use crate::store::{self, SaveBackfill};
use crate::SnapshotJob;
use anyhow::Result;
use backpocket_common::SnapshotStatus;
use backpocket_config::ExtractConfig;
use backpocket_extract::{process_html, ArticleExtractor};
use backpocket_http::guard::HostGuard;
use backpocket_http::PageFetcher;
use sqlx::SqlitePool;
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The record was not `pending`; another run owns it or it was reset away.
    Skipped,
    Finished(SnapshotStatus),
}

#[derive(Clone)]
pub struct SnapshotPipeline {
    pool: SqlitePool,
    guard: HostGuard,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn ArticleExtractor>,
    extract_cfg: ExtractConfig,
    clock: Arc<dyn Clock>,
}

impl SnapshotPipeline {
    pub fn new(
        pool: SqlitePool,
        guard: HostGuard,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn ArticleExtractor>,
        extract_cfg: ExtractConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            guard,
            fetcher,
            extractor,
            extract_cfg,
            clock,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run(&self, job: &SnapshotJob) -> Result<RunOutcome> {
        if !store::claim_snapshot(&self.pool, job.snapshot_id, self.clock.now()).await? {
            debug!(snapshot_id=%job.snapshot_id, "snapshot.claim.skipped");
            return Ok(RunOutcome::Skipped);
        }
        info!(snapshot_id=%job.snapshot_id, save_id=%job.save_id, url=%job.url, "snapshot.claimed");

        let started = Instant::now();
        let patch = self.produce(job).await;
        let status = self.persist(job, patch).await?;
        info!(
            snapshot_id=%job.snapshot_id,
            status=%status,
            elapsed_ms=started.elapsed().as_millis() as u64,
            "snapshot.run.done"
        );
        Ok(RunOutcome::Finished(status))
    }

    async fn produce(&self, job: &SnapshotJob) -> SnapshotPatch {
        let url = match self.guard.check(&job.url) {
            Ok(url) => url,
            Err(reason) => {
                warn!(snapshot_id=%job.snapshot_id, url=%job.url, reason=%reason.as_str(), "snapshot.blocked.guard");
                return SnapshotPatch::blocked(reason, format!("{}: {}", reason.describe(), job.url));
            }
        };

        let page = match self.fetcher.fetch(&url).await {
            Ok(page) => page,
            Err(err) => {
                let reason = err.blocked_reason();
                warn!(snapshot_id=%job.snapshot_id, reason=%reason.as_str(), error=%err, "snapshot.blocked.fetch");
                return SnapshotPatch::blocked(reason, err.to_string());
            }
        };
        let fetched_at = self.clock.now();

        let extractor = Arc::clone(&self.extractor);
        let cfg = self.extract_cfg.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            process_html(&page.html, &page.final_url, extractor.as_ref(), &cfg)
        })
        .await;

        match extracted {
            Ok(Ok(page)) => SnapshotPatch::ready(&page, fetched_at),
            Ok(Err(err)) => {
                let reason = err.blocked_reason();
                warn!(snapshot_id=%job.snapshot_id, reason=%reason.as_str(), "snapshot.blocked.extract");
                SnapshotPatch::blocked(reason, err.to_string())
            }
            Err(join) => {
                let detail = if join.is_panic() {
                    format!("extraction panicked: {}", panic_message(join.into_panic()))
                } else {
                    format!("extraction task cancelled: {join}")
                };
                error!(snapshot_id=%job.snapshot_id, url=%job.url, error=%detail, "snapshot.failed.extract");
                SnapshotPatch::failed(detail)
            }
        }
    }

    async fn persist(&self, job: &SnapshotJob, patch: SnapshotPatch) -> Result<SnapshotStatus> {
        let id = job.snapshot_id;
        let status = patch.status;
        match store::apply_patch(&self.pool, id, &patch, self.clock.now()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(snapshot_id=%id, status=%status, "snapshot.patch.stale");
                return Ok(status);
            }
            Err(err) => {
                error!(snapshot_id=%id, status=%status, error=?err, "snapshot.patch.failed");
                let fallback = SnapshotPatch::failed(format!("could not record {status}: {err:#}"));
                store::apply_patch(&self.pool, id, &fallback, self.clock.now()).await?;
                return Ok(SnapshotStatus::Failed);
            }
        }

        match status {
            SnapshotStatus::Ready => {
                info!(snapshot_id=%id, save_id=%job.save_id, "snapshot.ready");
                self.backfill(job).await;
            }
            SnapshotStatus::Blocked => info!(snapshot_id=%id, "snapshot.blocked"),
            _ => error!(snapshot_id=%id, status=%status, "snapshot.failed"),
        }
        Ok(status)
    }

    /// Copy display fields onto the save. A failure here leaves the snapshot
    /// `ready` and is only logged.
    async fn backfill(&self, job: &SnapshotJob) {
        let rec = match store::get_snapshot(&self.pool, job.snapshot_id).await {
            Ok(Some(rec)) => rec,
            Ok(None) => return,
            Err(err) => {
                warn!(snapshot_id=%job.snapshot_id, error=?err, "snapshot.backfill.read_failed");
                return;
            }
        };
        let fill = SaveBackfill::from_snapshot(&rec);
        if let Err(err) = store::backfill_save(&self.pool, job.save_id, &fill).await {
            warn!(save_id=%job.save_id, error=?err, "snapshot.backfill.failed");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
