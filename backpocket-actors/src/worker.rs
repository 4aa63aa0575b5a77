//! Background runner for snapshot jobs.
//!
//! `SnapshotWorker` owns no run state itself: each `Process` spawns a task
//! that waits for a permit, runs the pipeline, and reports back with
//! `Finished` so watchers can be released.
use crate::actor::{Actor, Addr, Context};
use crate::pipeline::{RunOutcome, SnapshotPipeline};
use crate::store;
use crate::system::ActorSystem;
use crate::{SnapshotJob, SnapshotMsg};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backpocket_common::SnapshotStatus;
use backpocket_config::WorkerConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error, warn};
use uuid::Uuid;

pub struct SnapshotWorker {
    pipeline: Arc<SnapshotPipeline>,
    runs: Arc<Semaphore>,
    watchers: HashMap<Uuid, Vec<oneshot::Sender<SnapshotStatus>>>,
}

impl SnapshotWorker {
    pub fn new(pipeline: SnapshotPipeline, max_concurrent_runs: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            runs: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            watchers: HashMap::new(),
        }
    }

    fn spawn_run(&self, job: SnapshotJob, me: Addr<Self>) {
        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.runs);
        tokio::spawn(async move {
            let permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    error!(error = ?err, snapshot_id=%job.snapshot_id, "worker.acquire_failed");
                    return;
                }
            };
            let snapshot_id = job.snapshot_id;
            let status = match pipeline.run(&job).await {
                Ok(RunOutcome::Finished(status)) => Some(status),
                Ok(RunOutcome::Skipped) => None,
                Err(err) => {
                    error!(snapshot_id=%snapshot_id, error = ?err, "worker.run_failed");
                    Some(SnapshotStatus::Failed)
                }
            };
            drop(permit);
            if let Some(status) = status {
                if me
                    .send(SnapshotMsg::Finished {
                        snapshot_id,
                        status,
                    })
                    .await
                    .is_err()
                {
                    debug!(snapshot_id=%snapshot_id, "worker.finished.dropped");
                }
            }
        });
    }

    async fn register_watch(&mut self, snapshot_id: Uuid, reply: oneshot::Sender<SnapshotStatus>) {
        match store::get_snapshot(self.pipeline.pool(), snapshot_id).await {
            Ok(Some(rec)) if rec.status.is_terminal() => {
                let _ = reply.send(rec.status);
            }
            // Unknown snapshot: dropping `reply` tells the caller.
            Ok(None) => {}
            Ok(Some(_)) => self.park(snapshot_id, reply),
            Err(err) => {
                warn!(snapshot_id=%snapshot_id, error = ?err, "worker.watch.read_failed");
                self.park(snapshot_id, reply);
            }
        }
    }

    fn park(&mut self, snapshot_id: Uuid, reply: oneshot::Sender<SnapshotStatus>) {
        let entry = self.watchers.entry(snapshot_id).or_default();
        entry.retain(|tx| !tx.is_closed());
        entry.push(reply);
    }
}

#[async_trait]
impl Actor for SnapshotWorker {
    type Msg = SnapshotMsg;

    async fn handle(&mut self, msg: Self::Msg, ctx: &mut Context<Self>) -> Result<()> {
        match msg {
            SnapshotMsg::Process(job) => {
                debug!(snapshot_id=%job.snapshot_id, "worker.process");
                self.spawn_run(job, ctx.addr());
            }
            SnapshotMsg::Finished {
                snapshot_id,
                status,
            } => {
                if let Some(listeners) = self.watchers.remove(&snapshot_id) {
                    debug!(snapshot_id=%snapshot_id, listeners=listeners.len(), "worker.notify");
                    for tx in listeners {
                        let _ = tx.send(status);
                    }
                }
            }
            SnapshotMsg::Watch { snapshot_id, reply } => {
                self.register_watch(snapshot_id, reply).await;
            }
        }
        Ok(())
    }
}

/// Start the worker under `system` with the configured limits.
pub fn spawn_worker(
    system: &mut ActorSystem,
    pipeline: SnapshotPipeline,
    cfg: &WorkerConfig,
) -> Addr<SnapshotWorker> {
    system.spawn(
        SnapshotWorker::new(pipeline, cfg.max_concurrent_runs),
        cfg.mailbox_capacity,
    )
}

/// Wait until `snapshot_id` is terminal.
pub async fn watch(addr: &Addr<SnapshotWorker>, snapshot_id: Uuid) -> Result<SnapshotStatus> {
    let (reply, rx) = oneshot::channel();
    addr.send(SnapshotMsg::Watch { snapshot_id, reply })
        .await
        .map_err(|_| anyhow!("snapshot worker is not running"))?;
    rx.await
        .map_err(|_| anyhow!("snapshot {snapshot_id} not found or worker stopped"))
}

/// Where the service hands off new runs.
#[async_trait]
pub trait SnapshotScheduler: Send + Sync {
    async fn schedule(&self, job: SnapshotJob) -> Result<()>;
}

#[async_trait]
impl SnapshotScheduler for Addr<SnapshotWorker> {
    async fn schedule(&self, job: SnapshotJob) -> Result<()> {
        let id = job.snapshot_id;
        self.send(SnapshotMsg::Process(job))
            .await
            .map_err(|_| anyhow!("snapshot worker is not running; dropped {id}"))
    }
}
