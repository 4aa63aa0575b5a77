//! Wires config into the pool, the pipeline, the worker and the service.
use anyhow::{Context, Result};
use backpocket_actors::actor::Addr;
use backpocket_actors::clock::{Clock, SystemClock};
use backpocket_actors::pipeline::SnapshotPipeline;
use backpocket_actors::quota::QuotaPolicy;
use backpocket_actors::service::SnapshotService;
use backpocket_actors::store;
use backpocket_actors::system::ActorSystem;
use backpocket_actors::worker::{self, SnapshotWorker};
use backpocket_config::BackpocketConfig;
use backpocket_extract::ReadabilityExtractor;
use backpocket_http::HttpFetcher;
use backpocket_http::guard::HostGuard;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

pub struct Tether {
    system: ActorSystem,
    pool: SqlitePool,
    pub worker: Addr<SnapshotWorker>,
    pub service: SnapshotService,
    grace: Duration,
}

impl Tether {
    pub async fn build(cfg: &BackpocketConfig) -> Result<Self> {
        let pool = store::connect(&cfg.database).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let pipeline = SnapshotPipeline::new(
            pool.clone(),
            HostGuard::new(cfg.fetch.allow_private_networks),
            Arc::new(build_fetcher(cfg)?),
            Arc::new(ReadabilityExtractor::from_config(&cfg.extract)),
            cfg.extract.clone(),
            clock.clone(),
        );

        let mut system = ActorSystem::new();
        let worker = worker::spawn_worker(&mut system, pipeline, &cfg.worker);
        let service = SnapshotService::new(
            pool.clone(),
            Arc::new(worker.clone()),
            clock,
            QuotaPolicy::from_config(&cfg.quota),
        );
        tracing::info!(
            db=%cfg.database.url,
            max_runs=cfg.worker.max_concurrent_runs,
            allow_private=cfg.fetch.allow_private_networks,
            "tether.ready"
        );

        Ok(Self {
            system,
            pool,
            worker,
            service,
            grace: Duration::from_secs(cfg.runtime.shutdown_grace_secs),
        })
    }

    pub async fn shutdown(self) -> Result<()> {
        self.system.graceful_shutdown(self.grace).await?;
        self.pool.close().await;
        Ok(())
    }
}

pub fn build_fetcher(cfg: &BackpocketConfig) -> Result<HttpFetcher> {
    HttpFetcher::new(&cfg.fetch).context("building HTTP fetcher")
}
