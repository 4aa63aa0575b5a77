#![allow(dead_code)]

use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Result;
use async_trait::async_trait;
use backpocket_actors::clock::{Clock, ManualClock};
use backpocket_actors::pipeline::SnapshotPipeline;
use backpocket_actors::quota::QuotaPolicy;
use backpocket_actors::service::SnapshotService;
use backpocket_actors::store;
use backpocket_actors::worker::SnapshotScheduler;
use backpocket_actors::SnapshotJob;
use backpocket_common::observability::{LogFormat, LoggingConfig};
use backpocket_config::ExtractConfig;
use backpocket_extract::ReadabilityExtractor;
use backpocket_http::guard::HostGuard;
use backpocket_http::{FetchError, FetchedPage, PageFetcher};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

static INIT_PATH: OnceLock<std::path::PathBuf> = OnceLock::new();

pub fn init_test_tracing() {
    let _ = INIT_PATH.get_or_init(|| {
        let config = LoggingConfig {
            dir: Some(std::env::temp_dir().join("backpocket-tests")),
            format: LogFormat::Text,
            stderr: true,
            filter: "debug".into(),
        };
        backpocket_common::observability::init_logging("backpocket-tests", &config)
            .unwrap_or_default()
    });
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap()
}

pub const HELLO_HTML: &str =
    "<html><head><title>Hello</title></head><body><p>Hello from the example article.</p></body></html>";

pub type Step = std::result::Result<String, fn() -> FetchError>;

pub fn serves(html: &str) -> Step {
    Ok(html.to_string())
}

pub fn fails(make: fn() -> FetchError) -> Step {
    Err(make)
}

/// Serves canned results in order, then repeats the last one.
pub struct ScriptedFetcher {
    script: Vec<Step>,
    pub calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn html(body: &str) -> Arc<Self> {
        Self::script(vec![serves(body)])
    }

    pub fn script(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<FetchedPage, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.get(n).or_else(|| self.script.last());
        match step {
            Some(Ok(html)) => Ok(FetchedPage {
                final_url: url.clone(),
                status: 200,
                content_type: "text/html; charset=utf-8".into(),
                html: html.clone(),
            }),
            Some(Err(make)) => Err(make()),
            None => Err(FetchError::Network("empty script".into())),
        }
    }
}

/// Runs each job to completion before `schedule` returns.
pub struct InlineScheduler(pub SnapshotPipeline);

#[async_trait]
impl SnapshotScheduler for InlineScheduler {
    async fn schedule(&self, job: SnapshotJob) -> Result<()> {
        self.0.run(&job).await?;
        Ok(())
    }
}

/// Records jobs without running them.
#[derive(Default)]
pub struct RecordingScheduler {
    pub jobs: Mutex<Vec<SnapshotJob>>,
}

impl RecordingScheduler {
    pub fn count(&self) -> usize {
        self.jobs.lock().map(|j| j.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SnapshotScheduler for RecordingScheduler {
    async fn schedule(&self, job: SnapshotJob) -> Result<()> {
        self.jobs.lock().expect("jobs lock").push(job);
        Ok(())
    }
}

pub struct Harness {
    pub pool: SqlitePool,
    pub clock: Arc<ManualClock>,
    pub service: SnapshotService,
}

pub fn pipeline(
    pool: &SqlitePool,
    fetcher: Arc<dyn PageFetcher>,
    clock: Arc<dyn Clock>,
) -> SnapshotPipeline {
    SnapshotPipeline::new(
        pool.clone(),
        HostGuard::strict(),
        fetcher,
        Arc::new(ReadabilityExtractor::default()),
        ExtractConfig::default(),
        clock,
    )
}

/// Service whose scheduler runs the pipeline inline against `fetcher`.
pub async fn inline_harness(fetcher: Arc<dyn PageFetcher>) -> Harness {
    init_test_tracing();
    let pool = store::connect_in_memory().await.unwrap();
    let clock = Arc::new(ManualClock::new(t0()));
    let scheduler = InlineScheduler(pipeline(&pool, fetcher, clock.clone()));
    let service = SnapshotService::new(
        pool.clone(),
        Arc::new(scheduler),
        clock.clone(),
        QuotaPolicy::default(),
    );
    Harness {
        pool,
        clock,
        service,
    }
}

/// Service whose scheduler only records jobs.
pub async fn recording_harness(policy: QuotaPolicy) -> (Harness, Arc<RecordingScheduler>) {
    init_test_tracing();
    let pool = store::connect_in_memory().await.unwrap();
    let clock = Arc::new(ManualClock::new(t0()));
    let scheduler = Arc::new(RecordingScheduler::default());
    let service = SnapshotService::new(pool.clone(), scheduler.clone(), clock.clone(), policy);
    (
        Harness {
            pool,
            clock,
            service,
        },
        scheduler,
    )
}
