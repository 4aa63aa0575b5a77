mod common;

use backpocket_actors::clock::SystemClock;
use backpocket_actors::pipeline::{RunOutcome, SnapshotPipeline};
use backpocket_actors::{store, NewSave, SnapshotJob};
use backpocket_common::{BlockedReason, SnapshotStatus, Visibility};
use backpocket_config::{ExtractConfig, FetchConfig};
use backpocket_extract::ReadabilityExtractor;
use backpocket_http::guard::HostGuard;
use backpocket_http::HttpFetcher;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn job_for(pool: &SqlitePool, url: &str) -> SnapshotJob {
    let now = Utc::now();
    let space = store::insert_space(pool, "owner", "s", Visibility::Private, now)
        .await
        .unwrap();
    let save = store::insert_save(
        pool,
        space.id,
        NewSave {
            url: url.into(),
            ..NewSave::default()
        },
        now,
    )
    .await
    .unwrap();
    let snapshot_id = store::insert_snapshot(pool, save.id, space.id, now)
        .await
        .unwrap();
    SnapshotJob {
        snapshot_id,
        save_id: save.id,
        url: url.into(),
    }
}

/// Wiremock listens on loopback, so these runs use the permissive guard.
fn local_pipeline(pool: &SqlitePool, cfg: FetchConfig) -> SnapshotPipeline {
    let fetcher = HttpFetcher::new(&cfg).unwrap();
    SnapshotPipeline::new(
        pool.clone(),
        HostGuard::permissive(),
        Arc::new(fetcher),
        Arc::new(ReadabilityExtractor::default()),
        ExtractConfig::default(),
        Arc::new(SystemClock),
    )
}

fn local_fetch_config() -> FetchConfig {
    FetchConfig {
        allow_private_networks: true,
        ..FetchConfig::default()
    }
}

#[tokio::test]
async fn html_page_over_http_is_ready() {
    common::init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/post"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string(
                    r#"<html lang="en"><head><title>Hello</title>
                    <meta property="og:description" content="A greeting"></head>
                    <body><article><p>Hello, this is the article body, long enough to score.</p></article></body></html>"#,
                ),
        )
        .expect(1)
        .mount(&server)
        .await;

    let pool = store::connect_in_memory().await.unwrap();
    let job = job_for(&pool, &format!("{}/post", server.uri())).await;
    let outcome = local_pipeline(&pool, local_fetch_config())
        .run(&job)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Finished(SnapshotStatus::Ready));

    let rec = store::get_snapshot(&pool, job.snapshot_id).await.unwrap().unwrap();
    assert_eq!(rec.title.as_deref(), Some("Hello"));
    assert_eq!(rec.language.as_deref(), Some("en"));
    assert_eq!(rec.description.as_deref(), Some("A greeting"));
    assert_eq!(rec.canonical_url.as_deref(), Some(job.url.as_str()));
    assert!(rec.fetched_at.is_some());
    assert_eq!(rec.content_sha256.as_ref().map(String::len), Some(64));

    let save = store::get_save(&pool, job.save_id).await.unwrap().unwrap();
    assert_eq!(save.description.as_deref(), Some("A greeting"));
}

#[tokio::test]
async fn json_response_is_not_html() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"html":"<p>not really</p>"}"#),
        )
        .mount(&server)
        .await;

    let pool = store::connect_in_memory().await.unwrap();
    let job = job_for(&pool, &format!("{}/data", server.uri())).await;
    local_pipeline(&pool, local_fetch_config())
        .run(&job)
        .await
        .unwrap();

    let rec = store::get_snapshot(&pool, job.snapshot_id).await.unwrap().unwrap();
    assert_eq!(rec.status, SnapshotStatus::Blocked);
    assert_eq!(rec.blocked_reason, Some(BlockedReason::NotHtml));
}

#[tokio::test]
async fn oversized_body_is_too_large() {
    let server = MockServer::start().await;
    let body = format!("<html><body>{}</body></html>", "a".repeat(5 * 1024 * 1024 + 1));
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let pool = store::connect_in_memory().await.unwrap();
    let job = job_for(&pool, &format!("{}/big", server.uri())).await;
    local_pipeline(&pool, local_fetch_config())
        .run(&job)
        .await
        .unwrap();

    let rec = store::get_snapshot(&pool, job.snapshot_id).await.unwrap().unwrap();
    assert_eq!(rec.blocked_reason, Some(BlockedReason::TooLarge));
}

#[tokio::test]
async fn forbidden_status_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let pool = store::connect_in_memory().await.unwrap();
    let job = job_for(&pool, &format!("{}/secret", server.uri())).await;
    local_pipeline(&pool, local_fetch_config())
        .run(&job)
        .await
        .unwrap();

    let rec = store::get_snapshot(&pool, job.snapshot_id).await.unwrap().unwrap();
    assert_eq!(rec.blocked_reason, Some(BlockedReason::Forbidden));
    assert!(rec.error_message.unwrap().contains("403"));
}

#[tokio::test]
async fn strict_pipeline_refuses_loopback_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let pool = store::connect_in_memory().await.unwrap();
    let job = job_for(&pool, &format!("{}/x", server.uri())).await;
    let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
    let pipeline = SnapshotPipeline::new(
        pool.clone(),
        HostGuard::strict(),
        Arc::new(fetcher),
        Arc::new(ReadabilityExtractor::default()),
        ExtractConfig::default(),
        Arc::new(SystemClock),
    );
    pipeline.run(&job).await.unwrap();

    let rec = store::get_snapshot(&pool, job.snapshot_id).await.unwrap().unwrap();
    assert_eq!(rec.blocked_reason, Some(BlockedReason::SsrfBlocked));
}
