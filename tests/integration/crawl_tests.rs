//! Integration tests for the crawl engine
//!
//! These tests use wiremock to create mock HTTP servers and drive whole
//! jobs through the engine: submission, worker execution, persistence and
//! completion.

use kumo_crawl::config::Config;
use kumo_crawl::crawler::Engine;
use kumo_crawl::storage::{CrawlResult, FsObjectStore, ObjectStore, SqliteStorage};
use kumo_crawl::{CrawlParams, ErrorCode, JobStatus, PoliteConfig, RequestMode, ReturnFormat};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(20);

/// Creates an engine over a temp database and object root, allowed to reach
/// the loopback mock server
fn create_test_engine(dir: &TempDir) -> Engine {
    let mut config = Config::default();
    config.security.allow_private_networks = true;
    config.engine.retry_base_delay_ms = 20;
    config.storage.database_path = dir.path().join("kumo.db").display().to_string();
    config.storage.object_root = dir.path().join("objects").display().to_string();

    let storage = SqliteStorage::new(&dir.path().join("kumo.db")).expect("Failed to open database");
    let objects: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(
        dir.path().join("objects"),
        "http://objects.test",
        "secret",
    ));

    Engine::with_backends(config, storage, objects).expect("Failed to create engine")
}

/// Parameters for a quick HTTP-only crawl
fn quick_params(seed: String, depth: u32, limit: u32) -> CrawlParams {
    let mut params = CrawlParams::new(seed);
    params.depth = depth;
    params.limit = limit;
    params.request = RequestMode::Http;
    params.return_format = ReturnFormat::Text;
    params.same_domain_only = true;
    params.polite = PoliteConfig {
        per_host_delay_ms: 100,
        jitter_ratio: 0.0,
        max_retries: 3,
    };
    params
}

fn html_page(title: &str, body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!(
            "<html><head><title>{}</title></head><body><article><h1>{}</h1><p>{}</p>{}</article></body></html>",
            title,
            title,
            "Plain static text that needs no browser to read. ".repeat(5),
            body
        ),
        "text/html",
    )
}

async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn all_results(engine: &Engine, job_id: &str) -> Vec<CrawlResult> {
    let mut results = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = engine
            .results(job_id, cursor.as_deref(), 100)
            .expect("Failed to list results");
        results.extend(page.results);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    results
}

#[tokio::test]
async fn test_crawl_respects_depth_and_limit() {
    let server = MockServer::start().await;
    let base = server.uri();
    let port = url::Url::parse(&base).unwrap().port().unwrap();

    mount_robots(&server, "User-agent: *\nDisallow: /private").await;

    // Seed links to eight same-host pages, a fragment duplicate, a
    // robots-disallowed path and an off-host URL
    let mut links: String = (1..=8)
        .map(|i| format!(r#"<a href="/p{}">Page {}</a>"#, i, i))
        .collect();
    links.push_str(r##"<a href="/p1#top">Again</a>"##);
    links.push_str(r#"<a href="/private/secret">Secret</a>"#);
    links.push_str(&format!(
        r#"<a href="http://localhost:{}/elsewhere">Elsewhere</a>"#,
        port
    ));

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", &links))
        .mount(&server)
        .await;

    for i in 1..=8 {
        Mock::given(method("GET"))
            .and(path(format!("/p{}", i)))
            .respond_with(html_page(
                &format!("Page {}", i),
                r#"<a href="/deeper">Deeper</a>"#,
            ))
            .mount(&server)
            .await;
    }

    // Depth 1 never reaches this
    Mock::given(method("GET"))
        .and(path("/deeper"))
        .respond_with(html_page("Deeper", ""))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = create_test_engine(&dir);

    let job_id = engine
        .submit("t1", quick_params(format!("{}/", base), 1, 5), None)
        .expect("Failed to submit");
    let job = engine.wait_for_job(&job_id, WAIT).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let results = all_results(&engine, &job_id);
    assert_eq!(results.len(), 5, "seed plus four links");
    assert!(results.iter().all(|r| r.success));

    let urls: Vec<&str> = results.iter().map(|r| r.normalized_url.as_str()).collect();
    assert!(urls.iter().all(|u| u.starts_with(&base)));
    assert!(!urls.iter().any(|u| u.contains("private") || u.contains("deeper")));

    let mut hashes: Vec<&str> = results.iter().map(|r| r.url_hash.as_str()).collect();
    hashes.sort();
    hashes.dedup();
    assert_eq!(hashes.len(), 5);

    // Payloads land in the object store
    let seed = results
        .iter()
        .find(|r| r.normalized_url == format!("{}/", base))
        .expect("seed result");
    let content = seed.content.as_ref().expect("seed content");
    assert!(content.key.starts_with(&format!("t1/{}/content/", job_id)));
    let stored = engine.read_object(&content.key).await.unwrap();
    assert!(String::from_utf8_lossy(&stored).contains("Plain static text"));

    let status = engine.status(&job_id).unwrap();
    assert_eq!(status.results.total, 5);
    assert_eq!(status.results.succeeded, 5);
    assert_eq!(status.pending, 0);
}

#[tokio::test]
async fn test_throttled_page_is_retried() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Recovered", ""))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = create_test_engine(&dir);

    let job_id = engine
        .submit("t1", quick_params(format!("{}/", server.uri()), 0, 1), None)
        .unwrap();
    let job = engine.wait_for_job(&job_id, WAIT).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let results = all_results(&engine, &job_id);
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].status_code, Some(200));
}

#[tokio::test]
async fn test_retries_exhausted_records_failure() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = create_test_engine(&dir);

    let mut params = quick_params(format!("{}/", server.uri()), 0, 1);
    params.polite.max_retries = 1;
    let job_id = engine.submit("t1", params, None).unwrap();
    engine.wait_for_job(&job_id, WAIT).await.unwrap();

    let results = all_results(&engine, &job_id);
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].error.as_ref().unwrap().code, ErrorCode::HttpError);
}

#[tokio::test]
async fn test_oversized_body_fails_without_payload() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("x".repeat(4096), "text/html"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = create_test_engine(&dir);

    let mut params = quick_params(format!("{}/", server.uri()), 0, 1);
    params.max_bytes = 1024;
    let job_id = engine.submit("t1", params, None).unwrap();
    engine.wait_for_job(&job_id, WAIT).await.unwrap();

    let results = all_results(&engine, &job_id);
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(
        results[0].error.as_ref().unwrap().code,
        ErrorCode::MaxBytesExceeded
    );
    assert!(results[0].content.is_none());
    assert!(results[0].bytes.is_none());
}

#[tokio::test]
async fn test_cancel_discards_in_flight_work() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Slow", r#"<a href="/next">Next</a>"#).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = create_test_engine(&dir);

    let job_id = engine
        .submit("t1", quick_params(format!("{}/", server.uri()), 2, 10), None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(engine.cancel(&job_id).unwrap());
    // A second cancel is a no-op
    assert!(!engine.cancel(&job_id).unwrap());

    tokio::time::sleep(Duration::from_millis(1000)).await;

    let status = engine.status(&job_id).unwrap();
    assert_eq!(status.job.status, JobStatus::Canceled);
    assert!(status.job.canceled_at.is_some());
    assert_eq!(status.results.total, 0);
}

#[tokio::test]
async fn test_idempotent_submission() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", ""))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = create_test_engine(&dir);
    let params = quick_params(format!("{}/", server.uri()), 0, 1);

    let first = engine.submit("t1", params.clone(), Some("key-1")).unwrap();
    let again = engine.submit("t1", params.clone(), Some("key-1")).unwrap();
    assert_eq!(first, again);

    let other_key = engine.submit("t1", params.clone(), Some("key-2")).unwrap();
    assert_ne!(first, other_key);

    let other_tenant = engine.submit("t2", params.clone(), Some("key-1")).unwrap();
    assert_ne!(first, other_tenant);

    let no_key = engine.submit("t1", params, None).unwrap();
    assert_ne!(first, no_key);

    engine.wait_for_job(&first, WAIT).await.unwrap();
    assert_eq!(all_results(&engine, &first).len(), 1);
}

#[tokio::test]
async fn test_results_pagination_covers_every_result() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;

    let links: String = (1..=4)
        .map(|i| format!(r#"<a href="/p{}">Page {}</a>"#, i, i))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", &links))
        .mount(&server)
        .await;
    for i in 1..=4 {
        Mock::given(method("GET"))
            .and(path(format!("/p{}", i)))
            .respond_with(html_page(&format!("Page {}", i), ""))
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let engine = create_test_engine(&dir);
    let job_id = engine
        .submit("t1", quick_params(format!("{}/", server.uri()), 1, 0), None)
        .unwrap();
    engine.wait_for_job(&job_id, WAIT).await.unwrap();

    let first = engine.results(&job_id, None, 2).unwrap();
    assert_eq!(first.results.len(), 2);
    let cursor = first.next_cursor.expect("more pages");

    let second = engine.results(&job_id, Some(&cursor), 2).unwrap();
    assert_eq!(second.results.len(), 2);

    let mut seen: Vec<String> = first
        .results
        .iter()
        .chain(second.results.iter())
        .map(|r| r.url_hash.clone())
        .collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 4);

    assert_eq!(all_results(&engine, &job_id).len(), 5);
    assert!(engine.results(&job_id, Some("not-a-cursor"), 2).is_err());
}
