
use pipeline_monitor::*;
use serde_json::json;
use std::time::Duration;
use test_helpers::*;
use tokio::sync::watch;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// -- Probe --

#[tokio::test]
async fn test_probe_reachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pipeline/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let probe = ServerProbe::new(PipelineClient::new(server.uri()));
    assert!(!probe.is_available());
    assert!(probe.probe().await);
    assert!(probe.is_available());
}

#[tokio::test]
async fn test_probe_server_error_is_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pipeline/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let probe = ServerProbe::new(PipelineClient::new(server.uri()));
    probe.set_available(true);
    assert!(!probe.probe().await);
    assert!(!probe.is_available());
}

// -- Snapshots --

#[tokio::test]
async fn test_refresh_recomputes_summary() {
    let server = MockServer::start().await;
    mount_snapshot(
        &server,
        vec![
            job_json("a", "completed", 11),
            job_json("b", "failed", 4),
            job_json("c", "in_progress", 2),
            job_json("d", "pending", 0),
        ],
        1,
    )
    .await;

    let monitor = monitor_for(&server);
    monitor.refresh().await.unwrap();

    let view = monitor.view();
    let summary = view.snapshot.summary;
    assert_eq!(summary.total, 4);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.in_progress, 1);
    assert_eq!(summary.pending, 1);
    assert_eq!(view.stats.progress_percent, 25);
    assert_eq!(view.stats.current_job.unwrap().slug, "c");
}

#[tokio::test]
async fn test_refresh_sends_cache_buster() {
    let server = MockServer::start().await;
    mount_snapshot(&server, vec![], 1).await;

    let client = PipelineClient::new(server.uri());
    client.batch_snapshot().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].url.query_pairs().any(|(k, v)| k == "t" && !v.is_empty()));
}

#[tokio::test]
async fn test_refresh_failure_keeps_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/batch-progress.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(snapshot_json(vec![job_json("a", "pending", 0)])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/batch-progress.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    monitor.refresh().await.unwrap();
    assert!(monitor.last_error().is_none());

    let err = monitor.refresh().await.unwrap_err();
    assert!(matches!(err, MonitorError::Http { status: 500, .. }));
    assert!(monitor.last_error().is_some());
    assert!(monitor.view().job("a").is_some());
}

// -- Single commands --

#[tokio::test]
async fn test_play_is_optimistic_before_response() {
    let server = MockServer::start().await;
    mount_snapshot(&server, vec![job_json("dune", "pending", 0)], 1).await;
    Mock::given(method("POST"))
        .and(path("/api/pipeline/books/dune/play"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": "Pipeline started for dune"}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    monitor.refresh().await.unwrap();

    let commands = monitor.commands().clone();
    let pending = tokio::spawn(async move { commands.play("dune").await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let job = monitor.view().job("dune").cloned().unwrap();
    assert_eq!(job.status, JobStatus::InProgress);
    assert_eq!(job.current_phase, 1);
    assert!(job.started_at.is_some());

    let result = pending.await.unwrap();
    assert!(result.success);
    assert_eq!(result.message, "Pipeline started for dune");
    // Success keeps the optimistic state and does not refetch.
    assert_eq!(
        monitor.view().job("dune").unwrap().status,
        JobStatus::InProgress
    );
}

#[tokio::test]
async fn test_play_failure_resyncs_to_server_state() {
    let server = MockServer::start().await;
    // initial load + resync after the failure
    mount_snapshot(&server, vec![job_json("dune", "failed", 7)], 2).await;
    Mock::given(method("POST"))
        .and(path("/api/pipeline/books/dune/play"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"error": "Book must be pending"})),
        )
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    monitor.refresh().await.unwrap();

    let result = monitor.commands().play("dune").await;
    assert!(!result.success);
    assert_eq!(result.message, "Book must be pending");

    let job = monitor.view().job("dune").cloned().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_phase, 7);
}

#[tokio::test]
async fn test_unreachable_backend_reports_sentinel() {
    let server = MockServer::start().await;
    let config = MonitorConfig::builder()
        .with_endpoint("http://127.0.0.1:9")
        .with_progress_url(format!("{}/batch-progress.json", server.uri()))
        .build();
    mount_snapshot(&server, vec![job_json("dune", "pending", 0)], 2).await;

    let monitor = PipelineMonitor::new(config);
    monitor.probe().set_available(true);
    monitor.refresh().await.unwrap();

    let result = monitor.commands().pause("dune").await;
    assert!(!result.success);
    assert_eq!(result.message, "Server not available");
    assert_eq!(monitor.view().job("dune").unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn test_retry_sends_from_phase() {
    let server = MockServer::start().await;
    mount_snapshot(&server, vec![job_json("dune", "failed", 6)], 1).await;
    Mock::given(method("POST"))
        .and(path("/api/pipeline/books/dune/retry"))
        .and(body_json(json!({"from_phase": 6})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Retrying"})))
        .expect(1)
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    monitor.refresh().await.unwrap();

    let result = monitor.commands().retry("dune", 6).await;
    assert!(result.success);
    let view = monitor.view();
    let job = view.job("dune").unwrap();
    assert_eq!(job.status, JobStatus::InProgress);
    assert_eq!(job.current_phase, 6);
    assert!(job.last_error.is_none());
    assert!(!view.stats.has_failures);
}

#[tokio::test]
async fn test_remove_is_immediate() {
    let server = MockServer::start().await;
    mount_snapshot(
        &server,
        vec![job_json("a", "pending", 0), job_json("b", "failed", 3)],
        1,
    )
    .await;
    Mock::given(method("DELETE"))
        .and(path("/api/pipeline/books/b"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    monitor.refresh().await.unwrap();

    let commands = monitor.commands().clone();
    let pending = tokio::spawn(async move { commands.remove("b").await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let view = monitor.view();
    assert!(view.job("b").is_none());
    assert_eq!(view.snapshot.summary.total, 1);
    assert_eq!(view.snapshot.summary.failed, 0);

    let result = pending.await.unwrap();
    assert!(result.success);
    assert_eq!(result.message, "Removed b");
}

#[tokio::test]
async fn test_add_refetches_on_success() {
    let server = MockServer::start().await;
    mount_snapshot(&server, vec![job_json("dune", "pending", 0)], 1).await;
    Mock::given(method("POST"))
        .and(path("/api/pipeline/books"))
        .and(body_json(json!({"title": "Dune", "author": "Frank Herbert"})))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({"slug": "dune", "message": "Book added"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    let result = monitor.commands().add("Dune", "Frank Herbert", None).await;
    assert!(result.success);
    assert_eq!(result.slug.as_deref(), Some("dune"));
    assert_eq!(result.message, "Book added");
    assert!(monitor.view().job("dune").is_some());
}

#[tokio::test]
async fn test_add_validation_error_passed_through() {
    let server = MockServer::start().await;
    mount_snapshot(&server, vec![], 0).await;
    Mock::given(method("POST"))
        .and(path("/api/pipeline/books"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"detail": "Title is required"})),
        )
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    let result = monitor.commands().add("", "Someone", Some("x")).await;
    assert!(!result.success);
    assert_eq!(result.message, "Title is required");
}

// -- Bulk operations --

#[tokio::test]
async fn test_retry_all_failed_partial_failure() {
    let server = MockServer::start().await;
    // initial load + exactly one resync after the loop
    mount_snapshot(
        &server,
        vec![
            job_json("b1", "failed", 3),
            job_json("ok", "completed", 11),
            job_json("b2", "failed", 5),
            job_json("b3", "failed", 0),
        ],
        2,
    )
    .await;
    for (slug, status) in [("b1", 200), ("b2", 500), ("b3", 200)] {
        Mock::given(method("POST"))
            .and(path(format!("/api/pipeline/books/{}/retry", slug)))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;
    }

    let monitor = monitor_for(&server);
    monitor.refresh().await.unwrap();

    let result = monitor.bulk().retry_all_failed().await;
    assert_eq!(result.total, 3);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 1);
    assert!(result.success);

    let requests = server.received_requests().await.unwrap();
    let retries: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path().ends_with("/retry"))
        .collect();
    assert_eq!(retries[0].url.path(), "/api/pipeline/books/b1/retry");
    assert_eq!(retries[2].url.path(), "/api/pipeline/books/b3/retry");
    // phase 0 is clamped to 1
    let body: serde_json::Value = serde_json::from_slice(&retries[2].body).unwrap();
    assert_eq!(body["from_phase"], 1);
}

#[tokio::test]
async fn test_retry_all_failed_nothing_to_do() {
    let server = MockServer::start().await;
    mount_snapshot(&server, vec![job_json("a", "completed", 11)], 1).await;

    let monitor = monitor_for(&server);
    monitor.refresh().await.unwrap();

    let result = monitor.bulk().retry_all_failed().await;
    assert!(result.success);
    assert_eq!(result.succeeded, 0);
    assert_eq!(result.failed, 0);
    // only the initial load reached the server
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_play_all_pending_respects_limit_and_order() {
    let server = MockServer::start().await;
    let books = (1..=7)
        .map(|i| job_json(&format!("p{}", i), "pending", 0))
        .collect();
    mount_snapshot(&server, books, 2).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(20)))
        .expect(5)
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    monitor.refresh().await.unwrap();

    let result = monitor.bulk().play_all_pending().await;
    assert_eq!(result.total, 5);
    assert_eq!(result.succeeded, 5);
    assert!(result.success);

    let plays: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "POST")
        .map(|r| r.url.path().to_string())
        .collect();
    let expected: Vec<String> = (1..=5)
        .map(|i| format!("/api/pipeline/books/p{}/play", i))
        .collect();
    assert_eq!(plays, expected);
}

#[tokio::test]
async fn test_pause_all_total_failure() {
    let server = MockServer::start().await;
    mount_snapshot(
        &server,
        vec![job_json("r1", "in_progress", 2), job_json("r2", "in_progress", 9)],
        2,
    )
    .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    monitor.refresh().await.unwrap();

    let result = monitor.bulk().pause_all().await;
    assert_eq!(result.total, 2);
    assert_eq!(result.failed, 2);
    assert!(!result.success);
    // the closing resync restored the server's view
    assert_eq!(monitor.view().stats.failed_count, 0);
    assert!(monitor.view().stats.is_running);
}

// -- Polling fallback --

fn poller_for(server: &MockServer, state: ConnectionState, auto: bool) -> (Poller, watch::Sender<ConnectionState>) {
    let client = PipelineClient::new(server.uri());
    let refresher = Refresher::new(client, Synchronizer::new());
    let (tx, rx) = watch::channel(state);
    let poller = Poller::new(refresher, rx, Duration::from_millis(20), auto);
    (poller, tx)
}

#[tokio::test]
async fn test_poller_suppressed_while_stream_connected() {
    let server = MockServer::start().await;
    mount_snapshot(&server, vec![], 0).await;

    let (poller, _state) = poller_for(&server, ConnectionState::Connected, true);
    poller.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    poller.stop();
}

#[tokio::test]
async fn test_poller_runs_while_stream_down() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/batch-progress.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_json(vec![])))
        .mount(&server)
        .await;

    let (poller, state) = poller_for(&server, ConnectionState::Error, true);
    poller.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let polled = server.received_requests().await.unwrap().len();
    assert!(polled >= 2, "expected repeated polls, got {}", polled);

    state.send_replace(ConnectionState::Connected);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), settled);
    poller.stop();
    assert!(!poller.is_running());
}

#[tokio::test]
async fn test_poller_auto_refresh_toggle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/batch-progress.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_json(vec![])))
        .mount(&server)
        .await;

    let (poller, _state) = poller_for(&server, ConnectionState::Disconnected, false);
    poller.start();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(server.received_requests().await.unwrap().is_empty());

    poller.set_auto_refresh(true);
    assert!(poller.auto_refresh());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!server.received_requests().await.unwrap().is_empty());
    poller.stop();
}

// -- Event stream --

#[tokio::test]
async fn test_event_stream_applies_snapshots() {
    let server = MockServer::start().await;
    let connected = json!({"snapshot": snapshot_json(vec![job_json("a", "pending", 0)])});
    let update = snapshot_json(vec![
        job_json("a", "in_progress", 1),
        job_json("b", "pending", 0),
    ]);
    Mock::given(method("GET"))
        .and(path("/api/pipeline/events"))
        .respond_with(sse_response(&[
            ("connected", connected.to_string()),
            ("heartbeat", "{}".to_string()),
            ("update", "{broken".to_string()),
            ("update", update.to_string()),
        ]))
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    // no reconnect once the finite body ends
    monitor.probe().set_available(false);
    monitor.stream().connect();

    let stream = monitor.stream().clone();
    assert!(eventually(|| stream.state() == ConnectionState::Error).await);

    let view = monitor.view();
    assert_eq!(view.snapshot.summary.total, 2);
    assert_eq!(view.job("a").unwrap().status, JobStatus::InProgress);
    assert!(view.stats.is_running);
    assert!(!monitor.stream().reconnect_pending());
}

#[tokio::test]
async fn test_connect_twice_keeps_one_connection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pipeline/events"))
        .respond_with(sse_response(&[]).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    let stream = monitor.stream().clone();
    stream.connect();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.connect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(stream.live_connections(), 1);
    assert_eq!(stream.state(), ConnectionState::Connecting);

    stream.disconnect();
    assert!(eventually(|| stream.live_connections() == 0).await);
    assert_eq!(stream.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_stream_reconnects_when_server_available() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pipeline/events"))
        .respond_with(sse_response(&[(
            "connected",
            snapshot_json(vec![]).to_string(),
        )]))
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    monitor.stream().connect();
    tokio::time::sleep(Duration::from_millis(300)).await;
    monitor.shutdown();

    let opened = server.received_requests().await.unwrap().len();
    assert!(opened >= 2, "expected a reconnect, saw {} connection(s)", opened);
}

#[tokio::test]
async fn test_check_server_gates_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pipeline/"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/pipeline/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/pipeline/events"))
        .respond_with(sse_response(&[]).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    assert!(monitor.check_server().await);
    assert_eq!(monitor.connection_state(), ConnectionState::Connecting);

    assert!(!monitor.check_server().await);
    assert_eq!(monitor.connection_state(), ConnectionState::Disconnected);
    assert!(!monitor.server_available());
    monitor.shutdown();
}

// -- Log tail --

#[tokio::test]
async fn test_log_tail_streams_entries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pipeline/books/dune/logs/stream"))
        .and(query_param("lines", "25"))
        .respond_with(sse_response(&[
            ("connected", json!({"initial_lines": 2}).to_string()),
            (
                "log",
                json!({"timestamp": "2024-05-01T12:00:00Z", "level": "info", "phase": 1,
                       "message": "extracting text", "pages": 412})
                .to_string(),
            ),
            ("log", "not json".to_string()),
            ("state", json!({"current_phase": 2}).to_string()),
            ("error", json!({"error": "OCR worker restarted"}).to_string()),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    let tail = monitor.log_tail();
    tail.attach("dune");

    let watched = tail.clone();
    assert!(eventually(|| watched.view().status == TailStatus::Error).await);

    let view = tail.view();
    assert_eq!(view.slug.as_deref(), Some("dune"));
    assert_eq!(view.entries.len(), 3);
    assert!(view.entries[0].message.contains("2 historical lines"));
    assert_eq!(view.entries[1].message, "extracting text");
    assert_eq!(view.entries[1].extra["pages"], 412);
    assert_eq!(view.entries[2].phase, Some(2));
    assert!(!view.connected);
    assert_eq!(view.last_error.as_deref(), Some(logs::CONNECTION_LOST));

    tail.detach();
    assert_eq!(tail.entries().len(), 3);
}

#[tokio::test]
async fn test_log_tail_reattach_clears_buffer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pipeline/books/a/logs/stream"))
        .respond_with(sse_response(&[(
            "log",
            json!({"message": "from a"}).to_string(),
        )]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/pipeline/books/b/logs/stream"))
        .respond_with(sse_response(&[]).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    let tail = monitor.log_tail();
    tail.attach("a");
    let watched = tail.clone();
    assert!(eventually(|| watched.entries().len() == 1).await);

    tail.attach("b");
    let view = tail.view();
    assert!(view.entries.is_empty());
    assert_eq!(view.status, TailStatus::Connecting);
    assert_eq!(view.slug.as_deref(), Some("b"));

    tail.detach();
    tail.detach();
    assert_eq!(tail.view().status, TailStatus::Idle);
}

#[tokio::test]
async fn test_stream_update_with_null_fields_applies() {
    let server = MockServer::start().await;
    let mut pending = job_json("b", "pending", 0);
    pending["current_phase"] = serde_json::Value::Null;
    pending["next_action"] = serde_json::Value::Null;
    let update = snapshot_json(vec![job_json("a", "completed", 11), pending]);
    Mock::given(method("GET"))
        .and(path("/api/pipeline/events"))
        .respond_with(sse_response(&[("update", update.to_string())]))
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    monitor.probe().set_available(false);
    monitor.stream().connect();

    let watched = monitor.clone();
    assert!(eventually(|| watched.view().snapshot.summary.total == 2).await);
    let view = monitor.view();
    assert_eq!(view.job("b").unwrap().current_phase, 0);
    assert_eq!(view.stats.pending_count, 1);
    assert_eq!(view.stats.progress_percent, 50);
    monitor.shutdown();
}

#[tokio::test]
async fn test_failed_command_with_failed_resync() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/batch-progress.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(snapshot_json(vec![job_json("dune", "failed", 4)])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/batch-progress.json"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/pipeline/books/dune/play"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"error": "Book is failed"})))
        .mount(&server)
        .await;

    let monitor = monitor_for(&server);
    monitor.refresh().await.unwrap();

    let result = monitor.commands().play("dune").await;
    assert!(!result.success);
    assert_eq!(result.message, "Book is failed");
    assert!(monitor.last_error().unwrap().contains("502"));
}
