use std::sync::Arc;
use std::time::Duration;

use jobwatch_client::{ClientSettings, ControllerState, JobParams, JobRegistry, LaunchError};
use jobwatch_core::{JobKind, JobOutcome, LineKind};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn registry(server: &MockServer) -> JobRegistry {
    let mut settings = ClientSettings::with_base_url(server.uri());
    settings.poll_interval = Duration::from_millis(20);
    JobRegistry::new(&settings).expect("registry")
}

fn sse(frames: &[(&str, serde_json::Value)]) -> ResponseTemplate {
    let body: String = frames
        .iter()
        .map(|(name, data)| format!("event: {name}\ndata: {data}\n\n"))
        .collect();
    ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream")
}

/// A push stream that stays silent for the duration of a test.
fn silent_stream() -> ResponseTemplate {
    sse(&[]).set_delay(Duration::from_secs(10))
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn cards_job_survives_push_loss_and_finishes_by_polling() {
    jobwatch_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/cards/build"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "c-1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cards/build/stream/c-1"))
        .respond_with(sse(&[
            ("progress", json!({ "stage": "scan", "pct": 0 })),
            ("progress", json!({ "stage": "chunk", "pct": 40 })),
        ]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cards/build/status/c-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "status": "running", "pct": 45 })),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cards/build/status/c-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "status": "done", "pct": 100 })),
        )
        .mount(&server)
        .await;

    let registry = registry(&server);
    let controller = registry
        .launch(JobKind::Cards, JobParams::new())
        .await
        .expect("launch");

    let mut updates = controller.subscribe();
    let mut seen = vec![updates.borrow().view.pct];
    let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            updates.changed().await.expect("controller alive");
            let snapshot = updates.borrow_and_update().clone();
            seen.push(snapshot.view.pct);
            if snapshot.state.is_finished() {
                break snapshot;
            }
        }
    })
    .await
    .expect("job did not finish in time");

    assert!(
        seen.windows(2).all(|pair| pair[0] <= pair[1]),
        "percent went backwards: {seen:?}"
    );
    assert_eq!(snapshot.state, ControllerState::Terminal(JobOutcome::Done));
    assert_eq!(snapshot.outcome, Some(JobOutcome::Done));
    assert_eq!(controller.handle().map(|h| h.id), Some("c-1".to_string()));
    assert_eq!(snapshot.view.pct, 100.0);
    assert_eq!(snapshot.view.stage.as_deref(), Some("chunk"));
    assert_eq!(controller.line_count(LineKind::Stage), 2);
    assert_eq!(controller.line_count(LineKind::Channel), 1);
    assert_eq!(controller.line_count(LineKind::Outcome), 1);
    assert_eq!(controller.line_count(LineKind::Regression), 0);

    assert!(registry.live(JobKind::Cards).is_none());
    eventually("transport release", || {
        registry.channels().open_transports() == 0
    })
    .await;
}

#[tokio::test]
async fn relaunch_disposes_the_previous_controller() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/cards/build"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "first" })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/cards/build"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "second" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/cards/build/stream/.+$"))
        .respond_with(silent_stream())
        .mount(&server)
        .await;

    let registry = registry(&server);
    let first = registry
        .launch(JobKind::Cards, JobParams::new())
        .await
        .expect("first launch");
    let second = registry
        .launch(JobKind::Cards, JobParams::new())
        .await
        .expect("second launch");

    assert!(first.is_disposed());
    assert!(first.channel_id().is_none());
    assert_eq!(second.handle().map(|h| h.id), Some("second".to_string()));

    let live = registry.live(JobKind::Cards).expect("live controller");
    assert!(Arc::ptr_eq(&live, &second));
    eventually("one open transport", || {
        registry.channels().open_transports() == 1
    })
    .await;

    registry.dispose_all();
    assert!(second.is_disposed());
    eventually("transport release", || {
        registry.channels().open_transports() == 0
    })
    .await;
}

#[tokio::test]
async fn simultaneous_launches_cancel_the_superseded_job() {
    jobwatch_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/cards/build"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "job_id": "first" }))
                .set_delay(Duration::from_millis(200)),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/cards/build"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "second" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/cards/build/stream/.+$"))
        .respond_with(silent_stream())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/cards/build/cancel/first"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/cards/build/cancel/second"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let registry = registry(&server);
    let (first, second) = tokio::join!(
        registry.launch(JobKind::Cards, JobParams::new()),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            registry.launch(JobKind::Cards, JobParams::new()).await
        }
    );

    assert_eq!(first.err(), Some(LaunchError::Aborted));
    let second = second.expect("second launch");
    assert_eq!(second.handle().map(|h| h.id), Some("second".to_string()));
    let live = registry.live(JobKind::Cards).expect("live controller");
    assert!(Arc::ptr_eq(&live, &second));
    eventually("one open transport", || {
        registry.channels().open_transports() == 1
    })
    .await;

    server.verify().await;
    registry.dispose_all();
}

#[tokio::test]
async fn failed_launch_leaves_no_controller() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/eval/run"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "detail": "busy" })))
        .mount(&server)
        .await;

    let registry = registry(&server);
    let err = registry
        .launch(JobKind::Eval, JobParams::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LaunchError::Conflict { kind: JobKind::Eval, .. }));
    assert!(registry.live(JobKind::Eval).is_none());
    assert_eq!(registry.channels().open_transports(), 0);
}

#[tokio::test]
async fn kinds_run_side_by_side_and_cancel_independently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/cards/build"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "c-5" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/eval/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": 77 })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/(cards/build|eval)/stream/.+$"))
        .respond_with(silent_stream())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/eval/cancel/77"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry(&server);
    let cards = registry
        .launch(JobKind::Cards, JobParams::new())
        .await
        .expect("cards launch");
    let eval = registry
        .launch(JobKind::Eval, JobParams::new())
        .await
        .expect("eval launch");
    assert_eq!(eval.handle().map(|h| h.id), Some("77".to_string()));
    assert!(registry.live(JobKind::Cards).is_some());
    assert!(registry.live(JobKind::Eval).is_some());

    assert_eq!(registry.cancel(JobKind::Eval).await, Ok(true));
    assert_eq!(registry.cancel(JobKind::Eval).await, Ok(false));
    assert_eq!(eval.model().outcome(), Some(&JobOutcome::Cancelled));
    assert!(registry.live(JobKind::Eval).is_none());

    assert!(!cards.is_disposed());
    assert!(Arc::ptr_eq(
        &registry.live(JobKind::Cards).expect("cards still live"),
        &cards
    ));

    registry.dispose(JobKind::Cards);
    registry.dispose(JobKind::Cards);
    assert!(cards.is_disposed());
}
