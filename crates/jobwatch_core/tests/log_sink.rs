use std::sync::Arc;
use std::time::{Duration, Instant};

use jobwatch_core::{apply, finish, JobOutcome, LineKind, LogSink, ProgressEvent, ProgressModel};

fn sink() -> LogSink {
    LogSink::new(Duration::from_millis(2000)).with_stamp(Arc::new(|| "12:00:00".to_string()))
}

fn event(stage: Option<&str>, pct: f64) -> ProgressEvent {
    ProgressEvent {
        stage: stage.map(str::to_string),
        pct: Some(pct),
        ..ProgressEvent::default()
    }
}

#[test]
fn one_line_per_stage_transition() {
    let start = Instant::now();
    let mut log = sink();
    let mut model = ProgressModel::new();

    for (offset, ev) in [
        (0, event(Some("scan"), 0.0)),
        (10, event(Some("scan"), 5.0)),
        (20, event(Some("chunk"), 40.0)),
        (30, event(Some("chunk"), 41.0)),
    ] {
        let (next, transitions) = apply(model, &ev);
        model = next;
        log.observe(start + Duration::from_millis(offset), &model, &transitions);
    }

    assert_eq!(log.count(LineKind::Stage), 2);
    assert_eq!(log.count(LineKind::Heartbeat), 0);
    assert_eq!(log.lines()[0].text, "stage scan");
    assert_eq!(log.lines()[1].text, "stage scan -> chunk");
    assert_eq!(log.lines()[1].stamp, "12:00:00");
}

#[test]
fn heartbeat_is_rate_limited_while_stage_is_quiet() {
    let start = Instant::now();
    let mut log = sink();
    let (mut model, transitions) = apply(ProgressModel::new(), &event(Some("embed"), 1.0));
    log.observe(start, &model, &transitions);

    // One update every 250ms for 5 seconds.
    for step in 1..=20u64 {
        let (next, transitions) = apply(model, &event(None, 1.0 + step as f64));
        model = next;
        log.observe(start + Duration::from_millis(step * 250), &model, &transitions);
    }

    // Heartbeats at 2000ms and 4000ms after the stage line.
    assert_eq!(log.count(LineKind::Heartbeat), 2);
    let heartbeat = log
        .lines()
        .iter()
        .find(|line| line.kind == LineKind::Heartbeat)
        .expect("heartbeat line");
    assert_eq!(heartbeat.text, "embed 9%");
}

#[test]
fn regression_and_outcome_are_logged() {
    let now = Instant::now();
    let mut log = sink();
    let (model, transitions) = apply(ProgressModel::new(), &event(Some("write"), 80.0));
    log.observe(now, &model, &transitions);
    let (model, transitions) = apply(model, &event(None, 20.0));
    log.observe(now, &model, &transitions);
    let (model, transitions) = finish(model, None, JobOutcome::Done);
    log.observe(now, &model, &transitions);

    assert_eq!(log.count(LineKind::Regression), 1);
    assert_eq!(log.count(LineKind::Outcome), 1);
    assert_eq!(log.lines().last().map(|l| l.text.as_str()), Some("done (100%)"));
}

#[test]
fn clear_resets_lines_and_heartbeat_clock() {
    let now = Instant::now();
    let mut log = sink();
    log.record(now, LineKind::Notice, "launched");
    assert_eq!(log.last_logged(), Some(now));

    log.clear();
    assert!(log.lines().is_empty());
    assert_eq!(log.last_logged(), None);
    assert!(log.heartbeat(now, &ProgressModel::new()));
}
