use jobwatch_core::{
    apply, finish, BarStyle, JobOutcome, ModelInfo, ProgressEvent, ProgressModel, Transition,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    jobwatch_logging::initialize_for_tests();
}

fn pct(value: f64) -> ProgressEvent {
    ProgressEvent {
        pct: Some(value),
        ..ProgressEvent::default()
    }
}

fn stage(name: &str, value: f64) -> ProgressEvent {
    ProgressEvent {
        stage: Some(name.to_string()),
        pct: Some(value),
        ..ProgressEvent::default()
    }
}

#[test]
fn displayed_pct_never_decreases() {
    init_logging();
    let events = [
        pct(10.0),
        pct(35.0),
        pct(20.0),
        ProgressEvent::default(),
        pct(35.0),
        pct(250.0),
        pct(-4.0),
        pct(f64::NAN),
    ];

    let mut model = ProgressModel::new();
    let mut previous = model.pct();
    for event in &events {
        let (next, _) = apply(model, event);
        assert!(next.pct() >= previous, "{} < {previous}", next.pct());
        previous = next.pct();
        model = next;
    }
    assert_eq!(model.pct(), 100.0);
}

#[test]
fn regression_is_reported_but_not_applied() {
    let (model, _) = apply(ProgressModel::new(), &pct(60.0));
    let (model, transitions) = apply(model, &pct(12.5));

    assert_eq!(model.pct(), 60.0);
    assert_eq!(
        transitions,
        vec![Transition::PctRegressed {
            current: 60.0,
            incoming: 12.5
        }]
    );
}

#[test]
fn derived_percent_is_used_without_reporting_regressions() {
    let event = ProgressEvent {
        done: Some(30),
        total: Some(60),
        ..ProgressEvent::default()
    };
    let (model, transitions) = apply(ProgressModel::new(), &event);
    assert_eq!(model.pct(), 50.0);
    assert!(transitions.is_empty());

    // A new stage restarting its counters must not pull the bar back.
    let restart = ProgressEvent {
        stage: Some("embed".into()),
        done: Some(1),
        total: Some(60),
        ..ProgressEvent::default()
    };
    let (model, transitions) = apply(model, &restart);
    assert_eq!(model.pct(), 50.0);
    assert_eq!(transitions.len(), 1);
    assert!(matches!(transitions[0], Transition::StageChanged { .. }));
}

#[test]
fn stage_transition_updates_highlight_index() {
    let (model, transitions) = apply(ProgressModel::new(), &stage("scan", 0.0));
    assert_eq!(model.stage(), Some("scan"));
    assert_eq!(model.highlight_index(), Some(1));
    assert_eq!(
        transitions,
        vec![Transition::StageChanged {
            from: None,
            to: "scan".into(),
            index: Some(1),
        }]
    );

    let (model, transitions) = apply(model, &stage("scan", 5.0));
    assert!(transitions.is_empty());
    assert_eq!(model.pct(), 5.0);

    let (model, transitions) = apply(model, &stage("mystery", 6.0));
    assert_eq!(model.highlight_index(), None);
    assert_eq!(
        transitions,
        vec![Transition::StageChanged {
            from: Some("scan".into()),
            to: "mystery".into(),
            index: None,
        }]
    );
}

#[test]
fn absent_fields_keep_previous_state() {
    let full = ProgressEvent {
        stage: Some("chunk".into()),
        done: Some(4),
        total: Some(8),
        pct: Some(50.0),
        tip: Some("splitting markdown".into()),
        throughput: Some("12 files/s".into()),
        eta_s: Some(30.0),
        repo: Some("acme/widgets".into()),
        model: None,
    };
    let (model, _) = apply(ProgressModel::new(), &full);
    let (model, transitions) = apply(model, &ProgressEvent::default());

    assert!(transitions.is_empty());
    assert_eq!(model.stage(), Some("chunk"));
    assert_eq!(model.done(), Some(4));
    assert_eq!(model.total(), Some(8));
    assert_eq!(model.pct(), 50.0);
    assert_eq!(model.last_tip(), "splitting markdown");
    assert_eq!(model.throughput(), Some("12 files/s"));
    assert_eq!(model.eta_s(), Some(30.0));
    assert_eq!(model.repo(), Some("acme/widgets"));
}

#[test]
fn tip_and_model_repeats_are_not_transitions() {
    let models = ModelInfo {
        embed: Some("bge-small".into()),
        enrich: None,
        rerank: Some("ms-marco".into()),
    };
    let event = ProgressEvent {
        tip: Some("warming up".into()),
        model: Some(models.clone()),
        ..ProgressEvent::default()
    };

    let (model, first) = apply(ProgressModel::new(), &event);
    assert_eq!(
        first,
        vec![
            Transition::Tip("warming up".into()),
            Transition::Model(models.clone())
        ]
    );
    assert_eq!(model.last_model_signature(), models.signature());

    let (_, second) = apply(model, &event);
    assert!(second.is_empty());
}

#[test]
fn finish_done_forces_full_bar_and_seals_model() {
    let (model, _) = apply(ProgressModel::new(), &stage("chunk", 40.0));
    let (model, transitions) = finish(model, None, JobOutcome::Done);

    assert_eq!(model.pct(), 100.0);
    assert_eq!(model.outcome(), Some(&JobOutcome::Done));
    assert_eq!(transitions, vec![Transition::Finished(JobOutcome::Done)]);

    let (after, transitions) = apply(model.clone(), &stage("late", 5.0));
    assert!(transitions.is_empty());
    assert_eq!(after, model);

    let (again, transitions) = finish(after, None, JobOutcome::Cancelled);
    assert!(transitions.is_empty());
    assert_eq!(again.outcome(), Some(&JobOutcome::Done));
}

#[test]
fn failed_outcome_keeps_pct_and_styles_bar() {
    let (model, _) = apply(ProgressModel::new(), &stage("embed", 70.0));
    let outcome = JobOutcome::Failed {
        message: "out of memory".into(),
    };
    let (model, _) = finish(model, Some(&pct(10.0)), outcome.clone());

    assert_eq!(model.pct(), 70.0);
    let view = model.view();
    assert_eq!(view.style, BarStyle::Failed);
    assert_eq!(view.stage.as_deref(), Some("embed"));
    assert_eq!(view.pct, 70.0);
}

#[test]
fn view_detail_lists_known_parts() {
    let event = ProgressEvent {
        done: Some(12),
        total: Some(48),
        throughput: Some("3.1 docs/s".into()),
        eta_s: Some(125.0),
        ..ProgressEvent::default()
    };
    let (model, _) = apply(ProgressModel::new(), &event);
    assert_eq!(
        model.view().detail.as_deref(),
        Some("12/48 · 3.1 docs/s · ETA 2m 05s")
    );
    assert_eq!(model.view().style, BarStyle::Active);
}
