use crate::event::{ModelInfo, ProgressEvent};
use crate::view_model::{BarStyle, ProgressView};

/// Known stages in execution order. Jobs may skip stages; unknown stages are
/// still accepted but have no highlight position.
pub const STAGE_ORDER: &[&str] = &[
    "queued",
    "scan",
    "chunk",
    "summarize",
    "sparse",
    "embed",
    "enrich",
    "rerank",
    "write",
    "finalize",
];

pub fn stage_index(stage: &str) -> Option<usize> {
    STAGE_ORDER
        .iter()
        .position(|known| known.eq_ignore_ascii_case(stage))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    Failed { message: String },
    Cancelled,
}

/// A change produced by the reducer that a caller may want to log.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    StageChanged {
        from: Option<String>,
        to: String,
        index: Option<usize>,
    },
    Tip(String),
    Model(ModelInfo),
    /// An explicit `pct` below the displayed value; kept out of the model.
    PctRegressed { current: f64, incoming: f64 },
    Finished(JobOutcome),
}

/// Canonical progress for one job handle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressModel {
    stage: Option<String>,
    pct: f64,
    done: Option<u64>,
    total: Option<u64>,
    throughput: Option<String>,
    eta_s: Option<f64>,
    repo: Option<String>,
    last_tip: String,
    last_model_signature: String,
    highlight_index: Option<usize>,
    outcome: Option<JobOutcome>,
}

impl ProgressModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    pub fn pct(&self) -> f64 {
        self.pct
    }

    pub fn done(&self) -> Option<u64> {
        self.done
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn throughput(&self) -> Option<&str> {
        self.throughput.as_deref()
    }

    pub fn eta_s(&self) -> Option<f64> {
        self.eta_s
    }

    pub fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    pub fn last_tip(&self) -> &str {
        &self.last_tip
    }

    pub fn last_model_signature(&self) -> &str {
        &self.last_model_signature
    }

    pub fn highlight_index(&self) -> Option<usize> {
        self.highlight_index
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn view(&self) -> ProgressView {
        let style = match &self.outcome {
            None => BarStyle::Active,
            Some(JobOutcome::Done) => BarStyle::Done,
            Some(JobOutcome::Failed { .. }) => BarStyle::Failed,
            Some(JobOutcome::Cancelled) => BarStyle::Cancelled,
        };
        ProgressView {
            stage: self.stage.clone(),
            pct: self.pct,
            highlight_index: self.highlight_index,
            detail: self.detail(),
            tip: (!self.last_tip.is_empty()).then(|| self.last_tip.clone()),
            repo: self.repo.clone(),
            style,
        }
    }

    fn detail(&self) -> Option<String> {
        let mut parts = Vec::new();
        match (self.done, self.total) {
            (Some(done), Some(total)) => parts.push(format!("{done}/{total}")),
            (Some(done), None) => parts.push(done.to_string()),
            _ => {}
        }
        if let Some(throughput) = &self.throughput {
            parts.push(throughput.clone());
        }
        if self.outcome.is_none() {
            if let Some(eta) = self.eta_s {
                parts.push(format!("ETA {}", crate::format_eta(eta)));
            }
        }
        (!parts.is_empty()).then(|| parts.join(" · "))
    }
}

fn clamp_pct(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Pure reducer: folds one event into the model and reports what changed.
///
/// Never panics. A finished model is returned untouched.
pub fn apply(mut state: ProgressModel, event: &ProgressEvent) -> (ProgressModel, Vec<Transition>) {
    if state.is_finished() {
        return (state, Vec::new());
    }
    let mut transitions = Vec::new();

    if let Some(stage) = event.stage.as_deref() {
        if state.stage.as_deref() != Some(stage) {
            let index = stage_index(stage);
            let from = state.stage.replace(stage.to_string());
            state.highlight_index = index;
            transitions.push(Transition::StageChanged {
                from,
                to: stage.to_string(),
                index,
            });
        }
    }

    // Derived percent never reports a regression: per-stage counters restart
    // at zero on every stage.
    if let Some(explicit) = event.pct.filter(|pct| pct.is_finite()) {
        let incoming = clamp_pct(explicit);
        if incoming >= state.pct {
            state.pct = incoming;
        } else {
            transitions.push(Transition::PctRegressed {
                current: state.pct,
                incoming,
            });
        }
    } else if let Some(derived) = event.derived_percent().filter(|pct| pct.is_finite()) {
        state.pct = state.pct.max(clamp_pct(derived));
    }

    if let Some(tip) = event.tip.as_deref() {
        if tip != state.last_tip {
            state.last_tip = tip.to_string();
            transitions.push(Transition::Tip(tip.to_string()));
        }
    }

    if let Some(model) = &event.model {
        let signature = model.signature();
        if signature != state.last_model_signature {
            state.last_model_signature = signature;
            transitions.push(Transition::Model(model.clone()));
        }
    }

    if event.done.is_some() {
        state.done = event.done;
    }
    if event.total.is_some() {
        state.total = event.total;
    }
    if event.throughput.is_some() {
        state.throughput = event.throughput.clone();
    }
    if event.eta_s.is_some() {
        state.eta_s = event.eta_s;
    }
    if event.repo.is_some() {
        state.repo = event.repo.clone();
    }

    (state, transitions)
}

/// Applies an optional terminal payload, then seals the model with `outcome`.
///
/// `Done` forces the bar to 100%. Finishing twice is a no-op.
pub fn finish(
    state: ProgressModel,
    payload: Option<&ProgressEvent>,
    outcome: JobOutcome,
) -> (ProgressModel, Vec<Transition>) {
    if state.is_finished() {
        return (state, Vec::new());
    }
    let (mut state, mut transitions) = match payload {
        Some(event) => apply(state, event),
        None => (state, Vec::new()),
    };
    // Terminal payloads never log regressions.
    transitions.retain(|t| !matches!(t, Transition::PctRegressed { .. }));
    if outcome == JobOutcome::Done {
        state.pct = 100.0;
    }
    state.outcome = Some(outcome.clone());
    transitions.push(Transition::Finished(outcome));
    (state, transitions)
}
