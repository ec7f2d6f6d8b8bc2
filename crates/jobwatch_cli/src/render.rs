use jobwatch_core::{BarStyle, JobKind, JobOutcome, LineKind, ProgressView, TerminalLine, STAGE_ORDER};

pub const BAR_WIDTH: usize = 24;

/// `[##########..............]  42%`
pub fn progress_bar(view: &ProgressView, width: usize) -> String {
    let pct = view.pct.clamp(0.0, 100.0);
    let filled = ((pct / 100.0) * width as f64).round() as usize;
    let fill = match view.style {
        BarStyle::Failed => '!',
        BarStyle::Cancelled => '-',
        BarStyle::Active | BarStyle::Done => '#',
    };
    let bar: String = std::iter::repeat(fill)
        .take(filled.min(width))
        .chain(std::iter::repeat('.').take(width.saturating_sub(filled)))
        .collect();
    format!("[{bar}] {pct:>3.0}%")
}

/// One-line summary redrawn in place while the job runs.
pub fn status_line(kind: JobKind, view: &ProgressView) -> String {
    let mut line = format!("{kind:<7} {}", progress_bar(view, BAR_WIDTH));
    if let Some(stage) = &view.stage {
        line.push(' ');
        line.push_str(stage);
    }
    if let Some(detail) = &view.detail {
        line.push_str(" | ");
        line.push_str(detail);
    }
    if let Some(repo) = &view.repo {
        line.push_str(&format!(" [{repo}]"));
    }
    line
}

/// Known stages with the current one bracketed.
pub fn stage_strip(view: &ProgressView) -> String {
    STAGE_ORDER
        .iter()
        .enumerate()
        .map(|(index, stage)| {
            if view.highlight_index == Some(index) {
                format!("[{stage}]")
            } else {
                (*stage).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" > ")
}

pub fn format_line(line: &TerminalLine) -> String {
    let marker = match line.kind {
        LineKind::Regression | LineKind::Channel => "!",
        LineKind::Outcome => "=",
        LineKind::Output => "|",
        _ => "-",
    };
    format!("{} {marker} {}", line.stamp, line.text)
}

pub fn outcome_message(kind: JobKind, outcome: Option<&JobOutcome>) -> String {
    match outcome {
        Some(JobOutcome::Done) => format!("{kind} job finished"),
        Some(JobOutcome::Failed { message }) => format!("{kind} job failed: {message}"),
        Some(JobOutcome::Cancelled) => format!("{kind} job cancelled"),
        None => format!("{kind} job stopped without an outcome"),
    }
}
