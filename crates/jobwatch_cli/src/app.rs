use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::Context;
use jobwatch_client::{JobController, JobRegistry};
use jobwatch_core::JobOutcome;
use jobwatch_logging::{level_for_verbosity, watch_info, watch_warn};

use crate::cli::Cli;
use crate::config::FileConfig;
use crate::{logging, render};

const EXIT_FAILED: u8 = 1;
const EXIT_CANCELLED: u8 = 130;

pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = FileConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let level = level_for_verbosity(config.log_level()?, cli.verbose);
    logging::initialize(cli.log.unwrap_or(config.log.destination), level);

    let mut settings = config.client_settings();
    cli.apply_overrides(&mut settings);
    watch_info!("jobwatch starting against {}", settings.base_url);

    let registry = JobRegistry::new(&settings).context("creating the HTTP client")?;
    let controller = registry
        .launch(cli.kind, cli.job_params())
        .await
        .with_context(|| format!("launching {} job", cli.kind))?;

    let outcome = follow(&controller).await?;
    registry.dispose_all();

    eprintln!("{}", render::outcome_message(cli.kind, outcome.as_ref()));
    Ok(match outcome {
        Some(JobOutcome::Done) => ExitCode::SUCCESS,
        Some(JobOutcome::Cancelled) => ExitCode::from(EXIT_CANCELLED),
        Some(JobOutcome::Failed { .. }) | None => ExitCode::from(EXIT_FAILED),
    })
}

/// Prints log lines and redraws the status line until the job is terminal
/// or the controller disposed. The first Ctrl-C cancels the job.
async fn follow(controller: &JobController) -> anyhow::Result<Option<JobOutcome>> {
    let mut updates = controller.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut printed = 0;
    let mut highlighted = None;

    loop {
        let snapshot = updates.borrow_and_update().clone();
        if snapshot.lines > printed {
            clear_status();
            let lines = controller.lines();
            let mut stdout = io::stdout().lock();
            for line in lines.iter().skip(printed) {
                writeln!(stdout, "{}", render::format_line(line))?;
            }
            printed = lines.len();
            if snapshot.view.highlight_index.is_some() && snapshot.view.highlight_index != highlighted {
                highlighted = snapshot.view.highlight_index;
                writeln!(stdout, "  {}", render::stage_strip(&snapshot.view))?;
            }
        }
        if snapshot.state.is_finished() {
            clear_status();
            return Ok(snapshot.outcome);
        }
        draw_status(&render::status_line(snapshot.kind, &snapshot.view));

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(controller.snapshot().outcome);
                }
            }
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                signal.context("listening for Ctrl-C")?;
                clear_status();
                eprintln!("cancelling {} job...", controller.kind());
                if let Err(err) = controller.cancel().await {
                    watch_warn!("{}", err);
                    eprintln!("warning: {err}; the server may still be running the job");
                }
            }
        }
    }
}

fn draw_status(text: &str) {
    let mut stderr = io::stderr().lock();
    let _ = write!(stderr, "\r{text}\x1b[K");
    let _ = stderr.flush();
}

fn clear_status() {
    let mut stderr = io::stderr().lock();
    let _ = write!(stderr, "\r\x1b[K");
    let _ = stderr.flush();
}
