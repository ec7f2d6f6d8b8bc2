use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use jobwatch_client::{ClientSettings, JobParams};
use jobwatch_core::JobKind;

use crate::config::DEFAULT_CONFIG_FILE;
use crate::logging::LogDestination;

#[derive(Debug, Parser)]
#[command(
    name = "jobwatch",
    version,
    about = "Launch a backend job and follow it to completion"
)]
pub struct Cli {
    /// Job to launch: cards, indexer or eval
    #[arg(value_name = "KIND")]
    pub kind: JobKind,
    /// RON configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    /// Backend base URL, e.g. http://127.0.0.1:8000
    #[arg(long = "base-url")]
    pub base_url: Option<String>,
    /// Status poll interval used after the live stream drops
    #[arg(long = "poll-ms", value_name = "MILLIS")]
    pub poll_ms: Option<u64>,
    /// Query parameter for the start request; repeatable
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
    /// JSON body for the start request
    #[arg(long = "body", value_name = "JSON", value_parser = parse_body)]
    pub body: Option<serde_json::Value>,
    /// Where log records go
    #[arg(long = "log", value_enum)]
    pub log: Option<LogDestination>,
    /// More log detail; repeat for more
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn job_params(&self) -> JobParams {
        let params = self
            .params
            .iter()
            .fold(JobParams::new(), |params, (key, value)| {
                params.with_query(key.clone(), value.clone())
            });
        match &self.body {
            Some(body) => params.with_body(body.clone()),
            None => params,
        }
    }

    /// Flags win over the config file.
    pub fn apply_overrides(&self, settings: &mut ClientSettings) {
        if let Some(base_url) = &self.base_url {
            settings.base_url = base_url.clone();
        }
        if let Some(ms) = self.poll_ms {
            settings.poll_interval = Duration::from_millis(ms);
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_body(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|err| format!("invalid JSON body: {err}"))
}
