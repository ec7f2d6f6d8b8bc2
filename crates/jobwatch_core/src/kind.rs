use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The families of backend jobs a client can launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Cards,
    Indexer,
    Eval,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Cards, JobKind::Indexer, JobKind::Eval];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Cards => "cards",
            JobKind::Indexer => "indexer",
            JobKind::Eval => "eval",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job kind `{0}` (expected cards, indexer or eval)")]
pub struct ParseJobKindError(pub String);

impl FromStr for JobKind {
    type Err = ParseJobKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseJobKindError(trimmed.to_string()))
    }
}
