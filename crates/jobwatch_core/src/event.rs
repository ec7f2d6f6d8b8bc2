use std::fmt;

use serde_json::{Map, Value};

/// Models reported by a job; any subset may be present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelInfo {
    pub embed: Option<String>,
    pub enrich: Option<String>,
    pub rerank: Option<String>,
}

impl ModelInfo {
    /// Concatenated identity used to detect model changes.
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}",
            self.embed.as_deref().unwrap_or_default(),
            self.enrich.as_deref().unwrap_or_default(),
            self.rerank.as_deref().unwrap_or_default()
        )
    }

    pub fn is_empty(&self) -> bool {
        self.embed.is_none() && self.enrich.is_none() && self.rerank.is_none()
    }

    fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let info = ModelInfo {
            embed: string_field(object, "embed"),
            enrich: string_field(object, "enrich"),
            rerank: string_field(object, "rerank"),
        };
        (!info.is_empty()).then_some(info)
    }
}

impl fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            ("embed", &self.embed),
            ("enrich", &self.enrich),
            ("rerank", &self.rerank),
        ];
        let mut first = true;
        for (label, value) in parts {
            if let Some(value) = value {
                if !first {
                    f.write_str(" ")?;
                }
                write!(f, "{label}={value}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One progress payload as delivered by a job channel.
///
/// Every field is optional; `None` means "unchanged", never zero. Decoding
/// is lenient per field: a value of the wrong shape is dropped rather than
/// failing the whole event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressEvent {
    pub stage: Option<String>,
    pub done: Option<u64>,
    pub total: Option<u64>,
    pub pct: Option<f64>,
    pub tip: Option<String>,
    pub model: Option<ModelInfo>,
    pub throughput: Option<String>,
    pub eta_s: Option<f64>,
    pub repo: Option<String>,
}

impl ProgressEvent {
    /// Decodes an event from raw bytes. Invalid JSON yields an empty event.
    pub fn from_slice(bytes: &[u8]) -> Self {
        serde_json::from_slice::<Value>(bytes)
            .map(|value| Self::from_json(&value))
            .unwrap_or_default()
    }

    /// Decodes an event from a JSON value. Non-objects yield an empty event.
    ///
    /// `progress` is accepted as an alias for `done`, which is how status
    /// endpoints report it.
    pub fn from_json(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        Self {
            stage: string_field(object, "stage"),
            done: count_field(object, "done").or_else(|| count_field(object, "progress")),
            total: count_field(object, "total"),
            pct: number_field(object, "pct"),
            tip: string_field(object, "tip"),
            model: object.get("model").and_then(ModelInfo::from_json),
            throughput: text_field(object, "throughput"),
            eta_s: number_field(object, "eta_s").filter(|eta| *eta >= 0.0),
            repo: string_field(object, "repo"),
        }
    }

    /// Percent carried by the event: explicit `pct`, else `done / total`.
    pub fn percent(&self) -> Option<f64> {
        self.pct.or_else(|| self.derived_percent())
    }

    pub(crate) fn derived_percent(&self) -> Option<f64> {
        match (self.done, self.total) {
            (Some(done), Some(total)) if total > 0 => Some(done as f64 / total as f64 * 100.0),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Like `string_field`, but numbers are rendered as text.
fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::Number(n) => Some(n.to_string()),
        _ => string_field(object, key),
    }
}

fn number_field(object: &Map<String, Value>, key: &str) -> Option<f64> {
    let number = match object.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn count_field(object: &Map<String, Value>, key: &str) -> Option<u64> {
    if let Some(n) = object.get(key).and_then(Value::as_u64) {
        return Some(n);
    }
    let number = number_field(object, key)?;
    (number >= 0.0).then(|| number.round() as u64)
}
