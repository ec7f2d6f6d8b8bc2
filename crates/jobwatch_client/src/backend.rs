use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use jobwatch_core::JobKind;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde_json::Value;

use crate::settings::{ClientSettings, JobEndpoints, LaunchMode};
use crate::status::PollStatus;
use crate::types::{CancelError, JobParams, LaunchError, TransportError, TransportFailure};

/// Header a streaming-text start response may use to name its job.
pub const JOB_ID_HEADER: &str = "x-job-id";

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

pub enum LaunchResponse {
    Job { job_id: String },
    TextStream {
        job_id: Option<String>,
        body: ByteStream,
    },
}

impl fmt::Debug for LaunchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchResponse::Job { job_id } => f.debug_struct("Job").field("job_id", job_id).finish(),
            LaunchResponse::TextStream { job_id, .. } => f
                .debug_struct("TextStream")
                .field("job_id", job_id)
                .finish_non_exhaustive(),
        }
    }
}

/// The four backend operations every job kind exposes.
#[async_trait::async_trait]
pub trait JobBackend: Send + Sync {
    async fn start(&self, kind: JobKind, params: &JobParams) -> Result<LaunchResponse, LaunchError>;

    async fn open_stream(&self, kind: JobKind, job_id: &str) -> Result<ByteStream, TransportError>;

    async fn poll_status(&self, kind: JobKind, job_id: &str) -> Result<PollStatus, TransportError>;

    async fn cancel(&self, kind: JobKind, job_id: &str) -> Result<(), CancelError>;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: Url,
    endpoints: BTreeMap<JobKind, JobEndpoints>,
}

impl HttpBackend {
    pub fn new(settings: &ClientSettings) -> Result<Self, TransportError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|err| TransportError::new(TransportFailure::InvalidUrl, err.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| TransportError::new(TransportFailure::Network, err.to_string()))?;
        // Live streams may legitimately stay open for hours.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| TransportError::new(TransportFailure::Network, err.to_string()))?;

        Ok(Self {
            client,
            stream_client,
            base_url,
            endpoints: settings.endpoints.clone(),
        })
    }

    fn endpoints(&self, kind: JobKind) -> Result<&JobEndpoints, TransportError> {
        self.endpoints.get(&kind).ok_or_else(|| {
            TransportError::new(
                TransportFailure::NotConfigured,
                format!("no endpoints configured for {kind}"),
            )
        })
    }

    fn url(&self, path: &str, job_id: Option<&str>) -> Result<Url, TransportError> {
        let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        let mut url = Url::parse(&joined)
            .map_err(|err| TransportError::new(TransportFailure::InvalidUrl, err.to_string()))?;
        if let Some(job_id) = job_id {
            url.path_segments_mut()
                .map_err(|()| {
                    TransportError::new(TransportFailure::InvalidUrl, "base url cannot carry a path")
                })?
                .pop_if_empty()
                .push(job_id);
        }
        Ok(url)
    }

    fn scoped_url(
        &self,
        path: Option<&str>,
        kind: JobKind,
        what: &str,
        job_id: &str,
    ) -> Result<Url, TransportError> {
        let path = path.ok_or_else(|| {
            TransportError::new(
                TransportFailure::NotConfigured,
                format!("no {what} endpoint configured for {kind}"),
            )
        })?;
        self.url(path, Some(job_id))
    }
}

#[async_trait::async_trait]
impl JobBackend for HttpBackend {
    async fn start(&self, kind: JobKind, params: &JobParams) -> Result<LaunchResponse, LaunchError> {
        let endpoints = self.endpoints(kind)?;
        let mut url = self.url(&endpoints.start, None)?;
        if !params.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        let client = match endpoints.mode {
            LaunchMode::TextStream => &self.stream_client,
            LaunchMode::PushWithPollFallback => &self.client,
        };
        let mut request = client.post(url);
        if let Some(body) = &params.body {
            let bytes = serde_json::to_vec(body)
                .map_err(|err| TransportError::new(TransportFailure::Decode, err.to_string()))?;
            request = request.header(CONTENT_TYPE, "application/json").body(bytes);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(LaunchError::Conflict {
                kind,
                detail: error_detail(response).await,
            });
        }
        if !status.is_success() {
            return Err(LaunchError::HttpStatus {
                status: status.as_u16(),
                detail: error_detail(response).await,
            });
        }

        match endpoints.mode {
            LaunchMode::TextStream => {
                let job_id = response
                    .headers()
                    .get(JOB_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(ToOwned::to_owned);
                Ok(LaunchResponse::TextStream {
                    job_id,
                    body: body_stream(response),
                })
            }
            LaunchMode::PushWithPollFallback => {
                let bytes = response.bytes().await.map_err(map_reqwest_error)?;
                serde_json::from_slice::<Value>(&bytes)
                    .ok()
                    .as_ref()
                    .and_then(job_id_from)
                    .map(|job_id| LaunchResponse::Job { job_id })
                    .ok_or(LaunchError::MissingJobId)
            }
        }
    }

    async fn open_stream(&self, kind: JobKind, job_id: &str) -> Result<ByteStream, TransportError> {
        let endpoints = self.endpoints(kind)?;
        let url = self.scoped_url(endpoints.stream.as_deref(), kind, "stream", job_id)?;
        let response = self
            .stream_client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(
                TransportFailure::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }
        Ok(body_stream(response))
    }

    async fn poll_status(&self, kind: JobKind, job_id: &str) -> Result<PollStatus, TransportError> {
        let endpoints = self.endpoints(kind)?;
        let url = self.scoped_url(endpoints.status.as_deref(), kind, "status", job_id)?;
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(
                TransportFailure::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|err| TransportError::new(TransportFailure::Decode, err.to_string()))?;
        PollStatus::from_json(&value).ok_or_else(|| {
            TransportError::new(TransportFailure::Decode, "status body is not an object")
        })
    }

    async fn cancel(&self, kind: JobKind, job_id: &str) -> Result<(), CancelError> {
        let endpoints = self.endpoints(kind)?;
        if endpoints.cancel.is_none() {
            return Ok(());
        }
        let url = self.scoped_url(endpoints.cancel.as_deref(), kind, "cancel", job_id)?;
        let response = self.client.post(url).send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(
                TransportFailure::HttpStatus(status.as_u16()),
                error_detail(response).await,
            )
            .into());
        }
        Ok(())
    }
}

fn body_stream(response: reqwest::Response) -> ByteStream {
    response
        .bytes_stream()
        .map(|chunk| chunk.map_err(map_reqwest_error))
        .boxed()
}

fn job_id_from(value: &Value) -> Option<String> {
    match value.get("job_id")? {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Best human-readable reason from an error response body.
async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let bytes = response.bytes().await.unwrap_or_default();
    if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
        if let Some(detail) = value.get("detail").and_then(Value::as_str) {
            return detail.to_string();
        }
    }
    let text = String::from_utf8_lossy(&bytes).trim().to_string();
    if text.is_empty() {
        status.to_string()
    } else {
        text
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::new(TransportFailure::Timeout, err.to_string());
    }
    if err.is_decode() {
        return TransportError::new(TransportFailure::Decode, err.to_string());
    }
    TransportError::new(TransportFailure::Network, err.to_string())
}
