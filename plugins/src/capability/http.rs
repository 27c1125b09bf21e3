use std::{error::Error as StdError, fmt};

use async_trait::async_trait;
use mare_core::api::{CapabilityRequest, CapabilityResponse, ExecutionCapability, HttpCapabilityConfig};
use serde_json::Value;

use super::response_from_json;

const BODY_PREVIEW_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityHttpErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    Decode,
    Status,
    Unknown,
}

impl CapabilityHttpErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Request => "request",
            Self::Body => "body",
            Self::Decode => "decode",
            Self::Status => "status",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CapabilityHttpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct CapabilityHttpError {
    kind: CapabilityHttpErrorKind,
    status: Option<u16>,
    url: String,
    message: String,
    source: Option<anyhow::Error>,
}

impl CapabilityHttpError {
    pub fn kind(&self) -> CapabilityHttpErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        let kind = if err.is_timeout() {
            CapabilityHttpErrorKind::Timeout
        } else if err.is_connect() {
            CapabilityHttpErrorKind::Connect
        } else if err.is_request() {
            CapabilityHttpErrorKind::Request
        } else if err.is_body() {
            CapabilityHttpErrorKind::Body
        } else if err.is_decode() {
            CapabilityHttpErrorKind::Decode
        } else {
            CapabilityHttpErrorKind::Unknown
        };
        CapabilityHttpError {
            kind,
            status: err.status().map(|s| s.as_u16()),
            url: url.to_string(),
            message: err.to_string(),
            source: Some(anyhow::Error::new(err)),
        }
    }

    fn status_error(status: u16, url: &str, preview: String) -> Self {
        CapabilityHttpError {
            kind: CapabilityHttpErrorKind::Status,
            status: Some(status),
            url: url.to_string(),
            message: preview,
            source: None,
        }
    }
}

impl fmt::Display for CapabilityHttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capability http error kind={}", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " status={status}")?;
        }
        write!(f, " url={}: {}", self.url, self.message)
    }
}

impl StdError for CapabilityHttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|err| &**err as &(dyn StdError + 'static))
    }
}

fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    let mut out: String = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect();
    if trimmed.chars().count() > BODY_PREVIEW_LIMIT {
        out.push_str("...");
    }
    out
}

/// POSTs each request as JSON to a fixed endpoint.
#[derive(Clone)]
pub struct HttpCapability {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpCapability {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout_ms: u64) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(cfg: &HttpCapabilityConfig) -> anyhow::Result<Self> {
        if cfg.url.trim().is_empty() {
            anyhow::bail!("capability.url is required for the http provider");
        }
        Self::new(cfg.url.trim(), cfg.api_key.clone(), cfg.timeout_ms)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.trim().is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }
}

#[async_trait]
impl ExecutionCapability for HttpCapability {
    fn name(&self) -> &str {
        "http"
    }

    async fn run(&self, request: CapabilityRequest) -> anyhow::Result<CapabilityResponse> {
        tracing::debug!(
            url = %self.url,
            task_id = %request.task_id,
            session_id = %request.session_id,
            "capability request"
        );
        let resp = self
            .auth(self.http.post(&self.url).json(&request))
            .send()
            .await
            .map_err(|err| CapabilityHttpError::from_reqwest(err, &self.url))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| CapabilityHttpError::from_reqwest(err, &self.url))?;
        if !status.is_success() {
            return Err(CapabilityHttpError::status_error(status.as_u16(), &self.url, preview_body(&body)).into());
        }

        let structured = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| response_from_json(&v));
        tracing::debug!(status = %status, structured = structured.is_some(), "capability response");
        Ok(structured.unwrap_or_else(|| CapabilityResponse::output(body.trim())))
    }
}
