use crate::config::{DEFAULT_BASE_URL, LOOPBACK_FALLBACK_URL};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

const GENERATE_PATH: &str = "/api/generate";
const TAGS_PATH: &str = "/api/tags";
const PULL_PATH: &str = "/api/pull";
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Failed to reach Ollama at {base} (timeout)")]
    Timeout { base: String },

    #[error("Failed to reach Ollama at {base} ({reason})")]
    Network { base: String, reason: String },

    #[error("Ollama error at {base}: {status} {body}")]
    Http {
        base: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from Ollama at {base} ({reason})")]
    Decode { base: String, reason: String },
}

impl UpstreamError {
    fn from_reqwest(base: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout {
                base: base.to_string(),
            }
        } else {
            UpstreamError::Network {
                base: base.to_string(),
                reason: err.to_string(),
            }
        }
    }

    pub fn base(&self) -> &str {
        match self {
            UpstreamError::Timeout { base }
            | UpstreamError::Network { base, .. }
            | UpstreamError::Http { base, .. }
            | UpstreamError::Decode { base, .. } => base,
        }
    }

    /// Short reason suitable for health reports.
    pub fn reason(&self) -> String {
        match self {
            UpstreamError::Timeout { .. } => "timeout".to_string(),
            UpstreamError::Network { reason, .. } | UpstreamError::Decode { reason, .. } => {
                reason.clone()
            }
            UpstreamError::Http { status, .. } => format!("HTTP {}", status),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout { .. })
    }
}

/// Where generation calls go.
///
/// Without an explicit override the compiled-in default is used, and when that
/// default names `localhost` a single retry against the numeric loopback
/// address is allowed.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url_override: Option<String>,
    pub default_base_url: String,
    pub fallback_base_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url_override: None,
            default_base_url: DEFAULT_BASE_URL.to_string(),
            fallback_base_url: LOOPBACK_FALLBACK_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub primary: String,
    pub fallback: Option<String>,
}

impl UpstreamConfig {
    pub fn endpoints(&self) -> Endpoints {
        if let Some(base) = &self.base_url_override {
            return Endpoints {
                primary: normalize_base(base),
                fallback: None,
            };
        }
        let fallback = reqwest::Url::parse(self.default_base_url.trim())
            .ok()
            .filter(|url| url.host_str() == Some("localhost"))
            .map(|_| normalize_base(&self.fallback_base_url));
        Endpoints {
            primary: normalize_base(&self.default_base_url),
            fallback,
        }
    }
}

fn normalize_base(base: &str) -> String {
    let base = base.trim();
    base.strip_suffix('/').unwrap_or(base).to_string()
}

fn truncate_snippet(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body.trim().to_string()
}

#[derive(Debug, Serialize)]
struct PullBody<'a> {
    name: &'a str,
}

/// A successful (2xx) upstream response together with the endpoint that
/// produced it and the request deadline that still governs its body.
pub struct UpstreamResponse {
    pub base: String,
    pub response: reqwest::Response,
    pub deadline: Instant,
}

impl UpstreamResponse {
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, UpstreamError> {
        let base = self.base;
        let body = match timeout_at(self.deadline, self.response.bytes()).await {
            Err(_) => return Err(UpstreamError::Timeout { base }),
            Ok(body) => body.map_err(|e| UpstreamError::from_reqwest(&base, e))?,
        };
        serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode {
            base,
            reason: e.to_string(),
        })
    }

    /// Reads and discards the body.
    pub async fn drain(self) -> Result<(), UpstreamError> {
        let mut body = self.into_byte_stream();
        while let Some(chunk) = body.next().await {
            chunk?;
        }
        Ok(())
    }

    /// Body chunks, each read bounded by the request deadline. The stream ends
    /// after the first error.
    pub fn into_byte_stream(self) -> BoxStream<'static, Result<Bytes, UpstreamError>> {
        let UpstreamResponse {
            base,
            response,
            deadline,
        } = self;
        let body = response.bytes_stream().boxed();
        futures_util::stream::unfold(Some((body, base)), move |state| async move {
            let (mut body, base) = state?;
            match timeout_at(deadline, body.next()).await {
                Err(_) => Some((Err(UpstreamError::Timeout { base }), None)),
                Ok(None) => None,
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some((body, base)))),
                Ok(Some(Err(e))) => Some((Err(UpstreamError::from_reqwest(&base, e)), None)),
            }
        })
        .boxed()
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, config })
    }

    pub fn endpoints(&self) -> Endpoints {
        self.config.endpoints()
    }

    /// POST /api/generate. Fallback-eligible.
    pub async fn generate<B: Serialize + ?Sized>(
        &self,
        body: &B,
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let deadline = Instant::now() + timeout;
        self.dispatch(Method::POST, GENERATE_PATH, Some(body), deadline, true)
            .await
    }

    /// GET /api/tags, used for health probes and model listing. Fallback-eligible.
    pub async fn tags(&self, timeout: Duration) -> Result<UpstreamResponse, UpstreamError> {
        let deadline = Instant::now() + timeout;
        self.dispatch::<()>(Method::GET, TAGS_PATH, None, deadline, true)
            .await
    }

    /// POST /api/pull. Never retried against the fallback.
    pub async fn pull(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let deadline = Instant::now() + timeout;
        self.dispatch(Method::POST, PULL_PATH, Some(&PullBody { name }), deadline, false)
            .await
    }

    async fn dispatch<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        deadline: Instant,
        allow_fallback: bool,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let endpoints = self.config.endpoints();
        let first = self
            .send_once(method.clone(), &endpoints.primary, path, body, deadline)
            .await;

        let fallback = match endpoints.fallback {
            Some(fallback) if allow_fallback => fallback,
            _ => return Self::check_status(endpoints.primary, first?, deadline).await,
        };

        match first {
            Ok(resp) if resp.status().is_success() => {
                return Self::check_status(endpoints.primary, resp, deadline).await;
            }
            Ok(resp) => {
                log::warn!(
                    "{} returned {} for {}, retrying via {}",
                    endpoints.primary,
                    resp.status(),
                    path,
                    fallback
                );
            }
            Err(e) if e.is_timeout() => return Err(e),
            Err(e) => {
                log::warn!("{}, retrying via {}", e, fallback);
            }
        }

        let second = self
            .send_once(method, &fallback, path, body, deadline)
            .await?;
        Self::check_status(fallback, second, deadline).await
    }

    async fn send_once<B: Serialize + ?Sized>(
        &self,
        method: Method,
        base: &str,
        path: &str,
        body: Option<&B>,
        deadline: Instant,
    ) -> Result<reqwest::Response, UpstreamError> {
        let url = format!("{}{}", base, path);
        log::debug!("{} {}", method, url);
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        match timeout_at(deadline, request.send()).await {
            Err(_) => Err(UpstreamError::Timeout {
                base: base.to_string(),
            }),
            Ok(resp) => resp.map_err(|e| UpstreamError::from_reqwest(base, e)),
        }
    }

    async fn check_status(
        base: String,
        response: reqwest::Response,
        deadline: Instant,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let status = response.status();
        if status.is_success() {
            return Ok(UpstreamResponse {
                base,
                response,
                deadline,
            });
        }
        let body = match timeout_at(deadline, response.text()).await {
            Ok(Ok(text)) => truncate_snippet(text),
            _ => String::new(),
        };
        Err(UpstreamError::Http {
            base,
            status: status.as_u16(),
            body,
        })
    }
}
