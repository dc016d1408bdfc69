use crate::config::{GatewayConfig, Operation};
use crate::error::ApiError;
use crate::io_struct::{
    AskReply, AskReqInput, GenerateRequest, GenerateResponse, HealthStatus, ModelList,
    OutboundEvent, PullReply, PullReqInput,
};
use crate::sanitizer::sanitize_text;
use crate::streaming::sanitized_events;
use crate::upstream::UpstreamClient;
use futures::stream::{self, LocalBoxStream, StreamExt};

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(config.upstream_config())?;
        Ok(Self::with_upstream(config, upstream))
    }

    pub fn with_upstream(config: GatewayConfig, upstream: UpstreamClient) -> Self {
        Self { config, upstream }
    }

    /// One-shot generation with the answer sanitized as a whole.
    pub async fn ask(&self, input: AskReqInput) -> Result<AskReply, ApiError> {
        let req = GenerateRequest::from_input(input, &self.config, false)?;
        let resp = self
            .upstream
            .generate(&req, self.config.timeout(Operation::Ask))
            .await?;
        log::debug!("ask answered by {}", resp.base);
        let data: GenerateResponse = resp.json().await?;
        Ok(AskReply {
            reply: sanitize_text(&data.response),
        })
    }

    /// Event stream for one streaming generation.
    ///
    /// The prompt is validated up front; connecting happens lazily once the
    /// stream is first polled, and a connect failure becomes the single
    /// `error` event of the stream.
    pub fn stream(
        &self,
        input: AskReqInput,
    ) -> Result<LocalBoxStream<'static, OutboundEvent>, ApiError> {
        let req = GenerateRequest::from_input(input, &self.config, true)?;
        let timeout = self.config.timeout(Operation::Stream);
        let upstream = self.upstream.clone();
        let connect = async move { upstream.generate(&req, timeout).await };

        let events = stream::once(connect)
            .flat_map(|result| match result {
                Ok(resp) => {
                    log::debug!("streaming from {}", resp.base);
                    sanitized_events(resp.into_byte_stream()).boxed_local()
                }
                Err(err) => {
                    log::warn!("stream connect failed: {}", err);
                    stream::iter([OutboundEvent::error(err.to_string())]).boxed_local()
                }
            })
            .boxed_local();
        Ok(events)
    }

    pub async fn health(&self) -> HealthStatus {
        let base = self.upstream.endpoints().primary;
        match self
            .upstream
            .tags(self.config.timeout(Operation::Health))
            .await
        {
            Ok(_) => HealthStatus::healthy(base),
            Err(err) => {
                log::warn!("health probe failed: {}", err);
                HealthStatus::unhealthy(base, err.reason())
            }
        }
    }

    /// Installed model names; empty on any upstream failure.
    pub async fn models(&self) -> ModelList {
        let tags = match self
            .upstream
            .tags(self.config.timeout(Operation::Models))
            .await
        {
            Ok(resp) => resp.json::<serde_json::Value>().await,
            Err(err) => Err(err),
        };
        match tags {
            Ok(tags) => ModelList::from_tags(&tags),
            Err(err) => {
                log::debug!("model listing unavailable: {}", err);
                ModelList::default()
            }
        }
    }

    pub async fn pull(&self, input: PullReqInput) -> Result<PullReply, ApiError> {
        let name = input.model_name(&self.config)?;
        log::info!("pulling model {}", name);
        self.upstream
            .pull(&name, self.config.timeout(Operation::Pull))
            .await?
            .drain()
            .await?;
        Ok(PullReply {
            ok: true,
            message: format!("Pulled {}", name),
        })
    }
}
