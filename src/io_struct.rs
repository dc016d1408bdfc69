use crate::config::GatewayConfig;
use crate::error::ApiError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const ASK_TEMPERATURE: f32 = 0.2;

/// Body of `/ask` and `/stream`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AskReqInput {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
}

/// Body sent to the upstream `/api/generate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerateOptions>,
}

impl GenerateRequest {
    /// Validates the prompt and fills in model and system defaults.
    pub fn from_input(
        input: AskReqInput,
        config: &GatewayConfig,
        stream: bool,
    ) -> Result<Self, ApiError> {
        if input.prompt.trim().is_empty() {
            return Err(ApiError::InvalidArgument("Missing prompt".to_string()));
        }
        let model = non_blank(input.model).unwrap_or_else(|| config.default_model().to_string());
        let system = non_blank(input.system).unwrap_or_else(|| config.system_prompt());
        Ok(Self {
            model,
            prompt: input.prompt,
            system: Some(system),
            stream,
            options: (!stream).then_some(GenerateOptions {
                temperature: ASK_TEMPERATURE,
            }),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Non-streaming upstream reply; only `response` is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AskReply {
    pub reply: String,
}

/// One NDJSON line of a streaming upstream reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFrame {
    pub response: Option<String>,
    pub done: bool,
}

impl StreamFrame {
    /// Returns `None` for a line that is not a JSON object. Fields of the wrong
    /// type are ignored rather than rejecting the frame.
    pub fn parse(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line).ok()?;
        let obj = value.as_object()?;
        Some(Self {
            response: obj.get("response").and_then(Value::as_str).map(str::to_string),
            done: obj.get("done").and_then(Value::as_bool) == Some(true),
        })
    }
}

/// Event sent to `/stream` clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OutboundEvent {
    Delta { delta: String },
    Done { done: bool },
    Error { error: String },
}

impl OutboundEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        OutboundEvent::Delta { delta: text.into() }
    }

    pub fn done() -> Self {
        OutboundEvent::Done { done: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutboundEvent::Error {
            error: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutboundEvent::Delta { .. })
    }

    pub fn to_json(&self) -> Value {
        match self {
            OutboundEvent::Delta { delta } => json!({ "delta": delta }),
            OutboundEvent::Done { done } => json!({ "done": done }),
            OutboundEvent::Error { error } => json!({ "error": error }),
        }
    }

    /// `data: <json>\n\n`
    pub fn to_sse(&self) -> Bytes {
        Bytes::from(format!("data: {}\n\n", self.to_json()))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HealthStatus {
    pub fn healthy(base: String) -> Self {
        Self {
            ok: true,
            base,
            reason: None,
        }
    }

    pub fn unhealthy(base: String, reason: String) -> Self {
        Self {
            ok: false,
            base,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ModelList {
    pub models: Vec<String>,
}

impl ModelList {
    /// Names from an upstream `/api/tags` reply; entries without a name are skipped.
    pub fn from_tags(tags: &Value) -> Self {
        let models = tags
            .get("models")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("name").and_then(Value::as_str))
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self { models }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PullReqInput {
    #[serde(default)]
    pub name: Option<String>,
}

impl PullReqInput {
    /// Requested model name, else the configured default.
    pub fn model_name(&self, config: &GatewayConfig) -> Result<String, ApiError> {
        let name = non_blank(self.name.clone())
            .or_else(|| non_blank(Some(config.ollama_model.clone())))
            .ok_or_else(|| ApiError::InvalidArgument("Missing model name".to_string()))?;
        Ok(name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PullReply {
    pub ok: bool,
    pub message: String,
}
