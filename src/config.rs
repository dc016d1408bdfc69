use crate::upstream::UpstreamConfig;
use clap::Parser;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const LOOPBACK_FALLBACK_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_MODEL: &str = "qwen3:32b";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly Space Math teacher for kids ages 6–10. \
Explain simply with short, clear steps using everyday words and small numbers. \
Encourage gently. \
Avoid revealing chain-of-thought; give the final answer and a brief 1–2 sentence explanation \
or a tiny hint if the student seems stuck. \
Do not give game-control instructions unless the student asks about how to play or it is \
essential to answer their question.";

const GAME_GUIDE: &str = "Context: Space Math is a game with simple controls. \
Use this only as background knowledge; do not explain controls unless the student explicitly \
asks about how to play or controls, or if a very brief cue is strictly needed to answer. \
Controls summary: + blaster adds 1 dot; − blaster removes 1; Groups blaster adds a small cluster. \
Tap the space to place dots. Double‑tap to fire two quickly. \
Color cycles blue → green → red for new dots only. Clear removes all dots. \
Missions include: Addition (make more), Subtraction (take away), Multiplication (make groups), \
Division (split into equal groups). \
Prefer concise math help over gameplay instructions.";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Upstream operations, each with its own default timeout and floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Health,
    Models,
    Ask,
    Stream,
    Pull,
}

impl Operation {
    fn default_ms(self) -> u64 {
        match self {
            Operation::Health => 5_000,
            Operation::Models => 8_000,
            Operation::Ask => 15_000,
            Operation::Stream => 60_000,
            Operation::Pull => 600_000,
        }
    }

    fn floor_ms(self) -> u64 {
        match self {
            Operation::Health | Operation::Models | Operation::Ask => 2_000,
            Operation::Stream | Operation::Pull => 5_000,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "ask-gateway")]
#[command(about = "Lesson assistant gateway - sanitized answers from a local Ollama server")]
pub struct GatewayConfig {
    /// Host address to bind the gateway
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port number to bind the gateway
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Explicit Ollama base URL; disables the loopback fallback when set
    #[arg(long, env = "OLLAMA_BASE_URL")]
    pub ollama_base_url: Option<String>,

    /// Model used when a request does not name one
    #[arg(long, env = "OLLAMA_MODEL", default_value = DEFAULT_MODEL)]
    pub ollama_model: String,

    /// Timeout override for health, models, ask and stream calls
    #[arg(long, env = "OLLAMA_TIMEOUT_MS")]
    pub ollama_timeout_ms: Option<u64>,

    /// Timeout override for model pulls
    #[arg(long, env = "OLLAMA_PULL_TIMEOUT_MS")]
    pub ollama_pull_timeout_ms: Option<u64>,

    /// Replaces the built-in system prompt
    #[arg(long, env = "OLLAMA_SYSTEM_PROMPT")]
    pub ollama_system_prompt: Option<String>,

    /// Log level
    #[arg(long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            ollama_base_url: None,
            ollama_model: DEFAULT_MODEL.to_string(),
            ollama_timeout_ms: None,
            ollama_pull_timeout_ms: None,
            ollama_system_prompt: None,
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(base) = self.base_url_override() {
            if reqwest::Url::parse(&base).is_err() {
                return Err(ConfigError::InvalidValue {
                    field: "ollama_base_url".to_string(),
                    value: base,
                    reason: "not an absolute URL".to_string(),
                });
            }
        }
        Ok(())
    }

    /// The base URL set by the operator, ignoring blank values.
    pub fn base_url_override(&self) -> Option<String> {
        self.ollama_base_url
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .map(str::to_string)
    }

    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            base_url_override: self.base_url_override(),
            ..UpstreamConfig::default()
        }
    }

    pub fn timeout(&self, op: Operation) -> Duration {
        let configured = match op {
            Operation::Pull => self.ollama_pull_timeout_ms,
            _ => self.ollama_timeout_ms,
        };
        let ms = configured
            .filter(|ms| *ms > 0)
            .unwrap_or(op.default_ms())
            .max(op.floor_ms());
        Duration::from_millis(ms)
    }

    pub fn default_model(&self) -> &str {
        match self.ollama_model.trim() {
            "" => DEFAULT_MODEL,
            model => model,
        }
    }

    pub fn system_prompt(&self) -> String {
        let prompt = self
            .ollama_system_prompt
            .as_deref()
            .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        format!("{}\n\n{}", prompt, GAME_GUIDE).trim().to_string()
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
