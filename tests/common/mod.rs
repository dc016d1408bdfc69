#![allow(dead_code)]

use actix_web::web;
use ask_gateway::config::GatewayConfig;
use ask_gateway::io_struct::OutboundEvent;
use ask_gateway::upstream::{UpstreamClient, UpstreamConfig};
use ask_gateway::AppState;

/// App state whose upstream is pinned to `base` (an explicit override, so no
/// loopback fallback is attempted).
pub fn state_with_override(base: &str) -> web::Data<AppState> {
    let config = GatewayConfig {
        ollama_base_url: Some(base.to_string()),
        ..Default::default()
    };
    web::Data::new(AppState::new(config).unwrap())
}

/// App state using the built-in default resolution, with the default and
/// fallback bases pointed at test servers.
pub fn state_with_default_bases(default_base: &str, fallback_base: &str) -> web::Data<AppState> {
    let upstream = UpstreamClient::new(UpstreamConfig {
        base_url_override: None,
        default_base_url: default_base.to_string(),
        fallback_base_url: fallback_base.to_string(),
    })
    .unwrap();
    web::Data::new(AppState::with_upstream(GatewayConfig::default(), upstream))
}

/// mockito binds 127.0.0.1; the same server under the `localhost` alias.
pub fn localhost_url(server: &mockito::Server) -> String {
    server.url().replace("127.0.0.1", "localhost")
}

pub fn ndjson(frames: &[serde_json::Value]) -> String {
    frames
        .iter()
        .map(|frame| format!("{}\n", frame))
        .collect()
}

pub fn parse_sse(body: &[u8]) -> Vec<OutboundEvent> {
    std::str::from_utf8(body)
        .unwrap()
        .split("\n\n")
        .filter(|event| !event.is_empty())
        .map(|event| {
            let data = event.strip_prefix("data: ").expect("event has a data field");
            serde_json::from_str(data).unwrap()
        })
        .collect()
}
