mod common;

use actix_web::{App, http::StatusCode, test as actix_test};
use ask_gateway::io_struct::OutboundEvent;
use ask_gateway::server;
use common::{localhost_url, ndjson, parse_sse, state_with_default_bases, state_with_override};
use mockito::Matcher;
use serde_json::json;

fn deltas(events: &[OutboundEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::Delta { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}

#[actix_web::test]
async fn test_stream_sanitizes_reasoning_across_frames() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({
            "model": "qwen3:32b",
            "prompt": "What is 5 + 6?",
            "stream": true
        })))
        .with_status(200)
        .with_header("content-type", "application/x-ndjson")
        .with_body(ndjson(&[
            json!({"response": "<thi", "done": false}),
            json!({"response": "nk>count on fingers</th", "done": false}),
            json!({"response": "ink>Five plus six ", "done": false}),
            json!({"response": "is 11!", "done": false}),
            json!({"response": "", "done": true}),
        ]))
        .expect(1)
        .create_async()
        .await;

    let app = actix_test::init_service(
        App::new()
            .app_data(state_with_override(&upstream.url()))
            .app_data(server::json_config())
            .configure(server::routes),
    )
    .await;

    let req = actix_test::TestRequest::post()
        .uri("/ai/stream")
        .set_json(json!({"prompt": "What is 5 + 6?"}))
        .to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-cache");

    let body = actix_test::read_body(resp).await;
    let events = parse_sse(&body);
    assert_eq!(deltas(&events), "Five plus six is 11!");
    assert_eq!(events.last(), Some(&OutboundEvent::done()));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(
        events
            .iter()
            .all(|e| !matches!(e, OutboundEvent::Delta { delta } if delta.is_empty()))
    );
    mock.assert_async().await;
}

#[actix_web::test]
async fn test_stream_fenced_reasoning_and_labels() {
    let mut upstream = mockito::Server::new_async().await;
    upstream
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(ndjson(&[
            json!({"response": "Reasoning: let me ", "done": false}),
            json!({"response": "think\n```think\nscratch\n``", "done": false}),
            json!({"response": "`The answer is 9.", "done": false}),
            json!({"done": true}),
        ]))
        .create_async()
        .await;

    let app = actix_test::init_service(
        App::new()
            .app_data(state_with_override(&upstream.url()))
            .configure(server::routes),
    )
    .await;

    let req = actix_test::TestRequest::post()
        .uri("/ai/stream")
        .set_json(json!({"prompt": "3 * 3?"}))
        .to_request();
    let body = actix_test::call_and_read_body(&app, req).await;
    let events = parse_sse(&body);
    assert_eq!(deltas(&events), "The answer is 9.");
    assert_eq!(events.last(), Some(&OutboundEvent::done()));
}

#[actix_web::test]
async fn test_stream_stops_at_done_frame() {
    let mut upstream = mockito::Server::new_async().await;
    upstream
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(ndjson(&[
            json!({"response": "Ten", "done": false}),
            json!({"response": "", "done": true}),
            json!({"response": " and more", "done": false}),
        ]))
        .create_async()
        .await;

    let app = actix_test::init_service(
        App::new()
            .app_data(state_with_override(&upstream.url()))
            .configure(server::routes),
    )
    .await;

    let req = actix_test::TestRequest::post()
        .uri("/ai/stream")
        .set_json(json!({"prompt": "5 + 5?"}))
        .to_request();
    let body = actix_test::call_and_read_body(&app, req).await;
    let events = parse_sse(&body);
    assert_eq!(
        events,
        vec![OutboundEvent::delta("Ten"), OutboundEvent::done()]
    );
}

#[actix_web::test]
async fn test_stream_upstream_error_is_single_error_event() {
    let mut upstream = mockito::Server::new_async().await;
    upstream
        .mock("POST", "/api/generate")
        .with_status(500)
        .with_body("out of memory")
        .create_async()
        .await;

    let app = actix_test::init_service(
        App::new()
            .app_data(state_with_override(&upstream.url()))
            .configure(server::routes),
    )
    .await;

    let req = actix_test::TestRequest::post()
        .uri("/ai/stream")
        .set_json(json!({"prompt": "hello"}))
        .to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = actix_test::read_body(resp).await;
    let events = parse_sse(&body);
    assert_eq!(
        events,
        vec![OutboundEvent::error(format!(
            "Ollama error at {}: 500 out of memory",
            upstream.url()
        ))]
    );
}

#[actix_web::test]
async fn test_stream_unreachable_upstream() {
    let app = actix_test::init_service(
        App::new()
            .app_data(state_with_override("http://127.0.0.1:1"))
            .configure(server::routes),
    )
    .await;

    let req = actix_test::TestRequest::post()
        .uri("/ai/stream")
        .set_json(json!({"prompt": "hello"}))
        .to_request();
    let body = actix_test::call_and_read_body(&app, req).await;
    let events = parse_sse(&body);
    assert_eq!(events.len(), 1);
    match &events[0] {
        OutboundEvent::Error { error } => {
            assert!(error.starts_with("Failed to reach Ollama at http://127.0.0.1:1"))
        }
        other => panic!("expected error event, got {:?}", other),
    }
}

#[actix_web::test]
async fn test_stream_falls_back_to_numeric_loopback() {
    let mut primary = mockito::Server::new_async().await;
    let mut fallback = mockito::Server::new_async().await;
    let primary_mock = primary
        .mock("POST", "/api/generate")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let fallback_mock = fallback
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(ndjson(&[
            json!({"response": "Twenty", "done": false}),
            json!({"done": true}),
        ]))
        .expect(1)
        .create_async()
        .await;

    let app = actix_test::init_service(
        App::new()
            .app_data(state_with_default_bases(
                &localhost_url(&primary),
                &fallback.url(),
            ))
            .configure(server::routes),
    )
    .await;

    let req = actix_test::TestRequest::post()
        .uri("/ai/stream")
        .set_json(json!({"prompt": "4 * 5?"}))
        .to_request();
    let body = actix_test::call_and_read_body(&app, req).await;
    assert_eq!(
        parse_sse(&body),
        vec![OutboundEvent::delta("Twenty"), OutboundEvent::done()]
    );

    primary_mock.assert_async().await;
    fallback_mock.assert_async().await;
}

#[actix_web::test]
async fn test_stream_without_done_frame_completes() {
    let mut upstream = mockito::Server::new_async().await;
    upstream
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body("{\"response\":\"Eight\"}\nnot json\n{\"response\":\"!\"}")
        .create_async()
        .await;

    let app = actix_test::init_service(
        App::new()
            .app_data(state_with_override(&upstream.url()))
            .configure(server::routes),
    )
    .await;

    let req = actix_test::TestRequest::post()
        .uri("/ai/stream")
        .set_json(json!({"prompt": "2 * 4?"}))
        .to_request();
    let body = actix_test::call_and_read_body(&app, req).await;
    let events = parse_sse(&body);
    assert_eq!(deltas(&events), "Eight!");
    assert_eq!(events.last(), Some(&OutboundEvent::done()));
}
