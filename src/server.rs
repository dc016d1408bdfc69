use crate::app_state::AppState;
use crate::config::GatewayConfig;
use crate::error::ApiError;
use crate::io_struct::{AskReqInput, PullReqInput};
use actix_web::http::header;
use actix_web::{HttpResponse, HttpServer, get, post, web};
use futures::StreamExt;
use std::io::Write;

#[post("/ask")]
pub async fn ask(
    req: web::Json<AskReqInput>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let reply = app_state.ask(req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(reply))
}

#[post("/stream")]
pub async fn stream(
    req: web::Json<AskReqInput>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let events = app_state.stream(req.into_inner())?;
    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONNECTION, "keep-alive"))
        .streaming(events.map(|event| Ok::<_, actix_web::Error>(event.to_sse()))))
}

#[get("/health")]
pub async fn health(app_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(app_state.health().await)
}

#[get("/models")]
pub async fn models(app_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(app_state.models().await)
}

#[post("/pull")]
pub async fn pull(
    req: web::Json<PullReqInput>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let reply = app_state.pull(req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(reply))
}

/// Malformed request bodies are reported like any other invalid argument.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::InvalidArgument(err.to_string()).into())
}

/// Registers the `/ai` routes.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/ai")
            .service(ask)
            .service(stream)
            .service(health)
            .service(models)
            .service(pull),
    );
}

pub fn init_logging(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .try_init();
}

pub async fn startup(config: GatewayConfig) -> anyhow::Result<()> {
    init_logging(config.log_level_filter());

    let app_state = web::Data::new(AppState::new(config.clone())?);
    let endpoints = app_state.upstream.endpoints();
    log::info!(
        "Starting server at {}:{} (upstream {}{})",
        config.host,
        config.port,
        endpoints.primary,
        endpoints
            .fallback
            .as_deref()
            .map(|f| format!(", fallback {}", f))
            .unwrap_or_default()
    );

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_state.clone())
            .app_data(json_config())
            .configure(routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
