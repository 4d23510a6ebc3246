use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::adapter::ChatSubmission;
use crate::error::ApiError;
use crate::models::Model;
use crate::relay::{relay, ChannelSink};
use crate::upstream::OllamaClient;

pub struct RouterState {
  pub started_at: Instant,
  pub ollama: OllamaClient,
  pub index_page: String,
  pub max_form_bytes: usize,
}

pub fn build_router(state: RouterState) -> Router {
  let max_form_bytes = state.max_form_bytes;
  Router::new()
    .route("/", get(index))
    .route("/health", get(health))
    .route("/api/models", get(models))
    .route("/api/chat", post(chat))
    .layer(DefaultBodyLimit::max(max_form_bytes))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    .with_state(Arc::new(state))
}

pub async fn run_router(listener: TcpListener, state: RouterState) -> anyhow::Result<()> {
  let app = build_router(state);
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => tracing::info!("shutdown requested"),
    Err(err) => {
      tracing::error!(error = %err, "cannot listen for ctrl-c; graceful shutdown disabled");
      std::future::pending::<()>().await;
    }
  }
}

async fn index(State(state): State<Arc<RouterState>>) -> Html<String> {
  Html(state.index_page.clone())
}

async fn health(State(state): State<Arc<RouterState>>) -> Json<serde_json::Value> {
  let uptime = state.started_at.elapsed().as_millis();
  Json(serde_json::json!({
    "status": "ok",
    "version": env!("CARGO_PKG_VERSION"),
    "uptime_ms": uptime,
    "backend": state.ollama.base_url()
  }))
}

async fn models(State(state): State<Arc<RouterState>>) -> Result<Json<Vec<Model>>, ApiError> {
  let models = state.ollama.list_models().await.map_err(|err| {
    tracing::warn!(error = %err, "error getting Ollama models");
    ApiError::from_model_listing(err)
  })?;
  Ok(Json(models))
}

async fn chat(
  State(state): State<Arc<RouterState>>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
  let multipart = multipart.map_err(|rej| ApiError::BadRequest(format!("error parsing form data: {}", rej.body_text())))?;
  let req = ChatSubmission::from_multipart(multipart).await?.into_chat_request()?;
  let model = req.model.clone();

  tracing::info!(model = %model, messages = req.messages.len(), "sending request to Ollama (streaming)");
  let upstream = state.ollama.chat(&req).await.map_err(ApiError::from_chat)?;

  // Capacity 1: the relay reads the next upstream line only once the body has taken the last frame.
  let (tx, rx) = mpsc::channel::<Bytes>(1);
  tokio::spawn(async move {
    let mut sink = ChannelSink::new(tx);
    let report = relay(upstream.bytes_stream(), &mut sink).await;
    report.log(&model);
  });

  let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
  let headers = [
    (header::CONTENT_TYPE, "text/event-stream"),
    (header::CACHE_CONTROL, "no-cache"),
    (header::CONNECTION, "keep-alive"),
  ];
  Ok((headers, body).into_response())
}
