use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::adapter::AdapterError;
use crate::upstream::UpstreamError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),

  #[error("{0}")]
  InvalidHistory(String),

  #[error("{0}")]
  PayloadTooLarge(String),

  #[error("{0}")]
  UpstreamUnavailable(String),

  #[error("{0}")]
  BadGateway(String),

  #[error("{0}")]
  Upstream(String),

  #[error("{0}")]
  Internal(String),
}

impl ApiError {
  fn status_and_code(&self) -> (StatusCode, &'static str) {
    match self {
      ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
      ApiError::InvalidHistory(_) => (StatusCode::BAD_REQUEST, "invalid_history"),
      ApiError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
      ApiError::UpstreamUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable"),
      ApiError::BadGateway(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
      ApiError::Upstream(_) => (StatusCode::INTERNAL_SERVER_ERROR, "upstream_error"),
      ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
  }

  /// Mapping for `/api/models`: only an unreachable backend is a 503.
  pub fn from_model_listing(err: UpstreamError) -> Self {
    match err {
      UpstreamError::Unreachable { .. } => ApiError::UpstreamUnavailable(err.to_string()),
      _ => ApiError::Upstream("failed to fetch models from Ollama".to_string()),
    }
  }

  /// Mapping for `/api/chat`, before the event stream has started.
  pub fn from_chat(err: UpstreamError) -> Self {
    match err {
      UpstreamError::Unreachable { .. } => ApiError::UpstreamUnavailable(err.to_string()),
      UpstreamError::Transport(_) => ApiError::UpstreamUnavailable("error communicating with Ollama".to_string()),
      UpstreamError::Status { status, body } => ApiError::BadGateway(format!("Ollama error ({}): {}", status.as_u16(), body)),
      UpstreamError::Decode(_) => ApiError::Internal(err.to_string()),
    }
  }
}

impl From<AdapterError> for ApiError {
  fn from(err: AdapterError) -> Self {
    match &err {
      AdapterError::Form(source) | AdapterError::Upload { source, .. }
        if source.status() == StatusCode::PAYLOAD_TOO_LARGE =>
      {
        ApiError::PayloadTooLarge(err.to_string())
      }
      AdapterError::MissingModel | AdapterError::MissingPrompt | AdapterError::Form(_) => {
        ApiError::BadRequest(err.to_string())
      }
      AdapterError::InvalidHistory(_) => ApiError::InvalidHistory(err.to_string()),
      AdapterError::Upload { .. } => ApiError::Internal(err.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, code) = self.status_and_code();
    if status.is_server_error() {
      tracing::error!(code, error = %self, "request failed");
    } else {
      tracing::debug!(code, error = %self, "request rejected");
    }
    error_response(status, code, &self.to_string())
  }
}

pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
  let body = Json(serde_json::json!({ "error": message, "code": code }));
  (status, body).into_response()
}
