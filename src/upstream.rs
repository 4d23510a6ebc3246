use std::time::Duration;

use reqwest::StatusCode;

use crate::models::{ChatRequest, Model, ModelList};

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
  #[error("cannot connect to Ollama API at {url}; please ensure Ollama is running")]
  Unreachable {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("error communicating with Ollama: {0}")]
  Transport(#[source] reqwest::Error),

  #[error("Ollama API returned non-OK status ({status}): {body}")]
  Status { status: StatusCode, body: String },

  #[error("error decoding Ollama response: {0}")]
  Decode(#[source] reqwest::Error),
}

/// Client for the Ollama HTTP API. Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct OllamaClient {
  http: reqwest::Client,
  base_url: String,
}

impl OllamaClient {
  pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
    let http = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self {
      http,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/{}", self.base_url, path)
  }

  fn transport_error(&self, err: reqwest::Error) -> UpstreamError {
    if err.is_connect() {
      tracing::warn!(url = %self.base_url, "could not connect to Ollama API; is Ollama running?");
      UpstreamError::Unreachable {
        url: self.base_url.clone(),
        source: err,
      }
    } else {
      UpstreamError::Transport(err)
    }
  }

  pub async fn list_models(&self) -> Result<Vec<Model>, UpstreamError> {
    let resp = self
      .http
      .get(self.endpoint("tags"))
      .send()
      .await
      .map_err(|err| self.transport_error(err))?;
    let resp = ensure_success(resp).await?;

    let list = resp.json::<ModelList>().await.map_err(UpstreamError::Decode)?;
    Ok(list.models)
  }

  /// Starts a streaming chat exchange and hands back the open response.
  ///
  /// Only the status line and headers have been read when this returns; the
  /// caller drains the body incrementally.
  pub async fn chat(&self, req: &ChatRequest) -> Result<reqwest::Response, UpstreamError> {
    let resp = self
      .http
      .post(self.endpoint("chat"))
      .json(req)
      .send()
      .await
      .map_err(|err| self.transport_error(err))?;
    ensure_success(resp).await
  }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
  let status = resp.status();
  if status.is_success() {
    return Ok(resp);
  }
  let body = resp.text().await.unwrap_or_default();
  Err(UpstreamError::Status { status, body })
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::models::{Message, Role};
  use axum::routing::{get, post};
  use axum::{Json, Router};

  /// Serves `app` on an ephemeral port and returns the `/api` base URL.
  pub(crate) async fn spawn_backend(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api")
  }

  /// A base URL nothing is listening on.
  pub(crate) async fn dead_backend() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/api")
  }

  fn client(base_url: &str) -> OllamaClient {
    OllamaClient::new(base_url, Duration::from_secs(5)).unwrap()
  }

  fn chat_request() -> ChatRequest {
    ChatRequest {
      model: "llama3".to_string(),
      messages: vec![Message {
        role: Role::User,
        content: "hello".to_string(),
        images: vec![],
      }],
      stream: true,
      format: None,
    }
  }

  #[test]
  fn base_url_trailing_slash_is_trimmed() {
    let client = client("http://localhost:11434/api/");
    assert_eq!(client.endpoint("tags"), "http://localhost:11434/api/tags");
  }

  #[tokio::test]
  async fn list_models_decodes_tags() {
    let app = Router::new().route(
      "/api/tags",
      get(|| async {
        Json(serde_json::json!({
          "models": [
            { "name": "llama3:8b", "modified_at": "2024-05-01T10:00:00Z", "size": 10, "digest": "abc" },
            { "name": "llava:7b", "modified_at": "2024-05-02T10:00:00Z", "size": 20, "digest": "def" }
          ]
        }))
      }),
    );
    let base = spawn_backend(app).await;

    let models = client(&base).list_models().await.expect("models should load");
    let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["llama3:8b", "llava:7b"]);
  }

  #[tokio::test]
  async fn list_models_reports_refused_connection_as_unreachable() {
    let base = dead_backend().await;
    let err = client(&base).list_models().await.unwrap_err();
    assert!(matches!(err, UpstreamError::Unreachable { .. }), "got {err:?}");
    assert!(err.to_string().contains("please ensure Ollama is running"));
  }

  #[tokio::test]
  async fn list_models_reports_status_failures() {
    let app = Router::new().route(
      "/api/tags",
      get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let base = spawn_backend(app).await;

    match client(&base).list_models().await {
      Err(UpstreamError::Status { status, body }) => {
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "boom");
      }
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[tokio::test]
  async fn list_models_reports_undecodable_body() {
    let app = Router::new().route("/api/tags", get(|| async { "not json" }));
    let base = spawn_backend(app).await;

    let err = client(&base).list_models().await.unwrap_err();
    assert!(matches!(err, UpstreamError::Decode(_)), "got {err:?}");
  }

  #[tokio::test]
  async fn chat_posts_request_and_returns_open_body() {
    let app = Router::new().route(
      "/api/chat",
      post(|Json(req): Json<ChatRequest>| async move {
        let echo = serde_json::json!({ "model": req.model, "count": req.messages.len(), "stream": req.stream });
        format!("{echo}\n")
      }),
    );
    let base = spawn_backend(app).await;

    let resp = client(&base).chat(&chat_request()).await.expect("chat should start");
    let text = resp.text().await.unwrap();
    let echo: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
    assert_eq!(echo, serde_json::json!({ "model": "llama3", "count": 1, "stream": true }));
  }

  #[tokio::test]
  async fn chat_reports_backend_status() {
    let app = Router::new().route(
      "/api/chat",
      post(|| async { (axum::http::StatusCode::NOT_FOUND, r#"{"error":"model 'nope' not found"}"#) }),
    );
    let base = spawn_backend(app).await;

    let err = client(&base).chat(&chat_request()).await.unwrap_err();
    match err {
      UpstreamError::Status { status, body } => {
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("not found"));
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }
}
