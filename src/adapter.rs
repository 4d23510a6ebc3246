use axum::extract::multipart::{Field, Multipart, MultipartError};
use base64::Engine;
use bytes::Bytes;

use crate::models::{ChatRequest, Message, Role};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
  #[error("missing 'model' in form data")]
  MissingModel,

  #[error("missing 'prompt' or 'images' in form data")]
  MissingPrompt,

  #[error("invalid history format: {0}")]
  InvalidHistory(#[source] serde_json::Error),

  #[error("error parsing form data: {0}")]
  Form(#[source] MultipartError),

  #[error("error reading uploaded file {file_name}: {source}")]
  Upload {
    file_name: String,
    #[source]
    source: MultipartError,
  },
}

/// Raw fields of a `/api/chat` form, before validation.
#[derive(Debug, Clone, Default)]
pub struct ChatSubmission {
  pub model: String,
  pub prompt: String,
  pub history: Option<String>,
  pub format: Option<String>,
  /// Uploaded image files, in upload order.
  pub images: Vec<Bytes>,
}

impl ChatSubmission {
  pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, AdapterError> {
    let mut submission = Self::default();

    while let Some(field) = multipart.next_field().await.map_err(AdapterError::Form)? {
      let name = field.name().unwrap_or_default().to_string();
      match name.as_str() {
        "model" => submission.model = text(field).await?,
        "prompt" => submission.prompt = text(field).await?,
        "history" => submission.history = Some(text(field).await?),
        "format" => submission.format = Some(text(field).await?),
        "images" => {
          if let Some(data) = read_upload(field).await? {
            submission.images.push(data);
          }
        }
        _ => {}
      }
    }

    Ok(submission)
  }

  /// Validates the form and builds the upstream request: the caller's history
  /// followed by one new user message carrying the prompt and images.
  pub fn into_chat_request(self) -> Result<ChatRequest, AdapterError> {
    if self.model.trim().is_empty() {
      return Err(AdapterError::MissingModel);
    }
    if self.prompt.is_empty() && self.images.is_empty() {
      return Err(AdapterError::MissingPrompt);
    }

    let mut messages = parse_history(self.history.as_deref())?;
    messages.push(Message {
      role: Role::User,
      content: self.prompt,
      images: self.images.iter().map(|data| encode_image(data)).collect(),
    });

    Ok(ChatRequest {
      model: self.model,
      messages,
      stream: true,
      format: self.format.filter(|f| !f.trim().is_empty()),
    })
  }
}

async fn text(field: Field<'_>) -> Result<String, AdapterError> {
  field.text().await.map_err(AdapterError::Form)
}

// Parts without a file name are what browsers send for an empty file input.
async fn read_upload(field: Field<'_>) -> Result<Option<Bytes>, AdapterError> {
  let file_name = match field.file_name() {
    Some(name) if !name.is_empty() => name.to_string(),
    _ => return Ok(None),
  };
  let data = field.bytes().await.map_err(|source| AdapterError::Upload {
    file_name: file_name.clone(),
    source,
  })?;
  tracing::info!(file = %file_name, bytes = data.len(), "processed image");
  Ok(Some(data))
}

fn parse_history(history: Option<&str>) -> Result<Vec<Message>, AdapterError> {
  match history {
    Some(json) if !json.trim().is_empty() => {
      let parsed: Option<Vec<Message>> = serde_json::from_str(json).map_err(AdapterError::InvalidHistory)?;
      Ok(parsed.unwrap_or_default())
    }
    _ => Ok(Vec::new()),
  }
}

pub fn encode_image(data: &[u8]) -> String {
  base64::engine::general_purpose::STANDARD.encode(data)
}
