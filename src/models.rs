use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Model {
  pub name: String,
  pub modified_at: DateTime<FixedOffset>,
  pub size: u64,
  pub digest: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelList {
  pub models: Vec<Model>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  System,
  User,
  Assistant,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
  pub role: Role,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub content: String,
  /// Base64 encoded image payloads, in upload order.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub images: Vec<String>,
}

/// Payload for the backend `/chat` endpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatRequest {
  pub model: String,
  pub messages: Vec<Message>,
  pub stream: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub format: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Typed view of one line of a streamed `/chat` response.
///
/// The relay forwards lines without this view; it is only decoded from the
/// final chunk to log its statistics. Every field is optional so that nulls
/// and unknown roles never fail the decode.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
#[allow(dead_code)]
pub struct StreamChunk {
  pub model: Option<String>,
  pub created_at: Option<String>,
  pub message: Option<ChunkMessage>,
  pub done: Option<bool>,
  pub done_reason: Option<String>,
  pub error: Option<String>,
  pub total_duration: Option<u64>,
  pub load_duration: Option<u64>,
  pub prompt_eval_count: Option<u64>,
  pub prompt_eval_duration: Option<u64>,
  pub eval_count: Option<u64>,
  pub eval_duration: Option<u64>,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
#[allow(dead_code)]
pub struct ChunkMessage {
  pub role: Option<String>,
  pub content: Option<String>,
}
