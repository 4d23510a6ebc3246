use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8085";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434/api";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
  pub listen_addr: String,
  /// Base URL of the Ollama API, including the `/api` prefix.
  pub ollama_url: String,
  /// Upper bound for a whole upstream exchange, stream included.
  pub request_timeout_secs: u64,
  pub max_form_bytes: usize,
  /// Directory holding an `index.html` that replaces the built-in page.
  pub templates_dir: Option<PathBuf>,
  pub log_file: Option<PathBuf>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
      ollama_url: DEFAULT_OLLAMA_URL.to_string(),
      request_timeout_secs: 30 * 60,
      max_form_bytes: 32 << 20,
      templates_dir: None,
      log_file: None,
    }
  }
}

impl AppConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn validate(&self) -> anyhow::Result<()> {
    let url = self.ollama_url.trim();
    if url.is_empty() {
      bail!("ollama_url must not be empty");
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
      bail!("ollama_url must be an http(s) URL, got {url}");
    }
    if self.listen_addr.trim().is_empty() {
      bail!("listen_addr must not be empty");
    }
    if self.request_timeout_secs == 0 {
      bail!("request_timeout_secs must be greater than zero");
    }
    if self.max_form_bytes == 0 {
      bail!("max_form_bytes must be greater than zero");
    }
    Ok(())
  }
}

pub fn load_or_init(path: &Path) -> anyhow::Result<AppConfig> {
  if path.exists() {
    let data = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&data)?;
    Ok(config)
  } else {
    let config = AppConfig::default();
    save_config(path, &config)?;
    Ok(config)
  }
}

pub fn save_config(path: &Path, config: &AppConfig) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(config)?;
  std::fs::write(path, json)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ollama-relay-{}-{name}", std::process::id()))
  }

  #[test]
  fn default_config_is_valid() {
    let config = AppConfig::default();
    config.validate().expect("defaults should validate");
    assert_eq!(config.request_timeout(), Duration::from_secs(1800));
    assert_eq!(config.max_form_bytes, 32 * 1024 * 1024);
  }

  #[test]
  fn validate_rejects_non_http_backend() {
    let config = AppConfig {
      ollama_url: "localhost:11434".to_string(),
      ..AppConfig::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn validate_rejects_zero_timeout() {
    let config = AppConfig {
      request_timeout_secs: 0,
      ..AppConfig::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn partial_file_falls_back_to_defaults() {
    let config: AppConfig = serde_json::from_str(r#"{"ollama_url":"http://gpu-box:11434/api"}"#).unwrap();
    assert_eq!(config.ollama_url, "http://gpu-box:11434/api");
    assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
  }

  #[test]
  fn load_or_init_writes_defaults_then_reads_them_back() {
    let path = temp_path("config.json");
    let _ = std::fs::remove_file(&path);

    let created = load_or_init(&path).expect("init should succeed");
    assert!(path.exists());
    let loaded = load_or_init(&path).expect("reload should succeed");
    assert_eq!(created, loaded);

    let _ = std::fs::remove_file(&path);
  }
}
