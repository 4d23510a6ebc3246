mod adapter;
mod config;
mod error;
mod logger;
mod models;
mod page;
mod relay;
mod router;
mod upstream;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;

use config::{load_or_init, AppConfig};
use router::{run_router, RouterState};
use upstream::OllamaClient;

#[derive(Debug, Parser)]
#[command(name = "ollama-relay", about = "Web chat front end for a local Ollama server")]
struct Args {
  /// JSON config file; created with defaults when missing.
  #[arg(long, env = "RELAY_CONFIG")]
  config: Option<PathBuf>,

  #[arg(long, env = "RELAY_LISTEN_ADDR")]
  listen: Option<String>,

  /// Ollama API base URL, e.g. http://localhost:11434/api
  #[arg(long, env = "OLLAMA_API_URL")]
  ollama_url: Option<String>,

  /// Directory containing an index.html to serve instead of the built-in page.
  #[arg(long, env = "RELAY_TEMPLATES_DIR")]
  templates_dir: Option<PathBuf>,

  #[arg(long, env = "RELAY_LOG_FILE")]
  log_file: Option<PathBuf>,
}

impl Args {
  fn into_config(self) -> anyhow::Result<AppConfig> {
    let mut config = match &self.config {
      Some(path) => load_or_init(path).with_context(|| format!("loading config {}", path.display()))?,
      None => AppConfig::default(),
    };
    if let Some(listen) = self.listen {
      config.listen_addr = listen;
    }
    if let Some(url) = self.ollama_url {
      config.ollama_url = url;
    }
    if let Some(dir) = self.templates_dir {
      config.templates_dir = Some(dir);
    }
    if let Some(file) = self.log_file {
      config.log_file = Some(file);
    }
    config.validate()?;
    Ok(config)
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = Args::parse().into_config()?;
  logger::init(config.log_file.as_deref())?;

  let index_page = page::load_index(config.templates_dir.as_deref())?;
  let ollama = OllamaClient::new(&config.ollama_url, config.request_timeout())?;

  let listener = tokio::net::TcpListener::bind(&config.listen_addr)
    .await
    .with_context(|| format!("could not listen on {}", config.listen_addr))?;
  let addr = listener.local_addr()?;

  tracing::info!(%addr, "starting Ollama chat relay");
  tracing::info!("access the UI at http://{addr}");
  tracing::info!(backend = %config.ollama_url, "make sure Ollama is running");

  let state = RouterState {
    started_at: Instant::now(),
    ollama,
    index_page,
    max_form_bytes: config.max_form_bytes,
  };
  run_router(listener, state).await?;

  tracing::info!("server stopped");
  Ok(())
}
