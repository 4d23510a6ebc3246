use std::path::Path;

use anyhow::Context;

const EMBEDDED_INDEX: &str = include_str!("../templates/index.html");

/// Returns the chat page: `index.html` from `templates_dir` when one is
/// configured, the built-in page otherwise.
pub fn load_index(templates_dir: Option<&Path>) -> anyhow::Result<String> {
  let Some(dir) = templates_dir else {
    return Ok(EMBEDDED_INDEX.to_string());
  };
  let path = dir.join("index.html");
  tracing::info!(path = %path.display(), "loading page template");
  std::fs::read_to_string(&path).with_context(|| format!("template {} not found", path.display()))
}
