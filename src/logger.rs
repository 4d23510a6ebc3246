use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tower_http=info";

/// Installs the global tracing subscriber. `RUST_LOG` overrides the filter.
///
/// With a `log_file` the output is appended to that file instead of stderr.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<()> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
  let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

  match log_file {
    Some(path) => {
      let file = OpenOptions::new().create(true).append(true).open(path)?;
      builder
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
    }
    None => builder.try_init().map_err(|err| anyhow::anyhow!(err)),
  }
}
