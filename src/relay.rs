//! Bridges a newline-delimited JSON response body to server-sent events.
//!
//! Each complete upstream line that parses as a JSON object is written to the
//! sink verbatim as one `data: <line>\n\n` frame. Upstream is only read again
//! once every complete line already received has been accepted by the sink.

use std::fmt::Display;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};

use crate::models::StreamChunk;

/// Longest upstream line that is relayed. Longer lines are dropped unread.
pub const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
#[error("client disconnected")]
pub struct SinkClosed;

/// Destination of relayed frames.
///
/// `send_frame` must hand the frame to the client (write plus flush) before
/// returning, so that output is observed incrementally.
#[async_trait]
pub trait FrameSink: Send {
  async fn send_frame(&mut self, frame: Bytes) -> Result<(), SinkClosed>;
}

/// Sink feeding an HTTP response body through a channel.
pub struct ChannelSink {
  tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
  pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
    Self { tx }
  }
}

#[async_trait]
impl FrameSink for ChannelSink {
  async fn send_frame(&mut self, frame: Bytes) -> Result<(), SinkClosed> {
    self.tx.send(frame).await.map_err(|_| SinkClosed)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
  /// A chunk with `done: true` was forwarded.
  Done,
  /// Upstream ended the body without a final chunk.
  UpstreamClosed,
  UpstreamFailed(String),
  ClientGone,
}

#[derive(Debug, Clone)]
pub struct RelayReport {
  pub frames: usize,
  pub skipped: usize,
  pub end: RelayEnd,
  /// The `done` chunk, when one was seen.
  pub last: Option<StreamChunk>,
}

impl RelayReport {
  fn new() -> Self {
    Self {
      frames: 0,
      skipped: 0,
      end: RelayEnd::UpstreamClosed,
      last: None,
    }
  }

  pub fn log(&self, model: &str) {
    match &self.end {
      RelayEnd::Done => {
        let stats = self.last.as_ref();
        tracing::info!(
          model,
          frames = self.frames,
          skipped = self.skipped,
          done_reason = stats.and_then(|c| c.done_reason.as_deref()),
          prompt_eval_count = stats.and_then(|c| c.prompt_eval_count),
          eval_count = stats.and_then(|c| c.eval_count),
          prompt_eval_ns = stats.and_then(|c| c.prompt_eval_duration),
          eval_ns = stats.and_then(|c| c.eval_duration),
          load_ns = stats.and_then(|c| c.load_duration),
          total_ns = stats.and_then(|c| c.total_duration),
          "stream finished"
        );
      }
      RelayEnd::UpstreamClosed => {
        tracing::warn!(model, frames = self.frames, skipped = self.skipped, "upstream closed stream before done");
      }
      RelayEnd::UpstreamFailed(err) => {
        tracing::warn!(model, frames = self.frames, skipped = self.skipped, error = %err, "error reading upstream stream");
      }
      RelayEnd::ClientGone => {
        tracing::info!(model, frames = self.frames, skipped = self.skipped, "client disconnected, stopping stream");
      }
    }
  }
}

pub fn sse_frame(line: &[u8]) -> Bytes {
  let mut frame = BytesMut::with_capacity(line.len() + 8);
  frame.extend_from_slice(b"data: ");
  frame.extend_from_slice(line);
  frame.extend_from_slice(b"\n\n");
  frame.freeze()
}

enum Step {
  Continue,
  Stop(RelayEnd),
}

/// Forwards `upstream` to `sink` until a `done` chunk, the end of the body,
/// an upstream error or a closed sink.
pub async fn relay<S, E, K>(upstream: S, sink: &mut K) -> RelayReport
where
  S: Stream<Item = Result<Bytes, E>> + Send,
  E: Display,
  K: FrameSink + ?Sized,
{
  let mut upstream = std::pin::pin!(upstream);
  let mut report = RelayReport::new();
  let mut buffer = BytesMut::new();
  // Bytes of `buffer` already known to hold no newline.
  let mut scanned = 0;
  // Set while dropping the rest of an oversized line.
  let mut discarding = false;

  loop {
    while let Some(offset) = buffer[scanned..].iter().position(|b| *b == b'\n') {
      let pos = scanned + offset;
      let line = buffer.split_to(pos + 1);
      scanned = 0;
      if discarding {
        discarding = false;
        continue;
      }
      if pos > MAX_LINE_BYTES {
        skip_oversized(&mut report, pos);
        continue;
      }
      if let Step::Stop(end) = forward_line(&line[..pos], sink, &mut report).await {
        report.end = end;
        return report;
      }
    }
    scanned = buffer.len();

    if buffer.len() > MAX_LINE_BYTES {
      if !discarding {
        skip_oversized(&mut report, buffer.len());
        discarding = true;
      }
      buffer.clear();
      scanned = 0;
    }

    match upstream.next().await {
      Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
      Some(Err(err)) => {
        report.end = RelayEnd::UpstreamFailed(err.to_string());
        return report;
      }
      None => break,
    }
  }

  if !buffer.is_empty() && !discarding {
    if let Step::Stop(end) = forward_line(&buffer, sink, &mut report).await {
      report.end = end;
      return report;
    }
  }
  report.end = RelayEnd::UpstreamClosed;
  report
}

fn skip_oversized(report: &mut RelayReport, len: usize) {
  report.skipped += 1;
  tracing::warn!(bytes = len, limit = MAX_LINE_BYTES, "skipping oversized stream line");
}

async fn forward_line<K>(line: &[u8], sink: &mut K, report: &mut RelayReport) -> Step
where
  K: FrameSink + ?Sized,
{
  let line = line.strip_suffix(b"\r").unwrap_or(line);
  if line.iter().all(u8::is_ascii_whitespace) {
    return Step::Continue;
  }

  let object: Map<String, Value> = match serde_json::from_slice(line) {
    Ok(object) => object,
    Err(err) => {
      report.skipped += 1;
      tracing::warn!(error = %err, line = %String::from_utf8_lossy(line), "skipping malformed stream chunk");
      return Step::Continue;
    }
  };
  if let Some(err) = object.get("error").and_then(Value::as_str) {
    tracing::warn!(error = err, "backend reported an error mid-stream");
  }
  let done = object.get("done").and_then(Value::as_bool).unwrap_or(false);

  if sink.send_frame(sse_frame(line)).await.is_err() {
    return Step::Stop(RelayEnd::ClientGone);
  }
  report.frames += 1;

  if done {
    report.last = serde_json::from_value::<StreamChunk>(Value::Object(object)).ok();
    return Step::Stop(RelayEnd::Done);
  }
  Step::Continue
}
