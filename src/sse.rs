//! Incremental server-sent-events decoding over a `reqwest` byte stream.

use futures_util::StreamExt;
use std::ops::ControlFlow;
use tracing::warn;

use crate::error::{MonitorError, Result};

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Longest line the decoder buffers before giving up on it.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Line-oriented SSE decoder. Chunks may split lines anywhere.
///
/// A line longer than the limit is dropped along with the frame it
/// belongs to; decoding resumes at the next frame.
#[derive(Debug)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to contain no newline.
    scanned: usize,
    max_line: usize,
    discarding: bool,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
            event: None,
            data: Vec::new(),
            id: None,
        }
    }

    /// Feed raw bytes, returning every frame completed by them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            self.scanned = end + 1;

            let mut line = &self.buf[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();
            start = self.scanned;

            if self.discarding {
                // skip the rest of the truncated frame
                self.discarding = !line.is_empty();
                continue;
            }
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_line {
            warn!(bytes = self.buf.len(), "dropping oversized event stream line");
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
            self.reset_frame();
        }
        frames
    }

    fn reset_frame(&mut self) {
        self.event = None;
        self.data.clear();
        self.id = None;
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take().unwrap_or_else(|| "message".to_string()),
            data: self.data.join("\n"),
            id: self.id.take(),
        };
        self.data.clear();
        Some(frame)
    }
}

/// Drive a streaming response through an [`SseDecoder`].
///
/// Returns `Ok(())` when the server closes the stream or `on_frame` breaks,
/// and an error if the transport fails mid-stream.
pub(crate) async fn read_frames<F>(resp: reqwest::Response, mut on_frame: F) -> Result<()>
where
    F: FnMut(SseFrame) -> ControlFlow<()>,
{
    let mut decoder = SseDecoder::new();
    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| MonitorError::Network {
            context: "Event stream interrupted".into(),
            source: e,
        })?;
        for frame in decoder.feed(&chunk) {
            if on_frame(frame).is_break() {
                return Ok(());
            }
        }
    }
    Ok(())
}
