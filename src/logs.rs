use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::PipelineClient;
use crate::error::{MonitorError, Result};
use crate::sse::{read_frames, SseFrame};
use crate::types::LogEntry;

/// Message shown when the log stream drops.
pub const CONNECTION_LOST: &str = "Connection to log stream lost";

/// Typed event from a job's log stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    /// Stream opened; `initial_lines` historical lines follow.
    Connected { initial_lines: u64 },
    /// One structured log line.
    Log(LogEntry),
    /// The job advanced to a new phase.
    State { current_phase: u32 },
    /// Server-side error report.
    Error { error: String },
}

impl LogEvent {
    /// Parse a frame. `Ok(None)` for unhandled event kinds; `Err` for a
    /// `connected`, `log` or `state` frame with a malformed payload.
    pub fn parse(frame: &SseFrame) -> Result<Option<Self>> {
        let event = match frame.event.as_str() {
            "connected" => {
                let payload: Value = serde_json::from_str(&frame.data)?;
                LogEvent::Connected {
                    initial_lines: payload
                        .get("initial_lines")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                }
            }
            "log" => LogEvent::Log(serde_json::from_str(&frame.data)?),
            "state" => {
                let payload: Value = serde_json::from_str(&frame.data)?;
                match payload.get("current_phase").and_then(|v| v.as_u64()) {
                    Some(phase) => LogEvent::State {
                        current_phase: u32::try_from(phase).map_err(|_| {
                            MonitorError::InvalidResponse(format!(
                                "phase {} out of range",
                                phase
                            ))
                        })?,
                    },
                    None => return Ok(None),
                }
            }
            "error" => {
                // Unparseable error payloads still count as errors.
                let error = serde_json::from_str::<Value>(&frame.data)
                    .ok()
                    .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                    .unwrap_or_else(|| "Unknown error from log stream".to_string());
                LogEvent::Error { error }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Where a tail session currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailStatus {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Error,
}

/// Observable state of a tail session.
///
/// `entries` only grows while a session is live; it is emptied by a new
/// `attach` or by `clear` once the session has ended.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogView {
    pub slug: Option<String>,
    pub status: TailStatus,
    pub connected: bool,
    pub last_error: Option<String>,
    pub entries: Vec<LogEntry>,
}

impl LogView {
    /// Reduce one stream event into the view.
    pub fn apply(&mut self, event: LogEvent) {
        match event {
            LogEvent::Connected { initial_lines } => {
                self.status = TailStatus::Streaming;
                self.connected = true;
                self.entries.push(LogEntry::synthetic(
                    format!("Connected to log stream ({} historical lines)", initial_lines),
                    None,
                ));
            }
            LogEvent::Log(entry) => self.entries.push(entry),
            LogEvent::State { current_phase } => {
                self.entries.push(LogEntry::synthetic(
                    format!("Pipeline advanced to phase {}", current_phase),
                    Some(current_phase),
                ));
            }
            LogEvent::Error { error } => self.last_error = Some(error),
        }
    }

    fn start(&mut self, slug: &str) {
        *self = LogView {
            slug: Some(slug.to_string()),
            status: TailStatus::Connecting,
            ..LogView::default()
        };
    }

    fn opened(&mut self) {
        self.status = TailStatus::Streaming;
        self.connected = true;
    }

    /// Transport dropped. History is kept.
    fn lost(&mut self) {
        self.status = TailStatus::Error;
        self.connected = false;
        self.last_error = Some(CONNECTION_LOST.to_string());
    }

    fn stopped(&mut self) {
        self.status = TailStatus::Idle;
        self.connected = false;
    }
}

/// Follows the log stream of one job at a time.
///
/// Independent of the batch event stream. A lost connection is not
/// retried: replaying history into the append-only buffer would duplicate
/// lines, so the caller re-attaches instead.
#[derive(Debug, Clone)]
pub struct LogTail {
    inner: Arc<TailInner>,
}

#[derive(Debug)]
struct TailInner {
    client: PipelineClient,
    history_lines: u32,
    view: watch::Sender<LogView>,
    slot: Mutex<TailSlot>,
}

#[derive(Debug, Default)]
struct TailSlot {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl LogTail {
    pub fn new(client: PipelineClient, history_lines: u32) -> Self {
        let (view, _rx) = watch::channel(LogView::default());
        Self {
            inner: Arc::new(TailInner {
                client,
                history_lines,
                view,
                slot: Mutex::new(TailSlot::default()),
            }),
        }
    }

    /// Start tailing `slug`, dropping any previous session and its entries.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&self, slug: &str) {
        let mut slot = self.lock_slot();
        if let Some(handle) = slot.task.take() {
            handle.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;
        self.inner.view.send_modify(|v| v.start(slug));

        let this = self.clone();
        let slug = slug.to_string();
        slot.task = Some(tokio::spawn(async move { this.run(generation, slug).await }));
    }

    /// Stop tailing. Entries stay visible. Idempotent.
    pub fn detach(&self) {
        let mut slot = self.lock_slot();
        if let Some(handle) = slot.task.take() {
            handle.abort();
        }
        slot.generation += 1;
        self.inner.view.send_if_modified(|v| {
            let before = (v.status, v.connected);
            v.stopped();
            before != (v.status, v.connected)
        });
    }

    /// Empty the buffer once no session is live. Returns whether it was
    /// cleared; a connecting or streaming session keeps its entries.
    pub fn clear(&self) -> bool {
        let _slot = self.lock_slot();
        let mut cleared = false;
        self.inner.view.send_if_modified(|v| {
            if matches!(v.status, TailStatus::Connecting | TailStatus::Streaming) {
                return false;
            }
            cleared = true;
            let had_entries = !v.entries.is_empty();
            v.entries.clear();
            had_entries
        });
        cleared
    }

    pub fn view(&self) -> LogView {
        self.inner.view.borrow().clone()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.view.borrow().entries.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.view.borrow().connected
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.view.borrow().last_error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LogView> {
        self.inner.view.subscribe()
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, TailSlot> {
        self.inner.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutate the view only if `generation` is still the attached session.
    fn update_if_current<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut LogView),
    {
        let slot = self.lock_slot();
        if slot.generation != generation {
            return false;
        }
        self.inner.view.send_modify(f);
        true
    }

    async fn run(self, generation: u64, slug: String) {
        let outcome = match self
            .inner
            .client
            .log_stream(&slug, self.inner.history_lines)
            .await
        {
            Ok(resp) => {
                if !self.update_if_current(generation, LogView::opened) {
                    return;
                }
                info!(slug = %slug, "log stream attached");
                read_frames(resp, |frame| self.handle_frame(generation, &frame)).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            warn!(slug = %slug, error = %e, "log stream error");
        } else {
            debug!(slug = %slug, "log stream ended");
        }
        self.update_if_current(generation, LogView::lost);
    }

    fn handle_frame(&self, generation: u64, frame: &SseFrame) -> ControlFlow<()> {
        match LogEvent::parse(frame) {
            Ok(Some(event)) => {
                if !self.update_if_current(generation, |v| v.apply(event)) {
                    return ControlFlow::Break(());
                }
            }
            Ok(None) => debug!(event = %frame.event, "ignoring unknown log event"),
            Err(e) => warn!(event = %frame.event, error = %e, "dropping malformed log event"),
        }
        ControlFlow::Continue(())
    }
}
