use serde::Deserialize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::PipelineClient;
use crate::error::Result;
use crate::sse::{read_frames, SseFrame};
use crate::sync::Synchronizer;
use crate::types::{BatchSnapshot, ConnectionState};

/// Typed event from the batch event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// Initial full snapshot sent right after the connection opens.
    Connected(BatchSnapshot),
    /// Full snapshot replacing the current view.
    Update(BatchSnapshot),
    /// Keep-alive, carries nothing.
    Heartbeat,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotPayload {
    Wrapped { snapshot: BatchSnapshot },
    Bare(BatchSnapshot),
}

impl SnapshotPayload {
    fn into_snapshot(self) -> BatchSnapshot {
        match self {
            SnapshotPayload::Wrapped { snapshot } => snapshot,
            SnapshotPayload::Bare(snapshot) => snapshot,
        }
    }
}

impl BatchEvent {
    /// Parse a frame. `Ok(None)` for event kinds this client does not handle;
    /// `Err` for a recognized event whose payload is malformed.
    pub fn parse(frame: &SseFrame) -> Result<Option<Self>> {
        let event = match frame.event.as_str() {
            "connected" => {
                let payload: SnapshotPayload = serde_json::from_str(&frame.data)?;
                BatchEvent::Connected(payload.into_snapshot())
            }
            "update" => {
                let payload: SnapshotPayload = serde_json::from_str(&frame.data)?;
                BatchEvent::Update(payload.into_snapshot())
            }
            "heartbeat" => BatchEvent::Heartbeat,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Live connection to `/api/pipeline/events`.
///
/// At most one connection exists per instance: [`connect()`](Self::connect)
/// always tears down the previous connection and any pending reconnect
/// first. Results delivered by a superseded connection are dropped.
///
/// On a transport error the state becomes [`ConnectionState::Error`] and a
/// single reconnect is scheduled after `reconnect_delay`, but only while the
/// server probe reports the backend as available.
#[derive(Debug, Clone)]
pub struct EventStream {
    inner: Arc<StreamInner>,
}

#[derive(Debug)]
struct StreamInner {
    client: PipelineClient,
    sync: Synchronizer,
    available: watch::Receiver<bool>,
    state: watch::Sender<ConnectionState>,
    reconnect_delay: Duration,
    slot: Mutex<StreamSlot>,
    live: AtomicUsize,
}

#[derive(Debug, Default)]
struct StreamSlot {
    generation: u64,
    connection: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl StreamSlot {
    fn cancel(&mut self) {
        if let Some(handle) = self.connection.take() {
            handle.abort();
        }
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }
}

/// Counts a connection task as live until it finishes or is aborted.
struct LiveGuard<'a>(&'a AtomicUsize);

impl<'a> LiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EventStream {
    pub fn new(
        client: PipelineClient,
        sync: Synchronizer,
        available: watch::Receiver<bool>,
        reconnect_delay: Duration,
    ) -> Self {
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(StreamInner {
                client,
                sync,
                available,
                state,
                reconnect_delay,
                slot: Mutex::new(StreamSlot::default()),
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// Open the stream, replacing any existing connection.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut slot = self.lock_slot();
        slot.cancel();
        slot.generation += 1;
        let generation = slot.generation;
        self.inner.state.send_replace(ConnectionState::Connecting);

        let this = self.clone();
        slot.connection = Some(tokio::spawn(async move { this.run(generation).await }));
        debug!(generation, "batch event stream connecting");
    }

    /// Close the stream and cancel any pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        let mut slot = self.lock_slot();
        slot.cancel();
        slot.generation += 1;
        self.inner.state.send_replace(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of connection tasks currently alive (0 or 1 once settled).
    pub fn live_connections(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Whether a reconnect is waiting on its timer.
    pub fn reconnect_pending(&self) -> bool {
        self.lock_slot()
            .reconnect
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, StreamSlot> {
        self.inner.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_slot().generation == generation
    }

    /// Update state only if this connection has not been superseded.
    fn set_state_if_current(&self, generation: u64, state: ConnectionState) -> bool {
        let slot = self.lock_slot();
        if slot.generation != generation {
            return false;
        }
        self.inner.state.send_replace(state);
        true
    }

    async fn run(self, generation: u64) {
        let _live = LiveGuard::enter(&self.inner.live);

        let outcome = match self.inner.client.batch_events().await {
            Ok(resp) => {
                if !self.set_state_if_current(generation, ConnectionState::Connected) {
                    return;
                }
                info!(generation, "batch event stream connected");
                read_frames(resp, |frame| self.handle_frame(generation, &frame)).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => warn!(generation, "batch event stream closed by server"),
            Err(e) => warn!(generation, error = %e, "batch event stream error"),
        }
        if self.set_state_if_current(generation, ConnectionState::Error) {
            self.schedule_reconnect(generation);
        }
    }

    /// Apply a pushed snapshot only if this connection has not been
    /// superseded. The slot lock is held across the apply so a concurrent
    /// `disconnect()` cannot slip in between the check and the write.
    fn apply_if_current(&self, generation: u64, snapshot: BatchSnapshot, connected: bool) -> bool {
        let slot = self.lock_slot();
        if slot.generation != generation {
            return false;
        }
        if connected {
            self.inner.state.send_replace(ConnectionState::Connected);
        }
        self.inner.sync.apply_snapshot(snapshot);
        true
    }

    fn handle_frame(&self, generation: u64, frame: &SseFrame) -> ControlFlow<()> {
        let applied = match BatchEvent::parse(frame) {
            Ok(Some(BatchEvent::Connected(snapshot))) => {
                self.apply_if_current(generation, snapshot, true)
            }
            Ok(Some(BatchEvent::Update(snapshot))) => {
                self.apply_if_current(generation, snapshot, false)
            }
            Ok(Some(BatchEvent::Heartbeat)) => self.is_current(generation),
            Ok(None) => {
                debug!(event = %frame.event, "ignoring unknown batch event");
                self.is_current(generation)
            }
            Err(e) => {
                warn!(event = %frame.event, error = %e, "dropping malformed batch event");
                self.is_current(generation)
            }
        };
        if applied {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    }

    fn schedule_reconnect(&self, generation: u64) {
        if !*self.inner.available.borrow() {
            info!("pipeline unavailable, not reconnecting event stream");
            return;
        }

        let mut slot = self.lock_slot();
        if slot.generation != generation {
            return;
        }
        if let Some(handle) = slot.reconnect.take() {
            handle.abort();
        }
        let this = self.clone();
        let delay = self.inner.reconnect_delay;
        slot.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.reconnect(generation);
        }));
        debug!(generation, ?delay, "event stream reconnect scheduled");
    }

    fn reconnect(&self, generation: u64) {
        {
            let mut slot = self.lock_slot();
            if slot.generation != generation {
                return;
            }
            // Detach our own handle so connect() doesn't abort this task.
            slot.reconnect = None;
        }
        if !*self.inner.available.borrow() {
            info!("pipeline became unavailable, reconnect skipped");
            return;
        }
        self.connect();
    }
}
