use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::client::PipelineClient;
use crate::error::Result;
use crate::sync::Synchronizer;
use crate::types::ConnectionState;

/// Fetches the polled snapshot and applies it as authoritative state.
///
/// Used by the polling fallback and by every resync after a failed command.
/// A failed fetch leaves the mirror untouched and is kept as `last_error`.
#[derive(Debug, Clone)]
pub struct Refresher {
    client: PipelineClient,
    sync: Synchronizer,
    last_error: watch::Sender<Option<String>>,
}

impl Refresher {
    pub fn new(client: PipelineClient, sync: Synchronizer) -> Self {
        let (last_error, _rx) = watch::channel(None);
        Self {
            client,
            sync,
            last_error,
        }
    }

    /// Fetch and apply unconditionally.
    pub async fn refresh(&self) -> Result<()> {
        self.refresh_if(|| true).await
    }

    /// Fetch, then apply only if `still_wanted` holds once the response is in.
    pub async fn refresh_if<F>(&self, still_wanted: F) -> Result<()>
    where
        F: Fn() -> bool,
    {
        match self.client.batch_snapshot().await {
            Ok(snapshot) => {
                if still_wanted() {
                    self.sync.apply_snapshot(snapshot);
                } else {
                    debug!("discarding polled snapshot, source no longer active");
                }
                self.last_error.send_replace(None);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch batch progress");
                self.last_error.send_replace(Some(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }
}

/// Periodic refetch that only runs while the event stream is not connected.
///
/// Push and pull never feed the mirror at the same time: each tick is
/// skipped while the stream reports [`ConnectionState::Connected`] or while
/// auto-refresh is switched off.
#[derive(Debug, Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

#[derive(Debug)]
struct PollerInner {
    refresher: Refresher,
    stream_state: watch::Receiver<ConnectionState>,
    auto_refresh: watch::Sender<bool>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new(
        refresher: Refresher,
        stream_state: watch::Receiver<ConnectionState>,
        interval: Duration,
        auto_refresh: bool,
    ) -> Self {
        let (auto_refresh, _rx) = watch::channel(auto_refresh);
        Self {
            inner: Arc::new(PollerInner {
                refresher,
                stream_state,
                auto_refresh,
                interval,
                task: Mutex::new(None),
            }),
        }
    }

    /// Spawn the poll loop. Calling again replaces the running loop.
    pub fn start(&self) {
        let mut task = self.inner.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move { inner.run().await }));
    }

    /// Stop the poll loop. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut task = self.inner.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .map(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Pause or resume polling. Does not touch the event stream.
    pub fn set_auto_refresh(&self, enabled: bool) {
        self.inner.auto_refresh.send_replace(enabled);
    }

    pub fn auto_refresh(&self) -> bool {
        *self.inner.auto_refresh.borrow()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.refresher.last_error()
    }
}

impl PollerInner {
    fn should_poll(&self) -> bool {
        *self.auto_refresh.borrow() && *self.stream_state.borrow() != ConnectionState::Connected
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately; the fallback waits a full interval.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !self.should_poll() {
                continue;
            }
            // Errors are recorded by the refresher; the loop keeps going.
            if let Err(e) = self.refresher.refresh_if(|| self.should_poll()).await {
                debug!(error = %e, "poll tick failed");
            }
        }
    }
}
