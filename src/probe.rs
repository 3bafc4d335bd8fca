use tokio::sync::watch;
use tracing::info;

use crate::client::PipelineClient;

/// Tracks whether the pipeline backend is reachable.
///
/// This is the only source of "server available" in the monitor: the event
/// stream consults it before reconnecting, and control commands refuse to
/// run while it reads `false`. Run [`probe()`](Self::probe) at startup and
/// whenever network conditions plausibly changed, not on every event.
#[derive(Debug, Clone)]
pub struct ServerProbe {
    client: PipelineClient,
    available: watch::Sender<bool>,
}

impl ServerProbe {
    /// Starts out as unavailable until the first probe completes.
    pub fn new(client: PipelineClient) -> Self {
        let (available, _rx) = watch::channel(false);
        Self { client, available }
    }

    /// Hit the liveness endpoint and record the result.
    pub async fn probe(&self) -> bool {
        let up = self.client.probe().await;
        let was = self.available.send_replace(up);
        if was != up {
            info!(available = up, endpoint = self.client.endpoint(), "pipeline availability changed");
        }
        up
    }

    pub fn is_available(&self) -> bool {
        *self.available.borrow()
    }

    /// Override the recorded state (e.g. from an external network monitor).
    pub fn set_available(&self, up: bool) {
        self.available.send_replace(up);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.available.subscribe()
    }
}
