use tokio::sync::watch;
use tracing::{debug, info};

use crate::bulk::BulkOrchestrator;
use crate::client::PipelineClient;
use crate::commands::CommandExecutor;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::logs::LogTail;
use crate::poll::{Poller, Refresher};
use crate::probe::ServerProbe;
use crate::stream::EventStream;
use crate::sync::{BatchView, Synchronizer};
use crate::types::ConnectionState;

/// High-level monitor wiring every component together.
///
/// Create a `PipelineMonitor`, call [`start()`](Self::start) inside a tokio
/// runtime, then read [`view()`](Self::view) or
/// [`subscribe()`](Self::subscribe) for the live batch state.
///
/// # Example
///
/// ```no_run
/// use pipeline_monitor::{MonitorConfig, PipelineMonitor};
///
/// # async fn example() {
/// let monitor = PipelineMonitor::new(
///     MonitorConfig::builder().with_endpoint("http://127.0.0.1:8000").build(),
/// );
/// monitor.start().await;
///
/// let result = monitor.commands().play("dune").await;
/// println!("{}", result.message);
///
/// let stats = monitor.view().stats;
/// println!("{}% complete", stats.progress_percent);
/// monitor.shutdown();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PipelineMonitor {
    config: MonitorConfig,
    client: PipelineClient,
    sync: Synchronizer,
    probe: ServerProbe,
    refresher: Refresher,
    stream: EventStream,
    poller: Poller,
    commands: CommandExecutor,
    bulk: BulkOrchestrator,
}

impl PipelineMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_client(PipelineClient::from_config(&config), config)
    }

    /// Build around an already configured client.
    pub fn with_client(client: PipelineClient, config: MonitorConfig) -> Self {
        let sync = Synchronizer::new();
        let probe = ServerProbe::new(client.clone());
        let refresher = Refresher::new(client.clone(), sync.clone());
        let stream = EventStream::new(
            client.clone(),
            sync.clone(),
            probe.subscribe(),
            config.reconnect_delay,
        );
        let poller = Poller::new(
            refresher.clone(),
            stream.subscribe(),
            config.poll_interval,
            config.auto_refresh,
        );
        let commands = CommandExecutor::new(
            client.clone(),
            sync.clone(),
            refresher.clone(),
            probe.subscribe(),
        );
        let bulk = BulkOrchestrator::new(
            commands.clone(),
            sync.clone(),
            refresher.clone(),
            config.bulk_play_limit,
        );

        Self {
            config,
            client,
            sync,
            probe,
            refresher,
            stream,
            poller,
            commands,
            bulk,
        }
    }

    /// Probe the backend, connect the event stream if it is up, and start
    /// the polling fallback. Returns whether the backend is reachable.
    pub async fn start(&self) -> bool {
        let up = self.check_server().await;
        if !up {
            // Still show the last published progress file if it is reachable.
            if let Err(e) = self.refresher.refresh().await {
                debug!(error = %e, "progress file unavailable at startup");
            }
        }
        self.poller.start();
        info!(endpoint = self.client.endpoint(), available = up, "pipeline monitor started");
        up
    }

    /// Re-probe after a plausible network change and gate the stream on it.
    pub async fn check_server(&self) -> bool {
        let up = self.probe.probe().await;
        match (up, self.stream.state()) {
            (false, ConnectionState::Disconnected) => {}
            (false, _) => self.stream.disconnect(),
            (true, ConnectionState::Connected | ConnectionState::Connecting) => {}
            (true, _) => self.stream.connect(),
        }
        up
    }

    /// Pause or resume the polling fallback. The event stream is unaffected.
    pub fn set_auto_refresh(&self, enabled: bool) {
        self.poller.set_auto_refresh(enabled);
    }

    pub fn auto_refresh(&self) -> bool {
        self.poller.auto_refresh()
    }

    /// Force an authoritative refetch of the snapshot.
    pub async fn refresh(&self) -> Result<()> {
        self.refresher.refresh().await
    }

    pub fn view(&self) -> BatchView {
        self.sync.view()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchView> {
        self.sync.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.stream.state()
    }

    pub fn server_available(&self) -> bool {
        self.probe.is_available()
    }

    /// Last polling/resync failure, if the latest attempt failed.
    pub fn last_error(&self) -> Option<String> {
        self.refresher.last_error()
    }

    pub fn commands(&self) -> &CommandExecutor {
        &self.commands
    }

    pub fn bulk(&self) -> &BulkOrchestrator {
        &self.bulk
    }

    pub fn stream(&self) -> &EventStream {
        &self.stream
    }

    pub fn probe(&self) -> &ServerProbe {
        &self.probe
    }

    /// A fresh log tail sharing this monitor's client.
    pub fn log_tail(&self) -> LogTail {
        LogTail::new(self.client.clone(), self.config.log_history_lines)
    }

    /// Close the stream and stop polling. Idempotent.
    pub fn shutdown(&self) {
        self.stream.disconnect();
        self.poller.stop();
    }
}
