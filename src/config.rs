use std::time::Duration;

/// Configuration for the pipeline monitor.
///
/// Use [`MonitorConfig::builder()`] for ergonomic construction, or
/// [`MonitorConfig::default()`] for a local backend on port 8000.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base URL of the pipeline backend (the `/api/pipeline/...` routes).
    pub endpoint: String,

    /// URL of the polled snapshot file. `None` = `<endpoint>/batch-progress.json`.
    pub progress_url: Option<String>,

    /// Interval of the polling fallback while the event stream is down.
    pub poll_interval: Duration,

    /// Delay before the single reconnect attempt after a stream error.
    pub reconnect_delay: Duration,

    /// Timeout for the reachability probe.
    pub probe_timeout: Duration,

    /// Optional timeout for control commands (`None` = wait indefinitely).
    pub command_timeout: Option<Duration>,

    /// Number of historical log lines requested when attaching to a job.
    pub log_history_lines: u32,

    /// Maximum number of pending jobs started by one bulk play.
    pub bulk_play_limit: usize,

    /// Whether the polling fallback starts enabled.
    pub auto_refresh: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            progress_url: None,
            poll_interval: Duration::from_secs(120),
            reconnect_delay: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            command_timeout: None,
            log_history_lines: 100,
            bulk_play_limit: 5,
            auto_refresh: true,
        }
    }
}

impl MonitorConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    /// Resolved URL of the polled snapshot resource (without cache-buster).
    pub fn progress_url(&self) -> String {
        match &self.progress_url {
            Some(url) => url.clone(),
            None => format!(
                "{}/batch-progress.json",
                self.endpoint.trim_end_matches('/')
            ),
        }
    }
}

/// Builder for [`MonitorConfig`].
#[derive(Default)]
pub struct MonitorConfigBuilder {
    config: MonitorConfig,
}

impl MonitorConfigBuilder {
    /// Set the backend base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Poll a snapshot file served from somewhere other than the backend.
    pub fn with_progress_url(mut self, url: impl Into<String>) -> Self {
        self.config.progress_url = Some(url.into());
        self
    }

    /// Set the polling fallback interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the delay before reconnecting a failed event stream.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Set the reachability probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    /// Bound every control command by a timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = Some(timeout);
        self
    }

    /// Set how many historical log lines to replay on attach.
    pub fn with_log_history_lines(mut self, lines: u32) -> Self {
        self.config.log_history_lines = lines;
        self
    }

    /// Set the cap for bulk play.
    pub fn with_bulk_play_limit(mut self, limit: usize) -> Self {
        self.config.bulk_play_limit = limit;
        self
    }

    /// Start with the polling fallback enabled or disabled.
    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.config.auto_refresh = enabled;
        self
    }

    /// Build the final [`MonitorConfig`].
    pub fn build(self) -> MonitorConfig {
        self.config
    }
}
