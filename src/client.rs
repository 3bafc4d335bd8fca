use reqwest::{Client, RequestBuilder, Response, Url};
use std::time::Duration;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::types::*;

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// Async HTTP client for the pipeline backend.
///
/// Owns every route the monitor talks to: the liveness probe, the polled
/// snapshot file, the batch event stream, the per-book control commands
/// and the per-book log stream.
///
/// # Example
/// ```no_run
/// use pipeline_monitor::PipelineClient;
///
/// # async fn example() -> pipeline_monitor::Result<()> {
/// let client = PipelineClient::new("http://127.0.0.1:8000");
/// let up = client.probe().await;
/// let snapshot = client.batch_snapshot().await?;
/// println!("{} books, up = {}", snapshot.books.len(), up);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PipelineClient {
    http: Client,
    endpoint: String,
    progress_url: String,
    probe_timeout: Duration,
    command_timeout: Option<Duration>,
}

impl PipelineClient {
    /// Create a new client pointing at the given backend endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = normalize(endpoint.into());
        Self {
            http: Client::new(),
            progress_url: format!("{}/batch-progress.json", endpoint),
            endpoint,
            probe_timeout: Duration::from_secs(5),
            command_timeout: None,
        }
    }

    /// Create a client from a [`MonitorConfig`].
    pub fn from_config(config: &MonitorConfig) -> Self {
        let mut client = Self::new(config.endpoint.clone());
        client.progress_url = config.progress_url();
        client.probe_timeout = config.probe_timeout;
        client.command_timeout = config.command_timeout;
        client
    }

    /// Use a custom `reqwest::Client` (for connection pooling, TLS, proxies).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Poll a snapshot file served from a different host or path.
    pub fn with_progress_url(mut self, url: impl Into<String>) -> Self {
        self.progress_url = url.into();
        self
    }

    /// Returns the configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the polled snapshot URL (without cache-buster).
    pub fn progress_url(&self) -> &str {
        &self.progress_url
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| MonitorError::InvalidUrl(format!("{}: {}", self.endpoint, e)))?;
        url.path_segments_mut()
            .map_err(|_| MonitorError::InvalidUrl(format!("{} cannot be a base", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn book_url(&self, slug: &str, action: Option<&str>) -> Result<Url> {
        let mut segments = vec!["api", "pipeline", "books", slug];
        segments.extend(action);
        self.url(&segments)
    }

    fn unreachable(&self, e: reqwest::Error) -> MonitorError {
        MonitorError::Network {
            context: format!(
                "Cannot connect to pipeline at {}. Is the service running?",
                self.endpoint
            ),
            source: e,
        }
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Liveness check against `/api/pipeline/`. Any 2xx means reachable;
    /// every failure (including timeouts) reads as unreachable.
    pub async fn probe(&self) -> bool {
        let url = match self.url(&["api", "pipeline", ""]) {
            Ok(u) => u,
            Err(_) => return false,
        };
        match self
            .http
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    // ── Snapshots ───────────────────────────────────────────────────

    /// Fetch the polled snapshot file with a per-request cache-buster.
    pub async fn batch_snapshot(&self) -> Result<BatchSnapshot> {
        let stamp = chrono::Utc::now().timestamp_millis().to_string();
        let url = Url::parse_with_params(&self.progress_url, &[("t", stamp.as_str())])
            .map_err(|e| MonitorError::InvalidUrl(format!("{}: {}", self.progress_url, e)))?;

        let resp = self
            .http
            .get(url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let resp = ensure_success(resp).await?;

        let text = resp.text().await.map_err(|e| MonitorError::Network {
            context: "Failed to read batch progress response".into(),
            source: e,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Open the batch event stream. The response body is an SSE stream.
    pub async fn batch_events(&self) -> Result<Response> {
        let url = self.url(&["api", "pipeline", "events"])?;
        self.open_stream(self.http.get(url)).await
    }

    /// Open a job's log stream, replaying `lines` historical lines first.
    pub async fn log_stream(&self, slug: &str, lines: u32) -> Result<Response> {
        let mut url = self.url(&["api", "pipeline", "books", slug, "logs", "stream"])?;
        url.query_pairs_mut()
            .append_pair("lines", &lines.to_string());
        self.open_stream(self.http.get(url)).await
    }

    async fn open_stream(&self, req: RequestBuilder) -> Result<Response> {
        let resp = req
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        ensure_success(resp).await
    }

    // ── Control ─────────────────────────────────────────────────────

    /// Start a pending book from phase 1.
    pub async fn play(&self, slug: &str) -> Result<CommandAck> {
        let url = self.book_url(slug, Some("play"))?;
        self.command(self.http.post(url)).await
    }

    /// Pause a running book.
    pub async fn pause(&self, slug: &str) -> Result<CommandAck> {
        let url = self.book_url(slug, Some("pause"))?;
        self.command(self.http.post(url)).await
    }

    /// Retry a book starting at `from_phase`.
    pub async fn retry(&self, slug: &str, from_phase: u32) -> Result<CommandAck> {
        let url = self.book_url(slug, Some("retry"))?;
        let body = serde_json::json!({ "from_phase": from_phase });
        self.command(self.http.post(url).json(&body)).await
    }

    /// Delete a book from the pipeline.
    pub async fn remove(&self, slug: &str) -> Result<CommandAck> {
        let url = self.book_url(slug, None)?;
        self.command(self.http.delete(url)).await
    }

    /// Create a book. The server assigns a slug when none is given.
    pub async fn add(&self, book: &NewBook) -> Result<CommandAck> {
        let url = self.url(&["api", "pipeline", "books"])?;
        self.command(self.http.post(url).json(book)).await
    }

    async fn command(&self, req: RequestBuilder) -> Result<CommandAck> {
        let req = match self.command_timeout {
            Some(t) => req.timeout(t),
            None => req,
        };
        let resp = req.send().await.map_err(|e| self.unreachable(e))?;
        let resp = ensure_success(resp).await?;

        let text = resp.text().await.map_err(|e| MonitorError::Network {
            context: "Failed to read pipeline command response".into(),
            source: e,
        })?;
        // DELETE and some POSTs answer with an empty body
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }
}

async fn ensure_success(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(MonitorError::Http { status, body })
}
