use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::phases;

/// Job status lifecycle: Pending -> InProgress -> Completed/Failed.
///
/// Pause moves an in-progress job back to Pending; retry moves a failed
/// job back to InProgress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Reads an explicit `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One book moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub slug: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub author: String,
    pub status: JobStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_phase: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub phases_completed: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub next_action: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub paused_at: Option<String>,
}

impl Job {
    /// A fresh pending job with no progress.
    pub fn new(slug: impl Into<String>, title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            title: title.into(),
            author: author.into(),
            status: JobStatus::Pending,
            current_phase: 0,
            phases_completed: String::new(),
            next_action: String::new(),
            score: None,
            last_error: None,
            started_at: None,
            completed_at: None,
            paused_at: None,
        }
    }

    /// Set the status (builder pattern).
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the current phase (builder pattern).
    pub fn with_phase(mut self, phase: u32) -> Self {
        self.current_phase = phase;
        self
    }

    /// Decoded `phases_completed`, or `None` if the server sent garbage.
    pub fn completed_phases(&self) -> Option<Vec<u32>> {
        phases::parse_ranges(&self.phases_completed)
    }
}

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub pending: usize,
    #[serde(default)]
    pub in_progress: usize,
    #[serde(default)]
    pub completed: usize,
    #[serde(default)]
    pub failed: usize,
}

impl Summary {
    /// Count statuses. This is the only trusted source of a summary.
    pub fn from_jobs(jobs: &[Job]) -> Self {
        let mut summary = Summary {
            total: jobs.len(),
            ..Summary::default()
        };
        for job in jobs {
            match job.status {
                JobStatus::Pending => summary.pending += 1,
                JobStatus::InProgress => summary.in_progress += 1,
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

/// Full collection state as sent by the stream and the polled file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub books: Vec<Job>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub sync_timestamp: Option<String>,
}

impl BatchSnapshot {
    pub fn new(books: Vec<Job>) -> Self {
        let summary = Summary::from_jobs(&books);
        Self {
            books,
            metadata: Value::Null,
            summary,
            sync_timestamp: None,
        }
    }

    pub fn job(&self, slug: &str) -> Option<&Job> {
        self.books.iter().find(|j| j.slug == slug)
    }
}

/// Outcome of a single-job control command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>, slug: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            slug,
        }
    }

    pub fn failed(message: impl Into<String>, slug: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            slug,
        }
    }
}

/// Aggregate outcome of a bulk operation.
///
/// `success` is true when at least one item succeeded, or when there was
/// nothing to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub success: bool,
    pub message: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BulkResult {
    pub fn nothing_to_do(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            total: 0,
            succeeded: 0,
            failed: 0,
        }
    }
}

/// Body returned by the backend for accepted commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

/// Request body for creating a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Debug,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
            LogLevel::Success => "success",
        }
    }

    /// Case-insensitive; accepts `warn` for `warning`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Some(LogLevel::Info),
            "warning" | "warn" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            "debug" => Some(LogLevel::Debug),
            "success" => Some(LogLevel::Success),
            _ => None,
        }
    }
}

fn lenient_level<'de, D>(deserializer: D) -> Result<Option<LogLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(LogLevel::parse))
}

/// RFC 3339 strings pass through; epoch seconds are converted.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Text(String),
        Epoch(f64),
    }

    let raw: Option<RawTimestamp> = Option::deserialize(deserializer)?;
    Ok(raw.map(|ts| match ts {
        RawTimestamp::Text(s) => s,
        RawTimestamp::Epoch(secs) => {
            chrono::DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| secs.to_string())
        }
    }))
}

/// One structured log line from a job's log stream.
///
/// Fields the client does not know about are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_level",
        skip_serializing_if = "Option::is_none"
    )]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogEntry {
    /// Client-generated informational line, stamped with the current time.
    pub fn synthetic(message: impl Into<String>, phase: Option<u32>) -> Self {
        Self {
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            level: Some(LogLevel::Info),
            phase,
            message: message.into(),
            duration: None,
            extra: Map::new(),
        }
    }
}

/// Health of the batch event stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}
