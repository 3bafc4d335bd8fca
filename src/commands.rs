use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::PipelineClient;
use crate::error::{MonitorError, Result, SERVER_NOT_AVAILABLE};
use crate::phases;
use crate::poll::Refresher;
use crate::sync::{JobPatch, SyncEvent, Synchronizer};
use crate::types::*;

/// A control command against one book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play { slug: String },
    Pause { slug: String },
    Retry { slug: String, from_phase: u32 },
    Remove { slug: String },
}

impl Command {
    pub fn slug(&self) -> &str {
        match self {
            Command::Play { slug }
            | Command::Pause { slug }
            | Command::Retry { slug, .. }
            | Command::Remove { slug } => slug,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::Play { .. } => "play",
            Command::Pause { .. } => "pause",
            Command::Retry { .. } => "retry",
            Command::Remove { .. } => "remove",
        }
    }

    /// The tentative local change shown until the server confirms.
    pub fn optimistic_event(&self) -> SyncEvent {
        let now = chrono::Utc::now().to_rfc3339();
        let slug = self.slug().to_string();
        match self {
            Command::Play { .. } => SyncEvent::Optimistic {
                slug,
                patch: JobPatch {
                    status: Some(JobStatus::InProgress),
                    current_phase: Some(1),
                    phases_completed: Some(phases::through(0)),
                    next_action: Some("Starting phase 1...".to_string()),
                    started_at: Some(Some(now)),
                    paused_at: Some(None),
                    ..JobPatch::default()
                },
            },
            Command::Pause { .. } => SyncEvent::Optimistic {
                slug,
                patch: JobPatch {
                    status: Some(JobStatus::Pending),
                    next_action: Some("Paused".to_string()),
                    paused_at: Some(Some(now)),
                    ..JobPatch::default()
                },
            },
            Command::Retry { from_phase, .. } => SyncEvent::Optimistic {
                slug,
                patch: JobPatch {
                    status: Some(JobStatus::InProgress),
                    current_phase: Some(*from_phase),
                    phases_completed: Some(phases::through(from_phase.saturating_sub(1))),
                    next_action: Some(format!("Retrying from phase {}...", from_phase)),
                    last_error: Some(None),
                    paused_at: Some(None),
                    ..JobPatch::default()
                },
            },
            Command::Remove { .. } => SyncEvent::Remove { slug },
        }
    }

    fn default_message(&self) -> String {
        match self {
            Command::Play { slug } => format!("Started {}", slug),
            Command::Pause { slug } => format!("Paused {}", slug),
            Command::Retry { slug, from_phase } => {
                format!("Retrying {} from phase {}", slug, from_phase)
            }
            Command::Remove { slug } => format!("Removed {}", slug),
        }
    }

    async fn send(&self, client: &PipelineClient) -> Result<CommandAck> {
        match self {
            Command::Play { slug } => client.play(slug).await,
            Command::Pause { slug } => client.pause(slug).await,
            Command::Retry { slug, from_phase } => client.retry(slug, *from_phase).await,
            Command::Remove { slug } => client.remove(slug).await,
        }
    }
}

/// How a failed command gets back to the truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncPolicy {
    /// Refetch the snapshot right after a failure.
    Immediate,
    /// Leave the refetch to the caller (bulk operations resync once at the end).
    Deferred,
}

/// Lifecycle of one in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    /// Optimistic change applied, request outstanding.
    Tentative,
    /// Server accepted; the optimistic state stays until the next sync.
    Confirmed,
    /// Server rejected or unreachable; the optimistic state must be discarded.
    RolledBack,
}

/// One command moving through tentative -> confirmed | rolled back.
#[derive(Debug)]
pub struct InFlight {
    command: Command,
    phase: CommandPhase,
}

impl InFlight {
    /// Apply the optimistic change and enter [`CommandPhase::Tentative`].
    pub fn begin(command: Command, sync: &Synchronizer) -> Self {
        sync.dispatch(command.optimistic_event());
        Self {
            command,
            phase: CommandPhase::Tentative,
        }
    }

    pub fn phase(&self) -> CommandPhase {
        self.phase
    }

    /// Settle with the server's answer.
    pub fn settle(&mut self, outcome: Result<CommandAck>) -> CommandResult {
        let slug = Some(self.command.slug().to_string());
        match outcome {
            Ok(ack) => {
                self.phase = CommandPhase::Confirmed;
                let message = ack
                    .message
                    .unwrap_or_else(|| self.command.default_message());
                CommandResult::ok(message, slug)
            }
            Err(e) => {
                self.phase = CommandPhase::RolledBack;
                warn!(
                    command = self.command.verb(),
                    slug = self.command.slug(),
                    error = %e,
                    "pipeline command failed"
                );
                CommandResult::failed(e.user_message(), slug)
            }
        }
    }
}

/// Issues control commands with optimistic local updates.
///
/// Every operation returns a [`CommandResult`] and never fails. On success
/// the optimistic state is kept until the stream or the next poll delivers
/// the authoritative one. On failure the optimistic state is discarded by
/// refetching the snapshot.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    client: PipelineClient,
    sync: Synchronizer,
    refresher: Refresher,
    available: watch::Receiver<bool>,
}

impl CommandExecutor {
    pub fn new(
        client: PipelineClient,
        sync: Synchronizer,
        refresher: Refresher,
        available: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            sync,
            refresher,
            available,
        }
    }

    pub fn server_available(&self) -> bool {
        *self.available.borrow()
    }

    /// Start a book from phase 1.
    pub async fn play(&self, slug: &str) -> CommandResult {
        self.execute(
            Command::Play {
                slug: slug.to_string(),
            },
            ResyncPolicy::Immediate,
        )
        .await
    }

    /// Pause a running book.
    pub async fn pause(&self, slug: &str) -> CommandResult {
        self.execute(
            Command::Pause {
                slug: slug.to_string(),
            },
            ResyncPolicy::Immediate,
        )
        .await
    }

    /// Re-run a book starting at `from_phase`.
    pub async fn retry(&self, slug: &str, from_phase: u32) -> CommandResult {
        self.execute(
            Command::Retry {
                slug: slug.to_string(),
                from_phase,
            },
            ResyncPolicy::Immediate,
        )
        .await
    }

    /// Delete a book. It disappears locally before the server answers.
    pub async fn remove(&self, slug: &str) -> CommandResult {
        self.execute(
            Command::Remove {
                slug: slug.to_string(),
            },
            ResyncPolicy::Immediate,
        )
        .await
    }

    /// Create a book, then refetch so it shows up locally.
    ///
    /// No optimistic phase: the slug may only be known once the server
    /// answers.
    pub async fn add(&self, title: &str, author: &str, slug: Option<&str>) -> CommandResult {
        if !self.server_available() {
            return CommandResult::failed(SERVER_NOT_AVAILABLE, slug.map(String::from));
        }
        let book = NewBook {
            title: title.to_string(),
            author: author.to_string(),
            slug: slug.map(String::from),
        };
        match self.client.add(&book).await {
            Ok(ack) => {
                let slug = ack.slug.or(book.slug);
                info!(slug = ?slug, "book added to pipeline");
                if let Err(e) = self.refresher.refresh().await {
                    debug!(error = %e, "resync after add failed");
                }
                let message = ack
                    .message
                    .unwrap_or_else(|| format!("Added \"{}\"", book.title));
                CommandResult::ok(message, slug)
            }
            Err(e) => {
                warn!(title, error = %e, "failed to add book");
                CommandResult::failed(e.user_message(), book.slug)
            }
        }
    }

    /// Run one command through the two-phase protocol.
    pub async fn execute(&self, command: Command, resync: ResyncPolicy) -> CommandResult {
        if !self.server_available() {
            return CommandResult::failed(
                MonitorError::ServerUnavailable.user_message(),
                Some(command.slug().to_string()),
            );
        }

        let mut in_flight = InFlight::begin(command.clone(), &self.sync);
        let outcome = command.send(&self.client).await;
        let result = in_flight.settle(outcome);

        if in_flight.phase() == CommandPhase::RolledBack && resync == ResyncPolicy::Immediate {
            // Server state after a failed command is unknown; fetch it.
            if let Err(e) = self.refresher.refresh().await {
                debug!(command = command.verb(), error = %e, "resync after failed command failed");
            }
        }
        result
    }
}
