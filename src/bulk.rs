use tracing::{info, warn};

use crate::commands::{Command, CommandExecutor, ResyncPolicy};
use crate::error::SERVER_NOT_AVAILABLE;
use crate::poll::Refresher;
use crate::sync::Synchronizer;
use crate::types::*;

/// Applies one command to every job matching a status, one job at a time.
///
/// Items are processed strictly sequentially in snapshot order, each
/// request awaited before the next is sent, so the backend never sees a
/// burst of simultaneous starts. One item failing does not stop the rest.
/// A single authoritative refetch runs after the loop.
#[derive(Debug, Clone)]
pub struct BulkOrchestrator {
    commands: CommandExecutor,
    sync: Synchronizer,
    refresher: Refresher,
    play_limit: usize,
}

impl BulkOrchestrator {
    pub fn new(
        commands: CommandExecutor,
        sync: Synchronizer,
        refresher: Refresher,
        play_limit: usize,
    ) -> Self {
        Self {
            commands,
            sync,
            refresher,
            play_limit,
        }
    }

    /// Retry every failed job from the phase it failed in.
    pub async fn retry_all_failed(&self) -> BulkResult {
        let batch: Vec<Command> = self
            .sync
            .view()
            .jobs_with_status(JobStatus::Failed)
            .into_iter()
            .map(|job| Command::Retry {
                from_phase: job.current_phase.max(1),
                slug: job.slug,
            })
            .collect();
        self.run("retry", "No failed books to retry", batch).await
    }

    /// Pause every running job.
    pub async fn pause_all(&self) -> BulkResult {
        let batch: Vec<Command> = self
            .sync
            .view()
            .jobs_with_status(JobStatus::InProgress)
            .into_iter()
            .map(|job| Command::Pause { slug: job.slug })
            .collect();
        self.run("pause", "No running books to pause", batch).await
    }

    /// Start up to the configured limit of pending jobs.
    pub async fn play_all_pending(&self) -> BulkResult {
        self.play_pending(self.play_limit).await
    }

    /// Start up to `limit` pending jobs.
    pub async fn play_pending(&self, limit: usize) -> BulkResult {
        let batch: Vec<Command> = self
            .sync
            .view()
            .jobs_with_status(JobStatus::Pending)
            .into_iter()
            .take(limit)
            .map(|job| Command::Play { slug: job.slug })
            .collect();
        self.run("start", "No pending books to start", batch).await
    }

    async fn run(&self, verb: &str, idle_message: &str, batch: Vec<Command>) -> BulkResult {
        if batch.is_empty() {
            return BulkResult::nothing_to_do(idle_message);
        }

        let total = batch.len();
        if !self.commands.server_available() {
            return BulkResult {
                success: false,
                message: SERVER_NOT_AVAILABLE.to_string(),
                total,
                succeeded: 0,
                failed: 0,
            };
        }

        let mut succeeded = 0;
        let mut failed = 0;
        for command in batch {
            let slug = command.slug().to_string();
            let result = self.commands.execute(command, ResyncPolicy::Deferred).await;
            if result.success {
                succeeded += 1;
            } else {
                warn!(verb, slug = %slug, message = %result.message, "bulk item failed");
                failed += 1;
            }
        }

        if let Err(e) = self.refresher.refresh().await {
            warn!(verb, error = %e, "resync after bulk operation failed");
        }

        let message = if failed == 0 {
            format!("{} {} of {} books", past_tense(verb), succeeded, total)
        } else {
            format!(
                "{} {} of {} books ({} failed)",
                past_tense(verb),
                succeeded,
                total,
                failed
            )
        };
        info!(verb, total, succeeded, failed, "bulk operation finished");

        BulkResult {
            success: succeeded > 0,
            message,
            total,
            succeeded,
            failed,
        }
    }
}

fn past_tense(verb: &str) -> &'static str {
    match verb {
        "retry" => "Retried",
        "pause" => "Paused",
        "start" => "Started",
        _ => "Processed",
    }
}
