use serde::Serialize;
use tokio::sync::watch;

use crate::types::*;

/// Values derived from a snapshot, recomputed on every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub has_failures: bool,
    pub failed_count: usize,
    /// First job found `in_progress`, if any.
    pub current_job: Option<Job>,
    pub is_running: bool,
    pub progress_percent: u8,
    pub pending_count: usize,
}

impl BatchStats {
    pub fn compute(snapshot: &BatchSnapshot) -> Self {
        let summary = &snapshot.summary;
        let current_job = snapshot
            .books
            .iter()
            .find(|j| j.status == JobStatus::InProgress)
            .cloned();
        let percent = summary.completed as f64 / summary.total.max(1) as f64 * 100.0;

        Self {
            has_failures: summary.failed > 0,
            failed_count: summary.failed,
            is_running: current_job.is_some(),
            current_job,
            progress_percent: percent.round() as u8,
            pending_count: summary.pending,
        }
    }
}

/// Partial update applied to one job ahead of server confirmation.
///
/// `None` leaves a field untouched; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub current_phase: Option<u32>,
    pub phases_completed: Option<String>,
    pub next_action: Option<String>,
    pub last_error: Option<Option<String>>,
    pub started_at: Option<Option<String>>,
    pub paused_at: Option<Option<String>>,
}

impl JobPatch {
    fn apply_to(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(phase) = self.current_phase {
            job.current_phase = phase;
        }
        if let Some(phases) = &self.phases_completed {
            job.phases_completed = phases.clone();
        }
        if let Some(action) = &self.next_action {
            job.next_action = action.clone();
        }
        if let Some(err) = &self.last_error {
            job.last_error = err.clone();
        }
        if let Some(ts) = &self.started_at {
            job.started_at = ts.clone();
        }
        if let Some(ts) = &self.paused_at {
            job.paused_at = ts.clone();
        }
    }
}

/// Everything that can change the local mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Authoritative full state from the stream or the poller.
    Snapshot(BatchSnapshot),
    /// Tentative change to one job.
    Optimistic { slug: String, patch: JobPatch },
    /// Tentative removal of one job.
    Remove { slug: String },
}

/// The local mirror: snapshot plus its derived values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchView {
    pub snapshot: BatchSnapshot,
    pub stats: BatchStats,
}

impl BatchView {
    pub fn new(snapshot: BatchSnapshot) -> Self {
        let mut view = Self::default();
        view.apply(SyncEvent::Snapshot(snapshot));
        view
    }

    /// Reduce one event into the view. Returns `false` if nothing changed.
    pub fn apply(&mut self, event: SyncEvent) -> bool {
        match event {
            SyncEvent::Snapshot(snapshot) => {
                self.snapshot = snapshot;
            }
            SyncEvent::Optimistic { slug, patch } => {
                match self.snapshot.books.iter_mut().find(|j| j.slug == slug) {
                    Some(job) => patch.apply_to(job),
                    None => return false,
                }
            }
            SyncEvent::Remove { slug } => {
                let before = self.snapshot.books.len();
                self.snapshot.books.retain(|j| j.slug != slug);
                if self.snapshot.books.len() == before {
                    return false;
                }
            }
        }
        // Never trust a transported summary
        self.snapshot.summary = Summary::from_jobs(&self.snapshot.books);
        self.stats = BatchStats::compute(&self.snapshot);
        true
    }

    pub fn job(&self, slug: &str) -> Option<&Job> {
        self.snapshot.job(slug)
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<Job> {
        self.snapshot
            .books
            .iter()
            .filter(|j| j.status == status)
            .cloned()
            .collect()
    }
}

/// Single owner of the local mirror.
///
/// Every write goes through [`BatchView::apply`]; observers get a
/// `watch::Receiver` and always see a fully recomputed view.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    tx: watch::Sender<BatchView>,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synchronizer {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(BatchView::default());
        Self { tx }
    }

    /// Replace the mirror with an authoritative snapshot.
    pub fn apply_snapshot(&self, snapshot: BatchSnapshot) {
        self.dispatch(SyncEvent::Snapshot(snapshot));
    }

    /// Apply a tentative change to one job. Unknown slugs are ignored.
    pub fn apply_optimistic(&self, slug: &str, patch: JobPatch) {
        self.dispatch(SyncEvent::Optimistic {
            slug: slug.to_string(),
            patch,
        });
    }

    /// Drop one job from the mirror immediately.
    pub fn remove(&self, slug: &str) {
        self.dispatch(SyncEvent::Remove {
            slug: slug.to_string(),
        });
    }

    pub fn dispatch(&self, event: SyncEvent) {
        self.tx.send_if_modified(|view| view.apply(event));
    }

    /// Clone of the current view.
    pub fn view(&self) -> BatchView {
        self.tx.borrow().clone()
    }

    pub fn stats(&self) -> BatchStats {
        self.tx.borrow().stats.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchView> {
        self.tx.subscribe()
    }
}
