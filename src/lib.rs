//! # pipeline-monitor
//!
//! Async monitor and control client for a multi-phase book-processing
//! pipeline (11 phases per book).
//!
//! ## Features
//!
//! - **Live mirror**: a local copy of every job, kept in sync by a
//!   server-sent event stream with a polling fallback while the stream is down
//! - **Derived stats**: summary counts, failure count, current job and
//!   completion percentage, always recomputed locally
//! - **Optimistic commands**: play / pause / retry / remove show up
//!   immediately and are resynced from the server when they fail
//! - **Bulk actions**: retry all failed, pause all, start pending, one book
//!   at a time with partial-failure tolerance
//! - **Log tailing**: structured per-book log stream in an append-only buffer
//!
//! ## Quick Start
//!
//! ```no_run
//! use pipeline_monitor::{MonitorConfig, PipelineMonitor};
//!
//! # async fn example() {
//! let monitor = PipelineMonitor::new(MonitorConfig::default());
//! monitor.start().await;
//!
//! let mut updates = monitor.subscribe();
//! while updates.changed().await.is_ok() {
//!     let view = updates.borrow().clone();
//!     println!(
//!         "{}/{} complete, {} failed",
//!         view.snapshot.summary.completed,
//!         view.snapshot.summary.total,
//!         view.stats.failed_count,
//!     );
//!     if view.stats.has_failures {
//!         let result = monitor.bulk().retry_all_failed().await;
//!         println!("{}", result.message);
//!     }
//! }
//! # }
//! ```

pub mod bulk;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod logs;
pub mod monitor;
pub mod phases;
pub mod poll;
pub mod probe;
pub mod sse;
pub mod stream;
pub mod sync;
pub mod types;

pub use bulk::BulkOrchestrator;
pub use client::PipelineClient;
pub use commands::{Command, CommandExecutor, CommandPhase, ResyncPolicy};
pub use config::{MonitorConfig, MonitorConfigBuilder};
pub use error::{MonitorError, Result};
pub use logs::{LogEvent, LogTail, LogView, TailStatus};
pub use monitor::PipelineMonitor;
pub use phases::TOTAL_PHASES;
pub use poll::{Poller, Refresher};
pub use probe::ServerProbe;
pub use stream::{BatchEvent, EventStream};
pub use sync::{BatchStats, BatchView, JobPatch, SyncEvent, Synchronizer};
pub use types::{
    BatchSnapshot, BulkResult, CommandAck, CommandResult, ConnectionState, Job, JobStatus,
    LogEntry, LogLevel, NewBook, Summary,
};
