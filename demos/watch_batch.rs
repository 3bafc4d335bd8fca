//! Watch a batch live and print a line every time the mirror changes.
//!
//! Requires a running pipeline service at http://127.0.0.1:8000.
//! Falls back to polling `batch-progress.json` whenever the event stream
//! is down.
//!
//! ```sh
//! RUST_LOG=pipeline_monitor=debug cargo run --example watch_batch
//! ```

use pipeline_monitor::{MonitorConfig, PipelineMonitor};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = MonitorConfig::builder()
        .with_endpoint("http://127.0.0.1:8000")
        .with_poll_interval(Duration::from_secs(30))
        .build();
    let monitor = PipelineMonitor::new(config);

    if monitor.start().await {
        println!("Pipeline is online, streaming updates");
    } else {
        eprintln!("Pipeline is not responding, polling the progress file");
    }

    let mut updates = monitor.subscribe();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                let summary = &view.snapshot.summary;
                println!(
                    "[{:?}] {}/{} complete, {} running, {} pending, {} failed ({}%)",
                    monitor.connection_state(),
                    summary.completed,
                    summary.total,
                    summary.in_progress,
                    summary.pending,
                    summary.failed,
                    view.stats.progress_percent,
                );
                if let Some(job) = &view.stats.current_job {
                    println!("  now: {} phase {} ({})", job.slug, job.current_phase, job.next_action);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    monitor.shutdown();
    Ok(())
}
