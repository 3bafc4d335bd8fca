//! Retry every failed book, then start the next few pending ones.
//!
//! Each bulk action walks the matching books one at a time and reports
//! how many requests succeeded.
//!
//! ```sh
//! cargo run --example bulk_actions
//! ```

use pipeline_monitor::{MonitorConfig, PipelineMonitor};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let monitor = PipelineMonitor::new(
        MonitorConfig::builder()
            .with_endpoint("http://127.0.0.1:8000")
            .with_bulk_play_limit(3)
            .build(),
    );

    if !monitor.check_server().await {
        eprintln!("Pipeline is not responding");
        return Ok(());
    }
    monitor.refresh().await?;

    let stats = monitor.view().stats;
    println!(
        "{} failed, {} pending, {}% complete",
        stats.failed_count, stats.pending_count, stats.progress_percent
    );

    let retried = monitor.bulk().retry_all_failed().await;
    println!("Retry: {}", retried.message);

    let started = monitor.bulk().play_all_pending().await;
    println!("Start: {}", started.message);
    if !started.success && started.total > 0 {
        eprintln!("No pending book could be started");
    }

    monitor.shutdown();
    Ok(())
}
