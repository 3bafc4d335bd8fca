//! Follow the log stream of one book.
//!
//! ```sh
//! cargo run --example tail_logs -- my-book-slug
//! ```

use pipeline_monitor::{LogTail, PipelineClient, TailStatus};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let slug = match std::env::args().nth(1) {
        Some(s) => s,
        None => {
            eprintln!("usage: tail_logs <book-slug>");
            return Ok(());
        }
    };

    let tail = LogTail::new(PipelineClient::new("http://127.0.0.1:8000"), 50);
    tail.attach(&slug);

    let mut updates = tail.subscribe();
    let mut printed = 0;
    while updates.changed().await.is_ok() {
        let view = updates.borrow_and_update().clone();
        for entry in view.entries.iter().skip(printed) {
            let level = entry.level.map(|l| l.as_str().to_string()).unwrap_or_default();
            match entry.phase {
                Some(phase) => println!("[{:>7}] phase {:>2}  {}", level, phase, entry.message),
                None => println!("[{:>7}]           {}", level, entry.message),
            }
        }
        printed = view.entries.len();

        if view.status == TailStatus::Error {
            eprintln!("{}", view.last_error.unwrap_or_default());
            break;
        }
    }

    tail.detach();
    Ok(())
}
