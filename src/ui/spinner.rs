use std::future::Future;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

const TICK: Duration = Duration::from_millis(80);
const MIN_VISIBLE: Duration = Duration::from_millis(600);
const FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "];

fn spinner(message: &str) -> ProgressBar {
    let style = ProgressStyle::default_spinner().tick_strings(FRAMES);
    let style = style
        .clone()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or(style);
    let bar = ProgressBar::new_spinner()
        .with_style(style)
        .with_message(message.to_string());
    bar.enable_steady_tick(TICK);
    bar
}

/// Awaits `fut` behind a spinner on stderr. Without a terminal the future
/// runs as-is.
pub async fn with_spinner<T, F: Future<Output = T>>(message: &str, fut: F) -> T {
    if !std::io::stderr().is_terminal() {
        return fut.await;
    }

    let bar = spinner(message);
    let start = Instant::now();
    let result = fut.await;

    if let Some(rest) = MIN_VISIBLE.checked_sub(start.elapsed()) {
        tokio::time::sleep(rest).await;
    }
    bar.finish_and_clear();
    result
}
