//! Progress reporting for bulk scans

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar fed by the scan callback, which may be called from any
/// scan thread
#[derive(Debug)]
pub struct ProgressReporter {
    pub bar: Option<ProgressBar>,
}

impl ProgressReporter {
    /// Spinner that turns into a bar once the table count is known
    pub fn new_for_scan() -> Self {
        Self {
            bar: Some(create_spinner("Listing tables...")),
        }
    }

    /// Create minimal progress reporter (no progress bars)
    pub fn new_minimal() -> Self {
        Self { bar: None }
    }

    pub fn update(&self, processed: usize, total: usize) {
        if let Some(pb) = &self.bar {
            if pb.length() != Some(total as u64) {
                pb.set_style(bar_style());
                pb.set_length(total as u64);
                pb.set_message("Comparing tables");
            }
            pb.set_position(processed as u64);
        }
    }

    pub fn finish(&mut self, message: &str) {
        if let Some(pb) = self.bar.take() {
            pb.finish_with_message(message.to_string());
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
    }
}

/// Create a spinner progress bar
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>5}/{len:5} {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}
