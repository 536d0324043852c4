// src/progress.rs

//! Progress reporting for long copy and convert operations
//!
//! Codecs report `(bytes_transferred, bytes_total)` through a `ProgressSink`.
//! The CLI plugs in an indicatif bar; library callers usually pass `Silent`
//! or rely on the codec convenience methods that do so for them.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Byte-transfer progress callback
///
/// Implementations must be thread-safe; the transcoding pipeline may report
/// from worker threads.
pub trait ProgressSink: Send + Sync {
    fn report(&self, transferred: u64, total: u64);
}

/// No-op sink for scripted or quiet usage
#[derive(Debug, Default)]
pub struct Silent;

impl ProgressSink for Silent {
    fn report(&self, _transferred: u64, _total: u64) {}
}

/// Logs coarse progress through tracing, one line per decile
#[derive(Debug, Default)]
pub struct LogProgress {
    last_decile: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for LogProgress {
    fn report(&self, transferred: u64, total: u64) {
        if total == 0 {
            return;
        }
        let decile = transferred * 10 / total;
        let previous = self.last_decile.swap(decile, Ordering::Relaxed);
        if decile != previous {
            debug!(transferred, total, "transfer progress");
        }
    }
}

/// indicatif-backed bar used by the CLI
pub struct BarProgress {
    bar: indicatif::ProgressBar,
}

impl BarProgress {
    pub fn new(label: &str) -> Self {
        let bar = indicatif::ProgressBar::new(0);
        let style = indicatif::ProgressStyle::with_template(
            "{msg} [{bar:40}] {bytes}/{total_bytes}",
        )
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
        .progress_chars("=> ");
        bar.set_style(style);
        bar.set_message(label.to_string());
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarProgress {
    fn report(&self, transferred: u64, total: u64) {
        if self.bar.length() != Some(total) {
            self.bar.set_length(total);
        }
        self.bar.set_position(transferred);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_progress_tolerates_zero_total() {
        LogProgress::new().report(5, 0);
    }
}
