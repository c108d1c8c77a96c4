use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::capture::{CaptureReport, FrameBudget};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty | UiMode::Auto => true,
                UiMode::Plain => false,
            }
    }

    /// Progress display for a capture with the given budget.
    pub fn capture_progress(&self, budget: FrameBudget) -> CaptureProgress {
        if !self.use_pretty() {
            return CaptureProgress::new(None);
        }
        let bar = match budget {
            FrameBudget::Bounded(count) => {
                let bar = ProgressBar::new(u64::from(count));
                let style = ProgressStyle::with_template(
                    "{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} frames {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style);
                bar
            }
            FrameBudget::Unbounded => {
                let spinner = ProgressBar::new_spinner();
                let style =
                    ProgressStyle::with_template("{spinner} [{elapsed_precise}] {pos} frames {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner());
                spinner.set_style(style);
                spinner
            }
        };
        bar.set_draw_target(ProgressDrawTarget::stderr());
        bar.enable_steady_tick(Duration::from_millis(120));
        CaptureProgress::new(Some(bar))
    }
}

pub struct CaptureProgress {
    start: Instant,
    bar: Option<ProgressBar>,
}

impl CaptureProgress {
    fn new(bar: Option<ProgressBar>) -> Self {
        Self {
            start: Instant::now(),
            bar,
        }
    }

    pub fn update(&self, report: &CaptureReport) {
        if let Some(bar) = &self.bar {
            bar.set_position(report.frames_written);
            bar.set_message(format_bytes(report.bytes_written));
        }
    }

    pub fn finish(self, report: &CaptureReport) {
        let message = format!(
            "✔ {} frame(s), {} ({})",
            report.frames_written,
            format_bytes(report.bytes_written),
            format_duration(self.start.elapsed())
        );
        match &self.bar {
            Some(bar) => bar.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }

    pub fn abandon(self) {
        if let Some(bar) = &self.bar {
            bar.abandon();
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
