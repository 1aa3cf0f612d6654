//! Terminal feedback for batch jobs: the `tracing` subscriber, progress bars
//! for jobs with a known item count, and spinners for Zotero fetches and
//! vault scans whose size is only known at the end.
//!
//! With `--log-only` every bar and spinner is hidden and progress is reported
//! as `tracing` events instead, so output stays readable under `tail -f` or
//! in a launchd log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

static LOG_ONLY: AtomicBool = AtomicBool::new(false);

const BAR_TEMPLATE: &str = "{msg:<24} [{bar:40.cyan/blue}] {pos}/{len} [{elapsed_precise}, ETA {eta}]";
const SPINNER_TEMPLATE: &str = "{spinner} {msg} [{elapsed_precise}]";

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// Install the stderr `tracing` subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// `850ms`, `12.3s`, `4m 05s`, `1h 02m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        format!("{}ms", d.as_millis())
    } else if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

fn hide_in_log_only(pb: &ProgressBar) -> bool {
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    is_log_only()
}

/// Bar for a job over `len` known items (PDFs, citation keys, attachments).
pub fn create_progress_bar(len: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if !hide_in_log_only(&pb) {
        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            pb.set_style(style.progress_chars("=> "));
        }
    }
    pb.set_message(msg.to_string());
    pb
}

/// Spinner for phases of unknown length. Update its message as counts come in.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if !hide_in_log_only(&pb) {
        if let Ok(style) = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE) {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Emit a `[phase] n/total` event every `interval` items in log-only mode.
pub fn log_progress(phase: &str, current: u64, total: u64, interval: u64) {
    if !is_log_only() || total == 0 || interval == 0 {
        return;
    }
    if current % interval == 0 || current == total {
        let pct = 100.0 * current as f64 / total as f64;
        info!("[{}] {}/{} ({:.1}%)", phase, current, total, pct);
    }
}

/// Close a bar or spinner with a summary line that also reaches log-only output.
pub fn finish_phase(pb: &ProgressBar, msg: String) {
    if is_log_only() {
        info!("{}", msg);
        pb.finish_and_clear();
    } else {
        pb.finish_with_message(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(245)), "4m 05s");
        assert_eq!(format_duration(Duration::from_secs(3720)), "1h 02m");
    }

    #[test]
    fn test_log_progress_ignores_empty_phases() {
        log_progress("hook", 0, 0, 50);
        log_progress("hook", 1, 10, 0);
    }

    #[test]
    fn test_bars_finish_cleanly() {
        let pb = create_progress_bar(3, "Matching");
        pb.inc(3);
        finish_phase(&pb, "Matched 3 files".to_string());
        assert!(pb.is_finished());

        let spinner = create_spinner("Fetching Zotero items");
        finish_phase(&spinner, "Fetched 0 items".to_string());
        assert!(spinner.is_finished());
    }
}
