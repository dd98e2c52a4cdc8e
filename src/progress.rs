//! Progress bars and run logging.
//!
//! Bars and spinners are hidden in log-only mode, which instead prints
//! periodic `[phase] n/total` lines that stay readable under `tail -f`.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Set once from `--log-only` before any bar is created.
pub static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// "4.2s" below a minute, "1.5m" above.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

const BAR_TEMPLATE: &str =
    "{msg:<28} [{elapsed_precise}] [{bar:40.cyan/blue}] {human_pos}/{human_len} rows ({per_sec}, ETA {eta})";
const SPINNER_TEMPLATE: &str = "{spinner} {msg} [{elapsed_precise}]";

/// Hidden in log-only mode; otherwise draws with `style`.
fn styled(pb: ProgressBar, style: ProgressStyle, msg: &str) -> ProgressBar {
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb
}

/// Row counter for table reads and writes.
pub fn create_progress_bar(len: u64, msg: &str) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap()
        .progress_chars("=> ");
    styled(ProgressBar::new(len), style, msg)
}

/// Only logs in log-only mode, every `interval` items and at the end.
pub fn log_progress(phase: &str, current: u64, total: u64, interval: u64) {
    if total == 0 || interval == 0 {
        return;
    }
    if is_log_only() && (current % interval == 0 || current == total) {
        let pct = 100.0 * current as f64 / total as f64;
        eprintln!("[{}] {}/{} ({:.1}%)", phase, current, total, pct);
    }
}

/// Spinner for in-memory passes with no row count. In log-only mode the
/// phase name is printed once instead.
pub fn create_spinner(msg: &str) -> ProgressBar {
    if is_log_only() {
        eprintln!("[{}] started", msg);
    }
    let style = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE).unwrap();
    let pb = styled(ProgressBar::new_spinner(), style, msg);
    if !is_log_only() {
        pb.enable_steady_tick(Duration::from_millis(120));
    }
    pb
}

/// Print a phase summary as `[STATS:<phase>]` followed by pretty JSON on stderr.
pub fn log_stats<T: Serialize>(phase: &str, stats: &T) {
    match serde_json::to_string_pretty(stats) {
        Ok(json) => eprintln!("[STATS:{}]\n{}", phase, json),
        Err(e) => eprintln!("[STATS:{}] failed to serialize stats: {}", phase, e),
    }
}

/// Final artifact line on stdout: `OK <artifact> -> <path>`.
pub fn report_artifact(artifact: &str, path: &Path) {
    println!("OK {} -> {}", artifact, path.display());
}

pub fn warn(message: &str) {
    eprintln!("WARNING: {}", message);
}
