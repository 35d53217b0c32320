use std::time::{Duration, Instant};

use crate::logging::{LogLevel, ScopedLogger};

/// Logs how long a scope took, at debug level, when dropped.
pub struct ScopedExecutionTimer<'a> {
    task_name: &'a str,
    started_at: Instant,
    log: &'a ScopedLogger,
}

impl<'a> ScopedExecutionTimer<'a> {
    pub fn new(task_name: &'a str, log: &'a ScopedLogger) -> Self {
        Self {
            task_name,
            started_at: Instant::now(),
            log,
        }
    }
}

impl Drop for ScopedExecutionTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.started_at.elapsed();
        if !self.log.enabled(LogLevel::Debug) {
            return;
        }
        self.log.debug(&format!(
            "'{}' finished in {}",
            self.task_name,
            format_duration_human_friendly(elapsed)
        ));
    }
}

fn format_duration_human_friendly(duration: Duration) -> String {
    let total_ms = duration.as_secs_f64() * 1000.0;
    if total_ms < 1_000.0 {
        return format!("{total_ms:.2} ms");
    }

    let total_seconds = total_ms / 1_000.0;
    if total_seconds < 60.0 {
        return format!("{total_ms:.2} ms ({total_seconds:.2} s)");
    }

    let minutes = (total_seconds / 60.0).floor();
    let seconds_remainder = total_seconds - (minutes * 60.0);
    format!(
        "{total_ms:.2} ms ({:.0}m {:.2}s)",
        minutes, seconds_remainder
    )
}
