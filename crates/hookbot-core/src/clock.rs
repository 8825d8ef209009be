//! Process start bookkeeping for the `uptime` command.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Captures when the process started, both monotonic and wall-clock.
#[derive(Debug, Clone, Copy)]
pub struct ProcessClock {
    started: Instant,
    started_at: DateTime<Utc>,
}

impl ProcessClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for ProcessClock {
    fn default() -> Self {
        Self::start()
    }
}

/// Seconds since the Unix epoch, the unit Slack expects for attachment `ts`.
pub fn current_unix_timestamp() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

/// Renders a duration as `1d2h3m4s`, dropping leading zero units.
pub fn format_uptime(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut rendered = String::new();
    if days > 0 {
        rendered.push_str(&format!("{days}d"));
    }
    if days > 0 || hours > 0 {
        rendered.push_str(&format!("{hours}h"));
    }
    if days > 0 || hours > 0 || minutes > 0 {
        rendered.push_str(&format!("{minutes}m"));
    }
    rendered.push_str(&format!("{seconds}s"));
    rendered
}
