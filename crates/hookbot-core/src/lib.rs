//! Foundational low-level utilities shared across hookbot crates.
//!
//! Provides the Unix timestamp helper, the process uptime clock and the
//! display time zone used when rendering stored timestamps back to chat users.

pub mod clock;
pub mod time_zone;

pub use clock::{current_unix_timestamp, format_uptime, ProcessClock};
pub use time_zone::DisplayTimeZone;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_unix_timestamp_tracks_process_clock_start() {
        let clock = ProcessClock::start();
        let now = current_unix_timestamp();
        let started = u64::try_from(clock.started_at().timestamp()).expect("post-epoch");
        assert!(now >= started);
        assert!(now <= started.saturating_add(1));
    }
}
