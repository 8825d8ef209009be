//! Display time zone applied to stored UTC timestamps.

use std::{fmt, str::FromStr};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

pub const DEFAULT_DISPLAY_TIME_ZONE: &str = "Asia/Tokyo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayTimeZone(Tz);

impl DisplayTimeZone {
    pub fn tz(&self) -> Tz {
        self.0
    }

    /// Formats `timestamp` in this zone, e.g. `2024-05-01T09:00:00+09:00`.
    pub fn render(&self, timestamp: DateTime<Utc>) -> String {
        timestamp.with_timezone(&self.0).to_rfc3339()
    }
}

impl Default for DisplayTimeZone {
    fn default() -> Self {
        Self(chrono_tz::Asia::Tokyo)
    }
}

impl FromStr for DisplayTimeZone {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        raw.trim()
            .parse::<Tz>()
            .map(Self)
            .map_err(|error| anyhow!("unknown time zone '{}': {error}", raw.trim()))
    }
}

impl fmt::Display for DisplayTimeZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.name())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{DisplayTimeZone, DEFAULT_DISPLAY_TIME_ZONE};

    #[test]
    fn unit_default_zone_matches_constant() {
        let parsed: DisplayTimeZone = DEFAULT_DISPLAY_TIME_ZONE.parse().expect("parse");
        assert_eq!(parsed, DisplayTimeZone::default());
        assert_eq!(parsed.to_string(), "Asia/Tokyo");
    }

    #[test]
    fn unit_render_applies_offset() {
        let zone: DisplayTimeZone = "Asia/Tokyo".parse().expect("parse");
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(zone.render(timestamp), "2024-05-01T09:00:00+09:00");
    }

    #[test]
    fn regression_unknown_zone_is_rejected() {
        let error = "Mars/Olympus".parse::<DisplayTimeZone>().unwrap_err();
        assert!(error.to_string().contains("unknown time zone"));
    }
}
