//! Rate limit window durations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Window used when none is configured or a window string cannot be parsed.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(60_000);

/// Unit of a human-readable window such as `"15 minutes"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        let singular = name.strip_suffix('s').unwrap_or(name);
        match singular {
            "second" => Some(TimeUnit::Second),
            "minute" => Some(TimeUnit::Minute),
            "hour" => Some(TimeUnit::Hour),
            "day" => Some(TimeUnit::Day),
            _ => None,
        }
    }
}

/// Length of a fixed rate limit window.
///
/// Configured either as a millisecond count or as `<number> <unit>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow(Duration);

impl TimeWindow {
    /// Create a window from a duration.
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Create a window from a millisecond count.
    pub fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    /// Parse a `<number> <unit>` string, e.g. `"15 minutes"` or `"1hour"`.
    ///
    /// Returns `None` when the string does not follow that shape.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim().to_ascii_lowercase();
        let digits_end = input
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(input.len());
        if digits_end == 0 {
            return None;
        }

        let amount: u32 = input[..digits_end].parse().ok()?;
        let unit = TimeUnit::from_name(input[digits_end..].trim_start())?;
        Some(Self(unit.duration() * amount))
    }

    /// Parse a window string, falling back to [`DEFAULT_WINDOW`] when it is malformed.
    pub fn parse_or_default(input: &str) -> Self {
        Self::parse(input).unwrap_or_else(|| {
            warn!(
                time_window = %input,
                default_ms = DEFAULT_WINDOW.as_millis() as u64,
                "Unrecognized rate limit window, using default"
            );
            Self(DEFAULT_WINDOW)
        })
    }

    /// Get the window duration.
    pub fn duration(&self) -> Duration {
        self.0
    }

    /// Get the window length in milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self(DEFAULT_WINDOW)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawWindow {
    Millis(u64),
    Text(String),
}

impl<'de> Deserialize<'de> for TimeWindow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawWindow::deserialize(deserializer)? {
            RawWindow::Millis(ms) => TimeWindow::from_millis(ms),
            RawWindow::Text(text) => match text.trim().parse::<u64>() {
                Ok(ms) => TimeWindow::from_millis(ms),
                Err(_) => TimeWindow::parse_or_default(&text),
            },
        })
    }
}

impl Serialize for TimeWindow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.as_millis())
    }
}
