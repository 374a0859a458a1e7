//! Timestamp extraction from SHDR records
//!
//! The leading token of a data record is an optional ISO-8601 UTC
//! timestamp, optionally suffixed `@<duration>`. When absent or invalid
//! the agent timestamps on receipt. In relative-time mode the first seen
//! stamp anchors an offset against the agent clock; later stamps are
//! shifted by the same offset, so an adapter may send monotonic
//! milliseconds instead of wall-clock time.

use chrono::{DateTime, Duration, Utc};

/// An extracted timestamp and optional sample duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractedTime {
    pub timestamp: DateTime<Utc>,
    pub duration: Option<f64>,
}

/// Stateful extractor, one per source.
#[derive(Debug, Default)]
pub struct TimestampExtractor {
    relative: bool,
    /// Offset base in relative mode: (first stamp observed, agent clock then).
    base: Option<RelativeBase>,
}

#[derive(Debug, Clone, Copy)]
enum RelativeBase {
    /// First token parsed as ISO-8601
    Time(DateTime<Utc>, DateTime<Utc>),
    /// First token parsed as milliseconds
    Offset(f64, DateTime<Utc>),
}

impl TimestampExtractor {
    pub fn new(relative: bool) -> Self {
        Self {
            relative,
            base: None,
        }
    }

    pub fn set_relative(&mut self, relative: bool) {
        self.relative = relative;
        self.base = None;
    }

    /// Interpret the leading token of a record at agent time `now`.
    ///
    /// An empty or unparseable token yields `now`.
    pub fn extract(&mut self, token: &str, now: DateTime<Utc>) -> ExtractedTime {
        let (stamp_text, duration) = split_duration(token);

        if stamp_text.is_empty() {
            return ExtractedTime {
                timestamp: now,
                duration,
            };
        }

        if self.relative {
            return ExtractedTime {
                timestamp: self.relative_time(stamp_text, now),
                duration,
            };
        }

        let timestamp = parse_iso(stamp_text).unwrap_or(now);
        ExtractedTime {
            timestamp,
            duration,
        }
    }

    fn relative_time(&mut self, stamp_text: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.base {
            None => {
                self.base = Some(match parse_iso(stamp_text) {
                    Some(ts) => RelativeBase::Time(ts, now),
                    None => match stamp_text.parse::<f64>() {
                        Ok(ms) => RelativeBase::Offset(ms, now),
                        Err(_) => return now,
                    },
                });
                now
            }
            Some(RelativeBase::Time(first, anchor)) => match parse_iso(stamp_text) {
                Some(ts) => anchor + (ts - first),
                None => now,
            },
            Some(RelativeBase::Offset(first_ms, anchor)) => match stamp_text.parse::<f64>() {
                Ok(ms) => anchor + Duration::microseconds(((ms - first_ms) * 1000.0) as i64),
                Err(_) => now,
            },
        }
    }
}

fn split_duration(token: &str) -> (&str, Option<f64>) {
    match token.split_once('@') {
        Some((stamp, duration)) => (stamp, duration.parse::<f64>().ok()),
        None => (token, None),
    }
}

fn parse_iso(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn absolute_timestamps_pass_through() {
        let mut ex = TimestampExtractor::new(false);
        let now = at("2021-01-19T11:00:00Z");
        let t = ex.extract("2021-01-19T10:00:00Z", now);
        assert_eq!(t.timestamp, at("2021-01-19T10:00:00Z"));
        assert_eq!(t.duration, None);
    }

    #[test]
    fn empty_token_uses_wall_clock() {
        let mut ex = TimestampExtractor::new(false);
        let now = Utc.with_ymd_and_hms(2021, 1, 19, 11, 0, 0).unwrap();
        assert_eq!(ex.extract("", now).timestamp, now);
    }

    #[test]
    fn duration_suffix_is_split_off() {
        let mut ex = TimestampExtractor::new(false);
        let now = Utc::now();
        let t = ex.extract("2021-01-19T10:00:00Z@100.5", now);
        assert_eq!(t.duration, Some(100.5));
    }

    #[test]
    fn relative_mode_offsets_from_first_seen() {
        let mut ex = TimestampExtractor::new(true);
        let now = at("2021-01-19T11:00:00Z");

        // First stamp anchors at the agent clock.
        let first = ex.extract("2021-01-19T00:00:00Z", now);
        assert_eq!(first.timestamp, now);

        // Ten seconds later in source time is ten seconds after the anchor.
        let later = ex.extract("2021-01-19T00:00:10Z", at("2021-01-19T11:59:00Z"));
        assert_eq!(later.timestamp, at("2021-01-19T11:00:10Z"));
    }

    #[test]
    fn relative_mode_accepts_millisecond_offsets() {
        let mut ex = TimestampExtractor::new(true);
        let now = at("2021-01-19T11:00:00Z");
        assert_eq!(ex.extract("1000", now).timestamp, now);

        let later = ex.extract("3500", at("2021-01-19T12:00:00Z"));
        assert_eq!(later.timestamp, at("2021-01-19T11:00:02.500Z"));
    }
}
