use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Minutes since business-local midnight.
pub type Minutes = i32;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    Malformed(String),
    OutOfRange(String),
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::Malformed(s) => write!(f, "malformed time of day: {s:?} (expected HH:MM)"),
            TimeError::OutOfRange(s) => write!(f, "time of day out of range: {s:?}"),
        }
    }
}

impl std::error::Error for TimeError {}

/// Parse `HH:MM` into minutes since midnight. `24:00` is accepted as end of day.
pub fn time_to_minutes(hhmm: &str) -> Result<Minutes, TimeError> {
    let malformed = || TimeError::Malformed(hhmm.to_string());
    let (h, m) = hhmm.trim().split_once(':').ok_or_else(malformed)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(malformed());
    }
    if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let hours: Minutes = h.parse().map_err(|_| malformed())?;
    let minutes: Minutes = m.parse().map_err(|_| malformed())?;
    if minutes >= 60 || hours > 24 || (hours == 24 && minutes != 0) {
        return Err(TimeError::OutOfRange(hhmm.to_string()));
    }
    Ok(hours * 60 + minutes)
}

pub fn minutes_to_time(minutes: Minutes) -> String {
    debug_assert!((0..=MINUTES_PER_DAY).contains(&minutes));
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Half-open overlap: touching boundaries do not overlap.
pub fn overlaps(start_a: Minutes, end_a: Minutes, start_b: Minutes, end_b: Minutes) -> bool {
    start_a < end_b && end_a > start_b
}

/// Absolute business-local instant for a time of day on `date`.
pub fn at(date: NaiveDate, minutes: Minutes) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::minutes(minutes as i64)
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    #[serde(with = "hhmm")]
    pub start: Minutes,
    #[serde(with = "hhmm")]
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", minutes_to_time(self.start), minutes_to_time(self.end))
    }
}

/// Serde adapter rendering a `Minutes` field as `"HH:MM"`.
pub mod hhmm {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{minutes_to_time, time_to_minutes, Minutes};

    pub fn serialize<S: Serializer>(minutes: &Minutes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&minutes_to_time(*minutes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Minutes, D::Error> {
        let raw = String::deserialize(d)?;
        time_to_minutes(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format() {
        assert_eq!(time_to_minutes("09:00").unwrap(), 540);
        assert_eq!(time_to_minutes("9:30").unwrap(), 570);
        assert_eq!(time_to_minutes("00:00").unwrap(), 0);
        assert_eq!(time_to_minutes("24:00").unwrap(), MINUTES_PER_DAY);
        assert_eq!(minutes_to_time(540), "09:00");
        assert_eq!(minutes_to_time(1065), "17:45");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(time_to_minutes("0900"), Err(TimeError::Malformed(_))));
        assert!(matches!(time_to_minutes("9:5"), Err(TimeError::Malformed(_))));
        assert!(matches!(time_to_minutes("ab:cd"), Err(TimeError::Malformed(_))));
        assert!(matches!(time_to_minutes("+9:00"), Err(TimeError::Malformed(_))));
        assert!(matches!(time_to_minutes("25:00"), Err(TimeError::OutOfRange(_))));
        assert!(matches!(time_to_minutes("24:30"), Err(TimeError::OutOfRange(_))));
        assert!(matches!(time_to_minutes("12:60"), Err(TimeError::OutOfRange(_))));
    }

    #[test]
    fn overlap_is_half_open() {
        assert!(overlaps(600, 640, 620, 660));
        assert!(!overlaps(600, 640, 640, 680)); // touching
        assert!(!overlaps(640, 680, 600, 640));
        assert!(overlaps(600, 700, 620, 630)); // containment
    }

    #[test]
    fn span_basics() {
        let s = Span::new(600, 640);
        assert_eq!(s.duration(), 40);
        assert!(s.overlaps(&Span::new(639, 700)));
        assert!(!s.overlaps(&Span::new(640, 700)));
        assert!(Span::new(540, 1080).contains_span(&s));
        assert_eq!(s.to_string(), "10:00-10:40");
    }

    #[test]
    fn absolute_instant() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let instant = at(date, 630);
        assert_eq!(instant.to_string(), "2026-10-20 10:30:00");
    }

    #[test]
    fn span_serializes_as_clock_time() {
        let json = serde_json::to_string(&Span::new(540, 580)).unwrap();
        assert_eq!(json, r#"{"start":"09:00","end":"09:40"}"#);
        let back: Span = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Span::new(540, 580));
    }
}
