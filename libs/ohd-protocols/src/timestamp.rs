//! Plain date/time record carried by DI readings and persisted events

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use std::fmt;

/// Calendar date and wall-clock time, second resolution, no zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp {
    /// Current local wall-clock time
    pub fn now_local() -> Self {
        Self::from(Local::now().naive_local())
    }

    /// `HH:MM:SS` as carried in `readingTime`
    pub fn reading_time(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }

    /// `YYYY-MM-DD` as carried in `readingDate`
    pub fn reading_date(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(dt: NaiveDateTime) -> Self {
        Self {
            year: dt.year().clamp(0, i32::from(u16::MAX)) as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.reading_date(), self.reading_time())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn sample() -> Timestamp {
        Timestamp {
            year: 2024,
            month: 3,
            day: 7,
            hour: 9,
            minute: 5,
            second: 2,
        }
    }

    #[test]
    fn test_reading_fields_are_zero_padded() {
        let ts = sample();
        assert_eq!(ts.reading_time(), "09:05:02");
        assert_eq!(ts.reading_date(), "2024-03-07");
        assert_eq!(ts.to_string(), "2024-03-07 09:05:02");
    }

    #[test]
    fn test_from_naive_date_time() {
        let naive = chrono::NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 2)
            .unwrap();
        assert_eq!(Timestamp::from(naive), sample());
    }
}
