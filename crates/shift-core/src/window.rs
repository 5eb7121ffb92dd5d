//! Shift time windows.
//!
//! A window is stored the way dispatchers enter it (a date plus wall-clock
//! start and end). Every comparison goes through [`ShiftWindow::span`], which
//! is the single place night shifts are rolled into the next day.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShiftWindow {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Normalized half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeSpan {
    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl ShiftWindow {
    pub fn new(date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            date,
            start_time,
            end_time,
        }
    }

    /// Parses `YYYY-MM-DD` plus `HH:MM` (or `HH:MM:SS`) times.
    pub fn parse(date: &str, start: &str, end: &str) -> Result<Self, String> {
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|err| format!("invalid date '{date}': {err}"))?;
        Ok(Self::new(date, parse_time(start)?, parse_time(end)?))
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end_time < self.start_time
    }

    pub fn span(&self) -> TimeSpan {
        let start = self.date.and_time(self.start_time);
        let end_date = if self.crosses_midnight() {
            self.date + Duration::days(1)
        } else {
            self.date
        };
        TimeSpan {
            start,
            end: end_date.and_time(self.end_time),
        }
    }

    /// `start < end` after night-shift normalization.
    pub fn is_well_formed(&self) -> bool {
        !self.span().is_empty()
    }

    pub fn overlaps(&self, other: &ShiftWindow) -> bool {
        self.span().overlaps(&other.span())
    }
}

impl std::fmt::Display for ShiftWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.date,
            self.start_time.format("%H:%M"),
            self.end_time.format("%H:%M")
        )
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|err| format!("invalid time '{value}': {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(date: &str, start: &str, end: &str) -> ShiftWindow {
        ShiftWindow::parse(date, start, end).expect("valid window")
    }

    #[test]
    fn day_shift_stays_on_its_date() {
        let span = window("2024-06-10", "08:00", "16:00").span();
        assert_eq!(span.start.to_string(), "2024-06-10 08:00:00");
        assert_eq!(span.end.to_string(), "2024-06-10 16:00:00");
        assert_eq!(span.duration(), Duration::hours(8));
    }

    #[test]
    fn night_shift_ends_on_next_day() {
        let night = window("2024-06-10", "22:00", "06:00");
        assert!(night.crosses_midnight());
        let span = night.span();
        assert_eq!(span.end.to_string(), "2024-06-11 06:00:00");
        assert_eq!(span.duration(), Duration::hours(8));
    }

    #[test]
    fn touching_windows_do_not_overlap() {
        let morning = window("2024-06-10", "08:00", "12:00");
        let afternoon = window("2024-06-10", "12:00", "16:00");
        assert!(!morning.overlaps(&afternoon));
        assert!(!afternoon.overlaps(&morning));
    }

    #[test]
    fn night_shift_overlaps_following_morning() {
        let night = window("2024-06-10", "22:00", "06:00");
        let early = window("2024-06-11", "05:00", "09:00");
        let later = window("2024-06-11", "06:00", "09:00");
        assert!(night.overlaps(&early));
        assert!(!night.overlaps(&later));
    }

    #[test]
    fn equal_start_and_end_is_malformed() {
        assert!(!window("2024-06-10", "08:00", "08:00").is_well_formed());
        assert!(window("2024-06-10", "08:00", "08:01").is_well_formed());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ShiftWindow::parse("2024-13-01", "08:00", "09:00").is_err());
        assert!(ShiftWindow::parse("2024-06-10", "8am", "09:00").is_err());
        assert!(ShiftWindow::parse("2024-06-10", "08:00:30", "09:00").is_ok());
    }

    #[test]
    fn display_uses_hours_and_minutes() {
        assert_eq!(
            window("2024-06-10", "14:00", "20:00").to_string(),
            "2024-06-10 14:00-20:00"
        );
    }
}
