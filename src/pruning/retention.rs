use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, Duration, Months, Utc};

use crate::pruning::errors::{PruningError, PruningResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionUnit {
    Year,
    Month,
    Day,
    Hour,
    Minute,
}

impl FromStr for RetentionUnit {
    type Err = PruningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "year" => Ok(RetentionUnit::Year),
            "month" => Ok(RetentionUnit::Month),
            "day" => Ok(RetentionUnit::Day),
            "hour" => Ok(RetentionUnit::Hour),
            "minute" => Ok(RetentionUnit::Minute),
            other => Err(PruningError::Config(format!(
                "unknown retention unit {other:?}"
            ))),
        }
    }
}

impl fmt::Display for RetentionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetentionUnit::Year => "year",
            RetentionUnit::Month => "month",
            RetentionUnit::Day => "day",
            RetentionUnit::Hour => "hour",
            RetentionUnit::Minute => "minute",
        };
        f.write_str(name)
    }
}

/// How long records are kept after their relevant timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub time: u32,
    pub unit: RetentionUnit,
}

impl Retention {
    pub fn new(time: u32, unit: RetentionUnit) -> Self {
        Self { time, unit }
    }

    /// Parses the configured pair, e.g. `30` and `"day"`.
    pub fn from_config(time: u32, unit: &str) -> PruningResult<Self> {
        Ok(Self::new(time, unit.parse()?))
    }

    /// `now` minus the retention period. Years and months use calendar
    /// arithmetic, so the day of month is clamped at month ends.
    pub fn cutoff(&self, now: DateTime<Utc>) -> PruningResult<DateTime<Utc>> {
        let time = self.time;
        let cutoff = match self.unit {
            RetentionUnit::Year => time
                .checked_mul(12)
                .and_then(|months| now.checked_sub_months(Months::new(months))),
            RetentionUnit::Month => now.checked_sub_months(Months::new(time)),
            RetentionUnit::Day => now.checked_sub_days(Days::new(time.into())),
            RetentionUnit::Hour => Duration::try_hours(time.into())
                .and_then(|delta| now.checked_sub_signed(delta)),
            RetentionUnit::Minute => Duration::try_minutes(time.into())
                .and_then(|delta| now.checked_sub_signed(delta)),
        };
        cutoff.ok_or_else(|| {
            PruningError::Config(format!("retention of {time} {} is out of range", self.unit))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_cutoff() {
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 12, 0, 0).unwrap();
        let cutoff = Retention::new(30, RetentionUnit::Day).cutoff(now).unwrap();
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2024, 3, 11, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_calendar_units_clamp_month_end() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap();
        assert_eq!(
            Retention::new(1, RetentionUnit::Month).cutoff(now).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );
        assert_eq!(
            Retention::new(1, RetentionUnit::Year).cutoff(now).unwrap(),
            Utc.with_ymd_and_hms(2023, 3, 31, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_clock_units() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        assert_eq!(
            Retention::new(45, RetentionUnit::Minute).cutoff(now).unwrap(),
            Utc.with_ymd_and_hms(2023, 12, 31, 23, 45, 0).unwrap()
        );
        assert_eq!(
            Retention::new(1, RetentionUnit::Hour).cutoff(now).unwrap(),
            Utc.with_ymd_and_hms(2023, 12, 31, 23, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_unknown_unit_is_config_error() {
        assert!(matches!(
            Retention::from_config(30, "fortnight"),
            Err(PruningError::Config(_))
        ));
        assert_eq!(
            Retention::from_config(2, " Hour ").unwrap(),
            Retention::new(2, RetentionUnit::Hour)
        );
    }
}
