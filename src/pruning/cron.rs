use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, Timelike, Utc};

use crate::pruning::errors::PruningError;

/// How far ahead `next_after` searches before giving up.
const SEARCH_HORIZON_YEARS: u32 = 5;

/// A five field cron expression: minute, hour, day of month, month and day
/// of week.
///
/// Fields accept `*`, single values, ranges `a-b`, steps `*/n`, `a-b/n` or
/// `a/n`, and comma separated lists of those. Day of week 7 is Sunday. When
/// both day fields are restricted a day matches if either one does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
    source: String,
}

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: Field = Field { name: "minute", min: 0, max: 59 };
const HOUR: Field = Field { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: Field = Field { name: "day of month", min: 1, max: 31 };
const MONTH: Field = Field { name: "month", min: 1, max: 12 };
const DAY_OF_WEEK: Field = Field { name: "day of week", min: 0, max: 7 };

impl Field {
    fn error(&self, expr: &str, reason: &str) -> PruningError {
        PruningError::Config(format!("invalid cron {} field {expr:?}: {reason}", self.name))
    }

    fn value(&self, expr: &str, raw: &str) -> Result<u32, PruningError> {
        let value: u32 = raw
            .parse()
            .map_err(|_| self.error(expr, &format!("{raw:?} is not a number")))?;
        if value < self.min || value > self.max {
            return Err(self.error(
                expr,
                &format!("{value} is outside {}-{}", self.min, self.max),
            ));
        }
        Ok(value)
    }

    fn parse(&self, expr: &str) -> Result<u64, PruningError> {
        let mut mask = 0u64;
        for part in expr.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .ok()
                        .filter(|step| *step > 0)
                        .ok_or_else(|| self.error(expr, &format!("bad step {step:?}")))?;
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" {
                (self.min, self.max)
            } else if let Some((start, end)) = range.split_once('-') {
                (self.value(expr, start)?, self.value(expr, end)?)
            } else {
                let start = self.value(expr, range)?;
                // `a/n` runs from a to the end of the field
                (start, if step.is_some() { self.max } else { start })
            };
            if start > end {
                return Err(self.error(expr, &format!("range {start}-{end} is reversed")));
            }

            for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
                mask |= 1 << value;
            }
        }
        Ok(mask)
    }
}

impl CronSchedule {
    /// First matching minute strictly after `after`, or `None` when nothing
    /// matches within the search horizon (e.g. `0 0 31 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let horizon = after.checked_add_months(Months::new(12 * SEARCH_HORIZON_YEARS))?;
        let mut t = after
            .with_second(0)?
            .with_nanosecond(0)?
            .checked_add_signed(Duration::minutes(1))?;

        while t <= horizon {
            if !bit(self.months, t.month()) {
                t = t
                    .with_day(1)?
                    .with_hour(0)?
                    .with_minute(0)?
                    .checked_add_months(Months::new(1))?;
                continue;
            }
            if !self.day_matches(&t) {
                t = t
                    .with_hour(0)?
                    .with_minute(0)?
                    .checked_add_signed(Duration::days(1))?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.with_minute(0)?.checked_add_signed(Duration::hours(1))?;
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t = t.checked_add_signed(Duration::minutes(1))?;
                continue;
            }
            return Some(t);
        }
        None
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = bit(self.days_of_month, t.day());
        let dow = bit(self.days_of_week, t.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1 << value) != 0
}

impl FromStr for CronSchedule {
    type Err = PruningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(PruningError::Config(format!(
                "cron expression {s:?} must have 5 fields, found {}",
                fields.len()
            )));
        };

        let mut days_of_week = DAY_OF_WEEK.parse(dow)?;
        if bit(days_of_week, 7) {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: MINUTE.parse(minute)?,
            hours: HOUR.parse(hour)?,
            days_of_month: DAY_OF_MONTH.parse(dom)?,
            months: MONTH.parse(month)?,
            days_of_week,
            dom_restricted: !dom.starts_with('*'),
            dow_restricted: !dow.starts_with('*'),
            source: fields.join(" "),
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
