//! Temporal ranges given as `"<start>--<period>"`.
//!
//! `start` is `YYYY`, `YYYY-MM` or `YYYY-MM-DD`; `period` is an ISO-8601
//! duration `P[nY][nM][nW][nD]`. The range is half-open: `[start, start + period)`.

use chrono::{DateTime, Days, Months, NaiveDate, TimeDelta, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A half-open range of UTC timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Calendar period `P[nY][nM][nW][nD]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Period {
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
}

fn invalid(value: &str, reason: impl Into<String>) -> Error {
    Error::InvalidTemporalRange { value: value.to_string(), reason: reason.into() }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix('P')
            .ok_or_else(|| invalid(s, "period must start with 'P'"))?;
        if body.is_empty() {
            return Err(invalid(s, "empty period"));
        }

        let mut period = Period::default();
        let mut digits = String::new();
        for c in body.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let n: u32 = digits
                .parse()
                .map_err(|_| invalid(s, format!("missing number before '{}'", c)))?;
            match c {
                'Y' => period.years = n,
                'M' => period.months = n,
                'W' => period.weeks = n,
                'D' => period.days = n,
                _ => return Err(invalid(s, format!("unsupported designator '{}'", c))),
            }
            digits.clear();
        }
        if !digits.is_empty() {
            return Err(invalid(s, "trailing number without designator"));
        }
        Ok(period)
    }
}

impl Period {
    /// Add the period to a date, years and months first
    pub fn add_to(&self, date: NaiveDate) -> Option<NaiveDate> {
        let months = self.years.checked_mul(12)?.checked_add(self.months)?;
        let days = u64::from(self.weeks) * 7 + u64::from(self.days);
        date.checked_add_months(Months::new(months))?
            .checked_add_days(Days::new(days))
    }
}

fn parse_start(s: &str) -> Result<NaiveDate> {
    let parts: Vec<&str> = s.split('-').collect();
    let number = |p: &str| p.parse::<u32>().map_err(|_| invalid(s, "start is not a date"));
    let (year, month, day) = match parts.as_slice() {
        [y] => (number(y)?, 1, 1),
        [y, m] => (number(y)?, number(m)?, 1),
        [y, m, d] => (number(y)?, number(m)?, number(d)?),
        _ => return Err(invalid(s, "start must be YYYY, YYYY-MM or YYYY-MM-DD")),
    };
    let year = i32::try_from(year).map_err(|_| invalid(s, "year out of range"))?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| invalid(s, "no such date"))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

impl TemporalRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whole days `[start, end)` at UTC midnight
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(midnight(start), midnight(end))
    }

    /// Whether `t` falls inside the range
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}

impl FromStr for TemporalRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (start, period) = s
            .split_once("--")
            .ok_or_else(|| invalid(s, "expected '<start>--<period>'"))?;
        let start = parse_start(start)?;
        let period: Period = period.parse()?;
        let end = period
            .add_to(start)
            .ok_or_else(|| invalid(s, "end date out of range"))?;
        if end <= start {
            return Err(invalid(s, "period must be positive"));
        }
        Ok(Self::from_dates(start, end))
    }
}

impl fmt::Display for TemporalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}
