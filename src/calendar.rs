//! Calendar-aware dates and time axes for model output.
//!
//! Climate model output does not always use the proleptic Gregorian
//! calendar. Several models run on a 360-day calendar (twelve 30-day
//! months) and others on a 365-day "noleap" calendar, both of which
//! contain dates that [`chrono::NaiveDate`] cannot represent (e.g.
//! February 30th) or handle differently (no February 29th, ever).
//! [`CfDate`] is therefore a plain year/month/day(/hour) tuple whose
//! validity is judged against a [`CfCalendar`], and all date arithmetic
//! goes through the calendar rather than through `chrono`. Conversions
//! to and from `chrono` types exist for the standard calendar only.

use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};

use crate::error::DateError;

/// Cumulative days at the start of each month for a 365-day year.
const NOLEAP_CUM_DAYS: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
const NOLEAP_MONTH_DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// The calendar conventions recognized in source datasets.
///
/// [`FromStr`] accepts the CF attribute spellings: "standard",
/// "gregorian", and "proleptic_gregorian" for [`CfCalendar::Standard`];
/// "noleap" and "365_day" for [`CfCalendar::NoLeap`]; "360_day" and
/// "uniform30day" for [`CfCalendar::Day360`]. [`Display`] writes the
/// canonical CF name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum CfCalendar {
    #[strum(serialize = "standard")]
    #[serde(rename = "standard", alias = "gregorian", alias = "proleptic_gregorian")]
    Standard,
    #[strum(serialize = "noleap")]
    #[serde(rename = "noleap", alias = "365_day")]
    NoLeap,
    #[strum(serialize = "360_day")]
    #[serde(rename = "360_day", alias = "uniform30day")]
    Day360,
}

impl FromStr for CfCalendar {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "gregorian" | "proleptic_gregorian" => Ok(Self::Standard),
            "noleap" | "365_day" => Ok(Self::NoLeap),
            "360_day" | "uniform30day" => Ok(Self::Day360),
            _ => Err(DateError::UnknownCalendar(s.to_owned())),
        }
    }
}

impl CfCalendar {
    /// The number of days in the given month of the given year.
    pub fn days_in_month(&self, year: i32, month: u32) -> u32 {
        match self {
            Self::Day360 => 30,
            Self::NoLeap => NOLEAP_MONTH_DAYS[(month - 1) as usize],
            Self::Standard => {
                if month == 2 && is_gregorian_leap_year(year) {
                    29
                } else {
                    NOLEAP_MONTH_DAYS[(month - 1) as usize]
                }
            }
        }
    }

    /// The number of days in the given year.
    pub fn days_in_year(&self, year: i32) -> u32 {
        match self {
            Self::Day360 => 360,
            Self::NoLeap => 365,
            Self::Standard => {
                if is_gregorian_leap_year(year) {
                    366
                } else {
                    365
                }
            }
        }
    }

    /// Signed number of whole days from `a` to `b` (positive if `b` is later).
    /// Hours are ignored; see [`CfCalendar::fractional_days_between`] for
    /// sub-daily resolution.
    pub fn days_between(&self, a: CfDate, b: CfDate) -> Result<i64, DateError> {
        Ok(self.ordinal(b)? - self.ordinal(a)?)
    }

    /// Days from `a` to `b` including the hour-of-day as a fractional part.
    pub fn fractional_days_between(&self, a: CfDate, b: CfDate) -> Result<f64, DateError> {
        let whole = self.days_between(a, b)? as f64;
        Ok(whole + (b.hour as f64 - a.hour as f64) / 24.0)
    }

    /// The date `days` (possibly fractional, possibly negative) after `epoch`.
    /// The fractional part becomes the hour-of-day, rounded to the nearest hour.
    pub fn date_from_days(&self, epoch: CfDate, days: f64) -> Result<CfDate, DateError> {
        let mut whole = days.floor() as i64;
        let mut hour = ((days - days.floor()) * 24.0).round() as u32;
        if hour == 24 {
            whole += 1;
            hour = 0;
        }
        let date = self.date_from_ordinal(self.ordinal(epoch)? + whole)?;
        Ok(date.with_hour(hour))
    }

    /// Absolute day count for a date, used internally for arithmetic.
    /// Day 0 is January 1st of year 0 in this calendar.
    fn ordinal(&self, date: CfDate) -> Result<i64, DateError> {
        if !date.valid_in(*self) {
            return Err(DateError::calendar_mismatch(date, *self));
        }
        match self {
            Self::Day360 => Ok(date.year as i64 * 360
                + (date.month as i64 - 1) * 30
                + (date.day as i64 - 1)),
            Self::NoLeap => Ok(date.year as i64 * 365
                + NOLEAP_CUM_DAYS[(date.month - 1) as usize]
                + (date.day as i64 - 1)),
            Self::Standard => {
                let nd = NaiveDate::from_ymd_opt(date.year, date.month, date.day).ok_or_else(
                    || DateError::invalid_date(date.year, date.month, date.day, *self),
                )?;
                Ok(nd.num_days_from_ce() as i64)
            }
        }
    }

    fn date_from_ordinal(&self, ordinal: i64) -> Result<CfDate, DateError> {
        match self {
            Self::Day360 => {
                let year = ordinal.div_euclid(360);
                let rem = ordinal.rem_euclid(360);
                let month = rem / 30 + 1;
                let day = rem % 30 + 1;
                CfDate::new(year as i32, month as u32, day as u32)
            }
            Self::NoLeap => {
                let year = ordinal.div_euclid(365);
                let rem = ordinal.rem_euclid(365);
                let month = NOLEAP_CUM_DAYS
                    .iter()
                    .rposition(|&c| c <= rem)
                    .expect("cumulative day table starts at 0, so rposition must succeed");
                let day = rem - NOLEAP_CUM_DAYS[month] + 1;
                CfDate::new(year as i32, month as u32 + 1, day as u32)
            }
            Self::Standard => {
                let nd = NaiveDate::from_num_days_from_ce_opt(ordinal as i32).ok_or_else(|| {
                    DateError::UnparseableDate(format!("day {ordinal} of the common era"))
                })?;
                CfDate::new(nd.year(), nd.month(), nd.day())
            }
        }
    }
}

fn is_gregorian_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// A calendar-agnostic date (plus hour-of-day for sub-daily axes).
///
/// Ordering is by (year, month, day, hour), which is correct in every
/// supported calendar. Whether a particular (month, day) pair exists is
/// a property of the calendar, checked by [`CfDate::valid_in`], not of
/// the value itself; construction only enforces the universal bounds
/// (month 1-12, day 1-31, hour 0-23).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CfDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl CfDate {
    pub fn new(year: i32, month: u32, day: u32) -> Result<Self, DateError> {
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            // No calendar in use here; report against the most permissive one.
            return Err(DateError::invalid_date(year, month, day, CfCalendar::Standard));
        }
        Ok(Self {
            year,
            month,
            day,
            hour: 0,
        })
    }

    pub fn with_hour(self, hour: u32) -> Self {
        Self { hour, ..self }
    }

    /// True if this date exists in the given calendar.
    pub fn valid_in(&self, calendar: CfCalendar) -> bool {
        self.day <= calendar.days_in_month(self.year, self.month) && self.hour < 24
    }

    /// This date with the day-of-month clamped to the last day the given
    /// calendar has in this month (e.g. December 31st becomes December 30th
    /// in the 360-day calendar).
    pub fn clamped_to(&self, calendar: CfCalendar) -> Self {
        let max_day = calendar.days_in_month(self.year, self.month);
        Self {
            day: self.day.min(max_day),
            ..*self
        }
    }

    /// The (year, month, day) triple, ignoring the hour. Use this for
    /// comparisons where a date given without a time of day should cover
    /// the whole day.
    pub fn date_key(&self) -> (i32, u32, u32) {
        (self.year, self.month, self.day)
    }

    /// The date formatted as `YYYYMMDD` for use in output file names.
    pub fn format_compact(&self) -> String {
        format!("{:04}{:02}{:02}", self.year, self.month, self.day)
    }

    /// Parse a `YYYYMMDD` string as produced by [`CfDate::format_compact`].
    pub fn parse_compact(s: &str) -> Result<Self, DateError> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DateError::UnparseableDate(s.to_owned()));
        }
        let year = s[0..4]
            .parse()
            .map_err(|_| DateError::UnparseableDate(s.to_owned()))?;
        let month = s[4..6]
            .parse()
            .map_err(|_| DateError::UnparseableDate(s.to_owned()))?;
        let day = s[6..8]
            .parse()
            .map_err(|_| DateError::UnparseableDate(s.to_owned()))?;
        Self::new(year, month, day)
    }
}

impl Display for CfDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for CfDate {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '-');
        let year = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| DateError::UnparseableDate(s.to_owned()))?;
        let month = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| DateError::UnparseableDate(s.to_owned()))?;
        let day = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| DateError::UnparseableDate(s.to_owned()))?;
        Self::new(year, month, day)
    }
}

impl serde::Serialize for CfDate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for CfDate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<NaiveDate> for CfDate {
    fn from(d: NaiveDate) -> Self {
        Self {
            year: d.year(),
            month: d.month(),
            day: d.day(),
            hour: 0,
        }
    }
}

impl TryFrom<CfDate> for NaiveDate {
    type Error = DateError;

    fn try_from(d: CfDate) -> Result<Self, Self::Error> {
        NaiveDate::from_ymd_opt(d.year, d.month, d.day)
            .ok_or(DateError::calendar_mismatch(d, CfCalendar::Standard))
    }
}

/// The time coordinate of a grid: an ordered list of dates plus the
/// calendar they live in.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAxis {
    calendar: CfCalendar,
    dates: Vec<CfDate>,
}

impl TimeAxis {
    pub fn new(calendar: CfCalendar, dates: Vec<CfDate>) -> Self {
        Self { calendar, dates }
    }

    pub fn calendar(&self) -> CfCalendar {
        self.calendar
    }

    pub fn dates(&self) -> &[CfDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first(&self) -> Option<CfDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<CfDate> {
        self.dates.last().copied()
    }

    pub fn is_sorted(&self) -> bool {
        self.dates.windows(2).all(|w| w[0] <= w[1])
    }

    /// The permutation that sorts this axis, or `None` if it is already
    /// sorted. The caller is responsible for applying the same permutation
    /// to the data.
    pub fn sort_order(&self) -> Option<Vec<usize>> {
        if self.is_sorted() {
            return None;
        }
        let mut order: Vec<usize> = (0..self.dates.len()).collect();
        order.sort_by(|&a, &b| {
            self.dates[a]
                .partial_cmp(&self.dates[b])
                .unwrap_or(Ordering::Equal)
        });
        Some(order)
    }

    /// Reorder the axis by the given permutation (as from [`TimeAxis::sort_order`]).
    pub fn permuted(&self, order: &[usize]) -> Self {
        Self {
            calendar: self.calendar,
            dates: order.iter().map(|&i| self.dates[i]).collect(),
        }
    }

    /// Restrict to the given index range.
    pub fn sliced(&self, range: std::ops::Range<usize>) -> Self {
        Self {
            calendar: self.calendar,
            dates: self.dates[range].to_vec(),
        }
    }

    /// True if this axis uses 30-day months, either because the calendar
    /// says so or because no date on the axis has a day past 30 while a
    /// day-30 date exists (the detection used when source metadata does
    /// not carry a calendar attribute).
    pub fn has_thirty_day_months(&self) -> bool {
        if self.calendar == CfCalendar::Day360 {
            return true;
        }
        if self.dates.is_empty() {
            return false;
        }
        let max_day = self
            .dates
            .iter()
            .map(|d| d.day)
            .max()
            .expect("axis checked non-empty");
        // A monthly axis labeled on day 1 or 15 must not count as 30-day.
        max_day == 30
    }

    /// True if every year covered by the axis has exactly `n` samples,
    /// i.e. the axis covers whole years at a fixed per-year count.
    pub fn samples_per_year_is(&self, n: usize) -> bool {
        if self.dates.is_empty() {
            return false;
        }
        let mut counts: Vec<(i32, usize)> = vec![];
        for d in &self.dates {
            match counts.last_mut() {
                Some((y, c)) if *y == d.year => *c += 1,
                _ => counts.push((d.year, 1)),
            }
        }
        counts.iter().all(|&(_, c)| c == n)
    }

    /// The distinct years on the axis, in first-appearance order.
    pub fn years(&self) -> Vec<i32> {
        let mut years = vec![];
        for d in &self.dates {
            if years.last() != Some(&d.year) {
                years.push(d.year);
            }
        }
        years
    }

    /// Encode the axis as fractional days since `epoch`, the form written
    /// to the `time` coordinate variable of output files.
    pub fn encode_days_since(&self, epoch: CfDate) -> Result<Vec<f64>, DateError> {
        self.dates
            .iter()
            .map(|&d| self.calendar.fractional_days_between(epoch, d))
            .collect()
    }

    /// Decode an axis from fractional days since `epoch`.
    pub fn decode_days_since(
        calendar: CfCalendar,
        epoch: CfDate,
        values: &[f64],
    ) -> Result<Self, DateError> {
        let dates = values
            .iter()
            .map(|&v| calendar.date_from_days(epoch, v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { calendar, dates })
    }
}
