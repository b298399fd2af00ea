//! Common errors across the cdprep-rs crate

use crate::calendar::{CfCalendar, CfDate};

/// Errors related to working with model-calendar dates
#[derive(Debug, thiserror::Error)]
pub enum DateError {
    #[error("Year {year}, month {month}, day {day} is not a valid date in the {calendar} calendar")]
    InvalidDate {
        year: i32,
        month: u32,
        day: u32,
        calendar: CfCalendar,
    },
    #[error("{date} is not representable in the {calendar} calendar")]
    CalendarMismatch { date: CfDate, calendar: CfCalendar },
    #[error("Could not parse '{0}' as a date, expected YYYY-MM-DD")]
    UnparseableDate(String),
    #[error("Unknown calendar name '{0}'")]
    UnknownCalendar(String),
}

impl DateError {
    pub fn invalid_date(year: i32, month: u32, day: u32, calendar: CfCalendar) -> Self {
        Self::InvalidDate {
            year,
            month,
            day,
            calendar,
        }
    }

    pub fn calendar_mismatch(date: CfDate, calendar: CfCalendar) -> Self {
        Self::CalendarMismatch { date, calendar }
    }
}

