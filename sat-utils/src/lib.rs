//! Shared utility functions for the survey-site imagery crates.

/// Date utility functions
pub mod dates {
    use crate::error::DateError;
    use chrono::{NaiveDate, TimeDelta};

    /// Format a NaiveDate as "YYYY-MM-DD"
    pub fn format_date(date: &NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    /// Parse a "MM-DD" month-day pair, e.g. "04-01".
    ///
    /// Feb 29 is rejected since it cannot anchor a season in every year.
    pub fn parse_month_day(s: &str) -> anyhow::Result<(u32, u32)> {
        let (month, day) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| DateError(format!("expected MM-DD, got {s:?}")))?;
        let month: u32 = month.parse()?;
        let day: u32 = day.parse()?;
        // 2023 is not a leap year, so this also rules out 02-29
        if NaiveDate::from_ymd_opt(2023, month, day).is_none() {
            return Err(DateError(format!("invalid month-day {s:?}")).into());
        }
        Ok((month, day))
    }

    /// Anchor a month-day pair in the given year.
    pub fn month_day_in_year(year: i32, (month, day): (u32, u32)) -> anyhow::Result<NaiveDate> {
        NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| DateError(format!("{year}-{month:02}-{day:02} does not exist")).into())
    }

    /// Absolute number of days between two dates.
    pub fn days_between(a: &NaiveDate, b: &NaiveDate) -> i64 {
        (*a - *b).num_days().abs()
    }

    /// Shift a date by a signed number of days, saturating at chrono's bounds.
    pub fn offset_days(date: &NaiveDate, days: i64) -> NaiveDate {
        TimeDelta::try_days(days)
            .and_then(|delta| date.checked_add_signed(delta))
            .unwrap_or(*date)
    }

}

/// File naming helpers
pub mod paths {
    /// Turn a site identifier into something safe to embed in a file name.
    pub fn file_stem(site: &str) -> String {
        site.trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .collect()
    }

}

/// Error types
pub mod error {
    use std::fmt;

    #[derive(Debug)]
    pub struct DateError(pub String);

    impl fmt::Display for DateError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "Date error: {}", self.0)
        }
    }

    impl std::error::Error for DateError {}
}
