use crate::error::{Error, Result};
use chrono::{Datelike, Months, NaiveDate};

/// An inclusive range of dates, start date through end date.
#[derive(Clone, Eq, PartialEq, Copy, Debug)]
pub struct DateRange(pub NaiveDate, pub NaiveDate);

impl DateRange {
    /// Build a range, rejecting one whose start is after its end.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<DateRange> {
        if start > end {
            return Err(Error::InvalidWindow { start, end });
        }
        Ok(DateRange(start, end))
    }

    /// The range `[date - days, date + days]`.
    pub fn around(date: NaiveDate, days: i64) -> DateRange {
        DateRange(
            sat_utils::dates::offset_days(&date, -days),
            sat_utils::dates::offset_days(&date, days),
        )
    }

    pub fn start(&self) -> NaiveDate {
        self.0
    }

    pub fn end(&self) -> NaiveDate {
        self.1
    }

    pub fn contains(&self, date: &NaiveDate) -> bool {
        self.0 <= *date && *date <= self.1
    }

    /// Split into contiguous, non-overlapping sub-ranges whose boundaries
    /// fall on the first of every `months`-th month counted from the start.
    ///
    /// April 1 – October 31 split every 2 months gives Apr–May, Jun–Jul,
    /// Aug–Sep and Oct.
    pub fn split_months(&self, months: u32) -> Vec<DateRange> {
        let months = months.max(1);
        let mut ranges = Vec::new();
        let mut start = self.0;
        while start <= self.1 {
            let next_start = NaiveDate::from_ymd_opt(start.year(), start.month(), 1)
                .and_then(|first| first.checked_add_months(Months::new(months)));
            let end = match next_start.and_then(|d| d.pred_opt()) {
                Some(end) if end < self.1 => end,
                _ => self.1,
            };
            ranges.push(DateRange(start, end));
            match end.succ_opt() {
                Some(next) => start = next,
                None => break,
            }
        }
        ranges
    }
}
