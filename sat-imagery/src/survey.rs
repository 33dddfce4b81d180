use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The ground-survey window of one year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SurveyWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<SurveyWindow> {
        let window = SurveyWindow { start, end };
        window.validate()?;
        Ok(window)
    }

    /// Checks `start <= end`; needed after deserializing.
    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(Error::InvalidWindow {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn contains(&self, date: &NaiveDate) -> bool {
        self.start <= *date && *date <= self.end
    }
}
