use chrono::NaiveDate;
use sat_imagery::observation::{ClosestDateRecord, ImageObservation, SiteYearTable};
use sat_utils::dates::days_between;

/// Default clear-sky thresholds, percent.
pub const DEFAULT_THRESHOLDS: [u32; 4] = [80, 90, 95, 99];

/// The date nearest `target` among observations whose clear-sky percentage
/// is at least `threshold`. On a tie the first in input order wins.
pub fn closest_date(
    observations: &[ImageObservation],
    threshold: f64,
    target: NaiveDate,
) -> Option<NaiveDate> {
    observations
        .iter()
        .filter(|o| o.clear_sky_percentage.at_least(threshold))
        .min_by_key(|o| days_between(&o.date, &target))
        .map(|o| o.date)
}

/// One record per threshold for this table, relative to the survey end.
pub fn select_closest_dates(
    table: &SiteYearTable,
    thresholds: &[u32],
    survey_end: NaiveDate,
) -> Vec<ClosestDateRecord> {
    thresholds
        .iter()
        .map(|&threshold| ClosestDateRecord {
            site: table.site.clone(),
            year: table.year,
            threshold,
            date: closest_date(table.observations(), f64::from(threshold), survey_end),
        })
        .collect()
}
