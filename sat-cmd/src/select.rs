//! Recompute the closest-dates summary from tables already on disk.

use crate::{
    config::{Config, Inputs},
    process::write_summary,
};
use log::{info, warn};
use sat_data::selection::select_closest_dates;
use sat_imagery::{
    observation::{ClosestDateRecord, SiteYearTable},
    site::Site,
};
use std::path::Path;

/// Read `{site}_{year}.csv` from `dir`; `None` (with a warning) when it is
/// missing or unreadable.
pub(crate) fn read_table(dir: &Path, site: &str, year: i32) -> Option<SiteYearTable> {
    let path = dir.join(SiteYearTable::file_name(site, year));
    if !path.exists() {
        warn!("No table for site {} in {}: {} not found", site, year, path.display());
        return None;
    }
    match SiteYearTable::read_csv(site, year, &path) {
        Ok(table) => Some(table),
        Err(e) => {
            warn!("Skipping {}: {}", path.display(), e);
            None
        }
    }
}

/// Closest-date records for every site-year with a table in `dir`.
pub fn reselect(sites: &[Site], config: &Config, dir: &Path) -> Vec<ClosestDateRecord> {
    let mut records = Vec::new();
    for site in sites {
        for &year in &config.years {
            let (Some(window), Some(table)) =
                (config.survey_window(year), read_table(dir, &site.id, year))
            else {
                continue;
            };
            records.extend(select_closest_dates(&table, &config.thresholds, window.end));
        }
    }
    records
}

pub fn run_select(inputs: Inputs) -> anyhow::Result<()> {
    let records = reselect(&inputs.sites, &inputs.config, &inputs.output_dir);
    info!(
        "Selected dates for {} site-years",
        records.len() / inputs.config.thresholds.len().max(1)
    );
    write_summary(&inputs.output_dir, &records)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::CONFIG;
    use chrono::NaiveDate;
    use geo::MultiPolygon;
    use sat_imagery::observation::{ImageObservation, Statistic};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(date: NaiveDate, clear: f64) -> ImageObservation {
        ImageObservation {
            date,
            clear_sky_percentage: Statistic::Defined(clear),
            ndvi: Statistic::Defined(0.6),
            lai: Statistic::Defined(3.618 * 0.6 - 0.118),
            aot: Statistic::Undefined,
        }
    }

    #[test]
    fn test_reselect_uses_changed_thresholds() {
        let dir = std::env::temp_dir().join(format!("sat-cmd-select-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let table = SiteYearTable::new(
            "North",
            2023,
            vec![row(ymd(2023, 7, 20), 97.0), row(ymd(2023, 7, 25), 99.5)],
        );
        table.write_csv(&dir.join("North_2023.csv")).unwrap();

        let mut config = Config::from_toml_str(CONFIG).unwrap();
        config.thresholds = vec![98];
        let sites = [
            Site {
                id: String::from("North"),
                geometry: MultiPolygon(vec![]),
            },
            Site {
                id: String::from("Missing"),
                geometry: MultiPolygon(vec![]),
            },
        ];
        let records = reselect(&sites, &config, &dir);
        assert_eq!(
            records,
            vec![ClosestDateRecord {
                site: String::from("North"),
                year: 2023,
                threshold: 98,
                date: Some(ymd(2023, 7, 25)),
            }]
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
