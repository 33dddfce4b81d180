//! Chart rendering for processed site-years, during a run or afterwards
//! from the tables on disk.

use crate::{
    config::{Config, Inputs},
    select::read_table,
};
use chrono::NaiveDate;
use log::{info, warn};
use sat_chart::{chart_file_name, render_index_chart, ChartIndex, ChartSeries};
use sat_data::selection::select_closest_dates;
use sat_imagery::{
    observation::{ClosestDateRecord, SiteYearTable},
    survey::SurveyWindow,
};
use std::path::Path;

/// The selected date at `threshold` for the table's site and year.
fn highlight_date(
    records: &[ClosestDateRecord],
    table: &SiteYearTable,
    threshold: Option<u32>,
) -> Option<NaiveDate> {
    let threshold = threshold?;
    records
        .iter()
        .find(|r| r.site == table.site && r.year == table.year && r.threshold == threshold)
        .and_then(|r| r.date)
}

/// Draw the NDVI and LAI charts of one site-year. Failures are logged and
/// skipped; returns the number of charts written.
pub fn render_site_year(
    table: &SiteYearTable,
    window: &SurveyWindow,
    records: &[ClosestDateRecord],
    config: &Config,
    output_dir: &Path,
) -> usize {
    let options = config.chart_options();
    let highlight = highlight_date(records, table, config.highlight_threshold());
    let mut written = 0;
    for index in ChartIndex::ALL {
        let series = ChartSeries::build(table, window, highlight, index, &options);
        let path = output_dir.join(chart_file_name(&table.site, table.year, index));
        let title = format!("{} {} {}", table.site, table.year, index);
        match render_index_chart(&path, &title, &series, index, &options) {
            Ok(()) => written += 1,
            Err(e) => warn!("Could not render {}: {}", path.display(), e),
        }
    }
    written
}

/// Re-render charts from `{site}_{year}.csv` tables and, when present, the
/// closest-dates summary in the output directory.
pub fn run_plot(inputs: Inputs) -> anyhow::Result<()> {
    let Inputs {
        config,
        sites,
        output_dir,
    } = inputs;
    let summary_path = output_dir.join(ClosestDateRecord::FILE_NAME);
    let summary = if summary_path.exists() {
        ClosestDateRecord::read_csv(&summary_path)?
    } else {
        info!("{} not found; selecting dates from the tables", summary_path.display());
        Vec::new()
    };

    let mut charts = 0;
    for site in &sites {
        for &year in &config.years {
            let (Some(window), Some(table)) =
                (config.survey_window(year), read_table(&output_dir, &site.id, year))
            else {
                continue;
            };
            let has_summary = summary
                .iter()
                .any(|r| r.site == table.site && r.year == table.year);
            let selected;
            let records = if has_summary {
                &summary
            } else {
                selected = select_closest_dates(&table, &config.thresholds, window.end);
                &selected
            };
            charts += render_site_year(&table, window, records, &config, &output_dir);
        }
    }
    info!("Rendered {} charts in {}", charts, output_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(site: &str, year: i32, threshold: u32, date: Option<NaiveDate>) -> ClosestDateRecord {
        ClosestDateRecord {
            site: site.to_string(),
            year,
            threshold,
            date,
        }
    }

    #[test]
    fn test_highlight_matches_site_year_and_threshold() {
        let d = |day| NaiveDate::from_ymd_opt(2023, 7, day);
        let records = vec![
            record("North", 2023, 95, d(20)),
            record("North", 2023, 99, d(25)),
            record("South", 2023, 99, d(26)),
            record("North", 2022, 99, None),
        ];
        let north = SiteYearTable::new("North", 2023, vec![]);
        assert_eq!(highlight_date(&records, &north, Some(99)), d(25));
        assert_eq!(highlight_date(&records, &north, Some(95)), d(20));
        assert_eq!(highlight_date(&records, &north, None), None);
        let north_2022 = SiteYearTable::new("North", 2022, vec![]);
        assert_eq!(highlight_date(&records, &north_2022, Some(99)), None);
    }
}
