//! Per-site, per-year index charts.
//!
//! Each chart shows one index (NDVI or LAI) over the season:
//! - observations outside the survey window as a scatter, with a smoothing
//!   spline through them
//! - observations inside the window in a second colour over a shaded band
//! - the closest clear-sky date to the survey end as a distinguished marker
//!
//! Only rows at or above the display clear-sky threshold are drawn.

use chrono::{Datelike, NaiveDate, TimeDelta};
use log::{debug, info};
use plotters::prelude::*;
use sat_data::spline::SmoothingSpline;
use sat_imagery::{
    observation::{ImageObservation, SiteYearTable, Statistic},
    survey::SurveyWindow,
};
use sat_utils::paths::file_stem;
use std::{fmt, ops::Range, path::Path};
use thiserror::Error;

const WINDOW_COLOR: RGBColor = RGBColor(254, 196, 79);
const OUTSIDE_COLOR: RGBColor = RGBColor(54, 144, 192);
const INSIDE_COLOR: RGBColor = RGBColor(204, 76, 2);
const CURVE_COLOR: RGBColor = RGBColor(1, 108, 89);
const HIGHLIGHT_COLOR: RGBColor = RGBColor(215, 25, 28);

/// Chart rendering failure.
#[derive(Error, Debug)]
pub enum ChartError {
    #[error("Failed to draw chart: {0}")]
    Draw(String),
}

fn draw_error<E: fmt::Display>(e: E) -> ChartError {
    ChartError::Draw(e.to_string())
}

/// The index a chart plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartIndex {
    Ndvi,
    Lai,
}

impl ChartIndex {
    pub const ALL: [ChartIndex; 2] = [ChartIndex::Ndvi, ChartIndex::Lai];

    pub fn name(&self) -> &'static str {
        match self {
            ChartIndex::Ndvi => "NDVI",
            ChartIndex::Lai => "LAI",
        }
    }

    fn value(&self, observation: &ImageObservation) -> Statistic {
        match self {
            ChartIndex::Ndvi => observation.ndvi,
            ChartIndex::Lai => observation.lai,
        }
    }

    fn default_range(&self) -> Range<f64> {
        match self {
            ChartIndex::Ndvi => 0.0..1.0,
            ChartIndex::Lai => 0.0..4.0,
        }
    }
}

impl fmt::Display for ChartIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `{site}_{year}_{INDEX}.png`
pub fn chart_file_name(site: &str, year: i32, index: ChartIndex) -> String {
    format!("{}_{year}_{}.png", file_stem(site), index.name())
}

/// Display settings shared by every chart of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartOptions {
    /// Minimum clear-sky percentage of a plotted row.
    pub display_threshold: f64,
    /// Smoothing constant of the spline, on dates scaled to [0, 1].
    pub smoothing: f64,
    pub width: u32,
    pub height: u32,
    /// Number of points along the drawn curve.
    pub curve_samples: usize,
}

impl Default for ChartOptions {
    fn default() -> Self {
        ChartOptions {
            display_threshold: 90.0,
            smoothing: 1e-3,
            width: 1024,
            height: 640,
            curve_samples: 200,
        }
    }
}

/// The drawable content of one chart, in days since January 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub year: i32,
    pub window: (f64, f64),
    pub outside: Vec<(f64, f64)>,
    pub inside: Vec<(f64, f64)>,
    pub curve: Vec<(f64, f64)>,
    pub highlight: Option<(f64, f64)>,
}

fn day_of_year(year: i32, date: &NaiveDate) -> f64 {
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(*date);
    (*date - jan1).num_days() as f64
}

impl ChartSeries {
    pub fn build(
        table: &SiteYearTable,
        window: &SurveyWindow,
        highlight: Option<NaiveDate>,
        index: ChartIndex,
        options: &ChartOptions,
    ) -> ChartSeries {
        let year = table.year;
        let mut outside = Vec::new();
        let mut inside = Vec::new();
        let mut highlighted = None;
        for observation in table.observations() {
            if !observation
                .clear_sky_percentage
                .at_least(options.display_threshold)
            {
                continue;
            }
            let Some(value) = index.value(observation).value() else {
                continue;
            };
            let point = (day_of_year(year, &observation.date), value);
            if highlight == Some(observation.date) {
                highlighted = Some(point);
            }
            if window.contains(&observation.date) {
                inside.push(point);
            } else {
                outside.push(point);
            }
        }

        let curve = smooth(&outside, options);
        ChartSeries {
            year,
            window: (
                day_of_year(year, &window.start),
                day_of_year(year, &window.end),
            ),
            outside,
            inside,
            curve,
            highlight: highlighted,
        }
    }

    fn bounds(&self, index: ChartIndex) -> (Range<f64>, Range<f64>) {
        let points = || {
            self.outside
                .iter()
                .chain(&self.inside)
                .chain(&self.curve)
                .chain(self.highlight.iter())
        };
        let x_min = points().map(|p| p.0).fold(self.window.0, f64::min) - 5.0;
        let x_max = points().map(|p| p.0).fold(self.window.1, f64::max) + 5.0;
        let (y_min, y_max) = points().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.1), hi.max(p.1))
        });
        let y = if y_min.is_finite() && y_max.is_finite() {
            let pad = ((y_max - y_min) * 0.1).max(0.05);
            (y_min - pad)..(y_max + pad)
        } else {
            index.default_range()
        };
        (x_min..x_max, y)
    }
}

/// Smoothing spline through `points` (already in date order), evaluated on
/// an even grid. Dates are scaled to [0, 1] so the smoothing constant does
/// not depend on the season length.
fn smooth(points: &[(f64, f64)], options: &ChartOptions) -> Vec<(f64, f64)> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Vec::new();
    };
    let span = (last.0 - first.0).max(1.0);
    let x: Vec<f64> = points.iter().map(|p| (p.0 - first.0) / span).collect();
    let y: Vec<f64> = points.iter().map(|p| p.1).collect();
    match SmoothingSpline::fit(&x, &y, options.smoothing) {
        Some(spline) => spline
            .curve(options.curve_samples)
            .into_iter()
            .map(|(t, v)| (first.0 + t * span, v))
            .collect(),
        None => Vec::new(),
    }
}

/// Render one chart to a PNG file, replacing any previous file.
pub fn render_index_chart(
    path: &Path,
    title: &str,
    series: &ChartSeries,
    index: ChartIndex,
    options: &ChartOptions,
) -> Result<(), ChartError> {
    let root = BitMapBackend::new(path, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE).map_err(draw_error)?;

    let (x_range, y_range) = series.bounds(index);
    let (y_min, y_max) = (y_range.start, y_range.end);
    let year = series.year;
    let format_day = move |x: &f64| {
        NaiveDate::from_ymd_opt(year, 1, 1)
            .and_then(|jan1| TimeDelta::try_days(x.round() as i64).map(|d| jan1 + d))
            .map(|d| format!("{:02}-{:02}", d.month(), d.day()))
            .unwrap_or_default()
    };

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d(x_range, y_range)
        .map_err(draw_error)?;
    chart
        .configure_mesh()
        .x_desc(format!("Date ({year})"))
        .y_desc(index.name())
        .x_label_formatter(&format_day)
        .draw()
        .map_err(draw_error)?;

    let (window_start, window_end) = series.window;
    chart
        .draw_series(std::iter::once(Rectangle::new(
            [(window_start, y_min), (window_end, y_max)],
            WINDOW_COLOR.mix(0.3).filled(),
        )))
        .map_err(draw_error)?
        .label("Survey window")
        .legend(|(x, y)| {
            Rectangle::new([(x, y - 5), (x + 15, y + 5)], WINDOW_COLOR.mix(0.3).filled())
        });

    chart
        .draw_series(
            series
                .outside
                .iter()
                .map(|&point| Circle::new(point, 4, OUTSIDE_COLOR.filled())),
        )
        .map_err(draw_error)?
        .label("Outside survey window")
        .legend(|(x, y)| Circle::new((x + 7, y), 4, OUTSIDE_COLOR.filled()));

    if !series.inside.is_empty() {
        chart
            .draw_series(
                series
                    .inside
                    .iter()
                    .map(|&point| Circle::new(point, 4, INSIDE_COLOR.filled())),
            )
            .map_err(draw_error)?
            .label("Inside survey window")
            .legend(|(x, y)| Circle::new((x + 7, y), 4, INSIDE_COLOR.filled()));
    }

    if !series.curve.is_empty() {
        chart
            .draw_series(LineSeries::new(
                series.curve.iter().copied(),
                CURVE_COLOR.stroke_width(2),
            ))
            .map_err(draw_error)?
            .label("Smoothing spline")
            .legend(|(x, y)| {
                PathElement::new(vec![(x, y), (x + 15, y)], CURVE_COLOR.stroke_width(2))
            });
    }

    if let Some(point) = series.highlight {
        chart
            .draw_series(std::iter::once(TriangleMarker::new(
                point,
                9,
                HIGHLIGHT_COLOR.filled(),
            )))
            .map_err(draw_error)?
            .label("Closest clear-sky date")
            .legend(|(x, y)| TriangleMarker::new((x + 7, y), 6, HIGHLIGHT_COLOR.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(draw_error)?;
    root.present().map_err(draw_error)?;
    info!("Wrote {}", path.display());
    debug!(
        "{} outside, {} inside, highlight {:?}",
        series.outside.len(),
        series.inside.len(),
        series.highlight
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(date: NaiveDate, clear: f64, ndvi: Option<f64>) -> ImageObservation {
        let ndvi = Statistic::from(ndvi);
        ImageObservation {
            date,
            clear_sky_percentage: Statistic::Defined(clear),
            ndvi,
            lai: ndvi.map(|v| 3.618 * v - 0.118),
            aot: Statistic::Undefined,
        }
    }

    fn table() -> SiteYearTable {
        SiteYearTable::new(
            "North",
            2023,
            vec![
                row(ymd(2023, 5, 2), 100.0, Some(0.3)),
                row(ymd(2023, 6, 11), 95.0, Some(0.6)),
                row(ymd(2023, 6, 20), 50.0, Some(0.1)),
                row(ymd(2023, 7, 20), 97.0, Some(0.8)),
                row(ymd(2023, 7, 25), 99.5, Some(0.82)),
                row(ymd(2023, 8, 30), 92.0, None),
                row(ymd(2023, 9, 14), 91.0, Some(0.5)),
            ],
        )
    }

    fn window() -> SurveyWindow {
        SurveyWindow::new(ymd(2023, 7, 10), ymd(2023, 7, 27)).unwrap()
    }

    #[test]
    fn test_series_filters_and_splits() {
        let series = ChartSeries::build(
            &table(),
            &window(),
            Some(ymd(2023, 7, 25)),
            ChartIndex::Ndvi,
            &ChartOptions::default(),
        );
        // 06-20 is too cloudy, 08-30 has no NDVI
        let outside_days: Vec<f64> = series.outside.iter().map(|p| p.0).collect();
        assert_eq!(
            outside_days,
            vec![
                day_of_year(2023, &ymd(2023, 5, 2)),
                day_of_year(2023, &ymd(2023, 6, 11)),
                day_of_year(2023, &ymd(2023, 9, 14)),
            ]
        );
        assert_eq!(series.inside.len(), 2);
        assert_eq!(
            series.highlight,
            Some((day_of_year(2023, &ymd(2023, 7, 25)), 0.82))
        );
        assert_eq!(series.curve.len(), ChartOptions::default().curve_samples);
        assert_eq!(series.curve.first().unwrap().0, series.outside[0].0);
        assert_eq!(series.curve.last().unwrap().0, series.outside[2].0);
    }

    #[test]
    fn test_lai_series_uses_lai_values() {
        let options = ChartOptions::default();
        let series = ChartSeries::build(&table(), &window(), None, ChartIndex::Lai, &options);
        assert!((series.outside[0].1 - (3.618 * 0.3 - 0.118)).abs() < 1e-12);
        assert_eq!(series.highlight, None);
    }

    #[test]
    fn test_no_outside_points_means_no_curve() {
        let table = SiteYearTable::new("North", 2023, vec![row(ymd(2023, 7, 20), 97.0, Some(0.8))]);
        let options = ChartOptions::default();
        let series = ChartSeries::build(&table, &window(), None, ChartIndex::Ndvi, &options);
        assert!(series.outside.is_empty());
        assert!(series.curve.is_empty());
        let (x, y) = series.bounds(ChartIndex::Ndvi);
        assert!(x.start < series.window.0 && x.end > series.window.1);
        assert!(y.start < 0.8 && y.end > 0.8);
    }

    #[test]
    fn test_chart_file_name() {
        assert_eq!(chart_file_name("Plot A", 2023, ChartIndex::Ndvi), "Plot_A_2023_NDVI.png");
        assert_eq!(chart_file_name("S1", 2022, ChartIndex::Lai), "S1_2022_LAI.png");
    }
}
