use crate::error::{Error, Result};
use chrono::naive::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Writer};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};

/// Date format used in every CSV this crate reads or writes: "YYYY-MM-DD"
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Header of a per-site-year table.
pub const TABLE_HEADER: [&str; 5] = ["Date", "Clear_Sky_Percentage", "NDVI", "LAI", "AOT"];

/// Header of the closest-dates summary.
pub const SUMMARY_HEADER: [&str; 4] = ["Site", "Year", "Threshold", "Date"];

/// The outcome of a best-effort reduction.
/// - `Defined(f64)`: at least one qualifying pixel or observation
/// - `Undefined`: nothing qualified; this is "no data", never zero
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize, Default)]
pub enum Statistic {
    Defined(f64),
    #[default]
    Undefined,
}

impl Statistic {
    pub fn value(&self) -> Option<f64> {
        match self {
            Statistic::Defined(v) => Some(*v),
            Statistic::Undefined => None,
        }
    }

    pub fn map<F: FnOnce(f64) -> f64>(self, f: F) -> Statistic {
        match self {
            Statistic::Defined(v) => Statistic::Defined(f(v)),
            Statistic::Undefined => Statistic::Undefined,
        }
    }

    /// True only for a defined value `>= threshold`.
    pub fn at_least(&self, threshold: f64) -> bool {
        matches!(self, Statistic::Defined(v) if *v >= threshold)
    }

    fn parse(field: &str) -> Result<Statistic> {
        let field = field.trim();
        if field.is_empty() || field.eq_ignore_ascii_case("nan") {
            return Ok(Statistic::Undefined);
        }
        field
            .parse::<f64>()
            .map(Statistic::from)
            .map_err(|e| Error::InvalidFormat(format!("{field:?}: {e}")))
    }
}

impl From<Option<f64>> for Statistic {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => Statistic::Defined(v),
            _ => Statistic::Undefined,
        }
    }
}

impl From<f64> for Statistic {
    fn from(value: f64) -> Self {
        Statistic::from(Some(value))
    }
}

/// Undefined values render as an empty string, the CSV missing-value.
impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Defined(v) => write!(f, "{v}"),
            Statistic::Undefined => Ok(()),
        }
    }
}

/// Statistics of one acquisition date over one site.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageObservation {
    pub date: NaiveDate,
    pub clear_sky_percentage: Statistic,
    pub ndvi: Statistic,
    pub lai: Statistic,
    pub aot: Statistic,
}

impl ImageObservation {
    fn to_record(&self) -> StringRecord {
        StringRecord::from(vec![
            self.date.format(DATE_FORMAT).to_string(),
            self.clear_sky_percentage.to_string(),
            self.ndvi.to_string(),
            self.lai.to_string(),
            self.aot.to_string(),
        ])
    }
}

impl TryFrom<StringRecord> for ImageObservation {
    type Error = Error;

    fn try_from(value: StringRecord) -> Result<Self> {
        if value.len() != TABLE_HEADER.len() {
            return Err(Error::InvalidFormat(format!(
                "expected {} columns, found {}",
                TABLE_HEADER.len(),
                value.len()
            )));
        }
        let field = |i: usize| value.get(i).unwrap_or_default();
        let date = NaiveDate::parse_from_str(field(0).trim(), DATE_FORMAT)
            .map_err(|e| Error::DateParse(format!("{:?}: {e}", field(0))))?;
        Ok(ImageObservation {
            date,
            clear_sky_percentage: Statistic::parse(field(1))?,
            ndvi: Statistic::parse(field(2))?,
            lai: Statistic::parse(field(3))?,
            aot: Statistic::parse(field(4))?,
        })
    }
}

/// The observations of one site in one year, ordered by date.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteYearTable {
    pub site: String,
    pub year: i32,
    observations: Vec<ImageObservation>,
}

impl SiteYearTable {
    /// Build a table; rows are sorted by date (stable).
    pub fn new(
        site: impl Into<String>,
        year: i32,
        mut observations: Vec<ImageObservation>,
    ) -> Self {
        observations.sort_by_key(|o| o.date);
        SiteYearTable {
            site: site.into(),
            year,
            observations,
        }
    }

    pub fn observations(&self) -> &[ImageObservation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// `{site}_{year}.csv`
    pub fn file_name(site: &str, year: i32) -> String {
        format!("{}_{year}.csv", sat_utils::paths::file_stem(site))
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut writer = Writer::from_writer(vec![]);
        writer.write_record(TABLE_HEADER)?;
        for observation in &self.observations {
            writer.write_record(&observation.to_record())?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| Error::InvalidFormat(e.to_string()))
    }

    /// Write the table, replacing any previous file.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_csv_string()?)?;
        Ok(())
    }

    pub fn from_csv_str(site: impl Into<String>, year: i32, csv_object: &str) -> Result<Self> {
        let observations = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(csv_object.as_bytes())
            .records()
            .map(|row| ImageObservation::try_from(row?))
            .collect::<Result<Vec<_>>>()?;
        Ok(SiteYearTable::new(site, year, observations))
    }

    pub fn read_csv(site: impl Into<String>, year: i32, path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        SiteYearTable::from_csv_str(site, year, &contents)
    }
}

/// The date chosen for one (site, year, threshold), absent when no
/// observation reaches the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosestDateRecord {
    pub site: String,
    pub year: i32,
    pub threshold: u32,
    pub date: Option<NaiveDate>,
}

impl ClosestDateRecord {
    /// Summary file name.
    pub const FILE_NAME: &'static str = "closest_dates.csv";

    pub fn to_csv_string(records: &[ClosestDateRecord]) -> Result<String> {
        let mut writer = Writer::from_writer(vec![]);
        writer.write_record(SUMMARY_HEADER)?;
        for record in records {
            let date = record
                .date
                .map(|d| d.format(DATE_FORMAT).to_string())
                .unwrap_or_default();
            writer.write_record([
                record.site.clone(),
                record.year.to_string(),
                record.threshold.to_string(),
                date,
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| Error::InvalidFormat(e.to_string()))
    }

    pub fn write_csv(path: &Path, records: &[ClosestDateRecord]) -> Result<()> {
        std::fs::write(path, ClosestDateRecord::to_csv_string(records)?)?;
        Ok(())
    }

    pub fn from_csv_str(csv_object: &str) -> Result<Vec<ClosestDateRecord>> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(csv_object.as_bytes());
        let mut records = Vec::new();
        for row in rdr.records() {
            let row = row?;
            if row.len() != SUMMARY_HEADER.len() {
                return Err(Error::InvalidFormat(format!(
                    "expected {} columns, found {}",
                    SUMMARY_HEADER.len(),
                    row.len()
                )));
            }
            let field = |i: usize| row.get(i).unwrap_or_default().trim();
            let year = field(1)
                .parse::<i32>()
                .map_err(|e| Error::InvalidFormat(format!("year {:?}: {e}", field(1))))?;
            let threshold = field(2)
                .parse::<u32>()
                .map_err(|e| Error::InvalidFormat(format!("threshold {:?}: {e}", field(2))))?;
            let date = match field(3) {
                "" => None,
                s => Some(
                    NaiveDate::parse_from_str(s, DATE_FORMAT)
                        .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))?,
                ),
            };
            records.push(ClosestDateRecord {
                site: field(0).to_string(),
                year,
                threshold,
                date,
            });
        }
        Ok(records)
    }

    pub fn read_csv(path: &Path) -> Result<Vec<ClosestDateRecord>> {
        let contents = std::fs::read_to_string(path)?;
        ClosestDateRecord::from_csv_str(&contents)
    }
}
