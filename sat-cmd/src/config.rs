//! Run configuration, read from a TOML file.

use anyhow::{anyhow, bail, Context};
use log::info;
use sat_chart::ChartOptions;
use sat_data::{
    classify::{SceneClassification, DEFAULT_CLEAR_CLASSES},
    indices::{IndexParams, LaiCoefficients},
    selection::DEFAULT_THRESHOLDS,
};
use sat_imagery::{
    date_range::DateRange,
    site::{load_sites, Site},
    survey::SurveyWindow,
};
use sat_utils::dates::{month_day_in_year, parse_month_day};
use serde::{de::Error as _, Deserialize, Deserializer};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

fn default_site_field() -> String {
    String::from("Site")
}

fn default_thresholds() -> Vec<u32> {
    DEFAULT_THRESHOLDS.to_vec()
}

fn default_display_threshold() -> f64 {
    90.0
}

fn default_smoothing() -> f64 {
    1e-3
}

/// Everything a run needs besides the geometry itself.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// GeoJSON file of survey sites, relative to the config file.
    #[serde(default)]
    pub sites: Option<PathBuf>,
    /// Feature property holding the site identifier.
    #[serde(default = "default_site_field")]
    pub site_field: String,
    #[serde(default)]
    pub years: Vec<i32>,
    /// Clear-sky thresholds (percent) for the closest-date summary.
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<u32>,
    /// Minimum clear-sky percentage of a charted row.
    #[serde(default = "default_display_threshold")]
    pub display_threshold: f64,
    /// Spline smoothing constant.
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    #[serde(default)]
    pub season: SeasonConfig,
    #[serde(default, deserialize_with = "year_keys")]
    pub survey_windows: BTreeMap<i32, SurveyWindow>,
    #[serde(default)]
    pub imagery: ImageryConfig,
    #[serde(default)]
    pub aerosol: AerosolConfig,
    #[serde(default)]
    pub lai: LaiCoefficients,
}

/// TOML table keys are strings; survey windows are keyed by year.
fn year_keys<'de, D>(deserializer: D) -> Result<BTreeMap<i32, SurveyWindow>, D::Error>
where
    D: Deserializer<'de>,
{
    BTreeMap::<String, SurveyWindow>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, window)| {
            key.trim()
                .parse::<i32>()
                .map(|year| (year, window))
                .map_err(|e| D::Error::custom(format!("survey window key {key:?}: {e}")))
        })
        .collect()
}

/// The acquisition season searched every year, as month-day bounds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SeasonConfig {
    pub start: String,
    pub end: String,
    pub months_per_batch: u32,
}

impl Default for SeasonConfig {
    fn default() -> Self {
        SeasonConfig {
            start: String::from("04-01"),
            end: String::from("10-31"),
            months_per_batch: 2,
        }
    }
}

impl SeasonConfig {
    /// The season of `year` as one inclusive range.
    pub fn range(&self, year: i32) -> anyhow::Result<DateRange> {
        let start = month_day_in_year(year, parse_month_day(&self.start)?)?;
        let end = month_day_in_year(year, parse_month_day(&self.end)?)?;
        Ok(DateRange::new(start, end)?)
    }

    /// The season of `year` split into request batches.
    pub fn batches(&self, year: i32) -> anyhow::Result<Vec<DateRange>> {
        Ok(self.range(year)?.split_months(self.months_per_batch))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImageryConfig {
    pub base_url: String,
    pub collection: String,
    /// Reduction scale, metres.
    pub scale: f64,
    pub scene_band: String,
    pub clear_classes: Vec<u8>,
    pub nir_band: String,
    pub red_band: String,
    pub timeout_secs: u64,
    /// Retries of a transient failure, on top of the first attempt.
    pub max_retries: u32,
    /// Bearer token; falls back to the `SAT_API_TOKEN` environment variable.
    pub token: Option<String>,
}

impl ImageryConfig {
    /// Requests made per call before a transient failure is returned.
    pub fn max_tries(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for ImageryConfig {
    fn default() -> Self {
        ImageryConfig {
            base_url: String::from("http://localhost:8080/v1"),
            collection: String::from("COPERNICUS/S2_SR_HARMONIZED"),
            scale: 30.0,
            scene_band: String::from("SCL"),
            clear_classes: DEFAULT_CLEAR_CLASSES.to_vec(),
            nir_band: String::from("B8"),
            red_band: String::from("B4"),
            timeout_secs: 120,
            max_retries: 3,
            token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AerosolConfig {
    pub collection: String,
    pub band: String,
    /// Reduction scale, metres.
    pub scale: f64,
    /// Half-width of the window averaged around each image date, days.
    pub window_days: i64,
}

impl Default for AerosolConfig {
    fn default() -> Self {
        AerosolConfig {
            collection: String::from("COPERNICUS/S5P/OFFL/L3_AER_AI"),
            band: String::from("absorbing_aerosol_index"),
            scale: 1000.0,
            window_days: 1,
        }
    }
}

impl Config {
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Config> {
        toml::from_str(contents).map_err(|e| anyhow!("Failed to parse config: {e}"))
    }

    /// Read a config file. A relative `sites` path is taken relative to the
    /// file's directory. Call [`Config::validate`] once overrides are applied.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config = Config::from_toml_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        if let (Some(sites), Some(dir)) = (&config.sites, path.parent()) {
            if sites.is_relative() {
                config.sites = Some(dir.join(sites));
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.years.is_empty() {
            bail!("No years configured");
        }
        if let Some(year) = self
            .years
            .iter()
            .find(|year| !self.survey_windows.contains_key(year))
        {
            bail!("No survey window configured for {year}");
        }
        for (year, window) in &self.survey_windows {
            window
                .validate()
                .with_context(|| format!("Survey window for {year}"))?;
        }
        if self.thresholds.is_empty() {
            bail!("At least one clear-sky threshold is required");
        }
        if let Some(t) = self.thresholds.iter().find(|t| **t == 0 || **t > 100) {
            bail!("Clear-sky threshold {t} is outside (0, 100]");
        }
        let mut sorted = self.thresholds.clone();
        sorted.sort_unstable();
        if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
            bail!("Clear-sky threshold {} is listed more than once", pair[0]);
        }
        if !(0.0..=100.0).contains(&self.display_threshold) {
            bail!(
                "Display threshold {} is outside [0, 100]",
                self.display_threshold
            );
        }
        if self.season.months_per_batch == 0 {
            bail!("season.months_per_batch must be at least 1");
        }
        for year in &self.years {
            self.season
                .range(*year)
                .with_context(|| format!("Invalid season for {year}"))?;
        }
        if !(self.imagery.scale > 0.0 && self.aerosol.scale > 0.0) {
            bail!("Reduction scales must be positive");
        }
        if self.aerosol.window_days < 0 {
            bail!("aerosol.window_days must not be negative");
        }
        Ok(())
    }

    pub fn survey_window(&self, year: i32) -> Option<&SurveyWindow> {
        self.survey_windows.get(&year)
    }

    /// The threshold whose selection is marked on charts.
    pub fn highlight_threshold(&self) -> Option<u32> {
        self.thresholds.iter().copied().max()
    }

    pub fn index_params(&self) -> IndexParams {
        IndexParams {
            scene: SceneClassification {
                band: self.imagery.scene_band.clone(),
                clear_classes: self.imagery.clear_classes.clone(),
            },
            nir_band: self.imagery.nir_band.clone(),
            red_band: self.imagery.red_band.clone(),
            scale: self.imagery.scale,
            lai: self.lai,
            aerosol_band: self.aerosol.band.clone(),
            aerosol_scale: self.aerosol.scale,
        }
    }

    pub fn chart_options(&self) -> ChartOptions {
        ChartOptions {
            display_threshold: self.display_threshold,
            smoothing: self.smoothing,
            ..ChartOptions::default()
        }
    }
}

/// A validated config, its sites and where outputs go.
#[derive(Debug)]
pub struct Inputs {
    pub config: Config,
    pub sites: Vec<Site>,
    pub output_dir: PathBuf,
}

impl Inputs {
    /// Load the config, apply command-line overrides, validate, then load
    /// the sites. Outputs default to the geometry file's directory.
    pub fn load(
        config_path: &Path,
        sites: Option<&Path>,
        years: &[i32],
        output_dir: Option<&Path>,
    ) -> anyhow::Result<Inputs> {
        let mut config = Config::load(config_path)?;
        if let Some(sites) = sites {
            config.sites = Some(sites.to_path_buf());
        }
        if !years.is_empty() {
            config.years = years.to_vec();
        }
        config.validate()?;

        let sites_path = config
            .sites
            .clone()
            .ok_or_else(|| anyhow!("No geometry file given in the config or with --sites"))?;
        let sites = load_sites(&sites_path, &config.site_field)
            .with_context(|| format!("Failed to load sites from {}", sites_path.display()))?;
        if sites.is_empty() {
            bail!("{} contains no sites", sites_path.display());
        }

        let output_dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => match sites_path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        };
        info!(
            "{} sites, years {:?}, output to {}",
            sites.len(),
            config.years,
            output_dir.display()
        );
        Ok(Inputs {
            config,
            sites,
            output_dir,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    pub(crate) const CONFIG: &str = r#"
sites = "sites.geojson"
years = [2022, 2023]

[survey_windows]
2022 = { start = "2022-07-11", end = "2022-07-29" }
2023 = { start = "2023-07-10", end = "2023-07-27" }

[aerosol]
window_days = 1

[lai]
slope = 3.618
intercept = -0.118
"#;

    #[test]
    fn test_defaults_fill_missing_tables() {
        let config = Config::from_toml_str(CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.site_field, "Site");
        assert_eq!(config.thresholds, vec![80, 90, 95, 99]);
        assert_eq!(config.highlight_threshold(), Some(99));
        assert_eq!(config.season, SeasonConfig::default());
        assert_eq!(config.imagery.scale, 30.0);
        assert_eq!(config.aerosol.scale, 1000.0);
        assert_eq!(
            config.survey_window(2023).unwrap().end,
            NaiveDate::from_ymd_opt(2023, 7, 27).unwrap()
        );
        assert!(config.survey_window(2021).is_none());
        assert_eq!(config.index_params(), IndexParams::default());
    }

    #[test]
    fn test_default_season_has_four_batches() {
        let batches = SeasonConfig::default().batches(2023).unwrap();
        let bounds: Vec<(String, String)> = batches
            .iter()
            .map(|r| (r.start().to_string(), r.end().to_string()))
            .collect();
        assert_eq!(
            bounds,
            vec![
                ("2023-04-01".into(), "2023-05-31".into()),
                ("2023-06-01".into(), "2023-07-31".into()),
                ("2023-08-01".into(), "2023-09-30".into()),
                ("2023-10-01".into(), "2023-10-31".into()),
            ]
        );
    }

    #[test]
    fn test_overridden_tables() {
        let config = Config::from_toml_str(
            r#"
years = [2023]
thresholds = [50, 99]
[season]
start = "05-15"
end = "09-15"
months_per_batch = 1
[survey_windows]
2023 = { start = "2023-07-10", end = "2023-07-27" }
[imagery]
scene_band = "QA"
clear_classes = [1]
token = "secret"
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.season.batches(2023).unwrap().len(), 5);
        let params = config.index_params();
        assert_eq!(params.scene.band, "QA");
        assert_eq!(params.scene.clear_classes, vec![1]);
        assert_eq!(config.imagery.token.as_deref(), Some("secret"));
        assert_eq!(config.imagery.nir_band, "B8");
    }

    #[test]
    fn test_retries_come_on_top_of_first_try() {
        let config = Config::from_toml_str(CONFIG).unwrap();
        assert_eq!(config.imagery.max_tries(), 4);
        let imagery = ImageryConfig {
            max_retries: 0,
            ..ImageryConfig::default()
        };
        assert_eq!(imagery.max_tries(), 1);
    }

    #[test]
    fn test_validation_failures() {
        let base = Config::from_toml_str(CONFIG).unwrap();

        let mut missing_window = base.clone();
        missing_window.years.push(2024);
        assert!(missing_window.validate().is_err());

        let mut bad_threshold = base.clone();
        bad_threshold.thresholds = vec![80, 101];
        assert!(bad_threshold.validate().is_err());
        bad_threshold.thresholds = vec![0];
        assert!(bad_threshold.validate().is_err());
        bad_threshold.thresholds.clear();
        assert!(bad_threshold.validate().is_err());
        bad_threshold.thresholds = vec![80, 95, 80];
        assert!(bad_threshold.validate().is_err());
        bad_threshold.thresholds = vec![95, 80];
        bad_threshold.validate().unwrap();

        let mut bad_season = base.clone();
        bad_season.season.start = String::from("11-01");
        assert!(bad_season.validate().is_err());
        bad_season.season = SeasonConfig {
            months_per_batch: 0,
            ..SeasonConfig::default()
        };
        assert!(bad_season.validate().is_err());

        let mut no_years = base;
        no_years.years.clear();
        assert!(no_years.validate().is_err());
    }

    #[test]
    fn test_bad_window_keys_and_dates_rejected() {
        let bad_key = "years = [2023]\n[survey_windows]\n\
            last = { start = \"2023-07-10\", end = \"2023-07-27\" }\n";
        assert!(Config::from_toml_str(bad_key).is_err());
        let inverted = "years = [2023]\n[survey_windows]\n\
            2023 = { start = \"2023-07-27\", end = \"2023-07-10\" }\n";
        let config = Config::from_toml_str(inverted).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_sites_path_follows_config_file() {
        let dir = std::env::temp_dir().join(format!("sat-cmd-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("run.toml");
        std::fs::write(&path, CONFIG).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.sites, Some(dir.join("sites.geojson")));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
