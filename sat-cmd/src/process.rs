//! Fetch imagery for every site and year, then write tables, charts and the
//! closest-dates summary.

use crate::{
    config::{Config, Inputs},
    plot::render_site_year,
};
use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use log::{debug, error, info, warn};
use sat_data::{
    indices::{compute_observation, IndexParams},
    selection::select_closest_dates,
};
use sat_imagery::{
    date_range::DateRange,
    error::Result,
    http::HttpImagerySource,
    image::{Image, ImageRef},
    observation::{ClosestDateRecord, ImageObservation, SiteYearTable},
    site::Site,
    source::ImagerySource,
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

/// Builds the table of one site and year from an imagery source.
pub struct SiteYearProcessor<'a, S> {
    source: &'a S,
    config: &'a Config,
    params: IndexParams,
}

impl<'a, S: ImagerySource> SiteYearProcessor<'a, S> {
    pub fn new(source: &'a S, config: &'a Config) -> Self {
        SiteYearProcessor {
            source,
            config,
            params: config.index_params(),
        }
    }

    /// One row per acquisition date of the season, in date order.
    pub async fn process(&self, site: &Site, year: i32) -> anyhow::Result<SiteYearTable> {
        let batches = self.config.season.batches(year)?;
        let mut observations = Vec::new();
        for (i, batch) in batches.iter().enumerate() {
            let rows = self
                .process_batch(site, *batch)
                .await
                .with_context(|| format!("batch {}..{}", batch.start(), batch.end()))?;
            info!(
                "{} {}: batch {}/{} ({}..{}) gave {} dates",
                site.id,
                year,
                i + 1,
                batches.len(),
                batch.start(),
                batch.end(),
                rows.len()
            );
            observations.extend(rows);
        }
        Ok(SiteYearTable::new(site.id.clone(), year, observations))
    }

    async fn process_batch(&self, site: &Site, range: DateRange) -> Result<Vec<ImageObservation>> {
        let collection = &self.config.imagery.collection;
        let refs = self.source.search(collection, &site.geometry, range).await?;

        let mut by_date: BTreeMap<NaiveDate, Vec<ImageRef>> = BTreeMap::new();
        for image in refs {
            if range.contains(&image.date) {
                by_date.entry(image.date).or_default().push(image);
            } else {
                debug!("Ignoring {} dated {} outside {:?}", image.id, image.date, range);
            }
        }

        let bands = self.params.image_bands();
        let mut rows = Vec::with_capacity(by_date.len());
        for (date, refs) in by_date {
            let mut tiles = Vec::with_capacity(refs.len());
            for image in &refs {
                tiles.push(
                    self.source
                        .sample(collection, image, &site.geometry, &bands, self.params.scale)
                        .await?,
                );
            }
            let image = Image::mosaic(tiles)?;
            let aerosol = self.aerosol_window(site, date).await?;
            rows.push(compute_observation(
                &image,
                aerosol.as_ref(),
                &site.geometry,
                &self.params,
            )?);
        }
        Ok(rows)
    }

    /// All aerosol observations within the configured window of `date`,
    /// stacked; `None` when there are none.
    async fn aerosol_window(&self, site: &Site, date: NaiveDate) -> Result<Option<Image>> {
        let aerosol = &self.config.aerosol;
        let range = DateRange::around(date, aerosol.window_days);
        let refs = self
            .source
            .search(&aerosol.collection, &site.geometry, range)
            .await?;
        if refs.is_empty() {
            return Ok(None);
        }
        let bands = [aerosol.band.clone()];
        let mut images = Vec::with_capacity(refs.len());
        for image in &refs {
            images.push(
                self.source
                    .sample(&aerosol.collection, image, &site.geometry, &bands, aerosol.scale)
                    .await?,
            );
        }
        Image::stack(images).map(Some)
    }
}

/// A site-year that produced no output.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteYearFailure {
    pub site_index: usize,
    pub site: String,
    pub year: i32,
    pub reason: String,
}

/// What a processing run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub tables: Vec<PathBuf>,
    pub records: Vec<ClosestDateRecord>,
    pub failures: Vec<SiteYearFailure>,
}

/// Process sites × years in turn. A failing site-year is logged and
/// skipped: it writes no table and adds no summary records.
pub async fn process_sites<S: ImagerySource>(
    source: &S,
    sites: &[Site],
    config: &Config,
    output_dir: &Path,
    plots: bool,
) -> RunReport {
    let processor = SiteYearProcessor::new(source, config);
    let mut report = RunReport::default();
    for (index, site) in sites.iter().enumerate() {
        for &year in &config.years {
            info!("Processing site {} ({}/{}) for {}", site.id, index + 1, sites.len(), year);
            match process_site_year(&processor, site, year, config, output_dir, plots).await {
                Ok((path, records)) => {
                    report.tables.push(path);
                    report.records.extend(records);
                }
                Err(e) => {
                    warn!("Skipping site {} (index {}) for {}: {:#}", site.id, index, year, e);
                    report.failures.push(SiteYearFailure {
                        site_index: index,
                        site: site.id.clone(),
                        year,
                        reason: format!("{e:#}"),
                    });
                }
            }
        }
    }
    report
}

async fn process_site_year<S: ImagerySource>(
    processor: &SiteYearProcessor<'_, S>,
    site: &Site,
    year: i32,
    config: &Config,
    output_dir: &Path,
    plots: bool,
) -> anyhow::Result<(PathBuf, Vec<ClosestDateRecord>)> {
    let window = config
        .survey_window(year)
        .ok_or_else(|| anyhow!("no survey window for {year}"))?;
    let table = processor.process(site, year).await?;

    let path = output_dir.join(SiteYearTable::file_name(&site.id, year));
    table
        .write_csv(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} rows to {}", table.len(), path.display());

    let records = select_closest_dates(&table, &config.thresholds, window.end);
    if plots {
        render_site_year(&table, window, &records, config, output_dir);
    }
    Ok((path, records))
}

/// Write the closest-dates summary of a run.
pub fn write_summary(output_dir: &Path, records: &[ClosestDateRecord]) -> anyhow::Result<PathBuf> {
    let path = output_dir.join(ClosestDateRecord::FILE_NAME);
    ClosestDateRecord::write_csv(&path, records)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} summary records to {}", records.len(), path.display());
    Ok(path)
}

pub async fn run_process(inputs: Inputs, plots: bool) -> anyhow::Result<()> {
    let Inputs {
        config,
        sites,
        output_dir,
    } = inputs;
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let imagery = &config.imagery;
    let source = HttpImagerySource::new(
        &imagery.base_url,
        Duration::from_secs(imagery.timeout_secs),
        imagery.max_tries(),
        imagery.token.clone(),
    )?;

    let report = process_sites(&source, &sites, &config, &output_dir, plots).await;
    write_summary(&output_dir, &report.records)?;

    let total = sites.len() * config.years.len();
    info!("{} of {} site-years processed", report.tables.len(), total);
    for failure in &report.failures {
        error!(
            "Site {} (index {}) {} failed: {}",
            failure.site, failure.site_index, failure.year, failure.reason
        );
    }
    Ok(())
}
