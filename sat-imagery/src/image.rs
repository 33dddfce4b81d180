use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;

/// Metres per degree of latitude.
pub const METRES_PER_DEGREE: f64 = 111_320.0;

/// An image available from a collection, before any pixels are fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ImageRef {
    pub id: String,
    pub date: NaiveDate,
}

/// One sampled pixel: its centre and one value per band. A value is `None`
/// where the source has no data for that band.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Pixel {
    pub lon: f64,
    pub lat: f64,
    pub values: Vec<Option<f64>>,
}

/// The pixels of one image sampled over a region at a fixed ground
/// resolution, together with a validity mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    id: String,
    date: NaiveDate,
    scale: f64,
    bands: Vec<String>,
    pixels: Vec<Pixel>,
    mask: Vec<bool>,
}

impl Image {
    /// Build an image; every pixel must carry one value per band. Pixels
    /// with no value in any band start out masked.
    pub fn new(
        id: impl Into<String>,
        date: NaiveDate,
        scale: f64,
        bands: Vec<String>,
        pixels: Vec<Pixel>,
    ) -> Result<Image> {
        let id = id.into();
        if let Some(bad) = pixels.iter().find(|p| p.values.len() != bands.len()) {
            return Err(Error::InvalidFormat(format!(
                "image {id}: pixel at ({}, {}) has {} values for {} bands",
                bad.lon,
                bad.lat,
                bad.values.len(),
                bands.len()
            )));
        }
        if !(scale > 0.0) {
            return Err(Error::InvalidFormat(format!(
                "image {id}: scale must be positive, got {scale}"
            )));
        }
        let mask = pixels
            .iter()
            .map(|p| p.values.iter().any(Option::is_some))
            .collect();
        Ok(Image {
            id,
            date,
            scale,
            bands,
            pixels,
            mask,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Ground sample distance in metres.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn is_valid(&self, index: usize) -> bool {
        self.mask.get(index).copied().unwrap_or(false)
    }

    pub fn band_index(&self, band: &str) -> Result<usize> {
        self.bands
            .iter()
            .position(|b| b == band)
            .ok_or_else(|| Error::MissingBand {
                band: band.to_string(),
                image: self.id.clone(),
            })
    }

    /// Value of `band` at pixel `index`, `None` when masked or missing.
    pub fn value(&self, index: usize, band: usize) -> Option<f64> {
        if !self.is_valid(index) {
            return None;
        }
        self.pixels
            .get(index)
            .and_then(|p| p.values.get(band).copied().flatten())
    }

    /// A copy with pixels masked out wherever `mask` is false. Existing
    /// masked pixels stay masked.
    pub fn update_mask(&self, mask: &[bool]) -> Image {
        let mut image = self.clone();
        for (i, valid) in image.mask.iter_mut().enumerate() {
            *valid = *valid && mask.get(i).copied().unwrap_or(false);
        }
        image
    }

    /// A single-band image holding `compute(values)` for every pixel, keeping
    /// this image's mask.
    pub fn derive_band<F>(&self, name: &str, compute: F) -> Image
    where
        F: Fn(&[Option<f64>]) -> Option<f64>,
    {
        let pixels = self
            .pixels
            .iter()
            .map(|p| Pixel {
                lon: p.lon,
                lat: p.lat,
                values: vec![compute(&p.values)],
            })
            .collect();
        Image {
            id: self.id.clone(),
            date: self.date,
            scale: self.scale,
            bands: vec![name.to_string()],
            pixels,
            mask: self.mask.clone(),
        }
    }

    /// Combine same-date images (e.g. adjacent tiles of one overpass) into
    /// one. Where a valid pixel of an earlier image covers a grid cell, later
    /// images' pixels in that cell are dropped.
    pub fn mosaic(images: Vec<Image>) -> Result<Image> {
        Image::combine(images, true)
    }

    /// Stack images so every pixel of every image is kept, e.g. to average a
    /// temporal window of observations.
    pub fn stack(images: Vec<Image>) -> Result<Image> {
        Image::combine(images, false)
    }

    fn combine(images: Vec<Image>, first_wins: bool) -> Result<Image> {
        let mut images = images.into_iter();
        let mut combined = images
            .next()
            .ok_or_else(|| Error::InvalidFormat(String::from("cannot combine zero images")))?;
        let grid = combined
            .pixels
            .first()
            .map(|p| Grid::new(combined.scale, p.lat))
            .filter(|_| first_wins);
        let mut claimed: HashSet<(i64, i64)> = match grid {
            Some(grid) => combined.valid_cells(grid).collect(),
            None => HashSet::new(),
        };
        for image in images {
            if image.bands != combined.bands {
                return Err(Error::InvalidFormat(format!(
                    "cannot combine {} ({:?}) with {} ({:?})",
                    combined.id, combined.bands, image.id, image.bands
                )));
            }
            combined.id = format!("{}+{}", combined.id, image.id);
            // cells only count as claimed once the whole image is merged
            let mut claiming = HashSet::new();
            for (pixel, valid) in image.pixels.into_iter().zip(image.mask) {
                if let Some(grid) = grid {
                    let key = grid.key(pixel.lon, pixel.lat);
                    if claimed.contains(&key) {
                        continue;
                    }
                    if valid {
                        claiming.insert(key);
                    }
                }
                combined.pixels.push(pixel);
                combined.mask.push(valid);
            }
            claimed.extend(claiming);
        }
        Ok(combined)
    }

    fn valid_cells(&self, grid: Grid) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.pixels
            .iter()
            .zip(&self.mask)
            .filter(|(_, valid)| **valid)
            .map(move |(p, _)| grid.key(p.lon, p.lat))
    }
}

/// A regular lon/lat grid whose cells are approximately `scale` metres on
/// a side at the reference latitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    dlon: f64,
    dlat: f64,
}

impl Grid {
    pub fn new(scale: f64, reference_lat: f64) -> Grid {
        let dlat = scale / METRES_PER_DEGREE;
        let cos_lat = reference_lat.to_radians().cos().abs().max(1e-6);
        Grid {
            dlon: dlat / cos_lat,
            dlat,
        }
    }

    pub fn key(&self, lon: f64, lat: f64) -> (i64, i64) {
        (
            (lon / self.dlon).floor() as i64,
            (lat / self.dlat).floor() as i64,
        )
    }
}
