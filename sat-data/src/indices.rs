use crate::{
    aggregate::{clear_sky_percentage, mean_value},
    classify::{clear_sky_mask, SceneClassification},
};
use geo::MultiPolygon;
use log::debug;
use sat_imagery::{
    error::Result,
    image::Image,
    observation::{ImageObservation, Statistic},
};
use serde::Deserialize;

/// Name of the derived NDVI band.
pub const NDVI_BAND: &str = "NDVI";

/// Linear NDVI → LAI transform. The default coefficients are an empirical
/// fit of low confidence; keep them configurable.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LaiCoefficients {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for LaiCoefficients {
    fn default() -> Self {
        LaiCoefficients {
            slope: 3.618,
            intercept: -0.118,
        }
    }
}

impl LaiCoefficients {
    pub fn apply(&self, ndvi: Statistic) -> Statistic {
        ndvi.map(|v| self.slope * v + self.intercept)
    }
}

/// Everything needed to turn one image (plus its aerosol window) into an
/// [`ImageObservation`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexParams {
    pub scene: SceneClassification,
    pub nir_band: String,
    pub red_band: String,
    /// Reduction scale of the multispectral image, metres.
    pub scale: f64,
    pub lai: LaiCoefficients,
    pub aerosol_band: String,
    /// Reduction scale of the aerosol product, metres.
    pub aerosol_scale: f64,
}

impl Default for IndexParams {
    fn default() -> Self {
        IndexParams {
            scene: SceneClassification::default(),
            nir_band: String::from("B8"),
            red_band: String::from("B4"),
            scale: 30.0,
            lai: LaiCoefficients::default(),
            aerosol_band: String::from("absorbing_aerosol_index"),
            aerosol_scale: 1000.0,
        }
    }
}

impl IndexParams {
    /// Bands to request from the multispectral collection.
    pub fn image_bands(&self) -> Vec<String> {
        vec![
            self.scene.band.clone(),
            self.nir_band.clone(),
            self.red_band.clone(),
        ]
    }
}

/// Pixel-wise NDVI. Undefined for negative reflectances or a zero sum, which
/// keeps every defined value in [-1, 1].
pub fn ndvi(nir: f64, red: f64) -> Option<f64> {
    if nir < 0.0 || red < 0.0 {
        return None;
    }
    let sum = nir + red;
    (sum > 0.0).then(|| (nir - red) / sum)
}

/// Single-band NDVI image with the source image's mask.
pub fn ndvi_image(image: &Image, nir_band: &str, red_band: &str) -> Result<Image> {
    let nir = image.band_index(nir_band)?;
    let red = image.band_index(red_band)?;
    Ok(image.derive_band(NDVI_BAND, |values| {
        let nir = values.get(nir).copied().flatten()?;
        let red = values.get(red).copied().flatten()?;
        ndvi(nir, red)
    }))
}

/// Compute the table row for one (mosaicked) image.
///
/// `aerosol` is the stack of aerosol observations around the image date,
/// or `None` when the window held none.
pub fn compute_observation(
    image: &Image,
    aerosol: Option<&Image>,
    region: &MultiPolygon<f64>,
    params: &IndexParams,
) -> Result<ImageObservation> {
    let mask = clear_sky_mask(image, &params.scene)?;
    let clear_sky = clear_sky_percentage(image, &mask, region, params.scale);

    let masked = image.update_mask(&mask);
    let ndvi = mean_value(
        &ndvi_image(&masked, &params.nir_band, &params.red_band)?,
        NDVI_BAND,
        region,
        params.scale,
    )?;
    let lai = params.lai.apply(ndvi);

    let aot = match aerosol {
        Some(aerosol) => mean_value(aerosol, &params.aerosol_band, region, params.aerosol_scale)?,
        None => Statistic::Undefined,
    };

    debug!(
        "{} {}: clear={} ndvi={} lai={} aot={}",
        image.id(),
        image.date(),
        clear_sky,
        ndvi,
        lai,
        aot
    );
    Ok(ImageObservation {
        date: image.date(),
        clear_sky_percentage: clear_sky,
        ndvi,
        lai,
        aot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{grid_image, region};

    #[test]
    fn test_ndvi_bounds() {
        assert_eq!(ndvi(0.5, 0.5), Some(0.0));
        assert_eq!(ndvi(1.0, 0.0), Some(1.0));
        assert_eq!(ndvi(0.0, 1.0), Some(-1.0));
        assert_eq!(ndvi(0.0, 0.0), None);
        assert_eq!(ndvi(-0.1, 0.3), None);
        for (nir, red) in [(3000.0, 500.0), (120.0, 4000.0), (1.0, 1e-9)] {
            let v = ndvi(nir, red).unwrap();
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_lai_law() {
        let lai = LaiCoefficients::default();
        let value = lai.apply(Statistic::Defined(0.5)).value().unwrap();
        assert!((value - (3.618 * 0.5 - 0.118)).abs() < 1e-12);
        assert_eq!(lai.apply(Statistic::Undefined), Statistic::Undefined);
    }

    #[test]
    fn test_observation_uses_clear_pixels_only() {
        // first 5 pixels are cloud (SCL 9) with bogus reflectance
        let image = grid_image(&["SCL", "B8", "B4"], 30.0, |i| {
            if i < 5 {
                vec![Some(9.0), Some(100.0), Some(9000.0)]
            } else {
                vec![Some(4.0), Some(3000.0), Some(1000.0)]
            }
        });
        let aerosol = grid_image(&["absorbing_aerosol_index"], 1000.0, |i| {
            vec![Some(if i % 2 == 0 { 0.2 } else { 0.4 })]
        });
        let params = IndexParams::default();
        let obs = compute_observation(&image, Some(&aerosol), &region(), &params).unwrap();
        assert_eq!(obs.clear_sky_percentage, Statistic::Defined(80.0));
        assert_eq!(obs.ndvi, Statistic::Defined(0.5));
        let lai = obs.lai.value().unwrap();
        assert!((lai - (3.618 * 0.5 - 0.118)).abs() < 1e-12);
        let aot = obs.aot.value().unwrap();
        assert!((aot - (13.0 * 0.2 + 12.0 * 0.4) / 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_fully_cloudy_image_keeps_row_with_undefined_indices() {
        let image = grid_image(&["SCL", "B8", "B4"], 30.0, |_| {
            vec![Some(9.0), Some(3000.0), Some(1000.0)]
        });
        let obs = compute_observation(&image, None, &region(), &IndexParams::default()).unwrap();
        assert_eq!(obs.clear_sky_percentage, Statistic::Defined(0.0));
        assert_eq!(obs.ndvi, Statistic::Undefined);
        assert_eq!(obs.lai, Statistic::Undefined);
        assert_eq!(obs.aot, Statistic::Undefined);
    }
}
