use sat_imagery::{error::Result, image::Image};
use serde::Deserialize;

/// Sentinel-2 scene classification codes treated as clear sky: vegetation,
/// bare soil, water and snow.
pub const DEFAULT_CLEAR_CLASSES: [u8; 4] = [4, 5, 6, 11];

/// Which band carries the per-pixel scene class and which classes count as
/// usable land/water/snow.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SceneClassification {
    pub band: String,
    pub clear_classes: Vec<u8>,
}

impl Default for SceneClassification {
    fn default() -> Self {
        SceneClassification {
            band: String::from("SCL"),
            clear_classes: DEFAULT_CLEAR_CLASSES.to_vec(),
        }
    }
}

impl SceneClassification {
    pub fn is_clear(&self, class: f64) -> bool {
        self.clear_classes
            .iter()
            .any(|c| f64::from(*c) == class.round())
    }
}

/// One boolean per pixel: true where the pixel is valid and its scene class
/// is in the clear-sky allow-set.
pub fn clear_sky_mask(image: &Image, scene: &SceneClassification) -> Result<Vec<bool>> {
    let band = image.band_index(&scene.band)?;
    Ok((0..image.len())
        .map(|i| image.value(i, band).is_some_and(|c| scene.is_clear(c)))
        .collect())
}
