//! Best-effort regional reduction.
//!
//! Pixels whose centre lies inside the region take part. When the requested
//! scale is coarser than the image's own, pixels are first averaged into
//! `scale`-metre cells; otherwise each pixel is its own cell. Pixels without
//! a value are skipped rather than failing the reduction.

use geo::{Centroid, Contains, MultiPolygon, Point};
use sat_imagery::{
    error::Result,
    image::{Grid, Image},
    observation::Statistic,
};
use std::collections::BTreeMap;

fn reduce<F>(image: &Image, region: &MultiPolygon<f64>, scale: f64, sample: F) -> Vec<f64>
where
    F: Fn(usize) -> Option<f64>,
{
    let inside = image
        .pixels()
        .iter()
        .enumerate()
        .filter(|(_, p)| region.contains(&Point::new(p.lon, p.lat)));

    if scale <= image.scale() {
        return inside.filter_map(|(i, _)| sample(i)).collect();
    }

    let reference_lat = region
        .centroid()
        .map(|c| c.y())
        .or_else(|| image.pixels().first().map(|p| p.lat))
        .unwrap_or_default();
    let grid = Grid::new(scale, reference_lat);
    let mut cells: BTreeMap<(i64, i64), (f64, u32)> = BTreeMap::new();
    for (i, pixel) in inside {
        if let Some(value) = sample(i) {
            let cell = cells.entry(grid.key(pixel.lon, pixel.lat)).or_insert((0.0, 0));
            cell.0 += value;
            cell.1 += 1;
        }
    }
    cells
        .into_values()
        .map(|(sum, n)| sum / f64::from(n))
        .collect()
}

/// Number of valid cells of `image` inside `region` at `scale` metres.
pub fn count_pixels(image: &Image, region: &MultiPolygon<f64>, scale: f64) -> usize {
    reduce(image, region, scale, |i| image.is_valid(i).then_some(1.0)).len()
}

/// Mean of `band` over `region` at `scale` metres; `Undefined` when no cell
/// has a value.
pub fn mean_value(
    image: &Image,
    band: &str,
    region: &MultiPolygon<f64>,
    scale: f64,
) -> Result<Statistic> {
    let band = image.band_index(band)?;
    let values = reduce(image, region, scale, |i| image.value(i, band));
    if values.is_empty() {
        return Ok(Statistic::Undefined);
    }
    Ok(Statistic::from(values.iter().sum::<f64>() / values.len() as f64))
}

/// `100 × count(clear) / count(all)`, undefined when the image has no valid
/// cell inside the region.
pub fn clear_sky_percentage(
    image: &Image,
    mask: &[bool],
    region: &MultiPolygon<f64>,
    scale: f64,
) -> Statistic {
    let total = count_pixels(image, region, scale);
    if total == 0 {
        return Statistic::Undefined;
    }
    let clear = count_pixels(&image.update_mask(mask), region, scale);
    Statistic::from((100.0 * clear as f64 / total as f64).clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{grid_image, region};
    use geo::polygon;

    #[test]
    fn test_count_and_mean() {
        let image = grid_image(&["B4"], 30.0, |i| vec![Some(i as f64)]);
        assert_eq!(count_pixels(&image, &region(), 30.0), 25);
        // mean of 0..25
        assert_eq!(
            mean_value(&image, "B4", &region(), 30.0).unwrap(),
            Statistic::Defined(12.0)
        );
    }

    #[test]
    fn test_pixels_outside_region_are_ignored() {
        let image = grid_image(&["B4"], 30.0, |_| vec![Some(1.0)]);
        // only the first column (lon 10.001) falls in this strip
        let strip = MultiPolygon(vec![polygon![
            (x: 10.0, y: 50.0),
            (x: 10.002, y: 50.0),
            (x: 10.002, y: 50.01),
            (x: 10.0, y: 50.01),
            (x: 10.0, y: 50.0),
        ]]);
        assert_eq!(count_pixels(&image, &strip, 30.0), 5);
    }

    #[test]
    fn test_no_data_is_undefined_not_zero() {
        let image = grid_image(&["B4"], 30.0, |_| vec![None]);
        assert_eq!(count_pixels(&image, &region(), 30.0), 0);
        assert_eq!(
            mean_value(&image, "B4", &region(), 30.0).unwrap(),
            Statistic::Undefined
        );
        assert_eq!(
            clear_sky_percentage(&image, &[true; 25], &region(), 30.0),
            Statistic::Undefined
        );
    }

    #[test]
    fn test_coarse_scale_averages_cells() {
        // 1000 m cells: the 5×5 grid spans ~570 m × 890 m, so it collapses
        // into very few cells, each the mean of its members
        let image = grid_image(&["AER"], 30.0, |_| vec![Some(0.5)]);
        let cells = count_pixels(&image, &region(), 1000.0);
        assert!((1..=4).contains(&cells));
        assert_eq!(
            mean_value(&image, "AER", &region(), 1000.0).unwrap(),
            Statistic::Defined(0.5)
        );
    }

    #[test]
    fn test_clear_sky_percentage() {
        let image = grid_image(&["SCL"], 30.0, |_| vec![Some(4.0)]);
        let mut mask = [true; 25];
        for m in mask.iter_mut().take(5) {
            *m = false;
        }
        assert_eq!(
            clear_sky_percentage(&image, &mask, &region(), 30.0),
            Statistic::Defined(80.0)
        );
        assert_eq!(
            clear_sky_percentage(&image, &[false; 25], &region(), 30.0),
            Statistic::Defined(0.0)
        );
    }
}
