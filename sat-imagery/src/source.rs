use crate::{
    date_range::DateRange,
    error::Result,
    image::{Image, ImageRef},
};
use geo::MultiPolygon;

/// Request/response access to an imagery-processing service.
///
/// Collections are searched by date range and bounding region; an image is
/// then sampled over the region at a requested ground resolution. Callers
/// await each request in turn.
#[allow(async_fn_in_trait)]
pub trait ImagerySource {
    /// Images of `collection` intersecting `region` and acquired within
    /// `range` (inclusive).
    async fn search(
        &self,
        collection: &str,
        region: &MultiPolygon<f64>,
        range: DateRange,
    ) -> Result<Vec<ImageRef>>;

    /// Pixels of `bands` of one image, restricted to `region`, at `scale`
    /// metres.
    async fn sample(
        &self,
        collection: &str,
        image: &ImageRef,
        region: &MultiPolygon<f64>,
        bands: &[String],
        scale: f64,
    ) -> Result<Image>;
}
