//! JSON-over-HTTP client for the imagery service.
//!
//! - `POST {base}/collections/{collection}/search`
//!   `{geometry, start, end}` -> `{images: [{id, date}]}`
//! - `POST {base}/collections/{collection}/images/{id}/sample`
//!   `{geometry, bands, scale}` -> `{scale, bands, pixels: [{lon, lat, values}]}`
//!
//! Transient failures (connection errors, timeouts, HTTP 429 and 5xx) are
//! retried with exponential backoff; everything else is returned at once.

use crate::{
    date_range::DateRange,
    error::{Error, Result},
    image::{Image, ImageRef, Pixel},
    source::ImagerySource,
};
use geo::MultiPolygon;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{future::Future, time::Duration};

/// Environment variable consulted for a bearer token when none is configured.
pub const TOKEN_ENV_VAR: &str = "SAT_API_TOKEN";

const INITIAL_BACKOFF_MILLIS: u64 = 1000;

#[derive(Serialize)]
struct SearchRequest {
    geometry: geojson::Geometry,
    start: String,
    end: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    images: Vec<ImageRef>,
}

#[derive(Serialize)]
struct SampleRequest<'a> {
    geometry: geojson::Geometry,
    bands: &'a [String],
    scale: f64,
}

#[derive(Deserialize)]
struct SampleResponse {
    scale: f64,
    bands: Vec<String>,
    pixels: Vec<Pixel>,
}

/// Imagery service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpImagerySource {
    client: Client,
    base_url: Url,
    token: Option<String>,
    max_tries: u32,
}

impl HttpImagerySource {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        max_tries: u32,
        token: Option<String>,
    ) -> Result<HttpImagerySource> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::InvalidFormat(format!("base url {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidFormat(format!("{base_url} cannot be a base url")));
        }
        let client = Client::builder().timeout(timeout).build()?;
        let token = token.or_else(|| std::env::var(TOKEN_ENV_VAR).ok());
        Ok(HttpImagerySource {
            client,
            base_url,
            token,
            max_tries: max_tries.max(1),
        })
    }

    /// `segments` appended to the base url, each percent-encoded as a
    /// single path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidFormat(format!("{} cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_once<B, R>(&self, url: &Url, body: &B) -> Result<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(url.clone()).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(Error::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn post_json<B, R>(&self, url: &Url, body: &B) -> Result<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let backoff = Duration::from_millis(INITIAL_BACKOFF_MILLIS);
        with_retries(self.max_tries, backoff, url, move || self.post_once(url, body)).await
    }
}

/// Run `op` up to `max_tries` times, sleeping `backoff` (doubled after each
/// failure) between tries. Only transient errors are retried.
async fn with_retries<T, F, Fut>(
    max_tries: u32,
    backoff: Duration,
    url: &Url,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut sleep = backoff;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_transient() && attempt < max_tries => {
                warn!(
                    "Attempt {}/{}: request to {} failed: {}",
                    attempt, max_tries, url, e
                );
                info!("Sleeping for {} milliseconds before retry", sleep.as_millis());
                tokio::time::sleep(sleep).await;
                sleep *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn to_geojson(region: &MultiPolygon<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(region))
}

impl ImagerySource for HttpImagerySource {
    async fn search(
        &self,
        collection: &str,
        region: &MultiPolygon<f64>,
        range: DateRange,
    ) -> Result<Vec<ImageRef>> {
        let url = self.endpoint(&["collections", collection, "search"])?;
        let request = SearchRequest {
            geometry: to_geojson(region),
            start: sat_utils::dates::format_date(&range.start()),
            end: sat_utils::dates::format_date(&range.end()),
        };
        let response: SearchResponse = self.post_json(&url, &request).await?;
        debug!(
            "{} images in {} between {} and {}",
            response.images.len(),
            collection,
            range.start(),
            range.end()
        );
        Ok(response.images)
    }

    async fn sample(
        &self,
        collection: &str,
        image: &ImageRef,
        region: &MultiPolygon<f64>,
        bands: &[String],
        scale: f64,
    ) -> Result<Image> {
        let url = self.endpoint(&[
            "collections",
            collection,
            "images",
            image.id.as_str(),
            "sample",
        ])?;
        let request = SampleRequest {
            geometry: to_geojson(region),
            bands,
            scale,
        };
        let response: SampleResponse = self.post_json(&url, &request).await?;
        debug!("{} pixels sampled from {}", response.pixels.len(), image.id);
        Image::new(
            image.id.clone(),
            image.date,
            response.scale,
            response.bands,
            response.pixels,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_response_parses_nulls() {
        let body = r#"{"scale": 30.0, "bands": ["SCL", "B8", "B4"],
            "pixels": [{"lon": 10.0, "lat": 50.0, "values": [4, 3000.5, null]}]}"#;
        let response: SampleResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.bands.len(), 3);
        assert_eq!(response.pixels[0].values, vec![Some(4.0), Some(3000.5), None]);
    }

    #[test]
    fn test_search_response_parses_dates() {
        let body = r#"{"images": [{"id": "20230720T101559_T32UMA", "date": "2023-07-20"}]}"#;
        let response: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            response.images[0].date,
            chrono::NaiveDate::from_ymd_opt(2023, 7, 20).unwrap()
        );
    }

    fn source(base_url: &str) -> HttpImagerySource {
        HttpImagerySource::new(base_url, Duration::from_secs(5), 0, None).unwrap()
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let url = source("http://localhost:8080/v1/")
            .endpoint(&["collections", "COPERNICUS/S2_SR_HARMONIZED", "search"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1/collections/COPERNICUS%2FS2_SR_HARMONIZED/search"
        );

        let url = source("http://localhost:8080")
            .endpoint(&["collections", "L8", "images", "a b?#", "sample"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/collections/L8/images/a%20b%3F%23/sample"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let timeout = Duration::from_secs(5);
        assert!(matches!(
            HttpImagerySource::new("localhost:8080", timeout, 3, None),
            Err(Error::InvalidFormat(_))
        ));
        assert!(matches!(
            HttpImagerySource::new("not a url", timeout, 3, None),
            Err(Error::InvalidFormat(_))
        ));
        assert_eq!(source("http://localhost:8080/v1/").max_tries, 1);
    }

    mod retries {
        use super::*;
        use std::sync::atomic::{AtomicU32, Ordering};

        const BACKOFF: Duration = Duration::from_millis(1);

        fn status(status: u16) -> Error {
            Error::Status {
                status,
                url: String::from("http://localhost/search"),
            }
        }

        /// Calls `op` with the 1-based call number, counting calls.
        async fn run(
            max_tries: u32,
            calls: &AtomicU32,
            op: impl Fn(u32) -> Result<u32>,
        ) -> Result<u32> {
            let url = Url::parse("http://localhost/search").unwrap();
            with_retries(max_tries, BACKOFF, &url, || {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                let result = op(call);
                async move { result }
            })
            .await
        }

        #[tokio::test]
        async fn test_unavailable_then_ok_succeeds_on_second_try() {
            let calls = AtomicU32::new(0);
            let result = run(3, &calls, |call| {
                if call == 1 {
                    Err(status(503))
                } else {
                    Ok(call)
                }
            })
            .await;
            assert_eq!(result.unwrap(), 2);
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn test_client_error_is_not_retried() {
            let calls = AtomicU32::new(0);
            let result = run(3, &calls, |_| Err(status(400))).await;
            assert!(matches!(result, Err(Error::Status { status: 400, .. })));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_transient_errors_stop_after_max_tries() {
            let calls = AtomicU32::new(0);
            let result = run(4, &calls, |_| Err(status(503))).await;
            assert!(matches!(result, Err(Error::Status { status: 503, .. })));
            assert_eq!(calls.load(Ordering::SeqCst), 4);
        }

        #[tokio::test]
        async fn test_rate_limit_is_retried() {
            let calls = AtomicU32::new(0);
            let result = run(2, &calls, |call| {
                if call == 1 {
                    Err(status(429))
                } else {
                    Ok(call)
                }
            })
            .await;
            assert_eq!(result.unwrap(), 2);
        }
    }
}
