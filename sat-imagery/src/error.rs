/// Error types for the imagery library
use thiserror::Error;

/// Main error type for site loading, imagery requests and table I/O
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[cfg(feature = "api")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The imagery service answered with a non-success status
    #[error("imagery service returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Failed to read or write CSV data
    #[error("Failed to process CSV: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON from the imagery service
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The geometry file is not valid GeoJSON
    #[error("Failed to parse GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    /// A site polygon is missing, degenerate or self-intersecting
    #[error("Invalid geometry for site {site}: {reason}")]
    InvalidGeometry { site: String, reason: String },

    /// A feature carries no usable site identifier
    #[error("Feature {index} has no usable {field:?} property")]
    MissingSiteField { index: usize, field: String },

    /// The geometry file declares a CRS that cannot be brought to lon/lat
    #[error("Unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    /// A band requested from an image is not present
    #[error("Band {band:?} not present in image {image}")]
    MissingBand { band: String, image: String },

    /// Date parsing failed
    #[error("Failed to parse date: {0}")]
    DateParse(String),

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    /// A survey window or date range whose start is after its end
    #[error("Invalid date window: {start} is after {end}")]
    InvalidWindow {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
}

impl Error {
    /// Whether retrying the same request may succeed: connection problems,
    /// timeouts, rate limiting and server-side failures.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "api")]
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Type alias for Results using the imagery Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn test_status_classification() {
        let status = |status| Error::Status {
            status,
            url: String::from("http://localhost/search"),
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(404).is_transient());
        assert!(!Error::InvalidFormat(String::from("x")).is_transient());
    }
}
