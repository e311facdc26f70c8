use crate::bundle::error::BundleError;
use crate::cache::error::CacheError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Failed to determine cache directory")]
    CacheDirResolution(#[source] std::io::Error),

    // First download failed and nothing was cached before
    #[error("No forecast available for station {station}")]
    NoForecastAvailable {
        station: String,
        #[source]
        source: BundleError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
