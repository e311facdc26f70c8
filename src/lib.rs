mod bundle;
mod cache;
mod error;
mod forecast_source;
mod types;
mod utils;
mod weather_station;

#[cfg(test)]
mod test_utils;

pub use error::ForecastError;
pub use forecast_source::*;
pub use weather_station::WeatherStation;

pub use bundle::error::BundleError;
pub use bundle::extractor::{ExtractedForecast, IncrementalDocumentExtractor};
pub use bundle::fetcher::{BundleFetcher, ByteChunkStream, HttpBundleFetcher, DEFAULT_MOSMIX_URL};
pub use bundle::loader::{extract_snapshot, load_snapshot};
pub use bundle::archive::StreamingArchiveReader;
pub use bundle::document::{DocumentEvent, DocumentEvents, Element};
pub use cache::durable::DurableCache;
pub use cache::error::CacheError;
pub use cache::process::{ProcessCache, StationEntry};

pub use types::hour_key::{HourKey, HOUR_KEY_FORMAT};
pub use types::into_utc_trait::IntoUtcDateTime;
pub use types::parameter::Parameter;
pub use types::parameter_series::ParameterSeries;
pub use types::sample::ForecastSample;
pub use types::snapshot::{ExpiryPolicy, ForecastSnapshot};
