use crate::error::ForecastError;
use crate::forecast_source::ForecastSource;
use crate::types::into_utc_trait::IntoUtcDateTime;
use crate::types::sample::ForecastSample;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Forecast queries for a single station.
///
/// Every call goes through the shared [`ForecastSource`], so the answers always reflect its
/// current (possibly just refreshed) snapshot.
///
/// # Examples
///
/// ```rust,no_run
/// # use mosmix::{ForecastSource, ForecastError};
/// # use std::sync::Arc;
/// # async fn run() -> Result<(), ForecastError> {
/// let source = Arc::new(ForecastSource::builder().build().await?);
/// let station = source.station("N0677");
/// if let Some(sample) = station.get(None).await? {
///     println!("Cloud cover now: {}%", sample.cloud_cover);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WeatherStation {
    station_id: String,
    source: Arc<ForecastSource>,
}

impl WeatherStation {
    pub fn new(station_id: impl Into<String>, source: Arc<ForecastSource>) -> Self {
        Self {
            station_id: station_id.into(),
            source,
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    /// First hour covered by the forecast, including retained history.
    pub async fn forecast_from(&self) -> Result<DateTime<Utc>, ForecastError> {
        Ok(self.source.get(&self.station_id).await?.date_from_utc())
    }

    /// Last hour covered by the forecast.
    pub async fn forecast_to(&self) -> Result<DateTime<Utc>, ForecastError> {
        Ok(self.source.get(&self.station_id).await?.date_to_utc())
    }

    /// The forecast sample at `instant`, or now when `None`.
    ///
    /// `Ok(None)` means there is no forecast for that instant: it lies outside the forecast
    /// window or a parameter is missing for its hour.
    pub async fn get(
        &self,
        instant: Option<DateTime<Utc>>,
    ) -> Result<Option<ForecastSample>, ForecastError> {
        let instant = instant.unwrap_or_else(Utc::now);
        self.source.sample(&self.station_id, instant).await
    }

    /// Like [`WeatherStation::get`] for any supported time type; naive times are local time.
    pub async fn get_at<T: IntoUtcDateTime>(
        &self,
        instant: T,
    ) -> Result<Option<ForecastSample>, ForecastError> {
        self.get(Some(instant.into_utc())).await
    }
}
