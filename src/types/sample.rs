use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// The five tracked forecast values for one point in time.
///
/// Samples are only ever produced complete: if any parameter is missing for the requested
/// hour no sample is returned at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastSample {
    /// The queried instant (not truncated to the hour).
    pub time_utc: DateTime<Utc>,
    /// Global irradiance over the last hour (kJ/m²), `Rad1h`.
    pub irradiance: f64,
    /// Sunshine duration during the last hour (s), `SunD1`.
    pub sunshine: f64,
    /// Effective cloud cover (%), `Neff`.
    pub cloud_cover: f64,
    /// Probability for fog (%), `wwM`.
    pub probability_for_fog: f64,
    /// Visibility (m), `VV`.
    pub visibility: f64,
}

impl ForecastSample {
    /// The queried instant in the machine's local timezone.
    pub fn time_local(&self) -> DateTime<Local> {
        self.time_utc.with_timezone(&Local)
    }

    /// The same values, attributed to another instant.
    pub fn with_time(&self, time_utc: DateTime<Utc>) -> Self {
        Self { time_utc, ..*self }
    }
}
