//! The merged, immutable forecast dataset held for one station.

use crate::types::hour_key::HourKey;
use crate::types::into_utc_trait::IntoUtcDateTime;
use crate::types::parameter::Parameter;
use crate::types::parameter_series::ParameterSeries;
use crate::types::sample::ForecastSample;
use chrono::{DateTime, TimeDelta, Utc};
use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Governs when a snapshot is considered due for a refresh.
///
/// A snapshot expires only when *both* its content is older than `content_max_age` (measured
/// from the upstream issue time) *and* it was fetched longer than `fetch_min_age` plus a random
/// jitter ago. The second condition keeps a slow-to-republish upstream from being polled in a
/// tight loop, the jitter spreads refreshes of several processes sharing one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    /// Upstream publishing cadence.
    pub content_max_age: TimeDelta,
    /// Minimum time since the last download before downloading again.
    pub fetch_min_age: TimeDelta,
    /// Upper bound (inclusive) of the random delay added to `fetch_min_age`.
    pub max_jitter: TimeDelta,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            content_max_age: TimeDelta::minutes(60),
            fetch_min_age: TimeDelta::minutes(20),
            max_jitter: TimeDelta::minutes(15),
        }
    }
}

impl ExpiryPolicy {
    /// Draws a jitter uniformly from `0..=max_jitter`, at second resolution.
    pub fn sample_jitter(&self) -> TimeDelta {
        let max_secs = self.max_jitter.num_seconds();
        if max_secs <= 0 {
            return TimeDelta::zero();
        }
        TimeDelta::seconds(rand::thread_rng().gen_range(0..=max_secs))
    }
}

/// One station's forecast: the issue time and validity window of the bundle it was built from,
/// plus one hour-keyed series per tracked [`Parameter`].
///
/// Snapshots are never modified; [`ForecastSnapshot::merge`] builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSnapshot {
    station_id: String,
    issue_time_utc: DateTime<Utc>,
    fetched_utc: DateTime<Utc>,
    date_from_utc: DateTime<Utc>,
    date_to_utc: DateTime<Utc>,
    #[serde(rename = "parameter_series")]
    parameters: BTreeMap<Parameter, ParameterSeries>,
}

impl ForecastSnapshot {
    /// Builds a snapshot from an extracted forecast window.
    ///
    /// `values` is keyed by upstream element code; codes that are not tracked are ignored and
    /// tracked parameters without published values get an empty series. Returns `None` if
    /// `time_steps` is empty.
    pub fn from_time_steps(
        station_id: impl Into<String>,
        issue_time_utc: DateTime<Utc>,
        fetched_utc: DateTime<Utc>,
        time_steps: &[DateTime<Utc>],
        values: &HashMap<String, Vec<Option<f64>>>,
    ) -> Option<Self> {
        let date_from_utc = *time_steps.iter().min()?;
        let date_to_utc = *time_steps.iter().max()?;
        let station_id = station_id.into();

        let parameters = Parameter::ALL
            .into_iter()
            .map(|parameter| {
                let series = match values.get(parameter.code()) {
                    Some(values) => {
                        ParameterSeries::from_time_steps(parameter.code(), time_steps, values)
                    }
                    None => {
                        warn!(
                            "Station {} has no {} values in this forecast",
                            station_id, parameter
                        );
                        ParameterSeries::empty(parameter.code())
                    }
                };
                (parameter, series)
            })
            .collect();

        Some(Self {
            station_id,
            issue_time_utc,
            fetched_utc,
            date_from_utc,
            date_to_utc,
            parameters,
        })
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn issue_time_utc(&self) -> DateTime<Utc> {
        self.issue_time_utc
    }

    /// When the bundle behind this snapshot was downloaded.
    pub fn fetched_utc(&self) -> DateTime<Utc> {
        self.fetched_utc
    }

    pub fn date_from_utc(&self) -> DateTime<Utc> {
        self.date_from_utc
    }

    pub fn date_to_utc(&self) -> DateTime<Utc> {
        self.date_to_utc
    }

    pub fn series(&self, parameter: Parameter) -> Option<&ParameterSeries> {
        self.parameters.get(&parameter)
    }

    /// Time elapsed since upstream issued the forecast.
    pub fn content_age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.issue_time_utc
    }

    /// Time elapsed since the forecast was downloaded.
    pub fn fetch_age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.fetched_utc
    }

    /// Checks expiry with a freshly drawn jitter.
    pub fn is_expired(&self, now: DateTime<Utc>, policy: &ExpiryPolicy) -> bool {
        self.is_expired_with_jitter(now, policy, policy.sample_jitter())
    }

    pub fn is_expired_with_jitter(
        &self,
        now: DateTime<Utc>,
        policy: &ExpiryPolicy,
        jitter: TimeDelta,
    ) -> bool {
        self.content_age(now) > policy.content_max_age
            && self.fetch_age(now) > policy.fetch_min_age + jitter
    }

    /// Whether `instant` lies within the forecast window, both ends inclusive.
    pub fn supports<T: IntoUtcDateTime>(&self, instant: T) -> bool {
        let utc = instant.into_utc();
        self.date_from_utc <= utc && utc <= self.date_to_utc
    }

    /// The value of `parameter` for the UTC hour `instant` falls into.
    pub fn value_at<T: IntoUtcDateTime>(&self, parameter: Parameter, instant: T) -> Option<f64> {
        let utc = instant.into_utc();
        if !self.supports(utc) {
            return None;
        }
        self.parameters.get(&parameter)?.get(HourKey::new(utc))
    }

    /// All five parameters for `instant`, or `None` if the instant is outside the window or
    /// any parameter has no value for that hour.
    pub fn sample_at<T: IntoUtcDateTime>(&self, instant: T) -> Option<ForecastSample> {
        let time_utc = instant.into_utc();
        if !self.supports(time_utc) {
            return None;
        }
        let sample = (|| {
            Some(ForecastSample {
                time_utc,
                irradiance: self.value_at(Parameter::Irradiance, time_utc)?,
                sunshine: self.value_at(Parameter::Sunshine, time_utc)?,
                cloud_cover: self.value_at(Parameter::CloudCover, time_utc)?,
                probability_for_fog: self.value_at(Parameter::FogProbability, time_utc)?,
                visibility: self.value_at(Parameter::Visibility, time_utc)?,
            })
        })();
        if sample.is_none() {
            info!(
                "Forecast sample for station {} at {} is incomplete",
                self.station_id, time_utc
            );
        }
        sample
    }

    /// Merges with the previously held snapshot, keeping history back to `now - retention`.
    pub fn merge(
        self,
        older: Option<&ForecastSnapshot>,
        retention: TimeDelta,
        now: DateTime<Utc>,
    ) -> ForecastSnapshot {
        self.merge_retaining(older, HourKey::new(now - retention))
    }

    /// Merges with `older`, keeping its hours from `retain_from` on that this snapshot lacks.
    ///
    /// The window starts where `older` starts and ends where this snapshot ends. Hours of
    /// `older` before `retain_from` are dropped, so the start of the window may carry no values.
    /// Without an older snapshot, or with one of another station, `self` is returned unchanged.
    pub fn merge_retaining(
        self,
        older: Option<&ForecastSnapshot>,
        retain_from: HourKey,
    ) -> ForecastSnapshot {
        let Some(older) = older else {
            return self;
        };
        if older.station_id != self.station_id {
            warn!(
                "Refusing to merge forecast of station {} into station {}",
                older.station_id, self.station_id
            );
            return self;
        }

        let parameters = self
            .parameters
            .iter()
            .map(|(parameter, series)| {
                let merged = match older.parameters.get(parameter) {
                    Some(old_series) => series.merge(old_series, retain_from),
                    None => series.clone(),
                };
                (*parameter, merged)
            })
            .collect();

        ForecastSnapshot {
            date_from_utc: older.date_from_utc,
            date_to_utc: self.date_to_utc,
            issue_time_utc: self.issue_time_utc,
            fetched_utc: self.fetched_utc.max(older.fetched_utc),
            station_id: self.station_id,
            parameters,
        }
    }

    /// Serializes to the durable JSON representation.
    pub fn save(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Restores a snapshot written by [`ForecastSnapshot::save`].
    pub fn load(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
