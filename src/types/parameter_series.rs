use crate::types::hour_key::HourKey;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hour-keyed values of a single forecast parameter.
///
/// A key present with a `None` value means upstream published the hour without a value (`-`),
/// which is kept apart from "hour unknown" so a newer window can override an older value with
/// an explicit gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSeries {
    name: String,
    series: BTreeMap<HourKey, Option<f64>>,
}

impl ParameterSeries {
    pub fn new(name: impl Into<String>, series: BTreeMap<HourKey, Option<f64>>) -> Self {
        Self {
            name: name.into(),
            series,
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, BTreeMap::new())
    }

    /// Pairs each time step with the value published at the same position.
    ///
    /// Extra entries on either side are dropped.
    pub fn from_time_steps(
        name: impl Into<String>,
        time_steps: &[DateTime<Utc>],
        values: &[Option<f64>],
    ) -> Self {
        let name = name.into();
        if time_steps.len() != values.len() {
            warn!(
                "Parameter {} has {} values for {} time steps, truncating to the shorter",
                name,
                values.len(),
                time_steps.len()
            );
        }
        let series = time_steps
            .iter()
            .zip(values.iter())
            .map(|(time, value)| (HourKey::new(*time), *value))
            .collect();
        Self { name, series }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value for the hour, `None` if the hour is unknown or published without value.
    pub fn get(&self, key: HourKey) -> Option<f64> {
        self.series.get(&key).copied().flatten()
    }

    pub fn contains(&self, key: HourKey) -> bool {
        self.series.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (HourKey, Option<f64>)> + '_ {
        self.series.iter().map(|(k, v)| (*k, *v))
    }

    /// Combines this (newer) series with an older one.
    ///
    /// Every entry of `self` is kept. Entries of `older` are added when their hour is not
    /// present in `self` and not before `retain_from`.
    pub fn merge(&self, older: &ParameterSeries, retain_from: HourKey) -> ParameterSeries {
        let mut series = self.series.clone();
        for (key, value) in older.series.range(retain_from..) {
            series.entry(*key).or_insert(*value);
        }
        ParameterSeries {
            name: self.name.clone(),
            series,
        }
    }
}
