pub mod hour_key;
pub mod into_utc_trait;
pub mod parameter;
pub mod parameter_series;
pub mod sample;
pub mod snapshot;
