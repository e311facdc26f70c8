//! Prints the forecast window of a station and its next hours of forecast.

use chrono::{TimeDelta, Utc};
use mosmix::{ForecastError, ForecastSource};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), ForecastError> {
    // cargo run --example station_forecast -- <station id>
    let station_id = env::args().nth(1).unwrap_or_else(|| "N0677".to_string());

    let source = Arc::new(ForecastSource::builder().build().await?);
    let station = source.station(station_id);

    println!(
        "Forecast for {} from {} to {}",
        station.station_id(),
        station.forecast_from().await?,
        station.forecast_to().await?
    );

    let now = Utc::now();
    for hour in 0..6 {
        let at = now + TimeDelta::hours(hour);
        match station.get(Some(at)).await? {
            Some(sample) => println!(
                "{}: irradiance {} kJ/m², sunshine {} s, cloud cover {}%, fog {}%, visibility {} m",
                at.format("%Y-%m-%d %H:%M"),
                sample.irradiance,
                sample.sunshine,
                sample.cloud_cover,
                sample.probability_for_fog,
                sample.visibility
            ),
            None => println!("{}: no forecast", at.format("%Y-%m-%d %H:%M")),
        }
    }

    Ok(())
}
