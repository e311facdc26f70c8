//! The entry point: an explicitly constructed forecast source that answers station queries from
//! memory, from the durable cache or from a fresh download, in that order.

use crate::bundle::fetcher::{BundleFetcher, HttpBundleFetcher, DEFAULT_MOSMIX_URL};
use crate::bundle::loader::load_snapshot;
use crate::cache::durable::DurableCache;
use crate::cache::process::ProcessCache;
use crate::error::ForecastError;
use crate::types::into_utc_trait::IntoUtcDateTime;
use crate::types::sample::ForecastSample;
use crate::types::snapshot::{ExpiryPolicy, ForecastSnapshot};
use crate::utils::get_cache_dir;
use crate::weather_station::WeatherStation;
use bon::bon;
use chrono::{TimeDelta, Utc};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// Default span of history kept when a new forecast replaces an older one.
pub const DEFAULT_RETENTION: TimeDelta = TimeDelta::days(5);
/// Default minimum age of the cache file before an expired forecast is downloaded again.
pub const DEFAULT_REFETCH_COOLDOWN: TimeDelta = TimeDelta::minutes(10);

/// Provides MOSMIX forecasts per station, caching them in memory and on disk.
///
/// Upstream problems never surface while any forecast for the station is held: the last good
/// snapshot is served instead. Only a first ever download that fails is reported as
/// [`ForecastError::NoForecastAvailable`].
///
/// # Examples
///
/// ```rust,no_run
/// # use mosmix::{ForecastSource, ForecastError};
/// # use chrono::TimeDelta;
/// # async fn run() -> Result<(), ForecastError> {
/// let source = ForecastSource::builder()
///     .retention(TimeDelta::days(1))
///     .build()
///     .await?;
/// let snapshot = source.get("N0677").await?;
/// println!("Forecast until {}", snapshot.date_to_utc());
/// # Ok(())
/// # }
/// ```
pub struct ForecastSource {
    fetcher: Arc<dyn BundleFetcher>,
    cache: ProcessCache,
    retention: TimeDelta,
}

#[bon]
impl ForecastSource {
    /// Creates a forecast source. Every option has a default:
    ///
    /// * `cache_dir` - `mosmix_rs_cache` in the user's cache directory; created if missing.
    /// * `url` - the latest all-stations MOSMIX_S bundle.
    /// * `fetcher` - HTTP download of `url`; replaces `url` when given.
    /// * `retention` - history kept across updates, 5 days.
    /// * `expiry` - see [`ExpiryPolicy::default`].
    /// * `refetch_cooldown` - 10 minutes.
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError::CacheDirResolution`] if no cache directory was given and the
    /// default one cannot be determined, [`ForecastError::Cache`] if it cannot be created and
    /// [`ForecastError::InvalidConfig`] for negative durations.
    #[builder]
    pub async fn new(
        #[builder(into)] cache_dir: Option<PathBuf>,
        #[builder(into)] url: Option<String>,
        fetcher: Option<Arc<dyn BundleFetcher>>,
        retention: Option<TimeDelta>,
        expiry: Option<ExpiryPolicy>,
        refetch_cooldown: Option<TimeDelta>,
    ) -> Result<Self, ForecastError> {
        let retention = retention.unwrap_or(DEFAULT_RETENTION);
        let expiry = expiry.unwrap_or_default();
        let refetch_cooldown = refetch_cooldown.unwrap_or(DEFAULT_REFETCH_COOLDOWN);
        for (name, value) in [
            ("retention", retention),
            ("refetch_cooldown", refetch_cooldown),
            ("expiry.content_max_age", expiry.content_max_age),
            ("expiry.fetch_min_age", expiry.fetch_min_age),
            ("expiry.max_jitter", expiry.max_jitter),
        ] {
            if value < TimeDelta::zero() {
                return Err(ForecastError::InvalidConfig(format!(
                    "{} must not be negative, got {}",
                    name, value
                )));
            }
        }

        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None => get_cache_dir().map_err(ForecastError::CacheDirResolution)?,
        };
        let fetcher: Arc<dyn BundleFetcher> = match fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpBundleFetcher::new(
                url.unwrap_or_else(|| DEFAULT_MOSMIX_URL.to_string()),
            )?),
        };
        let durable = DurableCache::new(&cache_dir, expiry, refetch_cooldown).await?;

        Ok(Self {
            fetcher,
            cache: ProcessCache::new(durable),
            retention,
        })
    }

    /// The current forecast for `station_id`.
    ///
    /// Served from memory or the durable cache while not expired. An expired forecast is
    /// replaced by a download merged with it, unless the cache file or the last attempt of this
    /// process is younger than the refetch cooldown; then, as when the download fails, the
    /// expired forecast is returned as it is.
    pub async fn get(&self, station_id: &str) -> Result<Arc<ForecastSnapshot>, ForecastError> {
        let now = Utc::now();
        let durable = self.cache.durable();
        let expiry = *durable.expiry();
        let mut entry = self.cache.entry(station_id).await;

        if let Some(snapshot) = entry.fresh(now, &expiry) {
            debug!("Process cache hit for station {}", station_id);
            return Ok(snapshot);
        }

        let stored = durable.get(station_id).await.map(Arc::new);
        if let Some(stored) = &stored {
            if !stored.is_expired_with_jitter(now, &expiry, entry.jitter()) {
                info!("Loaded forecast for station {} from durable cache", station_id);
                entry.store(stored.clone(), expiry.sample_jitter());
                return Ok(stored.clone());
            }
        }

        // Whatever was fetched last, in memory or on disk.
        let stale = match (entry.snapshot().cloned(), stored) {
            (Some(held), Some(stored)) if held.fetched_utc() > stored.fetched_utc() => Some(held),
            (held, stored) => stored.or(held),
        };

        if let Some(stale) = &stale {
            let refetch = !entry.is_cooling_down(now, durable.refetch_cooldown())
                && durable
                    .should_refetch_at(station_id, stale, now, entry.jitter())
                    .await;
            if !refetch {
                info!(
                    "Serving expired forecast for station {} issued {}",
                    station_id,
                    stale.issue_time_utc()
                );
                let jitter = entry.jitter();
                entry.store(stale.clone(), jitter);
                return Ok(stale.clone());
            }
        } else {
            warn!(
                "Cache miss for station {}. Downloading forecast bundle.",
                station_id
            );
        }

        entry.record_fetch_attempt(now);
        match load_snapshot(self.fetcher.as_ref(), station_id).await {
            Ok(fresh) => {
                let merged = Arc::new(fresh.merge(stale.as_deref(), self.retention, Utc::now()));
                if let Err(e) = durable.put(station_id, &merged).await {
                    warn!("Failed to persist forecast for station {}: {}", station_id, e);
                }
                entry.store(merged.clone(), expiry.sample_jitter());
                Ok(merged)
            }
            Err(e) => match stale {
                Some(stale) => {
                    warn!(
                        "Forecast update for station {} failed, serving previous forecast: {}",
                        station_id, e
                    );
                    let jitter = entry.jitter();
                    entry.store(stale.clone(), jitter);
                    Ok(stale)
                }
                None => Err(ForecastError::NoForecastAvailable {
                    station: station_id.to_string(),
                    source: e,
                }),
            },
        }
    }

    /// All five parameters at `instant`, `None` when outside the forecast window or incomplete.
    pub async fn sample<T: IntoUtcDateTime>(
        &self,
        station_id: &str,
        instant: T,
    ) -> Result<Option<ForecastSample>, ForecastError> {
        let time_utc = instant.into_utc();
        let snapshot = self.get(station_id).await?;
        Ok(snapshot.sample_at(time_utc))
    }

    /// A query handle bound to one station.
    pub fn station(self: &Arc<Self>, station_id: impl Into<String>) -> WeatherStation {
        WeatherStation::new(station_id, self.clone())
    }

    pub fn retention(&self) -> TimeDelta {
        self.retention
    }

    pub fn cache(&self) -> &ProcessCache {
        &self.cache
    }
}
