use crate::cache::durable::DurableCache;
use crate::types::snapshot::{ExpiryPolicy, ForecastSnapshot};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// What this process currently holds for one station.
#[derive(Debug)]
pub struct StationEntry {
    snapshot: Option<Arc<ForecastSnapshot>>,
    jitter: TimeDelta,
    last_fetch_attempt: Option<DateTime<Utc>>,
}

impl Default for StationEntry {
    fn default() -> Self {
        Self {
            snapshot: None,
            jitter: TimeDelta::zero(),
            last_fetch_attempt: None,
        }
    }
}

impl StationEntry {
    pub fn snapshot(&self) -> Option<&Arc<ForecastSnapshot>> {
        self.snapshot.as_ref()
    }

    /// Jitter drawn when the current snapshot was stored, reused for every expiry check of it.
    pub fn jitter(&self) -> TimeDelta {
        self.jitter
    }

    /// The held snapshot if it has not expired at `now`.
    pub fn fresh(&self, now: DateTime<Utc>, policy: &ExpiryPolicy) -> Option<Arc<ForecastSnapshot>> {
        self.snapshot
            .as_ref()
            .filter(|s| !s.is_expired_with_jitter(now, policy, self.jitter))
            .cloned()
    }

    pub fn store(&mut self, snapshot: Arc<ForecastSnapshot>, jitter: TimeDelta) {
        self.snapshot = Some(snapshot);
        self.jitter = jitter;
    }

    pub fn last_fetch_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_fetch_attempt
    }

    pub fn record_fetch_attempt(&mut self, at: DateTime<Utc>) {
        self.last_fetch_attempt = Some(at);
    }

    /// True while a download attempted at `last_fetch_attempt` is more recent than `cooldown`.
    pub fn is_cooling_down(&self, now: DateTime<Utc>, cooldown: TimeDelta) -> bool {
        self.last_fetch_attempt
            .is_some_and(|attempt| now - attempt < cooldown)
    }
}

/// In-memory front of a [`DurableCache`]; nothing here survives the process.
///
/// Each station has its own entry behind its own lock. Holding the guard returned by
/// [`ProcessCache::entry`] keeps every other caller for that station waiting, which makes a
/// miss → download → store sequence run once per process.
pub struct ProcessCache {
    durable: DurableCache,
    entries: Mutex<HashMap<String, Arc<Mutex<StationEntry>>>>,
}

impl ProcessCache {
    pub fn new(durable: DurableCache) -> Self {
        Self {
            durable,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn durable(&self) -> &DurableCache {
        &self.durable
    }

    /// Locks and returns the entry of `station_id`, creating an empty one if needed.
    pub async fn entry(&self, station_id: &str) -> OwnedMutexGuard<StationEntry> {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(station_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(StationEntry::default())))
                .clone()
        };
        entry.lock_owned().await
    }

    /// The snapshot held in memory, expired or not.
    pub async fn peek(&self, station_id: &str) -> Option<Arc<ForecastSnapshot>> {
        self.entry(station_id).await.snapshot().cloned()
    }
}
