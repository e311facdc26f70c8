//! One JSON file per station, shared between processes on the same machine.

use crate::cache::error::CacheError;
use crate::types::snapshot::{ExpiryPolicy, ForecastSnapshot};
use crate::utils::ensure_cache_dir_exists;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

const CACHE_FILE_PREFIX: &str = "mosmix-";

/// Reads and writes station snapshots in a cache directory.
///
/// Writes go to a temporary file in the same directory that is then renamed over the target, so
/// a reader in another process sees either the old or the new file, never a partial one. Within
/// this process, reads and writes of one station are serialized.
pub struct DurableCache {
    cache_dir: PathBuf,
    expiry: ExpiryPolicy,
    refetch_cooldown: TimeDelta,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DurableCache {
    pub async fn new(
        cache_dir: &Path,
        expiry: ExpiryPolicy,
        refetch_cooldown: TimeDelta,
    ) -> Result<Self, CacheError> {
        ensure_cache_dir_exists(cache_dir)
            .await
            .map_err(|e| CacheError::CacheDirCreation(cache_dir.to_path_buf(), e))?;
        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            expiry,
            refetch_cooldown,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn expiry(&self) -> &ExpiryPolicy {
        &self.expiry
    }

    pub fn refetch_cooldown(&self) -> TimeDelta {
        self.refetch_cooldown
    }

    /// Path of the file holding `station_id`'s snapshot.
    pub fn cache_file(&self, station_id: &str) -> PathBuf {
        let safe: String = station_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.cache_dir
            .join(format!("{}{}.json", CACHE_FILE_PREFIX, safe))
    }

    async fn station_lock(&self, station_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(station_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// The stored snapshot, or `None` if there is none or it cannot be read.
    pub async fn get(&self, station_id: &str) -> Option<ForecastSnapshot> {
        let lock = self.station_lock(station_id).await;
        let _guard = lock.lock().await;
        match self.read(station_id).await {
            Ok(Some(snapshot)) => {
                debug!("Durable cache hit for station {}", station_id);
                Some(snapshot)
            }
            Ok(None) => {
                debug!("Durable cache miss for station {}", station_id);
                None
            }
            Err(e) => {
                warn!(
                    "Ignoring unusable cache file for station {}: {}",
                    station_id, e
                );
                None
            }
        }
    }

    async fn read(&self, station_id: &str) -> Result<Option<ForecastSnapshot>, CacheError> {
        let path = self.cache_file(station_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::CacheRead(path, e)),
        };
        let snapshot =
            ForecastSnapshot::load(&bytes).map_err(|e| CacheError::CacheCorrupt(path.clone(), e))?;
        if snapshot.station_id() != station_id {
            warn!(
                "Cache file {} holds station {}, expected {}",
                path.display(),
                snapshot.station_id(),
                station_id
            );
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    /// Replaces the stored snapshot of `station_id`.
    pub async fn put(&self, station_id: &str, snapshot: &ForecastSnapshot) -> Result<(), CacheError> {
        let data = snapshot.save().map_err(CacheError::CacheEncode)?;
        let path = self.cache_file(station_id);
        let dir = self.cache_dir.clone();

        let lock = self.station_lock(station_id).await;
        let _guard = lock.lock().await;
        let written = data.len();
        tokio::task::spawn_blocking({
            let path = path.clone();
            move || {
                let mut temp_file = NamedTempFile::new_in(&dir)
                    .map_err(|e| CacheError::CacheWrite(path.clone(), e))?;
                temp_file
                    .write_all(&data)
                    .and_then(|_| temp_file.flush())
                    .map_err(|e| CacheError::CacheWrite(path.clone(), e))?;
                temp_file
                    .persist(&path)
                    .map_err(|e| CacheError::CacheWrite(path.clone(), e.error))?;
                Ok::<(), CacheError>(())
            }
        })
        .await??;
        info!(
            "Cached forecast for station {} ({} bytes) to {}",
            station_id,
            written,
            path.display()
        );
        Ok(())
    }

    /// When the station's cache file was last written, `None` if there is no file.
    pub async fn last_written(&self, station_id: &str) -> Result<Option<DateTime<Utc>>, CacheError> {
        let path = self.cache_file(station_id);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::CacheMetadataRead(path, e)),
        };
        let modified = metadata
            .modified()
            .map_err(|e| CacheError::CacheMetadataRead(path, e))?;
        Ok(Some(DateTime::<Utc>::from(modified)))
    }

    /// Whether `snapshot` should be replaced by a fresh download now.
    pub async fn should_refetch_now(&self, station_id: &str, snapshot: &ForecastSnapshot) -> bool {
        self.should_refetch_at(station_id, snapshot, Utc::now(), self.expiry.sample_jitter())
            .await
    }

    /// An expired snapshot is still kept while its cache file is younger than the refetch
    /// cooldown.
    pub async fn should_refetch_at(
        &self,
        station_id: &str,
        snapshot: &ForecastSnapshot,
        now: DateTime<Utc>,
        jitter: TimeDelta,
    ) -> bool {
        if !snapshot.is_expired_with_jitter(now, &self.expiry, jitter) {
            return false;
        }
        match self.last_written(station_id).await {
            Ok(Some(written)) if now - written < self.refetch_cooldown => {
                info!(
                    "Forecast for station {} is expired but was cached {}s ago, keeping it",
                    station_id,
                    (now - written).num_seconds()
                );
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!("{}", e);
                true
            }
        }
    }
}
