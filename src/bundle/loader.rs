use crate::bundle::archive::StreamingArchiveReader;
use crate::bundle::document::DocumentEvents;
use crate::bundle::error::BundleError;
use crate::bundle::extractor::IncrementalDocumentExtractor;
use crate::bundle::fetcher::BundleFetcher;
use crate::types::snapshot::ForecastSnapshot;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use log::{debug, info};
use std::io;
use tokio::io::BufReader;
use tokio_util::io::StreamReader;

const DOCUMENT_BUFFER_SIZE: usize = 64 * 1024;

/// Downloads the current bundle and extracts the forecast of one station from it.
pub async fn load_snapshot(
    fetcher: &dyn BundleFetcher,
    station_id: &str,
) -> Result<ForecastSnapshot, BundleError> {
    let fetched_utc = Utc::now();
    let chunks = fetcher.fetch().await?;
    let snapshot = extract_snapshot(chunks, station_id, fetched_utc).await?;
    info!(
        "Loaded forecast for station {} from {} (issued {}, {} to {})",
        station_id,
        fetcher.source(),
        snapshot.issue_time_utc(),
        snapshot.date_from_utc(),
        snapshot.date_to_utc()
    );
    Ok(snapshot)
}

/// Runs the streaming pipeline over the raw archive bytes: zip entry, XML events, extraction.
///
/// Reading stops as soon as the station's placemark has been read completely; the remainder
/// of the bundle is dropped unread.
pub async fn extract_snapshot<S>(
    chunks: S,
    station_id: &str,
    fetched_utc: DateTime<Utc>,
) -> Result<ForecastSnapshot, BundleError>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
{
    let archive = StreamingArchiveReader::open(StreamReader::new(chunks)).await?;
    debug!("Reading archive entry {}", archive.entry_name());
    let mut events = DocumentEvents::new(BufReader::with_capacity(DOCUMENT_BUFFER_SIZE, archive));
    let mut extractor = IncrementalDocumentExtractor::new(station_id);

    while let Some(event) = events.next_event().await? {
        extractor.consume(&event)?;
        if extractor.is_complete() {
            debug!("Station {} complete, skipping rest of document", station_id);
            break;
        }
    }

    let extracted = extractor.finish()?;
    ForecastSnapshot::from_time_steps(
        station_id,
        extracted.issue_time_utc,
        fetched_utc,
        &extracted.time_steps,
        &extracted.parameters,
    )
    .ok_or(BundleError::NoTimeSteps)
}
