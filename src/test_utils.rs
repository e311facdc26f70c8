//! Fixtures shared by the unit tests: in-memory archives, chunked byte streams, a MOSMIX-like
//! document builder and a fetcher that serves canned bundles.

use crate::bundle::error::BundleError;
use crate::bundle::fetcher::{BundleFetcher, ByteChunkStream};
use crate::types::parameter::Parameter;
use crate::types::snapshot::ForecastSnapshot;
use async_compression::tokio::bufread::DeflateEncoder;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncReadExt;

fn local_header(name: &str, flags: u16, method: u16, crc: u32, csize: u32, usize: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
    out.extend_from_slice(&20u16.to_le_bytes()); // version needed
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&method.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // mod time
    out.extend_from_slice(&0u16.to_le_bytes()); // mod date
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&csize.to_le_bytes());
    out.extend_from_slice(&usize.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // extra len
    out.extend_from_slice(name.as_bytes());
    out
}

/// Stand-in for the central directory that follows the entry in a real archive.
fn trailer() -> Vec<u8> {
    let mut out = 0x0201_4b50u32.to_le_bytes().to_vec();
    out.extend_from_slice(&[0u8; 42]);
    out
}

pub fn zip_stored(name: &str, data: &[u8]) -> Vec<u8> {
    let crc = crc32fast::hash(data);
    let mut out = local_header(name, 0, 0, crc, data.len() as u32, data.len() as u32);
    out.extend_from_slice(data);
    out.extend(trailer());
    out
}

async fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(data);
    let mut compressed = Vec::new();
    encoder
        .read_to_end(&mut compressed)
        .await
        .expect("in-memory deflate");
    compressed
}

pub async fn zip_deflated(name: &str, data: &[u8]) -> Vec<u8> {
    let compressed = deflate(data).await;
    let crc = crc32fast::hash(data);
    let mut out = local_header(name, 0, 8, crc, compressed.len() as u32, data.len() as u32);
    out.extend(compressed);
    out.extend(trailer());
    out
}

/// Deflated entry written the way streaming zip writers do it: sizes and checksum follow the
/// body in a data descriptor instead of the local header.
pub async fn zip_deflated_with_descriptor(name: &str, data: &[u8]) -> Vec<u8> {
    let compressed = deflate(data).await;
    let mut out = local_header(name, 0x0008, 8, 0, 0, 0);
    let csize = compressed.len() as u32;
    out.extend(compressed);
    out.extend_from_slice(&0x0807_4b50u32.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    out.extend_from_slice(&csize.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend(trailer());
    out
}

pub fn chunk_stream(data: Vec<u8>, chunk_size: usize) -> ByteChunkStream {
    let chunks: Vec<io::Result<Bytes>> = data
        .chunks(chunk_size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    futures_util::stream::iter(chunks).boxed()
}

fn iso(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// One placemark of a test document.
pub struct TestPlacemark<'a> {
    pub station: &'a str,
    pub forecasts: Vec<(&'a str, String)>,
}

/// Builds a KML document shaped like a MOSMIX_S bundle.
pub fn mosmix_document(
    issue_time: DateTime<Utc>,
    time_steps: &[DateTime<Utc>],
    placemarks: &[TestPlacemark<'_>],
) -> String {
    let steps: String = time_steps
        .iter()
        .map(|t| format!("<dwd:TimeStep>{}</dwd:TimeStep>", iso(t)))
        .collect();
    let marks: String = placemarks
        .iter()
        .map(|p| {
            let forecasts: String = p
                .forecasts
                .iter()
                .map(|(code, values)| {
                    format!(
                        "<dwd:Forecast dwd:elementName=\"{}\"><dwd:value>{}</dwd:value></dwd:Forecast>",
                        code, values
                    )
                })
                .collect();
            format!(
                "<kml:Placemark><kml:name>{}</kml:name><kml:description>{}</kml:description>\
                 <kml:ExtendedData>{}</kml:ExtendedData>\
                 <kml:Point><kml:coordinates>9.1,48.2,300.0</kml:coordinates></kml:Point></kml:Placemark>",
                p.station, p.station, forecasts
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="ISO-8859-1" standalone="yes"?>
<kml:kml xmlns:dwd="https://opendata.dwd.de/weather/lib/pointforecast_dwd_extension_V1_0.xsd" xmlns:kml="http://www.opengis.net/kml/2.2">
  <kml:Document>
    <kml:ExtendedData>
      <dwd:ProductDefinition>
        <dwd:Issuer>Deutscher Wetterdienst</dwd:Issuer>
        <dwd:ProductID>MOSMIX</dwd:ProductID>
        <dwd:GeneratingProcess>DWD MOSMIX hourly, Version 1.0</dwd:GeneratingProcess>
        <dwd:IssueTime>{}</dwd:IssueTime>
        <dwd:ReferencedModel>
          <dwd:Model dwd:name="ICON" dwd:referenceTime="2024-01-01T00:00:00Z"/>
        </dwd:ReferencedModel>
        <dwd:ForecastTimeSteps>{}</dwd:ForecastTimeSteps>
        <dwd:FormatCfg><dwd:DefaultUndefSign>-</dwd:DefaultUndefSign></dwd:FormatCfg>
      </dwd:ProductDefinition>
    </kml:ExtendedData>
    {}
  </kml:Document>
</kml:kml>"#,
        iso(&issue_time),
        steps,
        marks
    )
}

/// A placemark carrying every tracked parameter with the same values.
pub fn uniform_placemark<'a>(station: &'a str, values: &str) -> TestPlacemark<'a> {
    TestPlacemark {
        station,
        forecasts: ["TTT", "Rad1h", "SunD1", "Neff", "wwM", "VV"]
            .into_iter()
            .map(|code| (code, values.to_string()))
            .collect(),
    }
}

/// A snapshot of `hours` hourly steps starting at `from`, every parameter set to `value`.
pub fn hourly_snapshot(
    station: &str,
    from: DateTime<Utc>,
    hours: i64,
    issue: DateTime<Utc>,
    fetched: DateTime<Utc>,
    value: f64,
) -> ForecastSnapshot {
    let steps: Vec<_> = (0..hours).map(|h| from + TimeDelta::hours(h)).collect();
    let values: HashMap<String, Vec<Option<f64>>> = Parameter::ALL
        .iter()
        .map(|p| (p.code().to_string(), vec![Some(value); steps.len()]))
        .collect();
    ForecastSnapshot::from_time_steps(station, issue, fetched, &steps, &values)
        .expect("at least one step")
}

/// Bundle archive for `station` covering `hours` hourly steps from `from`, all values `value`.
pub fn station_bundle(station: &str, from: DateTime<Utc>, hours: i64, issue: DateTime<Utc>, value: f64) -> Vec<u8> {
    let steps: Vec<_> = (0..hours).map(|h| from + TimeDelta::hours(h)).collect();
    let values = vec![value.to_string(); steps.len()].join(" ");
    let document = mosmix_document(issue, &steps, &[uniform_placemark(station, &values)]);
    zip_stored("MOSMIX_S_LATEST_240.kml", document.as_bytes())
}

/// Serves queued archives, one per fetch; fails with a transport error once the queue is empty.
#[derive(Default)]
pub struct StubFetcher {
    bundles: Mutex<Vec<Vec<u8>>>,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub fn new(bundles: Vec<Vec<u8>>) -> Self {
        Self {
            bundles: Mutex::new(bundles),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BundleFetcher for StubFetcher {
    fn fetch(&self) -> BoxFuture<'_, Result<ByteChunkStream, BundleError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut bundles = self.bundles.lock().unwrap();
            if bundles.is_empty() {
                None
            } else {
                Some(bundles.remove(0))
            }
        };
        Box::pin(async move {
            match next {
                Some(bundle) => Ok(chunk_stream(bundle, 1024)),
                None => Err(BundleError::DownloadIo(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "stub upstream unavailable",
                ))),
            }
        })
    }

    fn source(&self) -> &str {
        "stub://mosmix"
    }
}
