use crate::bundle::error::{transport_io_error, BundleError};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use log::{info, warn};
use reqwest::Client;
use std::io;
use std::time::Duration;

/// The latest all-stations MOSMIX_S bundle, republished hourly.
pub const DEFAULT_MOSMIX_URL: &str =
    "https://opendata.dwd.de/weather/local_forecasts/mos/MOSMIX_S/all_stations/kml/MOSMIX_S_LATEST_240.kmz";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// The raw bundle body, in whatever chunks the transport delivers.
pub type ByteChunkStream = BoxStream<'static, io::Result<Bytes>>;

/// Source of the compressed forecast bundle.
///
/// The returned stream is consumed once, front to back.
pub trait BundleFetcher: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<ByteChunkStream, BundleError>>;

    /// Where the bundle comes from, for log messages.
    fn source(&self) -> &str;
}

/// Streams the bundle with an HTTP GET.
///
/// A read that stalls for longer than the read timeout fails the download rather than
/// hanging the pipeline.
pub struct HttpBundleFetcher {
    url: String,
    client: Client,
}

impl HttpBundleFetcher {
    pub fn new(url: impl Into<String>) -> Result<Self, BundleError> {
        let url = url.into();
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| BundleError::NetworkRequest(url.clone(), e))?;
        Ok(Self::with_client(url, client))
    }

    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

impl BundleFetcher for HttpBundleFetcher {
    fn fetch(&self) -> BoxFuture<'_, Result<ByteChunkStream, BundleError>> {
        Box::pin(async move {
            info!("Downloading forecast bundle from {}", self.url);
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| BundleError::NetworkRequest(self.url.clone(), e))?;

            let response = match response.error_for_status() {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("HTTP error for {}: {:?}", self.url, e);
                    return Err(if let Some(status) = e.status() {
                        BundleError::HttpStatus {
                            url: self.url.clone(),
                            status,
                            source: e,
                        }
                    } else {
                        BundleError::NetworkRequest(self.url.clone(), e)
                    });
                }
            };

            let stream = response
                .bytes_stream()
                .map_err(|e| {
                    let kind = if e.is_timeout() {
                        io::ErrorKind::TimedOut
                    } else {
                        io::ErrorKind::Other
                    };
                    transport_io_error(io::Error::new(kind, e))
                });
            Ok(stream.boxed())
        })
    }

    fn source(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::loader::extract_snapshot;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves a single connection: reads the request, writes `response`, then keeps the
    /// connection open without sending more.
    async fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket.write_all(&response).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        format!("http://{}/MOSMIX_S_LATEST_240.kmz", addr)
    }

    #[tokio::test]
    async fn test_error_status_is_http_status() {
        let url = serve_once(
            b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n".to_vec(),
        )
        .await;
        let fetcher = HttpBundleFetcher::new(url.clone()).unwrap();
        assert_eq!(fetcher.source(), url);
        let err = fetcher.fetch().await.err().unwrap();
        assert!(
            matches!(&err, BundleError::HttpStatus { status, .. } if status.as_u16() == 500),
            "{err:?}"
        );
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_stalled_body_times_out_as_transport_error() {
        let mut response =
            b"HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: 4096\r\n\r\n"
                .to_vec();
        // Start of a local file header, then nothing more.
        response.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04, 20, 0]);
        let url = serve_once(response).await;

        let client = Client::builder()
            .read_timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let fetcher = HttpBundleFetcher::with_client(url, client);
        let chunks = fetcher.fetch().await.unwrap();
        let err = extract_snapshot(chunks, "N0677", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::DownloadIo(_)), "{err:?}");
        assert!(err.is_transport());
    }
}
