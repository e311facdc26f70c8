//! Streaming reader for the single entry of a zip (`.kmz`) archive.
//!
//! Only the local file header in front of the entry is interpreted. The entry body is then
//! decoded on the fly as it is read, so neither the archive nor the decompressed document is
//! ever held in memory as a whole. The central directory at the end of the archive is never
//! reached. When the local header records size and CRC-32 of the entry, both are checked once
//! the body has been read to its end.

use crate::bundle::error::{classify_io_error, BundleError};
use async_compression::tokio::bufread::DeflateDecoder;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, ReadBuf, Take};

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const LOCAL_FILE_HEADER_LEN: usize = 30;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// Size and checksum the decompressed entry must match.
#[derive(Debug, Clone, Copy)]
struct Expected {
    crc32: u32,
    size: u64,
}

enum EntryBody<R> {
    Stored(Take<R>),
    Deflated(DeflateDecoder<R>),
}

/// Decompressed contents of the first entry of a zip archive, readable as a byte stream.
///
/// Supports stored and deflated entries. Read errors caused by a truncated or invalid body
/// come out as `UnexpectedEof`/`InvalidData`, errors of the underlying reader pass through
/// unchanged.
pub struct StreamingArchiveReader<R> {
    entry_name: String,
    body: EntryBody<R>,
    expected: Option<Expected>,
    hasher: crc32fast::Hasher,
    produced: u64,
}

impl<R: AsyncBufRead + Unpin> StreamingArchiveReader<R> {
    /// Reads the local file header and positions the reader at the start of the entry body.
    pub async fn open(mut inner: R) -> Result<Self, BundleError> {
        let mut header = [0u8; LOCAL_FILE_HEADER_LEN];
        inner
            .read_exact(&mut header)
            .await
            .map_err(classify_io_error)?;

        let signature = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(BundleError::CorruptArchive(format!(
                "expected local file header, found signature {:#010x}",
                signature
            )));
        }
        let flags = u16::from_le_bytes([header[6], header[7]]);
        let method = u16::from_le_bytes([header[8], header[9]]);
        let crc32 = u32::from_le_bytes([header[14], header[15], header[16], header[17]]);
        let compressed_size = u32::from_le_bytes([header[18], header[19], header[20], header[21]]);
        let uncompressed_size =
            u32::from_le_bytes([header[22], header[23], header[24], header[25]]);
        let name_len = u16::from_le_bytes([header[26], header[27]]) as usize;
        let extra_len = u16::from_le_bytes([header[28], header[29]]) as usize;

        let mut name = vec![0u8; name_len];
        inner.read_exact(&mut name).await.map_err(classify_io_error)?;
        let mut extra = vec![0u8; extra_len];
        inner.read_exact(&mut extra).await.map_err(classify_io_error)?;
        let entry_name = String::from_utf8_lossy(&name).into_owned();

        if flags & FLAG_ENCRYPTED != 0 {
            return Err(BundleError::UnsupportedArchive(format!(
                "entry '{}' is encrypted",
                entry_name
            )));
        }

        let body = match method {
            METHOD_DEFLATED => EntryBody::Deflated(DeflateDecoder::new(inner)),
            METHOD_STORED => {
                // A stored body has no end marker of its own, so its size must be known up front.
                if flags & FLAG_DATA_DESCRIPTOR != 0 || compressed_size == u32::MAX {
                    return Err(BundleError::UnsupportedArchive(format!(
                        "stored entry '{}' without size in local header",
                        entry_name
                    )));
                }
                EntryBody::Stored(inner.take(u64::from(compressed_size)))
            }
            other => {
                return Err(BundleError::UnsupportedArchive(format!(
                    "entry '{}' uses compression method {}",
                    entry_name, other
                )))
            }
        };

        // With a data descriptor the header fields are zero, zip64 stores the sizes elsewhere.
        let expected = (flags & FLAG_DATA_DESCRIPTOR == 0 && uncompressed_size != u32::MAX)
            .then_some(Expected {
                crc32,
                size: u64::from(uncompressed_size),
            });

        Ok(Self {
            entry_name,
            body,
            expected,
            hasher: crc32fast::Hasher::new(),
            produced: 0,
        })
    }
}

impl<R> StreamingArchiveReader<R> {
    /// The file name recorded for the entry, e.g. `MOSMIX_S_2024010103_240.kml`.
    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }
}

impl<R: AsyncBufRead + Unpin> StreamingArchiveReader<R> {
    fn poll_body(&mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match &mut self.body {
            EntryBody::Deflated(decoder) => Pin::new(decoder).poll_read(cx, buf),
            EntryBody::Stored(body) => {
                let before = buf.filled().len();
                match Pin::new(&mut *body).poll_read(cx, buf) {
                    Poll::Ready(Ok(())) if buf.filled().len() == before && body.limit() > 0 => {
                        Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("stored entry truncated, {} bytes missing", body.limit()),
                        )))
                    }
                    other => other,
                }
            }
        }
    }

    fn verify_complete(&self) -> io::Result<()> {
        let Some(expected) = self.expected else {
            return Ok(());
        };
        if self.produced != expected.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "entry '{}' ended after {} of {} bytes",
                    self.entry_name, self.produced, expected.size
                ),
            ));
        }
        let crc32 = self.hasher.clone().finalize();
        if crc32 != expected.crc32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "entry '{}' checksum {:#010x} does not match {:#010x}",
                    self.entry_name, crc32, expected.crc32
                ),
            ));
        }
        Ok(())
    }
}

impl<R: AsyncBufRead + Unpin> AsyncRead for StreamingArchiveReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let wanted = buf.remaining() > 0;
        match this.poll_body(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = &buf.filled()[before..];
                if read.is_empty() && wanted {
                    return Poll::Ready(this.verify_complete());
                }
                this.hasher.update(read);
                this.produced += read.len() as u64;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::error::transport_io_error;
    use crate::test_utils::{chunk_stream, zip_deflated, zip_stored};
    use tokio_util::io::StreamReader;

    const DOC: &str = "<kml><Document><name>hello archive</name></Document></kml>";

    async fn read_entry(archive: Vec<u8>, chunk_size: usize) -> Result<(String, Vec<u8>), BundleError> {
        let reader = StreamReader::new(chunk_stream(archive, chunk_size));
        let mut entry = StreamingArchiveReader::open(reader).await?;
        let name = entry.entry_name().to_string();
        let mut out = Vec::new();
        entry.read_to_end(&mut out).await.map_err(classify_io_error)?;
        Ok((name, out))
    }

    #[tokio::test]
    async fn test_reads_deflated_entry_across_small_chunks() {
        let archive = zip_deflated("forecast.kml", DOC.as_bytes()).await;
        let (name, body) = read_entry(archive, 7).await.unwrap();
        assert_eq!(name, "forecast.kml");
        assert_eq!(body, DOC.as_bytes());
    }

    #[tokio::test]
    async fn test_reads_stored_entry_and_stops_at_its_end() {
        let archive = zip_stored("forecast.kml", DOC.as_bytes());
        let (_, body) = read_entry(archive, 5).await.unwrap();
        assert_eq!(body, DOC.as_bytes());
    }

    #[tokio::test]
    async fn test_truncated_deflate_is_corrupt() {
        let big: String = (0..2000).map(|i| format!("<v>{}</v>", i)).collect();
        let mut archive = zip_deflated("forecast.kml", big.as_bytes()).await;
        archive.truncate(archive.len() / 2);
        let err = read_entry(archive, 64).await.unwrap_err();
        assert!(matches!(err, BundleError::CorruptArchive(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_truncated_stored_is_corrupt() {
        let mut archive = zip_stored("forecast.kml", DOC.as_bytes());
        // Drop the 46 byte trailer and the last 10 bytes of the entry body.
        archive.truncate(archive.len() - 46 - 10);
        let err = read_entry(archive, 64).await.unwrap_err();
        assert!(matches!(err, BundleError::CorruptArchive(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_corrupt() {
        let mut archive = zip_stored("forecast.kml", DOC.as_bytes());
        let body_start = 30 + "forecast.kml".len();
        archive[body_start + 1] = b'X';
        let err = read_entry(archive, 16).await.unwrap_err();
        assert!(matches!(err, BundleError::CorruptArchive(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_not_a_zip() {
        let err = read_entry(b"<kml>plain xml is not an archive</kml>".to_vec(), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::CorruptArchive(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_short_header_is_corrupt() {
        let err = read_entry(vec![0x50, 0x4b, 0x03], 8).await.unwrap_err();
        assert!(matches!(err, BundleError::CorruptArchive(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_unknown_method_is_unsupported() {
        let mut archive = zip_stored("forecast.kml", DOC.as_bytes());
        archive[8] = 12; // bzip2
        let err = read_entry(archive, 64).await.unwrap_err();
        assert!(matches!(err, BundleError::UnsupportedArchive(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_transport_error_passes_through() {
        let stream = futures_util::stream::iter(vec![
            Ok(bytes::Bytes::from_static(&[0x50, 0x4b])),
            Err(transport_io_error(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "peer went away",
            ))),
        ]);
        let err = StreamingArchiveReader::open(StreamReader::new(stream))
            .await
            .err()
            .unwrap();
        assert!(err.is_transport(), "{err:?}");
    }

    #[tokio::test]
    async fn test_unmarked_stream_error_is_corrupt() {
        let stream = futures_util::stream::iter(vec![
            Ok(bytes::Bytes::from_static(&[0x50, 0x4b])),
            Err(io::Error::new(io::ErrorKind::Other, "unexpected BufError")),
        ]);
        let err = StreamingArchiveReader::open(StreamReader::new(stream))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BundleError::CorruptArchive(_)), "{err:?}");
    }
}
