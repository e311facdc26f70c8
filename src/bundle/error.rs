use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        #[source]
        source: reqwest::Error,
    },

    // Transport failures surfacing while the body is streamed
    #[error("Forecast download failed")]
    DownloadIo(#[source] io::Error),

    #[error("Corrupt forecast archive: {0}")]
    CorruptArchive(String),

    #[error("Unsupported forecast archive: {0}")]
    UnsupportedArchive(String),

    #[error("Malformed forecast document: {0}")]
    MalformedDocument(String),

    #[error("Forecast document has no issue time")]
    MissingIssueTime,

    #[error("Forecast document has no forecast time steps")]
    NoTimeSteps,

    #[error("Station '{0}' not found in forecast document")]
    StationNotFound(String),
}

impl BundleError {
    /// True for failures of the network transport, as opposed to bad content.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BundleError::NetworkRequest(..) | BundleError::HttpStatus { .. } | BundleError::DownloadIo(_)
        )
    }
}

/// Wraps an error of the byte source underneath the archive reader.
///
/// The decoder and the archive reader pass such errors through untouched, which is how they
/// are told apart from errors about the archive contents.
#[derive(Debug, Error)]
#[error("Transport failed: {0}")]
pub struct TransportError(#[source] pub io::Error);

/// Marks `err` as a transport failure before it enters the archive pipeline.
pub fn transport_io_error(err: io::Error) -> io::Error {
    io::Error::new(err.kind(), TransportError(err))
}

fn is_transport_io(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<TransportError>())
}

/// Sorts an I/O error raised while reading the archive into transport or content failure.
///
/// Only errors marked by [`transport_io_error`] come from the network; everything else was
/// raised by the decoder or the archive reader and means the archive is broken.
pub(crate) fn classify_io_error(err: io::Error) -> BundleError {
    if is_transport_io(&err) {
        BundleError::DownloadIo(err)
    } else {
        BundleError::CorruptArchive(err.to_string())
    }
}

pub(crate) fn classify_xml_error(err: quick_xml::Error) -> BundleError {
    match err {
        quick_xml::Error::Io(shared) => match Arc::try_unwrap(shared) {
            Ok(err) => classify_io_error(err),
            Err(shared) if is_transport_io(&shared) => {
                BundleError::DownloadIo(io::Error::new(shared.kind(), shared.to_string()))
            }
            Err(shared) => BundleError::CorruptArchive(shared.to_string()),
        },
        other => BundleError::MalformedDocument(other.to_string()),
    }
}
