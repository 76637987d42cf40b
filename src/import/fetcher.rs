//! HTTP fetch of a single remote file
//!
//! Streams a response body to disk through a fixed-size buffer, so peak memory does not depend
//! on the size of the file.

use std::{io, path::Path, time::Duration};

use bytesize::ByteSize;
use futures_util::TryStreamExt;
use reqwest::{
    Client, StatusCode,
    header::{self, HeaderMap, HeaderValue},
};
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::io::StreamReader;
use tracing::{debug, info, instrument, trace};

use super::cancel::CancellationMonitor;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The body stream broke off before the end of the file
    #[error("connection interrupted: {0}")]
    Interrupted(#[source] io::Error),

    #[error("no data received for {0:?}")]
    Timeout(Duration),

    #[error("server responded with {0}")]
    Status(StatusCode),

    /// The destination file could not be created or written
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("fetch cancelled")]
    Cancelled,
}

pub struct Fetcher {
    client: Client,
    timeout: Duration,
    chunk_size: usize,
}

impl Fetcher {
    pub fn new(timeout: Duration, chunk_size: usize) -> Result<Self, FetchError> {
        Self::with_max_redirects(timeout, chunk_size, 10)
    }

    pub fn with_max_redirects(
        timeout: Duration,
        chunk_size: usize,
        max_redirects: usize,
    ) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        // Cross-host redirects drop the Authorization header
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .connect_timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            timeout,
            chunk_size: chunk_size.max(1),
        })
    }

    /// Fetch `url` into `output_path`, replacing any existing content.
    ///
    /// The timeout bounds connecting, waiting for the response head and every single read of
    /// the body. On error the destination content is undefined; cleaning it up is up to the
    /// caller. Returns the number of bytes written.
    #[instrument(name = "fetch", level = "debug", skip_all, fields(url = %url))]
    pub async fn fetch(
        &self,
        url: &str,
        output_path: &Path,
        authorization: Option<&str>,
        cancel: &CancellationMonitor,
    ) -> Result<u64, FetchError> {
        let mut request = self.client.get(url);
        if let Some(value) = authorization {
            request = request.header(header::AUTHORIZATION, value);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.requested() => return Err(FetchError::Cancelled),
            response = tokio::time::timeout(self.timeout, request.send()) => {
                response.map_err(|_| FetchError::Timeout(self.timeout))??
            }
        };
        trace!(status = %response.status(), "Got response");

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let total_size = response.content_length();
        match total_size {
            Some(size) => debug!(size = %ByteSize(size), path = ?output_path, "Starting download"),
            None => debug!(path = ?output_path, "Starting download of unknown size"),
        }

        let mut file = File::create(output_path).await?;
        let mut body = StreamReader::new(Box::pin(response.bytes_stream().map_err(io::Error::other)));
        let mut buffer = vec![0u8; self.chunk_size];
        let mut downloaded: u64 = 0;

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.requested() => {
                    debug!(bytes = downloaded, "Download cancelled during transfer");
                    return Err(FetchError::Cancelled);
                }
                read = tokio::time::timeout(self.timeout, body.read(&mut buffer)) => {
                    read.map_err(|_| FetchError::Timeout(self.timeout))?
                        .map_err(FetchError::Interrupted)?
                }
            };
            if read == 0 {
                break;
            }

            file.write_all(&buffer[..read]).await?;
            downloaded += read as u64;
            trace!(bytes = downloaded, chunk_size = read, "Received chunk");
        }

        if let Some(expected) = total_size {
            if downloaded < expected {
                return Err(FetchError::Interrupted(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("expected {expected} bytes, got {downloaded}"),
                )));
            }
        }

        file.flush().await?;
        file.shutdown().await?;

        info!(size = %ByteSize(downloaded), path = ?output_path, "Download completed");
        Ok(downloaded)
    }
}
