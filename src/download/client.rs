//! HTTP client wrapper for playlist and segment fetches.
//!
//! One [`HttpClient`] serves every request of a job: both playlist levels
//! and all segments go through the same connection pool, with the caller's
//! headers forwarded unchanged on each request.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::task::{BufferTarget, SegmentBuffer};
use crate::manifest::Segment;
use crate::user_agent;

/// HTTP client for playlists and segments.
///
/// Created once per job and cloned into workers; clones share the
/// underlying connection pool.
///
/// # Example
///
/// ```no_run
/// use hlsgrab_core::download::HttpClient;
/// use reqwest::header::HeaderMap;
/// use url::Url;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let url = Url::parse("https://cdn.example/live/master.m3u8")?;
/// let text = client.fetch_manifest(&url, &HeaderMap::new()).await?;
/// println!("{} bytes of playlist", text.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with default timeouts (30s connect, 120s per request).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Fetches playlist text.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; the parser decides
    /// whether what remains is a playlist. Playlist fetches are not retried.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on a non-HTTP(S) URL, a transport failure,
    /// a timeout, or a non-2xx status.
    #[instrument(skip(self, headers), fields(url = %url))]
    pub async fn fetch_manifest(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<String, DownloadError> {
        let response = self.send_get(url, headers, None).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url.as_str(), e))?;

        let text = String::from_utf8_lossy(&body).into_owned();
        debug!(bytes = body.len(), "fetched playlist");
        Ok(text)
    }

    /// Fetches one segment into `target`.
    ///
    /// Byte-range segments are requested with a `Range` header. A server that
    /// ignores the header and answers 200 with the whole resource still yields
    /// exactly the requested sub-range.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on a transport failure, a timeout, a non-2xx
    /// status, or a failure writing the buffer file. A partially written
    /// buffer file is removed before returning an error.
    #[instrument(skip(self, segment, headers, target), fields(index = segment.sequence_index, url = %segment.uri))]
    pub async fn fetch_segment(
        &self,
        segment: &Segment,
        headers: &HeaderMap,
        target: BufferTarget,
    ) -> Result<SegmentBuffer, DownloadError> {
        let range_header = segment.byte_range.and_then(|range| range.to_header_value());
        let response = self
            .send_get(&segment.uri, headers, range_header.as_deref())
            .await?;

        let mut window = match segment.byte_range {
            Some(range) if range_header.is_some() && response.status() == StatusCode::OK => {
                warn!(
                    url = %segment.uri,
                    "server ignored Range header; extracting sub-range from full response"
                );
                RangeWindow::clip(range.offset, range.length)
            }
            Some(range) if range_header.is_none() => RangeWindow::clip(0, range.length),
            _ => RangeWindow::full(),
        };

        let buffer = match target {
            BufferTarget::Memory => {
                let mut body = BytesMut::new();
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| map_reqwest_error(segment.uri.as_str(), e))?;
                    body.extend_from_slice(window.apply(&chunk));
                    if window.is_exhausted() {
                        break;
                    }
                }
                SegmentBuffer::Memory(body.freeze())
            }
            BufferTarget::File(path) => {
                let result = stream_to_file(response, segment.uri.as_str(), &path, &mut window).await;
                match result {
                    Ok(len) => SegmentBuffer::File { path, len },
                    Err(e) => {
                        debug!(path = %path.display(), "removing partial segment buffer after error");
                        let _ = tokio::fs::remove_file(&path).await;
                        return Err(e);
                    }
                }
            }
        };

        debug!(bytes = buffer.len(), "fetched segment");
        Ok(buffer)
    }

    async fn send_get(
        &self,
        url: &Url,
        headers: &HeaderMap,
        range_header: Option<&str>,
    ) -> Result<reqwest::Response, DownloadError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(url.as_str()));
        }

        let mut request = self.client.get(url.clone()).headers(headers.clone());
        if let Some(range) = range_header {
            request = request.header(RANGE, range);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url.as_str(), status.as_u16()));
        }

        Ok(response)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Converts caller headers into a [`HeaderMap`], preserving their order.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidHeader`] for a name or value that is not
/// valid in HTTP.
pub fn build_header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, DownloadError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| DownloadError::invalid_header(name, e.to_string()))?;
        let header_value = HeaderValue::from_str(value.trim())
            .map_err(|e| DownloadError::invalid_header(name, e.to_string()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

/// Portion of a response body that belongs to the segment.
#[derive(Debug, Clone, Copy)]
struct RangeWindow {
    skip: u64,
    remaining: Option<u64>,
}

impl RangeWindow {
    fn full() -> Self {
        Self {
            skip: 0,
            remaining: None,
        }
    }

    fn clip(offset: u64, length: u64) -> Self {
        Self {
            skip: offset,
            remaining: Some(length),
        }
    }

    fn apply<'a>(&mut self, chunk: &'a [u8]) -> &'a [u8] {
        let mut chunk = chunk;
        if self.skip > 0 {
            let skipped = usize::try_from(self.skip).unwrap_or(usize::MAX).min(chunk.len());
            chunk = &chunk[skipped..];
            self.skip -= skipped as u64;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            let taken = usize::try_from(*remaining).unwrap_or(usize::MAX).min(chunk.len());
            chunk = &chunk[..taken];
            *remaining -= taken as u64;
        }
        chunk
    }

    fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Streams the response body into a new file, returning bytes written.
async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    path: &Path,
    window: &mut RangeWindow,
) -> Result<u64, DownloadError> {
    let file = File::create(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| map_reqwest_error(url, e))?;
        let wanted = window.apply(&chunk);

        writer
            .write_all(wanted)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        bytes_written += wanted.len() as u64;

        if window.is_exhausted() {
            break;
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    Ok(bytes_written)
}
