use std::{
    ops::Range,
    sync::{Arc, OnceLock},
    time::Duration,
};

use bytes::Bytes;
use log::{debug, warn};
use reqwest::{
    Client, IntoUrl, StatusCode, Url,
    header::{CONTENT_RANGE, RANGE},
};

use super::{RangeSource, RangeSupport, parse_content_range, slice_range};
use crate::{
    error::{Error, NetworkErrorKind, Result},
    options::AsyncReaderOptions,
};

/// A remote file read with HTTP range requests.
///
/// Servers that ignore the `Range` header and answer `200 OK` are handled explicitly: when full
/// downloads are allowed the first such response is kept and every later read is served from it,
/// which is logged and reported by [`RangeSource::range_support`]. Otherwise the read fails with
/// [`NetworkErrorKind::RangeNotSupported`].
#[derive(Debug, Clone)]
pub struct HttpRangeSource {
    client: Client,
    url: Url,
    timeout: Option<Duration>,
    allow_full_download: bool,
    full_body: Arc<OnceLock<Bytes>>,
}

impl HttpRangeSource {
    /// Source for `url` using the timeout and fallback settings of `options`.
    pub fn new(url: impl IntoUrl, options: &AsyncReaderOptions) -> Result<Self> {
        Self::with_client(Client::new(), url, options)
    }

    pub fn with_client(
        client: Client,
        url: impl IntoUrl,
        options: &AsyncReaderOptions,
    ) -> Result<Self> {
        let url = url
            .into_url()
            .map_err(|err| Error::InvalidConfig(format!("invalid url: {err}")))?;
        Ok(Self {
            client,
            url,
            timeout: options.request_timeout(),
            allow_full_download: options.allow_full_download(),
            full_body: Arc::new(OnceLock::new()),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn get(&self, range_header: String) -> Result<reqwest::Response> {
        let mut request = self.client.get(self.url.clone()).header(RANGE, range_header);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT && status != StatusCode::OK {
            return Err(Error::network(
                NetworkErrorKind::Status(status.as_u16()),
                format!("GET {} answered {status}", self.url),
            ));
        }
        Ok(response)
    }

    /// Keep the body of a `200 OK` answer to a range request.
    async fn full_download(&self, response: reqwest::Response) -> Result<Bytes> {
        if !self.allow_full_download {
            return Err(Error::network(
                NetworkErrorKind::RangeNotSupported,
                format!("{} ignored the range request", self.url),
            ));
        }
        let body = response.bytes().await.map_err(request_error)?;
        if self.full_body.set(body.clone()).is_ok() {
            warn!(
                "{} does not support range requests, downloaded all {} bytes",
                self.url,
                body.len()
            );
        }
        Ok(self.full_body.get().cloned().unwrap_or(body))
    }
}

impl RangeSource for HttpRangeSource {
    async fn read_range(&self, range: Range<u64>) -> Result<Bytes> {
        if let Some(body) = self.full_body.get() {
            return slice_range(body, range);
        }
        if range.start >= range.end {
            return Ok(Bytes::new());
        }

        debug!("fetching {}..{} of {}", range.start, range.end, self.url);
        let response = self
            .get(format!("bytes={}-{}", range.start, range.end - 1))
            .await?;
        if response.status() == StatusCode::OK {
            let body = self.full_download(response).await?;
            return slice_range(&body, range);
        }

        if let Some((served, _)) = content_range(&response) {
            if served.start != range.start {
                return Err(Error::network(
                    NetworkErrorKind::ShortRead,
                    format!(
                        "requested {}..{}, server sent {}..{}",
                        range.start, range.end, served.start, served.end
                    ),
                ));
            }
        }
        let body = response.bytes().await.map_err(request_error)?;
        let expected = range.end - range.start;
        if body.len() as u64 != expected {
            return Err(Error::network(
                NetworkErrorKind::ShortRead,
                format!("requested {expected} bytes, received {}", body.len()),
            ));
        }
        Ok(body)
    }

    async fn read_suffix(&self, length: u64) -> Result<(Bytes, u64)> {
        if let Some(body) = self.full_body.get() {
            return Ok(suffix_of(body, length));
        }

        debug!("fetching last {length} bytes of {}", self.url);
        let response = self.get(format!("bytes=-{length}")).await?;
        if response.status() == StatusCode::OK {
            let body = self.full_download(response).await?;
            return Ok(suffix_of(&body, length));
        }

        let total = content_range(&response).and_then(|(_, total)| total).ok_or_else(|| {
            Error::network(
                NetworkErrorKind::Transport,
                "suffix response without a total size in Content-Range",
            )
        })?;
        let body = response.bytes().await.map_err(request_error)?;
        Ok((body, total))
    }

    fn range_support(&self) -> RangeSupport {
        if self.full_body.get().is_some() {
            RangeSupport::FullDownload
        } else {
            RangeSupport::Ranges
        }
    }
}

fn suffix_of(body: &Bytes, length: u64) -> (Bytes, u64) {
    let total = body.len() as u64;
    let start = total.saturating_sub(length) as usize;
    (body.slice(start..), total)
}

fn content_range(response: &reqwest::Response) -> Option<(Range<u64>, Option<u64>)> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_range)
}

fn request_error(err: reqwest::Error) -> Error {
    let kind = if err.is_timeout() {
        NetworkErrorKind::Timeout
    } else if let Some(status) = err.status() {
        NetworkErrorKind::Status(status.as_u16())
    } else {
        NetworkErrorKind::Transport
    };
    Error::network(kind, err.to_string())
}
