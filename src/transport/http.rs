//! HTTP transport: `Range:` GET against a remote URL, with bounded
//! exponential-backoff retry for transient failures.
//!
//! Feature-gated behind `http` since it pulls in `reqwest` + `backon`,
//! which the core on-disk format and local reader/writer never need.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};

use super::Transport;
use crate::error::{Error, Result};

const MAX_ATTEMPTS: usize = 3;

pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_max_times(MAX_ATTEMPTS)
            .with_min_delay(Duration::from_millis(100))
    }

    fn do_len(&self) -> Result<u64> {
        let resp = self
            .client
            .head(&self.url)
            .send()
            .map_err(to_io_error)?;
        let resp = resp.error_for_status().map_err(to_io_error)?;
        let len = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "response missing Content-Length",
                ))
            })?;
        Ok(len)
    }

    fn do_read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let range = format!("bytes={}-{}", offset, offset + len - 1);
        let resp = self
            .client
            .get(&self.url)
            .header(RANGE, range)
            .send()
            .map_err(to_io_error)?;
        let resp = resp.error_for_status().map_err(to_io_error)?;
        let bytes = resp.bytes().map_err(to_io_error)?;
        if bytes.len() as u64 != len {
            return Err(Error::Corrupt(format!(
                "range GET returned {} bytes, wanted {len}",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }
}

fn to_io_error(e: reqwest::Error) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

impl Transport for HttpTransport {
    fn len(&self) -> Result<u64> {
        (|| self.do_len())
            .retry(Self::backoff())
            .call()
            .map_err(|e| e)
    }

    fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        (|| self.do_read_at(offset, len))
            .retry(Self::backoff())
            .when(|e| matches!(e, Error::Io(_)))
            .call()
    }
}
