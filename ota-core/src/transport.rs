//! HTTP seam between the update logic and whatever client the platform has.
//!
//! One exchange is `begin` -> `read_chunk`* -> `end`. Those three calls are
//! the only places the update flow blocks on the network, so a fake that
//! scripts them can drive every path without sockets or threads.
use std::fmt;
use std::time::Duration;

use url::Url;

/// A GET request. Every request carries its own deadline.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub url: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub timeout: Duration,
}

/// Status line and the headers the update flow cares about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<u64>,
    pub location: Option<String>,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Only a plain 200 counts, same as the device's HTTP client check.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError(String);

impl TransportError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TransportError {}

pub trait HttpTransport {
    /// Send the request and wait for the response head.
    fn begin(&mut self, request: &Request<'_>) -> Result<ResponseHead, TransportError>;

    /// Read the next piece of the body into `buf`. `Ok(0)` means the body ended.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Release the connection. Safe to call more than once.
    fn end(&mut self);
}

/// Anything an image can be streamed from: an HTTP response body or a
/// firmware upload pushed to the device.
pub trait BodySource {
    /// Next piece of the image. `Ok(0)` means the body ended.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn end(&mut self) {}
}

impl<T: HttpTransport + ?Sized> BodySource for T {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        <T as HttpTransport>::read_chunk(self, buf)
    }

    fn end(&mut self) {
        <T as HttpTransport>::end(self)
    }
}

impl<T: HttpTransport + ?Sized> HttpTransport for &mut T {
    fn begin(&mut self, request: &Request<'_>) -> Result<ResponseHead, TransportError> {
        (**self).begin(request)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        HttpTransport::read_chunk(&mut **self, buf)
    }

    fn end(&mut self) {
        HttpTransport::end(&mut **self)
    }
}

/// Drain the current response body, refusing anything over `limit` bytes.
pub fn read_body<T: HttpTransport + ?Sized>(
    transport: &mut T,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let bytes_read = HttpTransport::read_chunk(transport, &mut buf)?;
        if bytes_read == 0 {
            break;
        }
        if body.len() + bytes_read > limit {
            return Err(TransportError::new(format!(
                "response body exceeds {} bytes",
                limit
            )));
        }
        body.extend_from_slice(&buf[..bytes_read]);
    }
    Ok(body)
}

/// Resolve a `Location` header against the URL that produced it.
pub fn resolve_location(base: &str, location: &str) -> Result<String, url::ParseError> {
    let resolved = Url::parse(base)?.join(location)?;
    Ok(resolved.into())
}
