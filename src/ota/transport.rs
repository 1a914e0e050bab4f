// HTTPS client for release checks and firmware downloads

use esp_idf_svc::http::client::{Configuration as HttpConfig, EspHttpConnection, FollowRedirectsPolicy};
use embedded_svc::http::Method;
use ota_core::{HttpTransport, Request, ResponseHead, TransportError};

/// One `EspHttpConnection` per request, so every request gets its own
/// timeout. Redirects are handed back to the caller, which resolves them.
pub struct EspHttpTransport {
    buffer_size: usize,
    connection: Option<EspHttpConnection>,
}

impl EspHttpTransport {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            connection: None,
        }
    }

    fn connect(&self, request: &Request<'_>) -> Result<EspHttpConnection, TransportError> {
        let config = HttpConfig {
            buffer_size: Some(self.buffer_size),
            buffer_size_tx: Some(1024),
            timeout: Some(request.timeout),
            follow_redirects_policy: FollowRedirectsPolicy::FollowNone,
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        EspHttpConnection::new(&config).map_err(|e| TransportError::new(format!("client init: {}", e)))
    }
}

impl HttpTransport for EspHttpTransport {
    fn begin(&mut self, request: &Request<'_>) -> Result<ResponseHead, TransportError> {
        self.end();

        let mut connection = self.connect(request)?;
        connection
            .initiate_request(Method::Get, request.url, request.headers)
            .map_err(|e| TransportError::new(format!("request {}: {}", request.url, e)))?;
        connection
            .initiate_response()
            .map_err(|e| TransportError::new(format!("response {}: {}", request.url, e)))?;

        let mut head = ResponseHead::new(connection.status());
        if let Some(len) = connection.header("Content-Length").and_then(|v| v.trim().parse().ok()) {
            head = head.with_content_length(len);
        }
        if let Some(location) = connection.header("Location") {
            head = head.with_location(location);
        }

        log::debug!(
            "GET {} -> {} (length {:?})",
            request.url,
            head.status,
            head.content_length
        );
        self.connection = Some(connection);
        Ok(head)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| TransportError::new("no response open"))?;
        connection
            .read(buf)
            .map_err(|e| TransportError::new(format!("read: {}", e)))
    }

    fn end(&mut self) {
        // Dropping the connection closes the socket
        self.connection = None;
    }
}
