use esp_idf_svc::http::server::Request as EspHttpRequest;
use esp_idf_svc::io::Write;
use ota_core::OtaError;

use crate::system::uptime_ms;
use serde::{Serialize, Deserialize};
use std::fmt;
use std::error::Error as StdError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    LengthRequired,
    PayloadTooLarge,
    InternalError,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::LengthRequired => "LENGTH_REQUIRED",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::LengthRequired => 411,
            ErrorCode::PayloadTooLarge => 413,
            ErrorCode::InternalError => 500,
            ErrorCode::ServiceUnavailable => 503,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub request_id: String,
    /// Milliseconds since boot
    pub timestamp: u64,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
            request_id: generate_request_id(),
            timestamp: uptime_ms(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ApiError,
    #[serde(skip)]
    status: u16,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ApiError::new(code, message),
            status: code.status(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Map a refused trigger or a failed upload onto an HTTP error.
    pub fn from_ota(err: &OtaError) -> Self {
        let code = match err {
            OtaError::AlreadyInProgress | OtaError::NoPendingUpdate => ErrorCode::Conflict,
            OtaError::Unauthorized => ErrorCode::Unauthorized,
            OtaError::UploadDisabled => ErrorCode::Forbidden,
            OtaError::UnknownSize => ErrorCode::LengthRequired,
            OtaError::InsufficientSpace => ErrorCode::PayloadTooLarge,
            OtaError::WorkerUnavailable => ErrorCode::ServiceUnavailable,
            _ => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }

    pub fn send<T>(self, req: EspHttpRequest<T>) -> Result<(), Box<dyn std::error::Error>>
    where
        T: esp_idf_svc::http::server::Connection,
        <T as esp_idf_svc::io::ErrorType>::Error: StdError + 'static
    {
        let json = serde_json::to_string(&self)?;
        log::warn!("HTTP {} {}", self.status, self.error);
        // A handler may already have started the response; log instead of failing twice
        match req.into_response(self.status, None, &[("Content-Type", "application/json")]) {
            Ok(mut response) => {
                let _ = response.write_all(json.as_bytes());
            }
            Err(e) => {
                log::warn!("ErrorResponse send skipped: response already committed? err={:?}", e);
            }
        }
        Ok(())
    }
}

fn generate_request_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("req_{:08x}{:04x}", uptime_ms() as u32, count & 0xFFFF)
}
