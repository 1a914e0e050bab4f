/// Update configuration that can be tested independently
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str =
    "https://api.github.com/repos/NZCypher819/esp32-garage-door-sensor/releases/latest";
pub const DEFAULT_USER_AGENT: &str = "ESP32-GarageDoor-OTA";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtaConfig {
    /// Release metadata URL (GitHub "latest release" API)
    pub endpoint: String,
    /// Bearer token for private repositories, empty for public ones
    pub auth_token: String,
    pub user_agent: String,
    /// Version of the running image, compared against the release tag
    pub current_version: String,
    /// Password for pushed uploads; empty disables `POST /api/ota/upload`
    pub upload_password: String,

    /// Periodic checks; manual "check now" triggers work either way
    pub auto_check: bool,
    pub check_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub download_timeout_ms: u64,
    pub max_redirects: u8,
    /// Pause between commit and restart
    pub grace_delay_ms: u64,
    /// Bytes moved from the network into flash per read
    pub chunk_size: usize,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            auth_token: String::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            current_version: "1.0.0".to_string(),
            upload_password: String::new(),
            auto_check: true,
            check_interval_ms: 60_000,
            request_timeout_ms: 15_000,
            download_timeout_ms: 60_000,
            max_redirects: 5,
            grace_delay_ms: 2_000,
            chunk_size: 4096,
        }
    }
}

impl OtaConfig {
    pub fn auth_token(&self) -> Option<&str> {
        let token = self.auth_token.trim();
        (!token.is_empty()).then_some(token)
    }

    pub fn upload_password(&self) -> Option<&str> {
        (!self.upload_password.is_empty()).then_some(self.upload_password.as_str())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::new("endpoint", "must not be empty"));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(ConfigError::new("endpoint", "must be an http(s) URL"));
        }
        if self.current_version.trim().is_empty() {
            return Err(ConfigError::new("current_version", "must not be empty"));
        }
        if self.check_interval_ms == 0 {
            return Err(ConfigError::new("check_interval_ms", "must be positive"));
        }
        if self.request_timeout_ms == 0 || self.download_timeout_ms == 0 {
            return Err(ConfigError::new("timeout", "must be positive"));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::new("chunk_size", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ConfigError {
    fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid OTA config: {} {}", self.field, self.reason)
    }
}

impl std::error::Error for ConfigError {}
