//! Release discovery: ask the metadata endpoint what the latest release is
//! and decide whether it is something we should install.
use std::time::Duration;

use crate::config::OtaConfig;
use crate::error::OtaError;
use crate::release::ReleaseMetadata;
use crate::transport::{read_body, HttpTransport, Request};
use crate::version::Version;

/// GitHub release documents with long notes run to tens of KB.
const MAX_METADATA_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    UpdateAvailable {
        version: Version,
        /// Tag exactly as published, e.g. `v2.0.0`
        tag: String,
        url: String,
        sha256: Option<String>,
    },
    UpToDate {
        version: Version,
    },
    /// A different release exists but carries no firmware image
    NoAsset {
        version: Version,
    },
}

impl CheckOutcome {
    pub fn version(&self) -> &Version {
        match self {
            CheckOutcome::UpdateAvailable { version, .. }
            | CheckOutcome::UpToDate { version }
            | CheckOutcome::NoAsset { version } => version,
        }
    }
}

pub struct VersionResolver {
    endpoint: String,
    auth_header: Option<String>,
    user_agent: String,
    timeout: Duration,
}

impl VersionResolver {
    pub fn new(config: &OtaConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            auth_header: config.auth_token().map(|token| format!("Bearer {}", token)),
            user_agent: config.user_agent.clone(),
            timeout: config.request_timeout(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One GET against the metadata endpoint, then [`Self::evaluate`].
    pub fn check_for_update<T: HttpTransport + ?Sized>(
        &self,
        transport: &mut T,
        current: &Version,
    ) -> Result<CheckOutcome, OtaError> {
        log::info!("Current version: {}", current);
        log::info!("Connecting to: {}", self.endpoint);

        let release = self.fetch(transport);
        transport.end();
        let release = release?;

        Self::evaluate(&release, current)
    }

    fn fetch<T: HttpTransport + ?Sized>(&self, transport: &mut T) -> Result<ReleaseMetadata, OtaError> {
        let mut headers: Vec<(&str, &str)> = vec![("User-Agent", self.user_agent.as_str())];
        match self.auth_header.as_deref() {
            Some(auth) => {
                headers.push(("Authorization", auth));
                log::info!("Using GitHub authentication token");
            }
            None => log::info!("Public repository access (no token)"),
        }

        let request = Request {
            url: &self.endpoint,
            headers: &headers,
            timeout: self.timeout,
        };
        let head = transport.begin(&request)?;
        log::info!("Release API response: {}", head.status);

        if !head.is_success() {
            return Err(OtaError::NetworkError(head.status));
        }

        let body = read_body(transport, MAX_METADATA_BYTES)?;
        log::info!("Received {} bytes of JSON data", body.len());
        ReleaseMetadata::from_slice(&body)
    }

    /// Decide what a parsed release means for a device running `current`.
    pub fn evaluate(release: &ReleaseMetadata, current: &Version) -> Result<CheckOutcome, OtaError> {
        let tag = release.tag().ok_or(OtaError::MissingTag)?;
        let version = Version::new(tag);
        log::info!("Version comparison: {} vs {}", current, version);

        if version.same_release(current) {
            log::info!("Firmware is up to date");
            return Ok(CheckOutcome::UpToDate { version });
        }

        log::info!("Update available: {} -> {}", current, tag);
        log::debug!("Checking {} assets for firmware binary", release.assets.len());

        match release.firmware_asset() {
            Some(asset) => {
                log::info!("Firmware found: {} ({})", asset.name, asset.download_url);
                Ok(CheckOutcome::UpdateAvailable {
                    version,
                    tag: tag.to_string(),
                    url: asset.download_url.clone(),
                    sha256: asset.sha256(),
                })
            }
            None => {
                log::warn!("No .bin firmware file found in release assets");
                Ok(CheckOutcome::NoAsset { version })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::Asset;

    fn release(tag: Option<&str>, assets: &[(&str, &str)]) -> ReleaseMetadata {
        ReleaseMetadata {
            tag: tag.map(str::to_string),
            assets: assets
                .iter()
                .map(|(name, url)| Asset {
                    name: name.to_string(),
                    download_url: url.to_string(),
                    digest: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_update_available_skips_non_firmware() {
        let rel = release(
            Some("v2.0.0"),
            &[("readme.txt", "https://x/readme"), ("firmware-v2.0.0.bin", "https://x/fw.bin")],
        );
        let outcome = VersionResolver::evaluate(&rel, &Version::new("1.0.0")).unwrap();
        assert_eq!(
            outcome,
            CheckOutcome::UpdateAvailable {
                version: Version::new("2.0.0"),
                tag: "v2.0.0".to_string(),
                url: "https://x/fw.bin".to_string(),
                sha256: None,
            }
        );
    }

    #[test]
    fn test_same_version_is_up_to_date() {
        let rel = release(Some("v1.0.0"), &[("firmware.bin", "u")]);
        let outcome = VersionResolver::evaluate(&rel, &Version::new("1.0.0")).unwrap();
        assert_eq!(outcome, CheckOutcome::UpToDate { version: Version::new("1.0.0") });
    }

    #[test]
    fn test_different_version_without_binary() {
        let rel = release(Some("1.1.0"), &[("firmware.zip", "u"), ("app.bin", "v")]);
        let outcome = VersionResolver::evaluate(&rel, &Version::new("1.0.0")).unwrap();
        assert_eq!(outcome, CheckOutcome::NoAsset { version: Version::new("1.1.0") });
    }

    #[test]
    fn test_missing_tag() {
        let rel = release(None, &[("firmware.bin", "u")]);
        assert_eq!(
            VersionResolver::evaluate(&rel, &Version::new("1.0.0")),
            Err(OtaError::MissingTag)
        );
    }

    #[test]
    fn test_auth_header_only_with_token() {
        let resolver = VersionResolver::new(&OtaConfig::default());
        assert!(resolver.auth_header.is_none());

        let config = OtaConfig {
            auth_token: "ghp_secret".to_string(),
            ..Default::default()
        };
        let resolver = VersionResolver::new(&config);
        assert_eq!(resolver.auth_header.as_deref(), Some("Bearer ghp_secret"));
    }
}
