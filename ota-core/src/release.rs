/// Release metadata as served by the GitHub releases API
use serde::Deserialize;

use crate::error::OtaError;
use crate::version::Version;

/// One parsed metadata response. Only the fields the updater reads.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReleaseMetadata {
    #[serde(rename = "tag_name", default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Asset {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "browser_download_url", default)]
    pub download_url: String,
    /// `sha256:<hex>` on newer GitHub API responses
    #[serde(default)]
    pub digest: Option<String>,
}

impl ReleaseMetadata {
    pub fn from_slice(body: &[u8]) -> Result<Self, OtaError> {
        serde_json::from_slice(body).map_err(|e| OtaError::ParseError(e.to_string()))
    }

    /// The raw tag, if present and non-blank.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn version(&self) -> Option<Version> {
        self.tag().map(Version::new)
    }

    /// First asset, in server order, that looks like a firmware image.
    pub fn firmware_asset(&self) -> Option<&Asset> {
        self.assets.iter().find(|asset| {
            log::debug!("Found asset: {}", asset.name);
            asset.is_firmware_candidate()
        })
    }
}

impl Asset {
    pub fn is_firmware_candidate(&self) -> bool {
        self.name.ends_with(".bin") && self.name.contains("firmware")
    }

    /// Lower-case hex SHA-256 from the `digest` field, if it carries one.
    pub fn sha256(&self) -> Option<String> {
        let hex = self.digest.as_deref()?.strip_prefix("sha256:")?;
        let valid = hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit());
        valid.then(|| hex.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn asset(name: &str, url: &str) -> Asset {
        Asset {
            name: name.to_string(),
            download_url: url.to_string(),
            digest: None,
        }
    }

    #[test]
    fn test_parse_github_release() {
        let body = br#"{
            "tag_name": "v2.0.0",
            "name": "Release 2",
            "draft": false,
            "assets": [
                {"name": "readme.txt", "browser_download_url": "https://x/readme.txt", "size": 12},
                {"name": "firmware-v2.0.0.bin", "browser_download_url": "https://x/fw.bin"}
            ]
        }"#;
        let release = ReleaseMetadata::from_slice(body).unwrap();
        assert_eq!(release.tag(), Some("v2.0.0"));
        assert_eq!(release.version().unwrap().as_str(), "2.0.0");
        assert_eq!(release.assets.len(), 2);
        assert_eq!(release.firmware_asset().unwrap().download_url, "https://x/fw.bin");
    }

    #[test]
    fn test_missing_and_blank_tags() {
        let release = ReleaseMetadata::from_slice(br#"{"assets": []}"#).unwrap();
        assert_eq!(release.tag(), None);

        let release = ReleaseMetadata::from_slice(br#"{"tag_name": null}"#).unwrap();
        assert_eq!(release.tag(), None);

        let release = ReleaseMetadata::from_slice(br#"{"tag_name": "  "}"#).unwrap();
        assert_eq!(release.version(), None);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = ReleaseMetadata::from_slice(b"<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, OtaError::ParseError(_)));
    }

    #[test]
    fn test_candidate_needs_both_bin_and_firmware() {
        assert!(asset("garage-firmware.bin", "").is_firmware_candidate());
        assert!(!asset("firmware.elf", "").is_firmware_candidate());
        assert!(!asset("bootloader.bin", "").is_firmware_candidate());
        assert!(!asset("firmware.bin.sig", "").is_firmware_candidate());
    }

    #[test]
    fn test_first_candidate_wins() {
        let release = ReleaseMetadata {
            tag: Some("3".into()),
            assets: vec![
                asset("notes.md", "a"),
                asset("firmware-a.bin", "b"),
                asset("firmware-b.bin", "c"),
            ],
        };
        assert_eq!(release.firmware_asset().unwrap().download_url, "b");
    }

    #[test]
    fn test_asset_digest() {
        let hex = "ab".repeat(32);
        let mut fw = asset("firmware.bin", "u");
        fw.digest = Some(format!("sha256:{}", hex.to_uppercase()));
        assert_eq!(fw.sha256(), Some(hex));

        fw.digest = Some("md5:1234".into());
        assert_eq!(fw.sha256(), None);
    }

    proptest! {
        #[test]
        fn prop_selected_asset_is_first_candidate(names in proptest::collection::vec("[a-z.-]{0,16}", 0..8)) {
            let release = ReleaseMetadata {
                tag: Some("1".into()),
                assets: names.iter().map(|n| asset(n, n)).collect(),
            };
            let expected = names.iter().find(|n| n.ends_with(".bin") && n.contains("firmware"));
            prop_assert_eq!(release.firmware_asset().map(|a| &a.name), expected);
        }
    }
}
