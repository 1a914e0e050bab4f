//! The one update session a device has.
//!
//! Fields are readable by anyone holding a reference, but only the state
//! machine (same crate) can change them.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum UpdateStatus {
    Idle = 0,
    Checking = 1,
    Downloading = 2,
    Installing = 3,
    Success = 4,
    Error = 5,
}

impl UpdateStatus {
    /// A check or install is running; new triggers are refused.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            UpdateStatus::Checking | UpdateStatus::Downloading | UpdateStatus::Installing
        )
    }

    /// Recorded outcome that falls back to `Idle` when the next cycle starts.
    pub fn is_terminal(self) -> bool {
        matches!(self, UpdateStatus::Success | UpdateStatus::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            UpdateStatus::Idle => "idle",
            UpdateStatus::Checking => "checking",
            UpdateStatus::Downloading => "downloading",
            UpdateStatus::Installing => "installing",
            UpdateStatus::Success => "success",
            UpdateStatus::Error => "error",
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<UpdateStatus> for u8 {
    fn from(status: UpdateStatus) -> Self {
        status as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidStatus(pub u8);

impl fmt::Display for InvalidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid update status code {}", self.0)
    }
}

impl std::error::Error for InvalidStatus {}

impl TryFrom<u8> for UpdateStatus {
    type Error = InvalidStatus;

    fn try_from(code: u8) -> Result<Self, InvalidStatus> {
        Ok(match code {
            0 => UpdateStatus::Idle,
            1 => UpdateStatus::Checking,
            2 => UpdateStatus::Downloading,
            3 => UpdateStatus::Installing,
            4 => UpdateStatus::Success,
            5 => UpdateStatus::Error,
            other => return Err(InvalidStatus(other)),
        })
    }
}

/// Where to fetch the release the last check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub url: String,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateSession {
    pub(crate) status: UpdateStatus,
    pub(crate) message: String,
    pub(crate) current_version: Version,
    pub(crate) latest_version: Option<Version>,
    pub(crate) pending: Option<PendingUpdate>,
    pub(crate) update_available: bool,
    pub(crate) progress: u8,
    pub(crate) last_check: Option<Instant>,
}

impl UpdateSession {
    pub(crate) fn new(current_version: Version) -> Self {
        Self {
            status: UpdateStatus::Idle,
            message: "OTA initialized".to_string(),
            current_version,
            latest_version: None,
            pending: None,
            update_available: false,
            progress: 0,
            last_check: None,
        }
    }

    pub fn status(&self) -> UpdateStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn current_version(&self) -> &Version {
        &self.current_version
    }

    pub fn latest_version(&self) -> Option<&Version> {
        self.latest_version.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingUpdate> {
        self.pending.as_ref()
    }

    pub fn pending_download_url(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.url.as_str())
    }

    pub fn update_available(&self) -> bool {
        self.update_available
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn last_check(&self) -> Option<Instant> {
        self.last_check
    }

    /// An install can start: a check found a firmware URL and nothing cleared it.
    pub fn can_install(&self) -> bool {
        self.update_available && self.pending_download_url().is_some_and(|url| !url.is_empty())
    }
}
