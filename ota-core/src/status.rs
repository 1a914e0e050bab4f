/// Status surface: the JSON snapshot the dashboard and CLI read.
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

use crate::session::{UpdateSession, UpdateStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// 0..=5, Idle..Error
    pub status: UpdateStatus,
    pub message: String,
    pub current_version: String,
    pub latest_version: String,
    pub update_available: bool,
    #[serde(default)]
    pub progress: u8,
}

impl Default for StatusReport {
    fn default() -> Self {
        Self {
            status: UpdateStatus::Idle,
            message: String::new(),
            current_version: String::new(),
            latest_version: String::new(),
            update_available: false,
            progress: 0,
        }
    }
}

impl StatusReport {
    pub fn from_session(session: &UpdateSession) -> Self {
        Self {
            status: session.status(),
            message: session.message().to_string(),
            current_version: session.current_version().to_string(),
            latest_version: session
                .latest_version()
                .map(ToString::to_string)
                .unwrap_or_default(),
            update_available: session.update_available(),
            progress: session.progress(),
        }
    }

    pub fn to_json(&self) -> String {
        // Plain strings, bools and ints: serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Shared, read-mostly copy of the latest [`StatusReport`].
///
/// The state machine publishes after every transition; HTTP handlers on
/// other threads only ever take snapshots.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<StatusReport>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, report: StatusReport) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = report;
    }

    pub fn snapshot(&self) -> StatusReport {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use proptest::prelude::*;

    #[test]
    fn test_json_shape() {
        let session = UpdateSession::new(Version::new("1.0.0"));
        let json = StatusReport::from_session(&session).to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], 0);
        assert_eq!(value["message"], "OTA initialized");
        assert_eq!(value["current_version"], "1.0.0");
        assert_eq!(value["latest_version"], "");
        assert_eq!(value["update_available"], false);
    }

    #[test]
    fn test_status_out_of_range_rejected() {
        let json = r#"{"status":9,"message":"","current_version":"","latest_version":"","update_available":false}"#;
        assert!(StatusReport::from_json(json).is_err());
    }

    #[test]
    fn test_board_snapshot_follows_publish() {
        let board = StatusBoard::new();
        let reader = board.clone();
        board.publish(StatusReport {
            status: UpdateStatus::Downloading,
            progress: 40,
            ..Default::default()
        });
        let snap = reader.snapshot();
        assert_eq!(snap.status, UpdateStatus::Downloading);
        assert_eq!(snap.progress, 40);
    }

    proptest! {
        #[test]
        fn prop_status_round_trip(code in 0u8..=5, available: bool, progress in 0u8..=100, msg in "\\PC{0,20}") {
            let report = StatusReport {
                status: UpdateStatus::try_from(code).unwrap(),
                message: msg,
                current_version: "1.0.0".into(),
                latest_version: "2.0.0".into(),
                update_available: available,
                progress,
            };
            let back = StatusReport::from_json(&report.to_json()).unwrap();
            prop_assert_eq!(back.status, report.status);
            prop_assert_eq!(back.update_available, available);
            prop_assert_eq!(back, report);
        }
    }
}
