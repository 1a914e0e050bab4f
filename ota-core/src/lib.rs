//! OTA Core - Hardware-independent update logic for the ESP32 OTA updater
//!
//! Release discovery, the update state machine, the firmware installer and
//! the check scheduler live here. The device supplies the three seams
//! ([`HttpTransport`], [`FirmwareStorage`], [`SystemControl`]); host tests
//! supply scripted fakes.

pub mod agent;
pub mod config;
pub mod error;
pub mod installer;
pub mod release;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod state_machine;
pub mod status;
pub mod storage;
pub mod system;
pub mod transport;
pub mod version;

pub use agent::{Activity, Command, OtaAgent, OtaHandle, UploadBody, UploadFeed, UploadJob};
pub use config::{ConfigError, OtaConfig};
pub use error::OtaError;
pub use installer::{ActiveInstall, Committed, CopyStep, FirmwareInstaller};
pub use release::{Asset, ReleaseMetadata};
pub use resolver::{CheckOutcome, VersionResolver};
pub use scheduler::Scheduler;
pub use session::{PendingUpdate, UpdateSession, UpdateStatus};
pub use state_machine::{InstallStep, UpdateStateMachine};
pub use status::{StatusBoard, StatusReport};
pub use storage::{FirmwareStorage, StorageError, WriteRegion};
pub use system::SystemControl;
pub use transport::{BodySource, HttpTransport, Request, ResponseHead, TransportError};
pub use version::Version;
