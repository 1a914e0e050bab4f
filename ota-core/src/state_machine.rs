//! The update state machine.
//!
//! Owns the [`UpdateSession`] and every collaborator the update flow needs.
//! All session mutation happens here, and every transition is published to
//! the [`StatusBoard`] before the next blocking call starts.
//!
//! ```text
//!  Idle --trigger_check--> Checking --outcome/error--> Idle
//!  Idle --begin_install--> Downloading --start ok--> Installing
//!                                |                       |
//!                                +--error--> Error <-----+
//!                                                        |
//!                                            Success <---+ (commit ok)
//! ```
//!
//! A pushed upload takes the same Downloading -> Installing -> Success path
//! but the image arrives through a [`BodySource`] handed in by the caller.
//!
//! `Success` and `Error` fall back to `Idle` when the next check or
//! install is admitted.
use std::time::Instant;

use crate::config::OtaConfig;
use crate::error::OtaError;
use crate::installer::{ActiveInstall, Committed, CopyStep, FirmwareInstaller};
use crate::resolver::{CheckOutcome, VersionResolver};
use crate::session::{PendingUpdate, UpdateSession, UpdateStatus};
use crate::status::{StatusBoard, StatusReport};
use crate::storage::FirmwareStorage;
use crate::system::SystemControl;
use crate::transport::{BodySource, HttpTransport};
use crate::version::Version;

/// Result of one [`UpdateStateMachine::step_install`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStep {
    Running { written: u64, expected: u64 },
    Finished(Result<Committed, OtaError>),
}

pub struct UpdateStateMachine<T, S: FirmwareStorage, Y> {
    session: UpdateSession,
    resolver: VersionResolver,
    installer: FirmwareInstaller<S, Y>,
    transport: T,
    active: Option<ActiveInstall<S::Region>>,
    board: StatusBoard,
}

impl<T, S, Y> UpdateStateMachine<T, S, Y>
where
    T: HttpTransport,
    S: FirmwareStorage,
    Y: SystemControl,
{
    pub fn new(config: &OtaConfig, transport: T, storage: S, system: Y) -> Self {
        let machine = Self {
            session: UpdateSession::new(Version::new(&config.current_version)),
            resolver: VersionResolver::new(config),
            installer: FirmwareInstaller::new(storage, system, config),
            transport,
            active: None,
            board: StatusBoard::new(),
        };
        log::info!(
            "OTA initialized (version {}, endpoint {})",
            machine.session.current_version(),
            machine.resolver.endpoint()
        );
        machine.publish();
        machine
    }

    pub fn session(&self) -> &UpdateSession {
        &self.session
    }

    pub fn status(&self) -> UpdateStatus {
        self.session.status()
    }

    pub fn report(&self) -> StatusReport {
        StatusReport::from_session(&self.session)
    }

    /// Shared view of the status for other threads.
    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn storage(&self) -> &S {
        self.installer.storage()
    }

    pub fn system(&self) -> &Y {
        self.installer.system()
    }

    pub fn install_in_flight(&self) -> bool {
        self.active.is_some()
    }

    /// Run one release check. Rejected with `AlreadyInProgress` while busy.
    ///
    /// Resolver errors are recorded in the session message and also returned.
    pub fn trigger_check(&mut self) -> Result<CheckOutcome, OtaError> {
        self.admit()?;

        self.transition(UpdateStatus::Checking, "Checking for updates...");
        let result = self
            .resolver
            .check_for_update(&mut self.transport, &self.session.current_version);

        let session = &mut self.session;
        match &result {
            Ok(CheckOutcome::UpdateAvailable { version, tag, url, sha256 }) => {
                session.latest_version = Some(version.clone());
                session.pending = Some(PendingUpdate {
                    url: url.clone(),
                    sha256: sha256.clone(),
                });
                session.update_available = true;
                session.message = format!("Update available: {}", tag);
            }
            Ok(CheckOutcome::UpToDate { version }) => {
                session.latest_version = Some(version.clone());
                session.pending = None;
                session.update_available = false;
                session.message = "Firmware up to date".to_string();
            }
            Ok(CheckOutcome::NoAsset { version }) => {
                session.latest_version = Some(version.clone());
                session.pending = None;
                session.update_available = false;
                session.message = "No firmware binary found in release".to_string();
            }
            Err(e) => {
                log::warn!("Update check failed: {}", e);
                session.message = e.to_string();
            }
        }
        session.status = UpdateStatus::Idle;
        session.last_check = Some(Instant::now());
        self.publish();

        result
    }

    /// Open the download for the pending release and move to `Installing`.
    ///
    /// Rejections (`AlreadyInProgress`, `NoPendingUpdate`) leave the session
    /// untouched. Any other error lands in `Error`.
    pub fn begin_install(&mut self) -> Result<(), OtaError> {
        self.admit()?;
        let Some(pending) = self.session.pending.clone().filter(|_| self.session.can_install()) else {
            log::warn!("Install requested without a pending update");
            return Err(OtaError::NoPendingUpdate);
        };
        self.settle();

        self.session.progress = 0;
        self.transition(UpdateStatus::Downloading, "Downloading firmware...");

        match self
            .installer
            .start(&mut self.transport, &pending.url, pending.sha256.as_deref())
        {
            Ok(install) => {
                self.active = Some(install);
                self.transition(UpdateStatus::Installing, "Installing firmware...");
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Copy one chunk of the open download. `None` when nothing is in flight.
    pub fn step_install(&mut self) -> Option<InstallStep> {
        let install = self.active.as_mut()?;

        match self.installer.copy_chunk(&mut self.transport, install) {
            CopyStep::Progress { written, expected } => {
                let progress = install.progress();
                self.track(progress);
                Some(InstallStep::Running { written, expected })
            }
            CopyStep::Done => {
                let install = self.active.take()?;
                let result = self.installer.finish(&mut self.transport, install);
                match &result {
                    Ok(committed) => {
                        self.complete(committed);
                        self.installer.restart();
                    }
                    Err(e) => self.fail(e),
                }
                Some(InstallStep::Finished(result))
            }
        }
    }

    /// Blocking install of the pending release, start to finish.
    pub fn install_latest_release(&mut self) -> Result<Committed, OtaError> {
        self.begin_install()?;
        loop {
            match self.step_install() {
                Some(InstallStep::Running { .. }) => continue,
                Some(InstallStep::Finished(result)) => return result,
                None => return Err(OtaError::NoPendingUpdate),
            }
        }
    }

    /// Blocking install of an image pushed to the device.
    ///
    /// Writes go through the same region, length and commit checks as a
    /// download. Does not restart: the caller answers the uploader first and
    /// then calls [`Self::restart`]. A failed upload does not touch the
    /// pending release.
    pub fn install_upload<B: BodySource + ?Sized>(
        &mut self,
        size: u64,
        body: &mut B,
    ) -> Result<Committed, OtaError> {
        self.admit()?;
        self.settle();

        self.session.progress = 0;
        self.transition(UpdateStatus::Downloading, "Receiving firmware upload...");

        let mut install = match self.installer.start_upload(size) {
            Ok(install) => install,
            Err(e) => {
                body.end();
                self.reject_upload(&e);
                return Err(e);
            }
        };
        self.transition(UpdateStatus::Installing, "Installing firmware...");

        while let CopyStep::Progress { .. } = self.installer.copy_chunk(body, &mut install) {
            let progress = install.progress();
            self.track(progress);
        }

        let result = self.installer.finish(body, install);
        match &result {
            Ok(committed) => self.complete(committed),
            Err(e) => self.reject_upload(e),
        }
        result
    }

    /// Reboot into a committed image. No-op unless the session is `Success`.
    pub fn restart(&mut self) {
        if self.session.status == UpdateStatus::Success {
            self.installer.restart();
        }
    }

    /// Replace the session message without a status change.
    pub fn note(&mut self, message: &str) {
        if self.session.message != message {
            log::info!("OTA: {}", message);
            self.session.message = message.to_string();
            self.publish();
        }
    }

    fn admit(&self) -> Result<(), OtaError> {
        if self.session.status.is_busy() || self.active.is_some() {
            log::warn!("Update already in progress ({})", self.session.status);
            return Err(OtaError::AlreadyInProgress);
        }
        Ok(())
    }

    fn settle(&mut self) {
        if self.session.status.is_terminal() {
            log::debug!("Clearing {} status", self.session.status);
            self.session.status = UpdateStatus::Idle;
        }
    }

    fn transition(&mut self, status: UpdateStatus, message: &str) {
        self.settle();
        log::info!("OTA {} -> {}: {}", self.session.status, status, message);
        self.session.status = status;
        self.session.message = message.to_string();
        self.publish();
    }

    fn track(&mut self, progress: u8) {
        if progress != self.session.progress {
            self.session.progress = progress;
            self.publish();
        }
    }

    fn complete(&mut self, committed: &Committed) {
        log::info!("Update committed: {} bytes, sha256 {}", committed.bytes, committed.sha256);
        self.session.progress = 100;
        self.session.update_available = false;
        self.session.pending = None;
        self.transition(UpdateStatus::Success, "Update successful! Rebooting...");
    }

    fn reject_upload(&mut self, err: &OtaError) {
        log::error!("Upload failed: {}", err);
        self.session.status = UpdateStatus::Error;
        self.session.message = err.to_string();
        self.publish();
    }

    fn fail(&mut self, err: &OtaError) {
        log::error!("Update failed: {}", err);
        self.session.status = UpdateStatus::Error;
        self.session.message = err.to_string();
        self.session.update_available = false;
        self.session.pending = None;
        self.publish();
    }

    fn publish(&self) {
        self.board.publish(StatusReport::from_session(&self.session));
    }
}
