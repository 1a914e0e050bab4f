//! The update worker and the handle other threads use to reach it.
//!
//! The main loop owns the [`OtaAgent`] and calls [`OtaAgent::tick`]; HTTP
//! handlers hold an [`OtaHandle`], which only ever enqueues a command or
//! reads the last published status. Commands are drained once per tick, so
//! nothing re-enters the state machine from another thread.
//!
//! A pushed upload is the one command that carries data: the handler keeps
//! an [`UploadFeed`] and streams the request body into it while the worker
//! writes it to flash, then waits for the verdict.
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::time::{Duration, Instant};

use crate::config::OtaConfig;
use crate::error::OtaError;
use crate::installer::Committed;
use crate::resolver::CheckOutcome;
use crate::scheduler::Scheduler;
use crate::state_machine::{InstallStep, UpdateStateMachine};
use crate::status::{StatusBoard, StatusReport};
use crate::storage::FirmwareStorage;
use crate::system::SystemControl;
use crate::transport::{BodySource, HttpTransport, TransportError};

/// Chunks in flight between the HTTP handler and the worker.
const UPLOAD_QUEUE_DEPTH: usize = 4;

pub const INSTALL_QUEUED_MESSAGE: &str = "Install queued: waiting for network";

#[derive(Debug)]
pub enum Command {
    CheckNow,
    InstallNow,
    Upload(UploadJob),
}

/// A pushed image waiting for the worker.
#[derive(Debug)]
pub struct UploadJob {
    pub size: u64,
    pub body: UploadBody,
    pub reply: SyncSender<Result<Committed, OtaError>>,
}

impl UploadJob {
    fn answer(self, result: Result<Committed, OtaError>) {
        if self.reply.send(result).is_err() {
            log::warn!("Uploader went away before the result was ready");
        }
    }
}

/// Worker side of an upload: chunks arrive from the handler thread.
#[derive(Debug)]
pub struct UploadBody {
    chunks: Receiver<Vec<u8>>,
    current: Vec<u8>,
    offset: usize,
    stall_timeout: Duration,
}

impl UploadBody {
    pub fn new(chunks: Receiver<Vec<u8>>, stall_timeout: Duration) -> Self {
        Self {
            chunks,
            current: Vec::new(),
            offset: 0,
            stall_timeout,
        }
    }
}

impl BodySource for UploadBody {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        while self.offset >= self.current.len() {
            match self.chunks.recv_timeout(self.stall_timeout) {
                Ok(chunk) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                // Sender dropped: the handler saw the end of the request body
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(TransportError::new("upload stalled"));
                }
            }
        }

        let left = &self.current[self.offset..];
        let n = left.len().min(buf.len());
        buf[..n].copy_from_slice(&left[..n]);
        self.offset += n;
        Ok(n)
    }
}

/// Handler side of an upload.
pub struct UploadFeed {
    chunks: SyncSender<Vec<u8>>,
    reply: Receiver<Result<Committed, OtaError>>,
    timeout: Duration,
}

impl UploadFeed {
    /// Queue one piece of the request body. `false` once the worker has
    /// stopped reading, after which the rest of the body can be dropped.
    pub fn send(&self, data: &[u8]) -> bool {
        data.is_empty() || self.chunks.send(data.to_vec()).is_ok()
    }

    /// Signal the end of the body and wait for the commit result.
    pub fn finish(self) -> Result<Committed, OtaError> {
        let Self { chunks, reply, timeout } = self;
        drop(chunks);
        match reply.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(OtaError::WorkerUnavailable),
        }
    }
}

/// What a tick did, so the caller can log around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    Nothing,
    Checked(Result<CheckOutcome, OtaError>),
    Installed(Result<Committed, OtaError>),
    Uploaded(Result<Committed, OtaError>),
}

impl Activity {
    pub fn is_nothing(&self) -> bool {
        matches!(self, Activity::Nothing)
    }
}

#[derive(Clone)]
pub struct OtaHandle {
    commands: Sender<Command>,
    board: StatusBoard,
    upload_password: Option<String>,
    upload_timeout: Duration,
}

impl OtaHandle {
    /// Ask for a check on the next tick. Always accepted while the worker runs.
    pub fn request_check(&self) -> Result<(), OtaError> {
        self.send(Command::CheckNow)
    }

    /// Ask for an install. Refused up front when the last published status
    /// shows one cannot start.
    pub fn request_install(&self) -> Result<(), OtaError> {
        let report = self.board.snapshot();
        if report.status.is_busy() {
            return Err(OtaError::AlreadyInProgress);
        }
        if !report.update_available {
            return Err(OtaError::NoPendingUpdate);
        }
        self.send(Command::InstallNow)
    }

    /// Open a push upload of `size` bytes. The password is checked here;
    /// the size against the update slot once the worker takes the job.
    pub fn request_upload(&self, password: Option<&str>, size: u64) -> Result<UploadFeed, OtaError> {
        let Some(expected) = self.upload_password.as_deref() else {
            return Err(OtaError::UploadDisabled);
        };
        if password != Some(expected) {
            log::warn!("Upload refused: bad password");
            return Err(OtaError::Unauthorized);
        }
        if self.board.snapshot().status.is_busy() {
            return Err(OtaError::AlreadyInProgress);
        }
        if size == 0 {
            return Err(OtaError::UnknownSize);
        }

        let (chunk_tx, chunk_rx) = mpsc::sync_channel(UPLOAD_QUEUE_DEPTH);
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.send(Command::Upload(UploadJob {
            size,
            body: UploadBody::new(chunk_rx, self.upload_timeout),
            reply: reply_tx,
        }))?;

        Ok(UploadFeed {
            chunks: chunk_tx,
            reply: reply_rx,
            timeout: self.upload_timeout,
        })
    }

    pub fn status(&self) -> StatusReport {
        self.board.snapshot()
    }

    fn send(&self, command: Command) -> Result<(), OtaError> {
        self.commands
            .send(command)
            .map_err(|_| OtaError::WorkerUnavailable)
    }
}

pub struct OtaAgent<T, S: FirmwareStorage, Y> {
    machine: UpdateStateMachine<T, S, Y>,
    scheduler: Scheduler,
    commands: Receiver<Command>,
    sender: Sender<Command>,
    install_pending: bool,
    upload_password: Option<String>,
    upload_timeout: Duration,
}

impl<T, S, Y> OtaAgent<T, S, Y>
where
    T: HttpTransport,
    S: FirmwareStorage,
    Y: SystemControl,
{
    pub fn new(config: &OtaConfig, transport: T, storage: S, system: Y, now: Instant) -> Self {
        let (sender, commands) = mpsc::channel();
        Self {
            machine: UpdateStateMachine::new(config, transport, storage, system),
            scheduler: Scheduler::new(config.check_interval(), now).periodic(config.auto_check),
            commands,
            sender,
            install_pending: false,
            upload_password: config.upload_password().map(str::to_string),
            upload_timeout: config.download_timeout(),
        }
    }

    pub fn handle(&self) -> OtaHandle {
        OtaHandle {
            commands: self.sender.clone(),
            board: self.machine.board().clone(),
            upload_password: self.upload_password.clone(),
            upload_timeout: self.upload_timeout,
        }
    }

    pub fn machine(&self) -> &UpdateStateMachine<T, S, Y> {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut UpdateStateMachine<T, S, Y> {
        &mut self.machine
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Equivalent of a manual "check now".
    pub fn trigger_update_check(&mut self) {
        self.scheduler.trigger_now();
    }

    pub fn install_pending(&self) -> bool {
        self.install_pending
    }

    /// One pass of the worker: drain commands, serve an upload or a
    /// requested install to completion, otherwise let the scheduler decide
    /// on a check. An install asked for while offline waits for the network.
    pub fn tick(&mut self, now: Instant, connected: bool) -> Activity {
        if let Some(job) = self.drain_commands() {
            return Activity::Uploaded(self.run_upload(job));
        }

        if self.install_pending {
            if connected {
                self.install_pending = false;
                return Activity::Installed(self.run_install());
            }
            self.machine.note(INSTALL_QUEUED_MESSAGE);
        }

        let machine = &mut self.machine;
        match self.scheduler.tick(now, connected, || machine.trigger_check()) {
            Some(result) => Activity::Checked(result),
            None => Activity::Nothing,
        }
    }

    /// Returns the first upload; later ones in the same batch are refused.
    fn drain_commands(&mut self) -> Option<UploadJob> {
        let mut upload = None;
        for command in self.commands.try_iter() {
            match command {
                Command::CheckNow => self.scheduler.trigger_now(),
                Command::InstallNow => self.install_pending = true,
                Command::Upload(job) if upload.is_none() => upload = Some(job),
                Command::Upload(job) => job.answer(Err(OtaError::AlreadyInProgress)),
            }
        }
        upload
    }

    fn run_upload(&mut self, mut job: UploadJob) -> Result<Committed, OtaError> {
        log::info!("Receiving pushed firmware ({} bytes)", job.size);
        let result = self.machine.install_upload(job.size, &mut job.body);
        let committed = result.is_ok();
        job.answer(result.clone());

        if committed {
            self.install_pending = false;
            self.machine.restart();
        }
        result
    }

    fn run_install(&mut self) -> Result<Committed, OtaError> {
        self.machine.begin_install()?;
        loop {
            match self.machine.step_install() {
                Some(InstallStep::Running { .. }) => {}
                Some(InstallStep::Finished(result)) => return result,
                None => return Err(OtaError::NoPendingUpdate),
            }

            // Commands that arrive mid-install: checks wait, the rest are refused
            for command in self.commands.try_iter() {
                match command {
                    Command::CheckNow => self.scheduler.trigger_now(),
                    Command::InstallNow => log::warn!("{}", OtaError::AlreadyInProgress),
                    Command::Upload(job) => job.answer(Err(OtaError::AlreadyInProgress)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UpdateStatus;

    #[test]
    fn test_handle_refuses_install_without_update() {
        let (sender, _rx) = mpsc::channel();
        let handle = test_handle(sender, StatusBoard::new());
        assert_eq!(handle.request_install(), Err(OtaError::NoPendingUpdate));
        assert_eq!(handle.request_check(), Ok(()));
    }

    #[test]
    fn test_handle_refuses_install_while_busy() {
        let (sender, rx) = mpsc::channel();
        let board = StatusBoard::new();
        board.publish(StatusReport {
            status: UpdateStatus::Downloading,
            update_available: true,
            ..Default::default()
        });
        let handle = test_handle(sender, board);
        assert_eq!(handle.request_install(), Err(OtaError::AlreadyInProgress));
        assert!(matches!(
            handle.request_upload(Some("hunter2"), 10),
            Err(OtaError::AlreadyInProgress)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_reports_dead_worker() {
        let (sender, rx) = mpsc::channel();
        drop(rx);
        let handle = test_handle(sender, StatusBoard::new());
        assert_eq!(handle.request_check(), Err(OtaError::WorkerUnavailable));
    }

    #[test]
    fn test_upload_password_is_checked_before_queueing() {
        let (sender, rx) = mpsc::channel();
        let handle = test_handle(sender, StatusBoard::new());

        assert!(matches!(handle.request_upload(None, 10), Err(OtaError::Unauthorized)));
        assert!(matches!(handle.request_upload(Some("nope"), 10), Err(OtaError::Unauthorized)));
        assert!(matches!(handle.request_upload(Some("hunter2"), 0), Err(OtaError::UnknownSize)));
        assert!(rx.try_recv().is_err());

        assert!(handle.request_upload(Some("hunter2"), 10).is_ok());
        assert!(matches!(rx.try_recv(), Ok(Command::Upload(UploadJob { size: 10, .. }))));
    }

    #[test]
    fn test_upload_disabled_without_password() {
        let (sender, _rx) = mpsc::channel();
        let handle = OtaHandle {
            upload_password: None,
            ..test_handle(sender, StatusBoard::new())
        };
        assert!(matches!(
            handle.request_upload(Some("hunter2"), 10),
            Err(OtaError::UploadDisabled)
        ));
    }

    #[test]
    fn test_upload_body_reassembles_chunks() {
        let (tx, rx) = mpsc::sync_channel(4);
        let mut body = UploadBody::new(rx, Duration::from_millis(50));
        tx.send(vec![1, 2, 3]).unwrap();
        tx.send(vec![4, 5]).unwrap();
        drop(tx);

        let mut buf = [0u8; 2];
        let mut out = Vec::new();
        loop {
            let n = body.read_chunk(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_upload_body_reports_stall() {
        let (_tx, rx) = mpsc::sync_channel::<Vec<u8>>(1);
        let mut body = UploadBody::new(rx, Duration::from_millis(10));
        let mut buf = [0u8; 4];
        assert!(body.read_chunk(&mut buf).is_err());
    }

    #[test]
    fn test_feed_without_worker_answer() {
        let (chunks, _chunk_rx) = mpsc::sync_channel(1);
        let (reply_tx, reply) = mpsc::sync_channel(1);
        drop(reply_tx);
        let feed = UploadFeed {
            chunks,
            reply,
            timeout: Duration::from_millis(10),
        };
        assert_eq!(feed.finish(), Err(OtaError::WorkerUnavailable));
    }

    fn test_handle(commands: Sender<Command>, board: StatusBoard) -> OtaHandle {
        OtaHandle {
            commands,
            board,
            upload_password: Some("hunter2".to_string()),
            upload_timeout: Duration::from_millis(50),
        }
    }
}
