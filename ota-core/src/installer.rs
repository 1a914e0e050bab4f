//! Firmware installer: stream a release binary into the update slot.
//!
//! The install runs in three blocking phases so the caller can record a
//! status transition between each of them:
//!
//! 1. [`FirmwareInstaller::start`]: GET (following redirects), size check,
//!    open a write region sized to `Content-Length`.
//! 2. [`FirmwareInstaller::copy_chunk`]: move one chunk from the response
//!    into the region. Repeat until it reports [`CopyStep::Done`].
//! 3. [`FirmwareInstaller::finish`]: length and digest check, then commit.
//!
//! A region is only ever committed by `finish` after all checks pass. Every
//! other exit (error, early return, drop) aborts it and leaves the running
//! image as the boot image.
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::config::OtaConfig;
use crate::error::OtaError;
use crate::storage::{FirmwareStorage, StorageError, WriteRegion};
use crate::system::SystemControl;
use crate::transport::{resolve_location, BodySource, HttpTransport, Request, ResponseHead};

/// A successfully committed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStep {
    Progress { written: u64, expected: u64 },
    Done,
}

/// An open download: the response body is still being read and the write
/// region is owned here until `finish` consumes it.
pub struct ActiveInstall<R: WriteRegion> {
    region: Option<R>,
    expected: u64,
    written: u64,
    hasher: Sha256,
    expected_sha256: Option<String>,
    stream_ended: bool,
    logged_decile: u8,
}

impl<R: WriteRegion> ActiveInstall<R> {
    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn progress(&self) -> u8 {
        percent(self.written, self.expected)
    }

    fn record(&mut self, data: &[u8]) {
        self.written += data.len() as u64;
        self.hasher.update(data);

        let decile = self.progress() / 10;
        if decile > self.logged_decile {
            self.logged_decile = decile;
            log::info!("OTA progress: {}% ({}/{})", decile * 10, self.written, self.expected);
        }
    }
}

impl<R: WriteRegion> Drop for ActiveInstall<R> {
    fn drop(&mut self) {
        if let Some(region) = self.region.take() {
            log::warn!("Discarding partial image ({}/{} bytes)", self.written, self.expected);
            region.abort();
        }
    }
}

pub struct FirmwareInstaller<S, Y> {
    storage: S,
    system: Y,
    user_agent: String,
    timeout: Duration,
    max_redirects: u8,
    grace_delay: Duration,
    buffer: Vec<u8>,
}

impl<S, Y> FirmwareInstaller<S, Y>
where
    S: FirmwareStorage,
    Y: SystemControl,
{
    pub fn new(storage: S, system: Y, config: &OtaConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        Self {
            storage,
            system,
            user_agent: config.user_agent.clone(),
            timeout: config.download_timeout(),
            max_redirects: config.max_redirects,
            grace_delay: config.grace_delay(),
            buffer: vec![0u8; chunk_size],
        }
    }

    pub fn system(&self) -> &Y {
        &self.system
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Phase 1. On success the response body is left open on `transport`.
    pub fn start<T: HttpTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        url: &str,
        expected_sha256: Option<&str>,
    ) -> Result<ActiveInstall<S::Region>, OtaError> {
        let result = self.open_download(transport, url, expected_sha256);
        if result.is_err() {
            HttpTransport::end(transport);
        }
        result
    }

    fn open_download<T: HttpTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        url: &str,
        expected_sha256: Option<&str>,
    ) -> Result<ActiveInstall<S::Region>, OtaError> {
        let head = self.follow_redirects(transport, url)?;

        if !head.is_success() {
            log::error!("Firmware download failed: HTTP {}", head.status);
            return Err(OtaError::DownloadError(head.status));
        }

        let expected = match head.content_length {
            Some(len) if len > 0 => len,
            _ => {
                log::error!("Firmware size unknown ({:?}), refusing to stream", head.content_length);
                return Err(OtaError::UnknownSize);
            }
        };

        self.open_image(expected, expected_sha256)
    }

    /// Phase 1 for an image pushed to the device: no request, the caller
    /// declares the size and feeds the body to [`Self::copy_chunk`].
    pub fn start_upload(&mut self, size: u64) -> Result<ActiveInstall<S::Region>, OtaError> {
        if size == 0 {
            log::error!("Upload without a declared size");
            return Err(OtaError::UnknownSize);
        }
        self.open_image(size, None)
    }

    fn open_image(
        &mut self,
        expected: u64,
        expected_sha256: Option<&str>,
    ) -> Result<ActiveInstall<S::Region>, OtaError> {
        log::info!("Firmware size: {} bytes", expected);
        // Whatever the driver says, the image has nowhere to go
        let region = self.storage.open_region(expected).map_err(|e| {
            log::error!("Could not open update region: {}", e);
            OtaError::InsufficientSpace
        })?;

        Ok(ActiveInstall {
            region: Some(region),
            expected,
            written: 0,
            hasher: Sha256::new(),
            expected_sha256: expected_sha256.map(str::to_ascii_lowercase),
            stream_ended: false,
            logged_decile: 0,
        })
    }

    fn follow_redirects<T: HttpTransport + ?Sized>(
        &self,
        transport: &mut T,
        url: &str,
    ) -> Result<ResponseHead, OtaError> {
        let headers = [("User-Agent", self.user_agent.as_str())];
        let mut target = url.to_string();
        let mut hops = 0u8;

        loop {
            log::info!("Downloading firmware from {}", target);
            let request = Request {
                url: &target,
                headers: &headers,
                timeout: self.timeout,
            };
            let head = transport.begin(&request)?;

            if !head.is_redirect() {
                return Ok(head);
            }
            HttpTransport::end(transport);

            let Some(location) = head.location.as_deref() else {
                log::error!("HTTP {} without Location header", head.status);
                return Err(OtaError::DownloadError(head.status));
            };
            if hops >= self.max_redirects {
                log::error!("Too many redirects ({})", hops);
                return Err(OtaError::DownloadError(head.status));
            }

            hops += 1;
            target = resolve_location(&target, location).map_err(|e| {
                log::error!("Bad redirect target {:?}: {}", location, e);
                OtaError::DownloadError(head.status)
            })?;
            log::debug!("Redirect {} -> {}", hops, target);
        }
    }

    /// Phase 2. Read errors and flash write errors end the stream; the
    /// shortfall is reported by [`Self::finish`].
    pub fn copy_chunk<B: BodySource + ?Sized>(
        &mut self,
        body: &mut B,
        install: &mut ActiveInstall<S::Region>,
    ) -> CopyStep {
        let remaining = install.expected - install.written;
        if install.stream_ended || remaining == 0 {
            return CopyStep::Done;
        }

        let want = remaining.min(self.buffer.len() as u64) as usize;
        let chunk = &mut self.buffer[..want];
        let bytes_read = match body.read_chunk(chunk) {
            Ok(0) => {
                install.stream_ended = true;
                return CopyStep::Done;
            }
            Ok(n) => n,
            Err(e) => {
                log::error!("Firmware stream failed after {} bytes: {}", install.written, e);
                install.stream_ended = true;
                return CopyStep::Done;
            }
        };

        let data = &chunk[..bytes_read];
        let write_result = match install.region.as_mut() {
            Some(region) => region.write(data),
            None => return CopyStep::Done,
        };
        if let Err(e) = write_result {
            log::error!("Flash write failed after {} bytes: {}", install.written, e);
            install.stream_ended = true;
            return CopyStep::Done;
        }

        install.record(data);
        CopyStep::Progress {
            written: install.written,
            expected: install.expected,
        }
    }

    /// Phase 3. Closes the response and commits or aborts the region.
    pub fn finish<B: BodySource + ?Sized>(
        &mut self,
        body: &mut B,
        mut install: ActiveInstall<S::Region>,
    ) -> Result<Committed, OtaError> {
        body.end();

        let Some(region) = install.region.take() else {
            return Err(OtaError::Storage("write region already released".to_string()));
        };

        if install.written != install.expected {
            log::error!("Partial update: {}/{}", install.written, install.expected);
            region.abort();
            return Err(OtaError::PartialWrite {
                written: install.written,
                expected: install.expected,
            });
        }

        let actual = hex(&std::mem::take(&mut install.hasher).finalize());
        log::info!("Image SHA-256: {}", actual);

        if let Some(expected) = install.expected_sha256.take() {
            if expected != actual {
                log::error!("Digest mismatch, expected {}", expected);
                region.abort();
                return Err(OtaError::DigestMismatch { expected, actual });
            }
            log::info!("Digest matches release asset");
        }

        region.commit().map_err(|e| {
            log::error!("Commit failed: {}", e);
            match e {
                StorageError::Commit(detail) => OtaError::CommitFailure(detail),
                other => OtaError::CommitFailure(other.to_string()),
            }
        })?;

        Ok(Committed {
            bytes: install.written,
            sha256: actual,
        })
    }

    /// Grace delay then reboot into the committed image.
    pub fn restart(&mut self) {
        self.system.restart(self.grace_delay);
    }

    /// Download, verify, commit and restart in one call.
    pub fn perform_update<T: HttpTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        url: &str,
        expected_sha256: Option<&str>,
    ) -> Result<Committed, OtaError> {
        let mut install = self.start(transport, url, expected_sha256)?;
        while let CopyStep::Progress { .. } = self.copy_chunk(transport, &mut install) {}
        let committed = self.finish(transport, install)?;
        self.restart();
        Ok(committed)
    }
}

fn percent(written: u64, expected: u64) -> u8 {
    if expected == 0 {
        return 0;
    }
    (written.saturating_mul(100) / expected).min(100) as u8
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(50, 200), 25);
        assert_eq!(percent(200, 200), 100);
        assert_eq!(percent(300, 200), 100);
    }

    #[test]
    fn test_hex_encoding() {
        assert_eq!(hex(&[0x00, 0xab, 0x10]), "00ab10");
    }

    #[test]
    fn test_empty_image_digest() {
        let digest = hex(&Sha256::new().finalize());
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
