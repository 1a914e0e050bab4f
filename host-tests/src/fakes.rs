//! In-memory stand-ins for the network, the flash and the reset line.
//!
//! Storage and system fakes are cheap handles over shared state, so a test
//! can hand one clone to the state machine and keep another to inspect.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use ota_core::{
    BodySource, FirmwareStorage, HttpTransport, OtaConfig, Request, ResponseHead, StorageError,
    SystemControl, TransportError, WriteRegion,
};

pub const METADATA_URL: &str = "https://api.test/repos/acme/door/releases/latest";
pub const FIRMWARE_URL: &str = "https://github.test/acme/door/releases/download/v2.0.0/firmware-v2.0.0.bin";

/// Small chunks so every install takes several steps.
pub fn test_config() -> OtaConfig {
    OtaConfig {
        endpoint: METADATA_URL.to_string(),
        chunk_size: 4,
        ..Default::default()
    }
}

/// A GitHub-style release document.
pub fn release_json(tag: &str, assets: &[(&str, &str)]) -> Vec<u8> {
    let assets: Vec<_> = assets
        .iter()
        .map(|(name, url)| serde_json::json!({ "name": name, "browser_download_url": url }))
        .collect();
    serde_json::json!({ "tag_name": tag, "assets": assets })
        .to_string()
        .into_bytes()
}

pub fn firmware_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    head: Result<ResponseHead, TransportError>,
    body: Vec<u8>,
    fail_at: Option<usize>,
}

impl ScriptedResponse {
    /// 200 with an accurate Content-Length.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            head: Ok(ResponseHead::new(200).with_content_length(body.len() as u64)),
            body,
            fail_at: None,
        }
    }

    pub fn status(code: u16) -> Self {
        Self {
            head: Ok(ResponseHead::new(code)),
            body: Vec::new(),
            fail_at: None,
        }
    }

    pub fn redirect(code: u16, location: &str) -> Self {
        Self {
            head: Ok(ResponseHead::new(code).with_location(location)),
            body: Vec::new(),
            fail_at: None,
        }
    }

    pub fn unreachable(detail: &str) -> Self {
        Self {
            head: Err(TransportError::new(detail)),
            body: Vec::new(),
            fail_at: None,
        }
    }

    /// Override the declared length; `None` drops the header.
    pub fn with_content_length(mut self, len: Option<u64>) -> Self {
        if let Ok(head) = &mut self.head {
            head.content_length = len;
        }
        self
    }

    /// The body read fails once `offset` bytes have been delivered.
    pub fn failing_at(mut self, offset: usize) -> Self {
        self.fail_at = Some(offset);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Serves queued responses per URL, in order.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: HashMap<String, VecDeque<ScriptedResponse>>,
    current: Option<(ScriptedResponse, usize)>,
    requests: Vec<RecordedRequest>,
    ends: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, url: &str, response: ScriptedResponse) -> Self {
        self.push(url, response);
        self
    }

    pub fn push(&mut self, url: &str, response: ScriptedResponse) {
        self.routes.entry(url.to_string()).or_default().push_back(response);
    }

    pub fn requests(&self) -> &[RecordedRequest] {
        &self.requests
    }

    pub fn request_urls(&self) -> Vec<&str> {
        self.requests.iter().map(|r| r.url.as_str()).collect()
    }

    pub fn end_count(&self) -> usize {
        self.ends
    }

    /// A response body is still being served.
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }
}

impl HttpTransport for ScriptedTransport {
    fn begin(&mut self, request: &Request<'_>) -> Result<ResponseHead, TransportError> {
        self.requests.push(RecordedRequest {
            url: request.url.to_string(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timeout: request.timeout,
        });

        let response = self
            .routes
            .get_mut(request.url)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| TransportError::new(format!("no route to {}", request.url)))?;
        let head = response.head.clone()?;
        self.current = Some((response, 0));
        Ok(head)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Some((response, pos)) = self.current.as_mut() else {
            return Err(TransportError::new("no response open"));
        };
        if response.fail_at.is_some_and(|at| *pos >= at) {
            return Err(TransportError::new("connection reset"));
        }

        let mut end = response.body.len().min(*pos + buf.len());
        if let Some(at) = response.fail_at {
            end = end.min(at.max(*pos));
        }
        let n = end - *pos;
        buf[..n].copy_from_slice(&response.body[*pos..end]);
        *pos = end;
        Ok(n)
    }

    fn end(&mut self) {
        self.current = None;
        self.ends += 1;
    }
}

/// An image pushed by a client, delivered in fixed-size pieces.
#[derive(Debug, Clone)]
pub struct UploadedBody {
    data: Vec<u8>,
    offset: usize,
    piece: usize,
    pub ended: bool,
}

impl UploadedBody {
    pub fn new(data: impl Into<Vec<u8>>, piece: usize) -> Self {
        Self {
            data: data.into(),
            offset: 0,
            piece: piece.max(1),
            ended: false,
        }
    }
}

impl BodySource for UploadedBody {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let left = &self.data[self.offset..];
        let n = left.len().min(buf.len()).min(self.piece);
        buf[..n].copy_from_slice(&left[..n]);
        self.offset += n;
        Ok(n)
    }

    fn end(&mut self) {
        self.ended = true;
    }
}

#[derive(Debug, Default)]
struct FlashState {
    capacity: u64,
    opened: Vec<u64>,
    open_regions: usize,
    aborted: usize,
    committed: Option<Vec<u8>>,
    commit_error: Option<String>,
    write_limit: Option<usize>,
    open_error: Option<String>,
}

/// Update slot of a fixed capacity.
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    state: Rc<RefCell<FlashState>>,
}

impl MemoryFlash {
    pub fn new(capacity: u64) -> Self {
        Self {
            state: Rc::new(RefCell::new(FlashState {
                capacity,
                ..Default::default()
            })),
        }
    }

    /// The partition driver refuses to open a region at all.
    pub fn unavailable(self, detail: &str) -> Self {
        self.state.borrow_mut().open_error = Some(detail.to_string());
        self
    }

    pub fn failing_commit(self, detail: &str) -> Self {
        self.state.borrow_mut().commit_error = Some(detail.to_string());
        self
    }

    /// Writes past `limit` total bytes fail.
    pub fn failing_writes_after(self, limit: usize) -> Self {
        self.state.borrow_mut().write_limit = Some(limit);
        self
    }

    pub fn opened_sizes(&self) -> Vec<u64> {
        self.state.borrow().opened.clone()
    }

    pub fn open_regions(&self) -> usize {
        self.state.borrow().open_regions
    }

    pub fn aborted(&self) -> usize {
        self.state.borrow().aborted
    }

    pub fn committed(&self) -> Option<Vec<u8>> {
        self.state.borrow().committed.clone()
    }
}

pub struct MemoryRegion {
    state: Rc<RefCell<FlashState>>,
    data: Vec<u8>,
}

impl FirmwareStorage for MemoryFlash {
    type Region = MemoryRegion;

    fn open_region(&mut self, size: u64) -> Result<MemoryRegion, StorageError> {
        let mut state = self.state.borrow_mut();
        if let Some(detail) = state.open_error.clone() {
            return Err(StorageError::Unavailable(detail));
        }
        if size > state.capacity {
            return Err(StorageError::NoSpace {
                requested: size,
                available: state.capacity,
            });
        }
        state.opened.push(size);
        state.open_regions += 1;
        Ok(MemoryRegion {
            state: Rc::clone(&self.state),
            data: Vec::new(),
        })
    }
}

impl WriteRegion for MemoryRegion {
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let limit = self.state.borrow().write_limit;
        if limit.is_some_and(|limit| self.data.len() + data.len() > limit) {
            return Err(StorageError::Write("flash sector erase failed".to_string()));
        }
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn commit(self) -> Result<(), StorageError> {
        let mut state = self.state.borrow_mut();
        state.open_regions -= 1;
        if let Some(detail) = state.commit_error.clone() {
            return Err(StorageError::Commit(detail));
        }
        state.committed = Some(self.data);
        Ok(())
    }

    fn abort(self) {
        let mut state = self.state.borrow_mut();
        state.open_regions -= 1;
        state.aborted += 1;
    }
}

/// Records restart requests instead of rebooting.
#[derive(Debug, Clone, Default)]
pub struct RecordingSystem {
    restarts: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restarts(&self) -> Vec<Duration> {
        self.restarts.borrow().clone()
    }
}

impl SystemControl for RecordingSystem {
    fn restart(&mut self, grace: Duration) {
        self.restarts.borrow_mut().push(grace);
    }
}
