use anyhow::Result;
use esp_idf_svc::http::server::EspHttpServer;
use embedded_svc::http::Method;
use esp_idf_svc::io::{Read, Write};
use ota_core::OtaHandle;
use serde::Serialize;

use crate::network::error_handler::{ErrorCode, ErrorResponse};
use crate::system::uptime_ms;
use crate::network::http_config::create_http_config;

/// JSON status and control surface for the updater.
///
/// Handlers never touch the state machine: they read the last published
/// status through the handle and enqueue commands for the main loop.
pub struct OtaApiServer {
    _server: EspHttpServer<'static>,
}

#[derive(Serialize)]
struct Accepted<'a> {
    accepted: bool,
    command: &'a str,
}

/// Request body is copied into the update queue this much at a time
const UPLOAD_BUFFER_SIZE: usize = 4096;

#[derive(Serialize)]
struct UploadResult<'a> {
    success: bool,
    bytes: u64,
    sha256: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct SystemInfo {
    firmware: &'static str,
    version: &'static str,
    reset_reason: &'static str,
    free_heap: u32,
    min_free_heap: u32,
    uptime_ms: u64,
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<&mut esp_idf_svc::http::server::EspHttpConnection>,
    status: u16,
    body: &T,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string(body)?;
    let mut response = req.into_response(
        status,
        None,
        &[("Content-Type", "application/json"), ("Connection", "close")],
    )?;
    response.write_all(json.as_bytes())?;
    Ok(())
}

impl OtaApiServer {
    pub fn new(ota: OtaHandle) -> Result<Self> {
        let mut server = EspHttpServer::new(&create_http_config())?;

        let status_handle = ota.clone();
        server.fn_handler("/api/ota/status", Method::Get, move |req| {
            let report = status_handle.status();
            write_json(req, 200, &report)
        })?;

        let check_handle = ota.clone();
        server.fn_handler("/api/ota/check", Method::Post, move |req| {
            match check_handle.request_check() {
                Ok(()) => write_json(req, 202, &Accepted { accepted: true, command: "check" }),
                Err(e) => ErrorResponse::from_ota(&e).send(req),
            }
        })?;

        let install_handle = ota.clone();
        server.fn_handler("/api/ota/install", Method::Post, move |req| {
            match install_handle.request_install() {
                Ok(()) => {
                    log::info!("Install requested over HTTP");
                    write_json(req, 202, &Accepted { accepted: true, command: "install" })
                }
                Err(e) => ErrorResponse::from_ota(&e).send(req),
            }
        })?;

        // Push upload: password in X-OTA-Password, raw image as the body
        let upload_handle = ota;
        server.fn_handler("/api/ota/upload", Method::Post, move |mut req| {
            let password = req.header("X-OTA-Password").map(str::to_string);
            let Some(size) = req
                .header("Content-Length")
                .and_then(|v| v.parse::<u64>().ok())
            else {
                return ErrorResponse::new(ErrorCode::LengthRequired, "Missing Content-Length").send(req);
            };

            let feed = match upload_handle.request_upload(password.as_deref(), size) {
                Ok(feed) => feed,
                Err(e) => return ErrorResponse::from_ota(&e).send(req),
            };
            log::info!("Firmware upload started, size: {} bytes", size);

            let mut buffer = vec![0u8; UPLOAD_BUFFER_SIZE];
            loop {
                let bytes_read = match req.read(&mut buffer) {
                    Ok(n) => n,
                    Err(e) => {
                        log::warn!("Upload read failed: {:?}", e);
                        break;
                    }
                };
                if bytes_read == 0 || !feed.send(&buffer[..bytes_read]) {
                    break;
                }
            }

            match feed.finish() {
                Ok(committed) => write_json(
                    req,
                    200,
                    &UploadResult {
                        success: true,
                        bytes: committed.bytes,
                        sha256: &committed.sha256,
                        message: "Update successful! Rebooting...",
                    },
                ),
                Err(e) => ErrorResponse::from_ota(&e).send(req),
            }
        })?;

        server.fn_handler("/api/system", Method::Get, move |req| {
            let info = SystemInfo {
                firmware: crate::version::FIRMWARE_NAME,
                version: crate::version::FIRMWARE_VERSION,
                reset_reason: crate::system::reset::get_reset_reason(),
                free_heap: crate::system::free_heap(),
                min_free_heap: crate::system::min_free_heap(),
                uptime_ms: uptime_ms(),
            };
            write_json(req, 200, &info)
        })?;

        server.fn_handler("/*", Method::Get, move |req| {
            let path = req.uri().to_string();
            ErrorResponse::not_found(format!("No route for {}", path)).send(req)
        })?;

        log::info!("OTA API server started on port 80");
        Ok(Self { _server: server })
    }
}
