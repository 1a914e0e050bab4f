use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use ota_core::{StatusReport, UpdateStatus};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "ota")]
#[command(about = "ESP32 OTA updater control tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Port number (default: 80)
    #[arg(short, long, default_value = "80", global = true)]
    port: u16,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the device's update status
    Status {
        /// Device IP address or mDNS name
        ip: String,
    },
    /// Ask the device to check for a new release now
    Check {
        ip: String,
        /// Wait for the check to finish and print the result
        #[arg(short, long)]
        wait: bool,
    },
    /// Install the release the device last found
    Install {
        ip: String,
        /// Follow download progress until the device reboots
        #[arg(short, long)]
        watch: bool,
        /// Give up watching after this many seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
    },
    /// Push a local firmware image to the device
    Upload {
        ip: String,
        /// Firmware .bin to upload
        file: PathBuf,
        /// Device upload password (OTA_PASSWORD in ota_config.h)
        #[arg(long)]
        password: String,
    },
}

const POLL_INTERVAL: Duration = Duration::from_millis(500);

struct Device {
    base: String,
    client: reqwest::blocking::Client,
}

impl Device {
    fn new(ip: &str, port: u16) -> Result<Self, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| format!("HTTP client: {}", e))?;
        Ok(Self {
            base: base_url(ip, port),
            client,
        })
    }

    fn status(&self) -> Result<StatusReport, String> {
        let response = self
            .client
            .get(format!("{}/api/ota/status", self.base))
            .send()
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let body = response.text().map_err(|e| e.to_string())?;
        StatusReport::from_json(&body).map_err(|e| format!("bad status JSON: {}", e))
    }

    fn post(&self, path: &str) -> Result<(), String> {
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .send()
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        Err(format!("HTTP {}: {}", status, error_message(&body)))
    }
}

/// Read an image and refuse anything that cannot be firmware
fn read_image(path: &Path) -> Result<Vec<u8>, String> {
    let data = fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    if data.is_empty() {
        return Err(format!("{} is empty", path.display()));
    }
    Ok(data)
}

fn upload_firmware(device: &Device, image: Vec<u8>, password: &str) -> Result<(), String> {
    let size = image.len() as u64;
    println!("\n📤 {} {}", "Uploading to".cyan(), device.base);
    println!("   Firmware: {} bytes ({:.2} MB)", size, size as f64 / 1024.0 / 1024.0);

    // Flash writes are slow; the reply only comes after the commit
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| format!("HTTP client: {}", e))?;

    let pb = ProgressBar::new(size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("   {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    let body = reqwest::blocking::Body::sized(pb.wrap_read(std::io::Cursor::new(image)), size);

    let result = client
        .post(format!("{}/api/ota/upload", device.base))
        .header("X-OTA-Password", password)
        .header("Content-Type", "application/octet-stream")
        .body(body)
        .send();
    pb.finish_and_clear();

    let response = result.map_err(|e| e.to_string())?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().unwrap_or_default();
    Err(format!("HTTP {}: {}", status, error_message(&body)))
}

fn base_url(ip: &str, port: u16) -> String {
    let host = ip.trim_start_matches("http://").trim_end_matches('/');
    if port == 80 {
        format!("http://{}", host)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// `error.message` from the device's error body, or the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn status_color(status: UpdateStatus) -> ColoredString {
    let label = status.label();
    match status {
        UpdateStatus::Idle => label.normal(),
        UpdateStatus::Checking | UpdateStatus::Downloading | UpdateStatus::Installing => {
            label.cyan()
        }
        UpdateStatus::Success => label.green(),
        UpdateStatus::Error => label.red(),
    }
}

fn print_status(report: &StatusReport) {
    println!("{}Status:    {}", "   ".dimmed(), status_color(report.status));
    println!("{}Message:   {}", "   ".dimmed(), report.message);
    println!("{}Running:   {}", "   ".dimmed(), report.current_version);
    let latest = if report.latest_version.is_empty() {
        "-".dimmed().to_string()
    } else {
        report.latest_version.clone()
    };
    println!("{}Latest:    {}", "   ".dimmed(), latest);
    if report.update_available {
        println!("{} Update available, run `ota install` to apply it", "⬆".yellow());
    }
    if report.status.is_busy() {
        println!("{}Progress:  {}%", "   ".dimmed(), report.progress);
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", "❌".red(), message);
    std::process::exit(1);
}

/// How a watched install ended.
#[derive(Debug, PartialEq, Eq)]
enum WatchEnd {
    Rebooting,
    Failed(String),
    /// Device went quiet after the image was being written
    Unreachable,
}

/// Decide from one poll whether watching is over. `seen_busy` records
/// whether the device has been seen downloading or installing.
fn watch_verdict(poll: &Result<StatusReport, String>, seen_busy: bool) -> Option<WatchEnd> {
    match poll {
        Ok(report) => match report.status {
            UpdateStatus::Success => Some(WatchEnd::Rebooting),
            UpdateStatus::Error => Some(WatchEnd::Failed(report.message.clone())),
            _ => None,
        },
        // A restart drops the connection; before the install started that is a real error
        Err(_) if seen_busy => Some(WatchEnd::Unreachable),
        Err(e) => Some(WatchEnd::Failed(e.clone())),
    }
}

fn watch_install(device: &Device, timeout: Duration) {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let started = Instant::now();
    let mut seen_busy = false;
    loop {
        let poll = device.status();
        if let Ok(report) = &poll {
            seen_busy |= report.status.is_busy();
            pb.set_position(report.progress as u64);
            pb.set_message(report.message.clone());
        }

        if let Some(end) = watch_verdict(&poll, seen_busy) {
            pb.finish_and_clear();
            match end {
                WatchEnd::Rebooting => {
                    println!("{} Update successful! Device is rebooting.", "✅".green())
                }
                WatchEnd::Unreachable => println!(
                    "{} Device stopped answering, most likely restarting into the new image",
                    "✅".green()
                ),
                WatchEnd::Failed(message) => fail(format!("Update failed: {}", message)),
            }
            return;
        }

        if started.elapsed() > timeout {
            pb.finish_and_clear();
            fail("Timed out waiting for the update to finish");
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn wait_for_check(device: &Device, timeout: Duration) {
    let started = Instant::now();
    // The device picks the trigger up on its next tick
    std::thread::sleep(POLL_INTERVAL);
    loop {
        match device.status() {
            Ok(report) if !report.status.is_busy() => {
                print_status(&report);
                return;
            }
            Ok(_) => {}
            Err(e) => fail(format!("Lost contact with device: {}", e)),
        }
        if started.elapsed() > timeout {
            fail("Timed out waiting for the check to finish");
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status { ip } => {
            let device = Device::new(&ip, cli.port).unwrap_or_else(|e| fail(e));
            println!("{} {}", "📡".blue(), device.base);
            match device.status() {
                Ok(report) => print_status(&report),
                Err(e) => fail(format!("Device not reachable: {}", e)),
            }
        }
        Commands::Check { ip, wait } => {
            let device = Device::new(&ip, cli.port).unwrap_or_else(|e| fail(e));
            if let Err(e) = device.post("/api/ota/check") {
                fail(format!("Check refused: {}", e));
            }
            println!("{} Update check requested", "🔍".blue());
            if wait {
                wait_for_check(&device, Duration::from_secs(60));
            }
        }
        Commands::Install { ip, watch, timeout } => {
            let device = Device::new(&ip, cli.port).unwrap_or_else(|e| fail(e));
            match device.status() {
                Ok(report) if !report.update_available => {
                    fail("No update available; run `ota check` first")
                }
                Ok(report) => println!(
                    "{} Installing {} over {}",
                    "🚀".blue(),
                    report.latest_version,
                    report.current_version
                ),
                Err(e) => fail(format!("Device not reachable: {}", e)),
            }
            if let Err(e) = device.post("/api/ota/install") {
                fail(format!("Install refused: {}", e));
            }
            if watch {
                watch_install(&device, Duration::from_secs(timeout));
            } else {
                println!("{} Install started; `ota status {}` to follow it", "✨".green(), ip);
            }
        }
        Commands::Upload { ip, file, password } => {
            let image = read_image(&file).unwrap_or_else(|e| fail(e));
            let device = Device::new(&ip, cli.port).unwrap_or_else(|e| fail(e));
            match upload_firmware(&device, image, &password) {
                Ok(()) => println!("   {} Upload successful! Device will restart.", "✅".green()),
                Err(e) => fail(format!("Upload failed: {}", e)),
            }
        }
    }
}
