// Centralized version information

// Name reported in logs and the system endpoint
pub const FIRMWARE_NAME: &str = "ESP32-GarageDoor";

// Cargo package version; release tags are compared against this
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

// Version info string for logging
pub fn version_info() -> String {
    format!("{} v{}", FIRMWARE_NAME, FIRMWARE_VERSION)
}
