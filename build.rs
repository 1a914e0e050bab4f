use std::fs;
use std::path::Path;

/// `#define NAME "value"` lookup in a C header
fn header_define(contents: &str, name: &str) -> Option<String> {
    contents
        .lines()
        .find(|l| l.trim_start().starts_with("#define") && l.split_whitespace().nth(1) == Some(name))
        .and_then(|l| l.split('"').nth(1))
        .map(str::to_string)
}

/// Export each `(define, env var)` pair as a compile-time env var, empty when missing
fn export_header(path: &str, names: &[(&str, &str)], hint: &str) -> anyhow::Result<()> {
    println!("cargo:rerun-if-changed={}", path);

    let contents = if Path::new(path).exists() {
        fs::read_to_string(path)?
    } else {
        println!("cargo:warning={} not found! {}", path, hint);
        String::new()
    };

    for (define, var) in names {
        let value = header_define(&contents, define).unwrap_or_default();
        println!("cargo:rustc-env={}={}", var, value);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();

    // Add crash log helper for better panic diagnostics
    println!("cargo:rustc-link-arg=-Wl,--undefined=esp_backtrace_print_app_description");

    export_header(
        "wifi_config.h",
        &[("WIFI_SSID", "WIFI_SSID"), ("WIFI_PASSWORD", "WIFI_PASSWORD")],
        "Copy wifi_config.h.example to wifi_config.h and add your credentials.",
    )?;

    // Release endpoint, token for private repositories, push upload password
    export_header(
        "ota_config.h",
        &[
            ("OTA_UPDATE_URL", "OTA_UPDATE_URL"),
            ("GITHUB_TOKEN", "OTA_GITHUB_TOKEN"),
            ("OTA_PASSWORD", "OTA_UPLOAD_PASSWORD"),
        ],
        "Copy ota_config.h.example to ota_config.h to point the updater at your releases.",
    )?;

    Ok(())
}
