use anyhow::Result;
use esp_idf_hal::prelude::*;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
};
use esp_idf_sys as _; // Binstart
use ota_core::Activity;
use std::time::{Duration, Instant};

use log::info;

// Generate ESP-IDF app descriptor
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod config;
mod logging;
mod network;
mod ota;
mod system;
mod version;

use crate::network::NetworkManager;
use crate::network::web_server::OtaApiServer;

const TICK_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();

    logging::init_logger().map_err(|e| anyhow::anyhow!("logger init: {}", e))?;

    info!("{} starting", version::version_info());
    info!("Boot reason: {}", system::reset::get_reset_reason());
    if system::reset::was_software_reset() {
        info!("Software reset: running image from the last update or a manual restart");
    }
    system::log_heap("Boot");

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let config = config::load_or_default(&nvs)?;
    if !logging::set_max_level_from_str(&config.log_level) {
        log::warn!("Unknown log level '{}', keeping info", config.log_level);
    }

    let ota_config = config.ota_config();
    if let Err(e) = ota_config.validate() {
        log::error!("OTA configuration rejected: {}", e);
    }

    if let Some(label) = ota::EspFlashStorage::new().running_partition_label() {
        info!("Running from partition {}", label);
    }

    let mut network = NetworkManager::new(
        peripherals.modem,
        sys_loop,
        nvs,
        config.wifi_ssid.clone(),
        config.wifi_password.clone(),
        config.hostname.clone(),
    )?;
    match network.connect() {
        Ok(()) => info!(
            "API at http://{}/api/ota/status",
            network.get_ip().unwrap_or_else(|| config.hostname.clone())
        ),
        // The main loop keeps retrying; the device still boots
        Err(e) => log::warn!("Initial WiFi connection failed: {:?}", e),
    }

    let mut agent = ota::create_agent(&ota_config, Instant::now());
    let _server = match OtaApiServer::new(agent.handle()) {
        Ok(server) => Some(server),
        Err(e) => {
            log::error!("Failed to start OTA API server: {:?}", e);
            None
        }
    };

    if !ota_config.auto_check {
        log::warn!("Automatic update checks disabled in config; manual triggers only");
    }
    info!(
        "Update checks every {} s against {}",
        ota_config.check_interval().as_secs(),
        ota_config.endpoint
    );

    loop {
        let now = Instant::now();
        let connected = network.maintain(now);

        let activity = agent.tick(now, connected);

        match &activity {
            Activity::Nothing => {}
            Activity::Checked(Ok(outcome)) => {
                info!("Update check finished: latest {}", outcome.version());
                system::log_heap("After update check");
            }
            Activity::Checked(Err(e)) => {
                log::warn!("Update check failed: {}", e);
                system::log_heap("After update check");
            }
            Activity::Installed(Ok(_)) => {
                // restart() does not return on hardware
                info!("Update installed");
            }
            Activity::Installed(Err(e)) => {
                log::error!("Update failed: {}", e);
                system::log_heap("After failed update");
            }
            Activity::Uploaded(Ok(committed)) => {
                info!("Pushed firmware installed ({} bytes)", committed.bytes);
            }
            Activity::Uploaded(Err(e)) => {
                log::error!("Firmware upload failed: {}", e);
                system::log_heap("After failed upload");
            }
        }

        std::thread::sleep(TICK_INTERVAL);
    }
}
