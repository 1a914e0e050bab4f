use anyhow::Result;
use serde::{Deserialize, Serialize};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
use ota_core::OtaConfig;

use crate::version::FIRMWARE_VERSION;

const CONFIG_NAMESPACE: &str = "ota-updater";
const CONFIG_KEY: &str = "config";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    // mDNS hostname, reachable as <hostname>.local
    pub hostname: String,

    // off, error, warn, info, debug, trace
    pub log_level: String,

    // Update settings
    pub ota: OtaConfig,
}

impl Default for Config {
    fn default() -> Self {
        // Credentials come from wifi_config.h / ota_config.h via build.rs;
        // neither file is committed
        let wifi_ssid = env!("WIFI_SSID");
        let wifi_password = env!("WIFI_PASSWORD");

        log::info!("Config default: SSID='{}', Password={}",
            wifi_ssid,
            if wifi_password.is_empty() { "<empty>" } else { "<set>" }
        );

        let mut ota = OtaConfig::default();
        let update_url = env!("OTA_UPDATE_URL");
        if !update_url.is_empty() {
            ota.endpoint = update_url.to_string();
        }
        ota.auth_token = env!("OTA_GITHUB_TOKEN").to_string();
        ota.upload_password = env!("OTA_UPLOAD_PASSWORD").to_string();

        Self {
            wifi_ssid: wifi_ssid.to_string(),
            wifi_password: wifi_password.to_string(),
            hostname: "esp32-garage".to_string(),
            log_level: "info".to_string(),
            ota,
        }
    }
}

impl Config {
    pub fn save(&self, nvs_partition: &EspDefaultNvsPartition) -> Result<()> {
        save_to_nvs(nvs_partition, self)?;
        log::info!("Configuration saved to NVS");
        Ok(())
    }

    /// Update settings for this boot. The running image always reports its
    /// own build version, whatever an older NVS blob says.
    pub fn ota_config(&self) -> OtaConfig {
        OtaConfig {
            current_version: FIRMWARE_VERSION.to_string(),
            ..self.ota.clone()
        }
    }
}

pub fn load_or_default(nvs_partition: &EspDefaultNvsPartition) -> Result<Config> {
    match load_from_nvs(nvs_partition) {
        Ok(mut config) => {
            log::info!("Loaded configuration from NVS");

            // If NVS has empty WiFi credentials, use the compiled-in ones
            if config.wifi_ssid.is_empty() || config.wifi_password.is_empty() {
                let default_config = Config::default();
                log::warn!("NVS WiFi credentials empty, using compiled defaults: SSID='{}'", default_config.wifi_ssid);
                config.wifi_ssid = default_config.wifi_ssid;
                config.wifi_password = default_config.wifi_password;

                if let Err(e) = config.save(nvs_partition) {
                    log::warn!("Failed to save updated config with WiFi credentials: {:?}", e);
                }
            }

            if let Err(e) = config.ota.validate() {
                log::warn!("Stored OTA settings invalid ({}), using defaults", e);
                config.ota = Config::default().ota;
            }

            Ok(config)
        }
        Err(e) => {
            log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
            let config = Config::default();

            // Try to save default config to NVS for next time
            if let Err(save_err) = config.save(nvs_partition) {
                log::warn!("Failed to save default config to NVS: {:?}", save_err);
            }

            Ok(config)
        }
    }
}

fn load_from_nvs(nvs_partition: &EspDefaultNvsPartition) -> Result<Config> {
    let nvs = EspNvs::new(nvs_partition.clone(), CONFIG_NAMESPACE, true)?;

    let mut buf = vec![0u8; 2048]; // Max config size
    let data = nvs.get_blob(CONFIG_KEY, &mut buf)?
        .ok_or_else(|| anyhow::anyhow!("Config not found in NVS"))?;

    let config: Config = serde_json::from_slice(data)?;

    Ok(config)
}

fn save_to_nvs(nvs_partition: &EspDefaultNvsPartition, config: &Config) -> Result<()> {
    let mut nvs = EspNvs::new(nvs_partition.clone(), CONFIG_NAMESPACE, false)?;

    let json = serde_json::to_vec(config)?;
    nvs.set_blob(CONFIG_KEY, &json)?;

    Ok(())
}
