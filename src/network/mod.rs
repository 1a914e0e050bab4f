pub mod error_handler;
pub mod http_config;
pub mod web_server;
pub mod wifi;

use anyhow::Result;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    mdns::EspMdns,
    nvs::EspDefaultNvsPartition,
};
use std::time::{Duration, Instant};

use self::wifi::WifiManager;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

pub struct NetworkManager {
    wifi: WifiManager,
    hostname: String,
    last_attempt: Option<Instant>,
    _mdns: Option<EspMdns>,
}

impl NetworkManager {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        ssid: String,
        password: String,
        hostname: String,
    ) -> Result<Self> {
        let wifi = WifiManager::new(modem, sys_loop, nvs, ssid, password)?;

        Ok(Self {
            wifi,
            hostname,
            last_attempt: None,
            _mdns: None,
        })
    }

    pub fn connect(&mut self) -> Result<()> {
        self.last_attempt = Some(Instant::now());
        self.wifi.connect()?;
        log::info!("WiFi connected, IP: {:?}", self.wifi.get_ip());

        if self._mdns.is_none() {
            match self.start_mdns() {
                Ok(_) => log::info!("mDNS service started: {}.local", self.hostname),
                Err(e) => log::warn!("Failed to start mDNS: {:?}", e),
            }
        }

        Ok(())
    }

    fn start_mdns(&mut self) -> Result<()> {
        let mut mdns = EspMdns::take()?;
        mdns.set_hostname(&self.hostname)?;

        let txt = [
            ("path", "/api/ota/status"),
            ("firmware", crate::version::FIRMWARE_NAME),
            ("version", crate::version::FIRMWARE_VERSION),
        ];
        mdns.add_service(None, "_http", "_tcp", 80, &txt)?;
        // Lets the host CLI find updaters without knowing their address
        mdns.add_service(Some(crate::version::FIRMWARE_NAME), "_esp32-ota", "_tcp", 80, &txt)?;

        self._mdns = Some(mdns);
        Ok(())
    }

    /// Connectivity for this tick, reconnecting at most every few seconds
    pub fn maintain(&mut self, now: Instant) -> bool {
        if self.wifi.is_connected() {
            return true;
        }

        let due = self
            .last_attempt
            .map_or(true, |last| now.saturating_duration_since(last) >= RECONNECT_INTERVAL);
        if due {
            log::warn!("WiFi disconnected, reconnecting to {}", self.wifi.ssid);
            if let Err(e) = self.connect() {
                log::warn!("Reconnect failed: {:?}", e);
            }
        }
        self.wifi.is_connected()
    }

    pub fn get_ip(&self) -> Option<String> {
        self.wifi.get_ip()
    }
}
