// OTA (Over-The-Air) update module
//
// The update flow itself lives in ota-core. This module supplies the
// device side of its seams:
// 1. EspHttpTransport - HTTPS GETs with the ESP x509 certificate bundle
// 2. EspFlashStorage  - the inactive app slot via esp_ota_*
// 3. EspSystem        - restart and heap readings (crate::system)

pub mod flash;
pub mod transport;

pub use flash::EspFlashStorage;
pub use transport::EspHttpTransport;

use crate::system::EspSystem;

pub type DeviceAgent = ota_core::OtaAgent<EspHttpTransport, EspFlashStorage, EspSystem>;

/// Build the update worker for this boot.
pub fn create_agent(config: &ota_core::OtaConfig, now: std::time::Instant) -> DeviceAgent {
    let transport = EspHttpTransport::new(config.chunk_size.max(1024));
    ota_core::OtaAgent::new(config, transport, EspFlashStorage::new(), EspSystem::new(), now)
}
