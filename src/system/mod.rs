pub mod reset;

use ota_core::SystemControl;
use std::time::Duration;

/// Below this the TLS handshake for a download starts to fail.
pub const LOW_HEAP_WARNING: u32 = 50 * 1024;

pub fn free_heap() -> u32 {
    unsafe { esp_idf_sys::esp_get_free_heap_size() }
}

pub fn min_free_heap() -> u32 {
    unsafe { esp_idf_sys::esp_get_minimum_free_heap_size() }
}

pub fn uptime_ms() -> u64 {
    (unsafe { esp_idf_sys::esp_timer_get_time() } / 1000) as u64
}

/// Log free heap, warning when it gets low
pub fn log_heap(context: &str) {
    let free = free_heap();
    if free < LOW_HEAP_WARNING {
        log::warn!("{}: low free heap {} bytes (min {})", context, free, min_free_heap());
    } else {
        log::info!("{}: free heap {} bytes", context, free);
    }
}

/// Restart and heap hooks for the update worker
pub struct EspSystem;

impl EspSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EspSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemControl for EspSystem {
    fn restart(&mut self, grace: Duration) {
        reset::restart_after(grace)
    }
}
