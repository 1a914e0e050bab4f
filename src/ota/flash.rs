// Update slot writer on top of the ESP-IDF OTA API

use core::ffi::c_void;
use esp_idf_sys::{
    esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_next_update_partition,
    esp_ota_get_running_partition, esp_ota_handle_t, esp_ota_set_boot_partition, esp_ota_write,
    esp_partition_t, EspError, ESP_ERR_INVALID_SIZE, ESP_ERR_OTA_VALIDATE_FAILED, ESP_OK,
};
use ota_core::{FirmwareStorage, StorageError, WriteRegion};

/// The inactive app slot from the partition table.
pub struct EspFlashStorage;

impl EspFlashStorage {
    pub fn new() -> Self {
        Self
    }

    /// Label of the partition the current image booted from.
    pub fn running_partition_label(&self) -> Option<String> {
        let partition = unsafe { esp_ota_get_running_partition() };
        if partition.is_null() {
            return None;
        }
        Some(partition_label(unsafe { &*partition }))
    }
}

impl Default for EspFlashStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn partition_label(partition: &esp_partition_t) -> String {
    let bytes: Vec<u8> = partition
        .label
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn describe(code: i32) -> String {
    match EspError::from(code) {
        Some(err) => err.to_string(),
        None => format!("esp_err_t {}", code),
    }
}

impl FirmwareStorage for EspFlashStorage {
    type Region = EspOtaRegion;

    fn open_region(&mut self, size: u64) -> Result<EspOtaRegion, StorageError> {
        let partition = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            return Err(StorageError::Unavailable("no OTA partition in table".to_string()));
        }

        let available = unsafe { (*partition).size } as u64;
        if size > available {
            log::error!("Image {} bytes, slot only {} bytes", size, available);
            return Err(StorageError::NoSpace { requested: size, available });
        }

        log::info!(
            "Writing to partition {} at 0x{:x}",
            partition_label(unsafe { &*partition }),
            unsafe { (*partition).address }
        );

        let mut handle: esp_ota_handle_t = 0;
        let result = unsafe { esp_ota_begin(partition, size as _, &mut handle as *mut _) };

        if result == ESP_ERR_INVALID_SIZE as i32 {
            return Err(StorageError::NoSpace { requested: size, available });
        } else if result != ESP_OK as i32 {
            return Err(StorageError::Unavailable(describe(result)));
        }

        Ok(EspOtaRegion {
            partition,
            handle: Some(handle),
        })
    }
}

/// An open `esp_ota_begin` session. Dropping it without `commit` aborts.
pub struct EspOtaRegion {
    partition: *const esp_partition_t,
    handle: Option<esp_ota_handle_t>,
}

impl WriteRegion for EspOtaRegion {
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let handle = self
            .handle
            .ok_or_else(|| StorageError::Write("region closed".to_string()))?;

        let result = unsafe { esp_ota_write(handle, data.as_ptr() as *const c_void, data.len() as _) };
        if result != ESP_OK as i32 {
            return Err(StorageError::Write(describe(result)));
        }
        Ok(())
    }

    fn commit(mut self) -> Result<(), StorageError> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| StorageError::Commit("region closed".to_string()))?;

        // esp_ota_end releases the handle whatever it returns
        let result = unsafe { esp_ota_end(handle) };
        if result == ESP_ERR_OTA_VALIDATE_FAILED as i32 {
            return Err(StorageError::Commit("image validation failed".to_string()));
        } else if result != ESP_OK as i32 {
            return Err(StorageError::Commit(describe(result)));
        }

        let result = unsafe { esp_ota_set_boot_partition(self.partition) };
        if result != ESP_OK as i32 {
            return Err(StorageError::Commit(format!("set boot partition: {}", describe(result))));
        }

        log::info!("Boot partition switched");
        Ok(())
    }

    fn abort(mut self) {
        self.release();
    }
}

impl EspOtaRegion {
    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            let result = unsafe { esp_ota_abort(handle) };
            if result != ESP_OK as i32 {
                log::warn!("esp_ota_abort: {}", describe(result));
            }
        }
    }
}

impl Drop for EspOtaRegion {
    fn drop(&mut self) {
        self.release();
    }
}
