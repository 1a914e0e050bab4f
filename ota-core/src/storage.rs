//! Flash seam: where a downloaded image goes.
//!
//! A region is opened for an exact size, written front to back and then
//! either committed (it becomes the next boot image) or aborted. Both
//! consume the region, so a committed region cannot be written again.
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The update slot is smaller than the image
    NoSpace { requested: u64, available: u64 },
    /// No update slot at all, or the flash driver refused to start
    Unavailable(String),
    Write(String),
    /// Image validation or boot-slot switch failed
    Commit(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NoSpace { requested, available } => write!(
                f,
                "image of {} bytes does not fit in {} bytes",
                requested, available
            ),
            StorageError::Unavailable(detail) => write!(f, "update slot unavailable: {}", detail),
            StorageError::Write(detail) => write!(f, "flash write failed: {}", detail),
            StorageError::Commit(detail) => write!(f, "commit failed: {}", detail),
        }
    }
}

impl std::error::Error for StorageError {}

pub trait WriteRegion {
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError>;

    /// Finalise the image and make it the next boot target.
    fn commit(self) -> Result<(), StorageError>;

    /// Throw the partial image away. The running image stays bootable.
    fn abort(self);
}

pub trait FirmwareStorage {
    type Region: WriteRegion;

    fn open_region(&mut self, size: u64) -> Result<Self::Region, StorageError>;
}

impl<S: FirmwareStorage + ?Sized> FirmwareStorage for &mut S {
    type Region = S::Region;

    fn open_region(&mut self, size: u64) -> Result<Self::Region, StorageError> {
        (**self).open_region(size)
    }
}
