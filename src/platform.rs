use embedded_storage::nor_flash::NorFlash;

/// Raw flash access used by the log engine. Any `NorFlash` with 4-byte write
/// granularity and sector-sized erases will do; see `tests/common.rs` for an
/// in-memory implementation used on the host.
pub trait Platform: NorFlash {}

impl<T: NorFlash> Platform for T {}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use embedded_storage::nor_flash::{ErrorType, NorFlash};
    use esp_storage::{FlashStorage, FlashStorageError};

    pub struct EspFlash<'d> {
        inner: FlashStorage<'d>,
    }

    impl<'d> EspFlash<'d> {
        pub fn new(inner: FlashStorage<'d>) -> Self {
            Self { inner }
        }
    }

    impl ErrorType for EspFlash<'_> {
        type Error = FlashStorageError;
    }

    impl NorFlash for EspFlash<'_> {
        const WRITE_SIZE: usize = FlashStorage::WRITE_SIZE;
        const ERASE_SIZE: usize = FlashStorage::ERASE_SIZE;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            self.inner.erase(from, to)
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            self.inner.write(offset, bytes)
        }
    }

    impl embedded_storage::nor_flash::ReadNorFlash for EspFlash<'_> {
        const READ_SIZE: usize = FlashStorage::READ_SIZE;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            self.inner.read(offset, bytes)
        }

        fn capacity(&self) -> usize {
            self.inner.capacity()
        }
    }
}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
pub use chip::*;
