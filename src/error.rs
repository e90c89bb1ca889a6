use thiserror::Error;

/// Errors that can occur during log and codec operations. The list is likely to stay as is but
/// marked as non-exhaustive to allow for future additions without breaking the API. None of these
/// are fatal: a caller can retry later, drop the sample, or re-drain after a commit.
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The partition offset has to be aligned to the size of a flash sector (4k)
    #[error("invalid partition offset")]
    InvalidPartitionOffset,

    /// The partition size has to be a multiple of the flash sector size (4k),
    /// and at least two sectors.
    #[error("invalid partition size")]
    InvalidPartitionSize,

    /// The internal error value is returned from the provided `&mut impl Platform`.
    /// Writes and erases are retried once before this is reported; the record or
    /// page allocation in flight is abandoned.
    #[error("internal flash error")]
    FlashError,

    /// Record payloads are limited to 1..=255 bytes.
    #[error("invalid record length")]
    InvalidRecordLength,

    /// No free page is available without overwriting unconsumed data. Resolved by
    /// draining with `load_buffer` and calling `commit_buffer`.
    #[error("log full")]
    LogFull,

    /// The encoder was asked for a sample before any stream type was selected
    /// via a time signature.
    #[error("stream type not set")]
    StreamTypeNotSet,

    /// The sample value does not fit the wire encoding (humidity 0..=100,
    /// temperature -128..=127, pressure 15 bits).
    #[error("sample value out of range")]
    SampleOutOfRange,
}
