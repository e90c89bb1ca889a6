//! On-flash layout of the sample log.
//!
//! The partition is a circular sequence of pages, one flash sector each. A
//! page starts with an 8-byte header (magic + sequence number) followed by
//! 4-byte-aligned records. A record is one length byte holding
//! `payload_len - 1` and up to 255 payload bytes, padded to the next word
//! boundary. Erased flash reads as all-ones, so a length byte of `0xFF` is
//! the first unwritten slot and a sequence of `0xFFFFFFFF` marks a page that
//! was never allocated.

pub(crate) const FLASH_SECTOR_SIZE: usize = 4096;
pub(crate) const WORD_SIZE: usize = 4;

pub(crate) const PAGE_MAGIC: u32 = 0xf1a5_600d;
pub(crate) const PAGE_HEADER_SIZE: usize = 8;
/// Bytes available for records in one page.
pub(crate) const PAGE_DATA_SIZE: usize = FLASH_SECTOR_SIZE - PAGE_HEADER_SIZE;

/// Sequence value of a page that has never been written.
pub(crate) const UNWRITTEN_SEQUENCE: u32 = u32::MAX;
/// Length byte of a record slot that has never been written.
pub(crate) const UNWRITTEN_LENGTH: u8 = 0xFF;

pub(crate) const MAX_RECORD_LEN: usize = 255;
/// Largest footprint of one record: length byte + 255 payload bytes, padded.
pub(crate) const MAX_RECORD_SIZE: usize = record_size(MAX_RECORD_LEN);

const _: () = assert!(FLASH_SECTOR_SIZE % WORD_SIZE == 0);
const _: () = assert!(PAGE_HEADER_SIZE % WORD_SIZE == 0);

/// Flash footprint of a record with `payload_len` bytes of payload.
pub(crate) const fn record_size(payload_len: usize) -> usize {
    (1 + payload_len + (WORD_SIZE - 1)) & !(WORD_SIZE - 1)
}

#[derive(Copy, Clone, PartialEq)]
#[cfg_attr(any(test, feature = "debug-logs"), derive(Debug))]
pub(crate) struct PageHeader {
    pub(crate) magic: u32,
    pub(crate) sequence: u32,
}

impl PageHeader {
    pub(crate) fn new(sequence: u32) -> Self {
        Self {
            magic: PAGE_MAGIC,
            sequence,
        }
    }

    /// A page takes part in the log iff the magic matches and it was ever
    /// assigned a sequence number.
    pub(crate) fn is_valid(&self) -> bool {
        self.magic == PAGE_MAGIC && self.sequence != UNWRITTEN_SEQUENCE
    }

    pub(crate) fn to_bytes(self) -> [u8; PAGE_HEADER_SIZE] {
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        buf[..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..].copy_from_slice(&self.sequence.to_le_bytes());
        buf
    }

    pub(crate) fn from_bytes(buf: &[u8; PAGE_HEADER_SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes(buf[..4].try_into().unwrap()),
            sequence: u32::from_le_bytes(buf[4..].try_into().unwrap()),
        }
    }
}
