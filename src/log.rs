use crate::error::Error;
use crate::platform::Platform;
use crate::raw::{
    FLASH_SECTOR_SIZE, MAX_RECORD_LEN, MAX_RECORD_SIZE, PAGE_DATA_SIZE, PAGE_HEADER_SIZE,
    PageHeader, UNWRITTEN_LENGTH, WORD_SIZE, record_size,
};
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// Outcome of one `load_buffer` call.
///
/// `end_of_data` means the read cursor stands at the write head with nothing
/// further to drain right now; more records may arrive later.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadResult {
    pub len: usize,
    pub end_of_data: bool,
}

/// Snapshot of the engine cursors, for diagnostics and tests. Cursors are
/// recomputed from the page headers on every boot, never persisted.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LogStats {
    pub first_page: u16,
    pub first_offset: usize,
    pub next_page: u16,
    pub next_offset: usize,
    pub current_page: u16,
    pub current_offset: usize,
    pub next_sequence: u32,
    pub full: bool,
}

/// A circular, wear-leveled append log of variable-length records over a
/// range of flash sectors.
///
/// Pages are allocated from the highest sector downward, wrapping back to
/// the top, each new page taking the next sequence number. Three cursors
/// drive the log: `current` is the write head, `next` the read cursor
/// advanced by [`load_buffer`](Self::load_buffer), and `first` the commit
/// floor behind which pages may be reclaimed. They always satisfy
/// `first <= next <= current` in allocation order.
///
/// Recovery runs lazily on the first operation and rebuilds all cursors from
/// the chain of strictly consecutive page sequence numbers.
pub struct SampleLog<T: Platform> {
    hal: T,
    base_address: u32,
    sectors: u16,
    initialized: bool,
    full: bool,

    first_page: u16,
    first_offset: usize,
    next_page: u16,
    next_offset: usize,
    current_page: u16,
    current_offset: usize,
    next_sequence: u32,
}

impl<T: Platform> SampleLog<T> {
    /// Binds the log to a flash partition. The partition must be
    /// sector-aligned and span at least two sectors; nothing is read or
    /// written until the first operation triggers recovery.
    pub fn new(partition_offset: usize, partition_size: usize, hal: T) -> Result<Self, Error> {
        if !partition_offset.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(Error::InvalidPartitionOffset);
        }
        if !partition_size.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(Error::InvalidPartitionSize);
        }
        let sectors = partition_size / FLASH_SECTOR_SIZE;
        if sectors < 2 || sectors > u16::MAX as usize {
            return Err(Error::InvalidPartitionSize);
        }

        let top = (sectors - 1) as u16;
        Ok(Self {
            hal,
            base_address: partition_offset as u32,
            sectors: sectors as u16,
            initialized: false,
            full: false,
            first_page: top,
            first_offset: 0,
            next_page: top,
            next_offset: 0,
            current_page: top,
            current_offset: 0,
            next_sequence: 0,
        })
    }

    /// Appends one record of 1..=255 payload bytes.
    ///
    /// Allocates (and erases) a fresh page when the head page lacks room.
    /// Returns [`Error::LogFull`] once the next allocation would collide with
    /// the commit floor; space comes back via [`commit_buffer`](Self::commit_buffer).
    pub fn write_record(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() || data.len() > MAX_RECORD_LEN {
            return Err(Error::InvalidRecordLength);
        }
        self.ensure_init()?;

        #[cfg(feature = "defmt")]
        trace!("write_record: {} bytes", data.len());

        if self.full {
            return Err(Error::LogFull);
        }

        let sz = record_size(data.len());
        if self.current_offset + sz > PAGE_DATA_SIZE {
            let page = self.page_after(self.current_page);
            if page == self.first_page {
                self.full = true;
                return Err(Error::LogFull);
            }
            self.erase_page(page)?;
            let header = PageHeader::new(self.next_sequence);
            self.write_flash(self.page_address(page), &header.to_bytes())?;

            #[cfg(feature = "debug-logs")]
            println!(
                "  log: allocated page {page} sequence {}",
                self.next_sequence
            );

            self.next_sequence = self.next_sequence.wrapping_add(1);
            self.current_page = page;
            self.current_offset = 0;
        }

        let mut buf = [0xFFu8; MAX_RECORD_SIZE];
        buf[0] = (data.len() - 1) as u8;
        buf[1..1 + data.len()].copy_from_slice(data);

        let address = self.data_address(self.current_page, self.current_offset);
        self.write_flash(address, &buf[..sz])?;
        self.current_offset += sz;
        Ok(())
    }

    /// Copies whole records from the read cursor into `buf`, never splitting
    /// a record: one that would overflow the buffer is left for the next
    /// call. The cursor only moves forward; use
    /// [`uncommit_buffer`](Self::uncommit_buffer) to roll it back to the
    /// last commit.
    pub fn load_buffer(&mut self, buf: &mut [u8]) -> Result<LoadResult, Error> {
        self.ensure_init()?;
        let mut copied = 0;
        loop {
            // records within the page at the read cursor
            loop {
                if self.next_offset + WORD_SIZE > PAGE_DATA_SIZE {
                    break;
                }
                let len_byte = self.read_length_byte(self.next_page, self.next_offset)?;
                if len_byte == UNWRITTEN_LENGTH {
                    break;
                }
                let payload_len = len_byte as usize + 1;
                let footprint = record_size(payload_len);
                if self.next_offset + footprint > PAGE_DATA_SIZE {
                    // corrupt length byte, treat the rest of the page as lost
                    break;
                }
                if copied + payload_len > buf.len() {
                    return Ok(LoadResult {
                        len: copied,
                        end_of_data: false,
                    });
                }
                let mut record = [0u8; MAX_RECORD_SIZE];
                self.hal
                    .read(
                        self.data_address(self.next_page, self.next_offset),
                        &mut record[..footprint],
                    )
                    .map_err(|_| Error::FlashError)?;
                buf[copied..copied + payload_len].copy_from_slice(&record[1..1 + payload_len]);
                copied += payload_len;
                self.next_offset += footprint;
            }
            if self.next_page == self.current_page {
                return Ok(LoadResult {
                    len: copied,
                    end_of_data: true,
                });
            }
            self.next_offset = 0;
            self.next_page = self.page_after(self.next_page);
        }
    }

    /// Acknowledges everything drained so far: the commit floor advances to
    /// the read cursor and fully consumed pages in between are reclaimed.
    /// This is the only operation that frees space for future appends.
    pub fn commit_buffer(&mut self) -> Result<(), Error> {
        self.ensure_init()?;
        if self.first_page != self.next_page {
            // reclaim pages strictly between the old floor and the new one,
            // never the boundary page and never the write head
            let mut page = self.page_after(self.first_page);
            while page != self.next_page && page != self.current_page {
                self.erase_page(page)?;
                page = self.page_after(page);
            }
            self.full = false;
        }
        self.first_page = self.next_page;
        self.first_offset = self.next_offset;
        Ok(())
    }

    /// Discards uncommitted drain progress; the next
    /// [`load_buffer`](Self::load_buffer) redelivers from the last commit.
    pub fn uncommit_buffer(&mut self) {
        self.next_page = self.first_page;
        self.next_offset = self.first_offset;
    }

    /// Wipes the whole partition and forgets all cursors. The next operation
    /// recovers into an empty log.
    pub fn erase_all(&mut self) -> Result<(), Error> {
        for page in 0..self.sectors {
            self.erase_page(page)?;
        }
        let top = self.sectors - 1;
        self.first_page = top;
        self.first_offset = 0;
        self.next_page = top;
        self.next_offset = 0;
        self.current_page = top;
        self.current_offset = 0;
        self.full = false;
        self.initialized = false;
        Ok(())
    }

    /// Restores the commit-floor offset saved by a previous run (the caller
    /// keeps it in RTC memory across deep sleep). Call before the first
    /// operation; recovery applies it to the oldest page in the chain.
    pub fn set_remembered_offset(&mut self, offset: usize) {
        self.first_offset = offset.min(PAGE_DATA_SIZE) & !(WORD_SIZE - 1);
    }

    /// The commit-floor offset to carry into the next deep-sleep cycle.
    pub fn remembered_offset(&self) -> usize {
        self.first_offset
    }

    /// Cursor snapshot, running recovery first if needed.
    pub fn stats(&mut self) -> Result<LogStats, Error> {
        self.ensure_init()?;
        Ok(LogStats {
            first_page: self.first_page,
            first_offset: self.first_offset,
            next_page: self.next_page,
            next_offset: self.next_offset,
            current_page: self.current_page,
            current_offset: self.current_offset,
            next_sequence: self.next_sequence,
            full: self.full,
        })
    }

    /// Read-only walk over the page/record structure for diagnostics.
    /// Output goes to `defmt` or, with `debug-logs`, to stdout.
    pub fn dump(&mut self) -> Result<(), Error> {
        self.ensure_init()?;
        let mut page = self.first_page;
        let mut offset = self.first_offset;
        loop {
            let header = self.read_header(page)?;
            if !header.is_valid() {
                break;
            }
            #[cfg(feature = "defmt")]
            trace!("page {}: sequence {}", page, header.sequence);
            #[cfg(feature = "debug-logs")]
            println!("page {page}: sequence {}", header.sequence);
            loop {
                if offset + WORD_SIZE > PAGE_DATA_SIZE {
                    break;
                }
                let len_byte = self.read_length_byte(page, offset)?;
                if len_byte == UNWRITTEN_LENGTH {
                    break;
                }
                let payload_len = len_byte as usize + 1;
                #[cfg(feature = "defmt")]
                trace!("  {}: len {}", offset, payload_len);
                #[cfg(feature = "debug-logs")]
                println!("  {offset}: len {payload_len}");
                offset += record_size(payload_len);
            }
            if page == self.current_page {
                break;
            }
            page = self.page_after(page);
            offset = 0;
        }
        Ok(())
    }
}

impl<T: Platform> SampleLog<T> {
    fn ensure_init(&mut self) -> Result<(), Error> {
        if self.initialized {
            return Ok(());
        }
        self.do_init()
    }

    /// Boot recovery: rebuild every cursor from the page headers.
    ///
    /// The chain of live pages carries strictly consecutive sequence numbers
    /// in allocation order. The head page is found first, then the chain is
    /// walked both ways; a gap in the numbers marks a page not reused since
    /// an earlier reset and ends the chain. A region with no valid page is
    /// initialized fresh with sequence 0 at the top sector.
    fn do_init(&mut self) -> Result<(), Error> {
        let top = self.sectors - 1;
        let mut current = top;
        let header = self.read_header(top)?;
        let mut head_sequence = header.sequence;

        #[cfg(feature = "defmt")]
        trace!("do_init: top header valid={}", header.is_valid());

        if header.is_valid() {
            // The chain has wrapped past the low end at least once: the
            // oldest surviving pages sit at the bottom of the region with
            // sequence numbers counting down as the sector index climbs.
            let mut tail_sequence = header.sequence;
            let mut first = top;
            let mut page = 0u16;
            while page < top {
                let cand = self.read_header(page)?;
                if !cand.is_valid() || cand.sequence != tail_sequence.wrapping_sub(1) {
                    break;
                }
                tail_sequence = cand.sequence;
                first = page;
                page += 1;
            }
            self.first_page = first;
        } else {
            // No wrap yet: the newest page is the highest valid sector.
            let mut found = None;
            let mut page = top;
            loop {
                let cand = self.read_header(page)?;
                if cand.is_valid() {
                    found = Some((page, cand.sequence));
                    break;
                }
                if page == 0 {
                    break;
                }
                page -= 1;
            }
            let Some((page, sequence)) = found else {
                return self.init_empty();
            };
            current = page;
            head_sequence = sequence;
            self.first_page = page;
        }

        // Extend the head through newer pages, wrapping at the low end.
        loop {
            let cand_page = self.page_after(current);
            if cand_page == self.first_page {
                break;
            }
            let cand = self.read_header(cand_page)?;
            if !cand.is_valid() || cand.sequence != head_sequence.wrapping_add(1) {
                break;
            }
            current = cand_page;
            head_sequence = cand.sequence;
        }
        self.current_page = current;
        self.next_sequence = head_sequence.wrapping_add(1);

        // First unwritten record slot in the head page becomes the write offset.
        self.current_offset = 0;
        while self.current_offset < PAGE_DATA_SIZE {
            let len_byte = self.read_length_byte(self.current_page, self.current_offset)?;
            if len_byte == UNWRITTEN_LENGTH {
                break;
            }
            self.current_offset += record_size(len_byte as usize + 1);
        }

        // `first_offset` survives recovery so a remembered offset restored
        // before the first operation lands on the oldest page.
        self.next_page = self.first_page;
        self.next_offset = self.first_offset;
        self.full = false;
        self.initialized = true;

        #[cfg(feature = "debug-logs")]
        println!(
            "  log: recovered first={}/{} current={}/{} next_sequence={}",
            self.first_page,
            self.first_offset,
            self.current_page,
            self.current_offset,
            self.next_sequence
        );
        Ok(())
    }

    fn init_empty(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("do_init: empty region");

        let top = self.sectors - 1;
        self.erase_page(top)?;
        self.write_flash(self.page_address(top), &PageHeader::new(0).to_bytes())?;
        self.next_sequence = 1;
        self.first_page = top;
        self.first_offset = 0;
        self.next_page = top;
        self.next_offset = 0;
        self.current_page = top;
        self.current_offset = 0;
        self.full = false;
        self.initialized = true;
        Ok(())
    }

    /// Next page in allocation order: one sector down, wrapping from the
    /// bottom of the region back to the top.
    fn page_after(&self, page: u16) -> u16 {
        if page == 0 { self.sectors - 1 } else { page - 1 }
    }

    fn page_address(&self, page: u16) -> u32 {
        self.base_address + page as u32 * FLASH_SECTOR_SIZE as u32
    }

    fn data_address(&self, page: u16, offset: usize) -> u32 {
        self.page_address(page) + (PAGE_HEADER_SIZE + offset) as u32
    }

    fn read_header(&mut self, page: u16) -> Result<PageHeader, Error> {
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        self.hal
            .read(self.page_address(page), &mut buf)
            .map_err(|_| Error::FlashError)?;
        Ok(PageHeader::from_bytes(&buf))
    }

    fn read_length_byte(&mut self, page: u16, offset: usize) -> Result<u8, Error> {
        let mut buf = [0u8; WORD_SIZE];
        self.hal
            .read(self.data_address(page, offset), &mut buf)
            .map_err(|_| Error::FlashError)?;
        Ok(buf[0])
    }

    /// Writes run with interrupts masked: handlers may execute code fetched
    /// from the same flash device. One retry, then the failure is reported.
    fn write_flash(&mut self, address: u32, bytes: &[u8]) -> Result<(), Error> {
        if critical_section::with(|_| self.hal.write(address, bytes)).is_ok() {
            return Ok(());
        }
        #[cfg(feature = "defmt")]
        warn!("flash write retry @{:#08x}", address);
        critical_section::with(|_| self.hal.write(address, bytes)).map_err(|_| Error::FlashError)
    }

    /// Erases one sector, skipping the physical erase if it already reads as
    /// all-ones. Like writes: critical section, one retry.
    fn erase_page(&mut self, page: u16) -> Result<(), Error> {
        let address = self.page_address(page);
        let mut chunk = [0u8; 256];
        let mut blank = true;
        let mut offset = 0;
        while offset < FLASH_SECTOR_SIZE {
            self.hal
                .read(address + offset as u32, &mut chunk)
                .map_err(|_| Error::FlashError)?;
            if chunk.iter().any(|&b| b != 0xFF) {
                blank = false;
                break;
            }
            offset += chunk.len();
        }
        if blank {
            return Ok(());
        }

        #[cfg(feature = "defmt")]
        trace!("erase page {}", page);

        let end = address + FLASH_SECTOR_SIZE as u32;
        if critical_section::with(|_| self.hal.erase(address, end)).is_ok() {
            return Ok(());
        }
        #[cfg(feature = "defmt")]
        warn!("flash erase retry: page {}", page);
        critical_section::with(|_| self.hal.erase(address, end)).map_err(|_| Error::FlashError)
    }
}
