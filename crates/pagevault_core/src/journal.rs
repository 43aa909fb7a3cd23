//! Rollback journal.
//!
//! Before a commit touches the database file, the pre-image of every page
//! it overwrites is written to the journal and synced. Truncating the
//! journal to zero bytes is the commit point.
//!
//! ## Format (big-endian)
//!
//! ```text
//! | magic (8) | page_size (4) | original_page_count (4) | record_count (4) | header_crc (4) |
//! | pgno (4) | page (page_size) | crc32(pgno || page) (4) |  x record_count
//! ```
//!
//! Pre-images are stored exactly as they are on disk, already encrypted and
//! tagged for their own page number, so replaying a journal needs no key.

use crate::error::{CoreError, CoreResult};
use crate::params::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::types::PageNumber;
use pagevault_storage::StorageBackend;
use tracing::{info, warn};

/// Magic bytes at the start of a journal.
pub const JOURNAL_MAGIC: [u8; 8] = *b"PVJRNL\0\x01";

/// Size of the journal header.
pub const JOURNAL_HEADER_SIZE: usize = 24;

/// Per-record overhead: page number + CRC.
const RECORD_OVERHEAD: usize = 8;

/// One page pre-image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    /// Page the pre-image belongs to.
    pub pgno: PageNumber,
    /// Raw on-disk bytes of the page.
    pub page: Vec<u8>,
}

/// A complete rollback journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journal {
    /// Page size of the database the journal belongs to.
    pub page_size: u32,
    /// Page count of the database before the transaction.
    pub original_page_count: u32,
    /// Page pre-images.
    pub records: Vec<JournalRecord>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new(page_size: u32, original_page_count: u32) -> Self {
        Self {
            page_size,
            original_page_count,
            records: Vec::new(),
        }
    }

    /// Adds a pre-image.
    pub fn push(&mut self, pgno: PageNumber, page: Vec<u8>) {
        self.records.push(JournalRecord { pgno, page });
    }

    /// Encodes the journal.
    ///
    /// # Errors
    ///
    /// Returns an error if a record is not exactly one page or there are
    /// more records than fit in the header.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let page_size = self.page_size as usize;
        let record_count = u32::try_from(self.records.len())
            .map_err(|_| CoreError::invalid_operation("too many journal records"))?;

        let mut buf = Vec::with_capacity(
            JOURNAL_HEADER_SIZE + self.records.len() * (page_size + RECORD_OVERHEAD),
        );

        buf.extend_from_slice(&JOURNAL_MAGIC);
        buf.extend_from_slice(&self.page_size.to_be_bytes());
        buf.extend_from_slice(&self.original_page_count.to_be_bytes());
        buf.extend_from_slice(&record_count.to_be_bytes());
        let header_crc = compute_crc32(&buf);
        buf.extend_from_slice(&header_crc.to_be_bytes());

        for record in &self.records {
            if record.page.len() != page_size {
                return Err(CoreError::invalid_operation(format!(
                    "journal pre-image for {} has {} bytes, expected {page_size}",
                    record.pgno,
                    record.page.len()
                )));
            }
            let start = buf.len();
            buf.extend_from_slice(&record.pgno.to_be_bytes());
            buf.extend_from_slice(&record.page);
            let crc = compute_crc32(&buf[start..]);
            buf.extend_from_slice(&crc.to_be_bytes());
        }

        Ok(buf)
    }

    /// Decodes a journal.
    ///
    /// # Errors
    ///
    /// Returns `JournalCorruption` if the journal is truncated, any
    /// checksum fails, the page size is out of range or a record names a
    /// page outside the original database. A journal in that state was never
    /// completely written by a commit, so it is not replayed.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < JOURNAL_HEADER_SIZE {
            return Err(CoreError::journal_corruption(format!(
                "journal header truncated at {} bytes",
                data.len()
            )));
        }
        if data[0..8] != JOURNAL_MAGIC {
            return Err(CoreError::journal_corruption("invalid journal magic"));
        }

        let stored_crc = read_u32(data, 20);
        if compute_crc32(&data[..20]) != stored_crc {
            return Err(CoreError::journal_corruption("journal header checksum mismatch"));
        }

        let page_size = read_u32(data, 8);
        let original_page_count = read_u32(data, 12);
        let record_count = read_u32(data, 16) as usize;
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(CoreError::journal_corruption(format!(
                "journal page size {page_size} out of range"
            )));
        }
        let record_size = page_size as usize + RECORD_OVERHEAD;

        let needed = record_count
            .checked_mul(record_size)
            .and_then(|n| n.checked_add(JOURNAL_HEADER_SIZE))
            .ok_or_else(|| CoreError::journal_corruption("journal record count overflows"))?;
        if data.len() < needed {
            return Err(CoreError::journal_corruption(format!(
                "journal truncated: {} of {needed} bytes",
                data.len()
            )));
        }

        let mut records = Vec::with_capacity(record_count);
        let mut cursor = JOURNAL_HEADER_SIZE;
        for index in 0..record_count {
            let body = &data[cursor..cursor + 4 + page_size as usize];
            let crc = read_u32(data, cursor + body.len());
            if compute_crc32(body) != crc {
                return Err(CoreError::journal_corruption(format!(
                    "journal record {index} checksum mismatch"
                )));
            }
            let pgno = read_u32(body, 0);
            if pgno == 0 || pgno > original_page_count {
                return Err(CoreError::journal_corruption(format!(
                    "journal record {index} names page {pgno} outside {original_page_count} original pages"
                )));
            }
            records.push(JournalRecord {
                pgno: PageNumber::new(pgno),
                page: body[4..].to_vec(),
            });
            cursor += record_size;
        }

        Ok(Self {
            page_size,
            original_page_count,
            records,
        })
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Rolls back a hot journal, if there is one.
///
/// A journal that decodes completely is replayed: every pre-image is written
/// back, the database is truncated to its original size and the journal is
/// cleared. A journal that does not decode is discarded, since the database
/// writes only start after the journal is complete.
///
/// Returns true if a journal was replayed.
///
/// # Errors
///
/// Returns an error if the backends fail.
pub fn recover(db: &mut dyn StorageBackend, journal: &mut dyn StorageBackend) -> CoreResult<bool> {
    let size = journal.size()?;
    if size == 0 {
        return Ok(false);
    }
    let len = usize::try_from(size)
        .map_err(|_| CoreError::journal_corruption("journal too large to read"))?;
    let data = journal.read_at(0, len)?;

    let replayed = match Journal::decode(&data) {
        Ok(hot) => {
            let page_size = hot.page_size as usize;
            for record in &hot.records {
                db.write_at(record.pgno.offset(page_size), &record.page)?;
            }
            let original_size = u64::from(hot.original_page_count) * page_size as u64;
            if db.size()? > original_size {
                db.truncate(original_size)?;
            }
            db.sync()?;
            info!(
                pages = hot.records.len(),
                original_page_count = hot.original_page_count,
                "rolled back hot journal"
            );
            true
        }
        Err(e) => {
            warn!(error = %e, bytes = size, "discarding incomplete journal");
            false
        }
    };

    journal.truncate(0)?;
    journal.sync()?;
    Ok(replayed)
}

/// Computes the CRC-32 (IEEE) of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut n = 0;
        while n < 256 {
            let mut c = n as u32;
            let mut k = 0;
            while k < 8 {
                c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
                k += 1;
            }
            table[n] = c;
            n += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagevault_storage::InMemoryBackend;

    const PAGE: usize = 512;

    fn sample() -> Journal {
        let mut journal = Journal::new(PAGE as u32, 3);
        journal.push(PageNumber::new(1), vec![0x11; PAGE]);
        journal.push(PageNumber::new(3), vec![0x33; PAGE]);
        journal
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn encode_decode() {
        let journal = sample();
        let bytes = journal.encode().unwrap();
        assert_eq!(bytes.len(), JOURNAL_HEADER_SIZE + 2 * (PAGE + 8));
        assert_eq!(&bytes[..8], b"PVJRNL\0\x01");
        assert_eq!(Journal::decode(&bytes).unwrap(), journal);
    }

    #[test]
    fn every_truncation_is_rejected() {
        let bytes = sample().encode().unwrap();
        for len in [0, 10, JOURNAL_HEADER_SIZE, JOURNAL_HEADER_SIZE + PAGE, bytes.len() - 1] {
            assert!(
                matches!(
                    Journal::decode(&bytes[..len]),
                    Err(CoreError::JournalCorruption { .. })
                ),
                "len {len}"
            );
        }
    }

    #[test]
    fn corrupted_record_is_rejected() {
        let mut bytes = sample().encode().unwrap();
        bytes[JOURNAL_HEADER_SIZE + 100] ^= 1;
        assert!(Journal::decode(&bytes).is_err());

        let mut bytes = sample().encode().unwrap();
        bytes[14] ^= 1;
        assert!(Journal::decode(&bytes).is_err());
    }

    fn assert_corrupt(journal: &Journal) {
        let bytes = journal.encode().unwrap();
        assert!(matches!(
            Journal::decode(&bytes),
            Err(CoreError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn page_zero_record_is_rejected() {
        let mut journal = Journal::new(PAGE as u32, 3);
        journal.push(PageNumber::new(0), vec![0x11; PAGE]);
        assert_corrupt(&journal);
    }

    #[test]
    fn record_past_original_pages_is_rejected() {
        let mut journal = Journal::new(PAGE as u32, 2);
        journal.push(PageNumber::new(3), vec![0x33; PAGE]);
        assert_corrupt(&journal);
    }

    #[test]
    fn out_of_range_page_size_is_rejected() {
        for page_size in [0, 256, 1000, 131_072] {
            let journal = Journal::new(page_size, 1);
            assert_corrupt(&journal);
        }
    }

    #[test]
    fn recover_discards_journal_naming_page_zero() {
        let original = vec![0x55; 2 * PAGE];
        let mut db = InMemoryBackend::with_data(original.clone());
        let mut bad = Journal::new(PAGE as u32, 2);
        bad.push(PageNumber::new(0), vec![0x11; PAGE]);
        let mut journal = InMemoryBackend::with_data(bad.encode().unwrap());

        assert!(!recover(&mut db, &mut journal).unwrap());
        assert_eq!(db.data(), original);
        assert_eq!(journal.size().unwrap(), 0);
    }

    #[test]
    fn wrong_sized_record_fails_to_encode() {
        let mut journal = Journal::new(PAGE as u32, 1);
        journal.push(PageNumber::new(1), vec![0; 10]);
        assert!(journal.encode().is_err());
    }

    #[test]
    fn recover_replays_hot_journal() {
        // Database was 3 pages; a commit overwrote pages 1 and 3 and added a 4th.
        let mut db = InMemoryBackend::with_data(
            [vec![0xAA; PAGE], vec![0x22; PAGE], vec![0xCC; PAGE], vec![0xDD; PAGE]].concat(),
        );
        let mut journal = InMemoryBackend::with_data(sample().encode().unwrap());

        assert!(recover(&mut db, &mut journal).unwrap());

        let expected = [vec![0x11; PAGE], vec![0x22; PAGE], vec![0x33; PAGE]].concat();
        assert_eq!(db.data(), expected);
        assert_eq!(journal.size().unwrap(), 0);
    }

    #[test]
    fn recover_discards_incomplete_journal() {
        let original = vec![0x55; 2 * PAGE];
        let mut db = InMemoryBackend::with_data(original.clone());
        let bytes = sample().encode().unwrap();
        let mut journal = InMemoryBackend::with_data(bytes[..bytes.len() - 3].to_vec());

        assert!(!recover(&mut db, &mut journal).unwrap());
        assert_eq!(db.data(), original);
        assert_eq!(journal.size().unwrap(), 0);
    }

    #[test]
    fn recover_without_journal_is_noop() {
        let mut db = InMemoryBackend::with_data(vec![1; PAGE]);
        let mut journal = InMemoryBackend::new();
        assert!(!recover(&mut db, &mut journal).unwrap());
        assert_eq!(db.data(), vec![1; PAGE]);
    }
}
