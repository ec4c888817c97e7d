//! Fixed-size page layout shared by the pager, buffer pool, and B+tree
//! (spec §3, §6.2).
//!
//! Every page on disk is exactly [`PAGE_SIZE`] bytes: a 32-byte header
//! followed by an opaque payload. The header carries the page's type, a
//! CRC32 checksum of the whole page (computed with the checksum field
//! zeroed), and the LSN of the WAL record that last mutated the page —
//! the field the buffer pool's WAL-before-page rule keys off of.

use std::convert::TryInto;

use crate::codec::{Decode, Encode};
use crate::error::{Error, Result};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_HEADER_SIZE: usize = 32;
pub const PAGE_PAYLOAD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

pub const MAX_KEY_SIZE: usize = 1024;
pub const MAX_VALUE_SIZE: usize = 3072;

pub type PageId = u32;

/// The header page (page 0) is not a real free/allocatable page id.
pub const HEADER_PAGE_ID: PageId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Header = 0,
    BTreeInternal = 1,
    BTreeLeaf = 2,
    Free = 3,
}

impl PageType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(PageType::Header),
            1 => Ok(PageType::BTreeInternal),
            2 => Ok(PageType::BTreeLeaf),
            3 => Ok(PageType::Free),
            other => Err(Error::CorruptDatabase(format!(
                "unknown page type byte: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub page_type: PageType,
    pub flags: u8,
    pub checksum: u32,
    pub lsn: u64,
}

impl PageHeader {
    fn new(page_type: PageType) -> Self {
        Self {
            page_type,
            flags: 0,
            checksum: 0,
            lsn: 0,
        }
    }

    fn encode_to(&self, out: &mut Vec<u8>) {
        (self.page_type as u8).encode_to(out);
        self.flags.encode_to(out);
        0u16.encode_to(out); // reserved padding, keeps checksum u32-aligned
        self.checksum.encode_to(out);
        self.lsn.encode_to(out);
        out.extend_from_slice(&[0u8; 16]); // reserved
    }

    fn decode_from(bytes: &[u8]) -> Result<Self> {
        debug_assert_eq!(bytes.len(), PAGE_HEADER_SIZE);
        let page_type = PageType::from_u8(bytes[0])?;
        let flags = bytes[1];
        let checksum = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let lsn = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        Ok(Self {
            page_type,
            flags,
            checksum,
            lsn,
        })
    }
}

/// A single in-memory 4096-byte page: a typed header plus an opaque
/// payload. B+tree nodes interpret the payload according to
/// [`crate::btree::node`]; the header page interprets it as file-level
/// metadata.
#[derive(Clone)]
pub struct Page {
    pub header: PageHeader,
    pub payload: Vec<u8>,
}

impl Page {
    pub fn new(page_type: PageType) -> Self {
        Self {
            header: PageHeader::new(page_type),
            payload: vec![0u8; PAGE_PAYLOAD_SIZE],
        }
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    pub fn lsn(&self) -> u64 {
        self.header.lsn
    }

    pub fn set_lsn(&mut self, lsn: u64) {
        self.header.lsn = lsn;
    }

    /// Serialize to exactly [`PAGE_SIZE`] bytes, stamping a fresh
    /// checksum computed with the checksum field zeroed.
    pub fn encode(&self) -> [u8; PAGE_SIZE] {
        let mut header_bytes = Vec::with_capacity(PAGE_HEADER_SIZE);
        self.header.encode_to(&mut header_bytes);
        debug_assert_eq!(header_bytes.len(), PAGE_HEADER_SIZE);

        // zero the checksum field (bytes 4..8) before hashing.
        header_bytes[4..8].copy_from_slice(&[0u8; 4]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header_bytes);
        hasher.update(&self.payload);
        let checksum = hasher.finalize();
        header_bytes[4..8].copy_from_slice(&checksum.to_le_bytes());

        let mut out = [0u8; PAGE_SIZE];
        out[..PAGE_HEADER_SIZE].copy_from_slice(&header_bytes);
        out[PAGE_HEADER_SIZE..].copy_from_slice(&self.payload);
        out
    }

    /// Parse a raw page buffer and verify its checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(Error::CorruptDatabase(format!(
                "short page read: {} bytes",
                bytes.len()
            )));
        }

        let mut header_bytes = bytes[..PAGE_HEADER_SIZE].to_vec();
        let stored_checksum = u32::from_le_bytes(header_bytes[4..8].try_into().unwrap());
        header_bytes[4..8].copy_from_slice(&[0u8; 4]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header_bytes);
        hasher.update(&bytes[PAGE_HEADER_SIZE..]);
        let computed = hasher.finalize();

        if computed != stored_checksum {
            return Err(Error::CorruptDatabase(
                "page checksum mismatch".to_string(),
            ));
        }

        let header = PageHeader::decode_from(&bytes[..PAGE_HEADER_SIZE])?;
        Ok(Self {
            header,
            payload: bytes[PAGE_HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let mut page = Page::new(PageType::BTreeLeaf);
        page.set_lsn(7);
        page.payload[0] = 0xAB;
        let bytes = page.encode();
        let decoded = Page::decode(&bytes).unwrap();
        assert_eq!(decoded.page_type(), PageType::BTreeLeaf);
        assert_eq!(decoded.lsn(), 7);
        assert_eq!(decoded.payload[0], 0xAB);
    }

    #[test]
    fn detects_corruption() {
        let page = Page::new(PageType::Free);
        let mut bytes = page.encode();
        bytes[PAGE_HEADER_SIZE + 10] ^= 0xFF;
        assert!(Page::decode(&bytes).is_err());
    }
}
