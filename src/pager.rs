//! Pager / file layout (spec §4.1): fixed-size page I/O against a single
//! file, header-page validation, and the free-page list.
//!
//! Grounded on `small-db`'s `SmallFile` (`src/io.rs`) for the raw
//! seek/read_exact/write style, generalized from `SmallFile`'s
//! single-page-type assumption to the fixed 4096-byte stride every page
//! (header, internal, leaf, free) uses here.

use std::convert::TryInto;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, trace};

use crate::codec::{Decode, Encode};
use crate::error::{Error, Result};
use crate::page::{Page, PageId, PageType, HEADER_PAGE_ID, PAGE_SIZE};

pub const MAGIC: &[u8; 8] = b"LOWKYDB\0";
pub const FORMAT_VERSION: u32 = 1;

/// In-memory mirror of the header page's fields (spec §3 "Header page").
///
/// The header page is the one piece of file-level metadata the pager
/// owns directly rather than routing through the buffer pool — the
/// `header` mutex below *is* the exclusive latch spec §5 requires before
/// any header-page mutation (root page swap, free-list push/pop, key
/// count update).
struct HeaderState {
    root_page: PageId,
    free_page_list: PageId,
    page_count: u32,
    key_count: u64,
}

impl HeaderState {
    fn encode(&self) -> Page {
        let mut page = Page::new(PageType::Header);
        let mut buf = Vec::with_capacity(36);
        MAGIC.as_slice().iter().for_each(|b| buf.push(*b));
        FORMAT_VERSION.encode_to(&mut buf);
        (PAGE_SIZE as u32).encode_to(&mut buf);
        self.root_page.encode_to(&mut buf);
        self.free_page_list.encode_to(&mut buf);
        self.page_count.encode_to(&mut buf);
        self.key_count.encode_to(&mut buf);
        page.payload[..buf.len()].copy_from_slice(&buf);
        page
    }

    fn decode(page: &Page) -> Result<Self> {
        let payload = &page.payload;
        if &payload[0..8] != MAGIC.as_slice() {
            return Err(Error::InvalidMagicNumber);
        }
        let mut cursor = std::io::Cursor::new(&payload[8..]);
        let version = u32::decode_from(&mut cursor)?;
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let page_size = u32::decode_from(&mut cursor)?;
        if page_size as usize != PAGE_SIZE {
            return Err(Error::InvalidPageSize(page_size));
        }
        let root_page = u32::decode_from(&mut cursor)?;
        let free_page_list = u32::decode_from(&mut cursor)?;
        let page_count = u32::decode_from(&mut cursor)?;
        let key_count = u64::decode_from(&mut cursor)?;
        Ok(Self {
            root_page,
            free_page_list,
            page_count,
            key_count,
        })
    }
}

pub struct Pager {
    file: Mutex<File>,
    path: PathBuf,
    header: Mutex<HeaderState>,
}

impl Pager {
    /// Create a brand-new, empty database file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let header = HeaderState {
            root_page: 0,
            free_page_list: 0,
            page_count: 1, // page 0 (header) always exists
            key_count: 0,
        };
        let page = header.encode();
        file.write_all(&page.encode())?;
        file.sync_all()?;

        debug!("created database file at {:?}", path);
        Ok(Self {
            file: Mutex::new(file),
            path,
            header: Mutex::new(header),
        })
    }

    /// Open an existing database file, validating the header page.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut buf = [0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;
        let page = Page::decode(&buf)?;
        if page.page_type() != PageType::Header {
            return Err(Error::CorruptDatabase(
                "page 0 is not a header page".to_string(),
            ));
        }
        let header = HeaderState::decode(&page)?;

        debug!("opened database file at {:?}", path);
        Ok(Self {
            file: Mutex::new(file),
            path,
            header: Mutex::new(header),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset_of(id: PageId) -> u64 {
        id as u64 * PAGE_SIZE as u64
    }

    pub fn read_page(&self, id: PageId) -> Result<Page> {
        let mut buf = [0u8; PAGE_SIZE];
        {
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(Self::offset_of(id)))?;
            file.read_exact(&mut buf)?;
        }
        trace!("pager: read page {}", id);
        Page::decode(&buf)
    }

    pub fn write_page(&self, id: PageId, page: &Page) -> Result<()> {
        let bytes = page.encode();
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(Self::offset_of(id)))?;
        file.write_all(&bytes)?;
        trace!("pager: wrote page {}", id);
        Ok(())
    }

    /// Pop the free-list head, or extend the file, returning a fresh
    /// page id. Does not mark the page's contents; callers zero-fill.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut header = self.header.lock().unwrap();
        if header.free_page_list != 0 {
            let id = header.free_page_list;
            let freed = self.read_page(id)?;
            let next = u32::from_le_bytes(freed.payload[0..4].try_into().unwrap());
            header.free_page_list = next;
            self.write_header_locked(&header)?;
            debug!("pager: allocated page {} from free list", id);
            return Ok(id);
        }

        let id = header.page_count;
        header.page_count += 1;
        self.write_header_locked(&header)?;
        // extend the underlying file with a zeroed page so later seeks
        // past EOF never short-read.
        let zero = Page::new(PageType::Free);
        self.write_page(id, &zero)?;
        debug!("pager: allocated page {} by extending file", id);
        Ok(id)
    }

    /// Push a page onto the free list and stamp it as free.
    pub fn free_page(&self, id: PageId) -> Result<()> {
        if id == HEADER_PAGE_ID {
            error!("pager: refusing to free the header page");
            return Err(Error::CorruptDatabase(
                "attempted to free the header page".to_string(),
            ));
        }
        let mut header = self.header.lock().unwrap();
        let mut page = Page::new(PageType::Free);
        page.payload[0..4].copy_from_slice(&header.free_page_list.to_le_bytes());
        self.write_page(id, &page)?;
        header.free_page_list = id;
        self.write_header_locked(&header)?;
        debug!("pager: freed page {}", id);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().unwrap().sync_all()?;
        Ok(())
    }

    pub fn root_page(&self) -> PageId {
        self.header.lock().unwrap().root_page
    }

    pub fn set_root_page(&self, id: PageId) -> Result<()> {
        let mut header = self.header.lock().unwrap();
        header.root_page = id;
        self.write_header_locked(&header)
    }

    pub fn page_count(&self) -> u32 {
        self.header.lock().unwrap().page_count
    }

    pub fn key_count(&self) -> u64 {
        self.header.lock().unwrap().key_count
    }

    pub fn set_key_count(&self, count: u64) -> Result<()> {
        let mut header = self.header.lock().unwrap();
        header.key_count = count;
        self.write_header_locked(&header)
    }

    pub fn adjust_key_count(&self, delta: i64) -> Result<u64> {
        let mut header = self.header.lock().unwrap();
        header.key_count = (header.key_count as i64 + delta).max(0) as u64;
        self.write_header_locked(&header)?;
        Ok(header.key_count)
    }

    fn write_header_locked(&self, header: &HeaderState) -> Result<()> {
        let page = header.encode();
        self.write_page(HEADER_PAGE_ID, &page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_path() -> PathBuf {
        let f = NamedTempFile::new().unwrap();
        let path = f.path().to_path_buf();
        drop(f);
        std::fs::remove_file(&path).ok();
        path
    }

    #[test]
    fn create_then_open_round_trips_header() {
        let path = temp_path();
        {
            let pager = Pager::create(&path).unwrap();
            pager.set_root_page(5).unwrap();
            pager.set_key_count(42).unwrap();
        }
        let pager = Pager::open(&path).unwrap();
        assert_eq!(pager.root_page(), 5);
        assert_eq!(pager.key_count(), 42);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn allocate_and_free_page_reuses_via_free_list() {
        let path = temp_path();
        let pager = Pager::create(&path).unwrap();
        let a = pager.allocate_page().unwrap();
        let b = pager.allocate_page().unwrap();
        assert_ne!(a, b);
        pager.free_page(a).unwrap();
        let c = pager.allocate_page().unwrap();
        assert_eq!(c, a, "freed page should be reused before extending file");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn open_rejects_bad_magic() {
        let path = temp_path();
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&path)
                .unwrap();
            f.write_all(&[0u8; PAGE_SIZE]).unwrap();
        }
        assert!(matches!(Pager::open(&path), Err(Error::InvalidMagicNumber)));
        std::fs::remove_file(&path).ok();
    }
}
