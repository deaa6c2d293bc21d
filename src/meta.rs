//! Meta page and database metadata management

use crate::error::{Error, PageId, Result, TransactionId};
use crate::geometry::Geometry;
use crate::page::{Page, PageFlags, PAGE_SIZE};
use crate::troika::{MetaSnapshot, Signature};
use static_assertions::const_assert;
use std::mem::size_of;

/// Page ID for meta page 1
pub const META_PAGE_1: PageId = PageId(0);

/// Page ID for meta page 2
pub const META_PAGE_2: PageId = PageId(1);

/// Page ID for meta page 3 (the troika's third rotating slot)
pub const META_PAGE_3: PageId = PageId(2);

/// The three meta-page slots, in slot order.
pub const META_PAGES: [PageId; 3] = [META_PAGE_1, META_PAGE_2, META_PAGE_3];

/// Version of the database format
pub const DB_VERSION: u32 = 1;

/// Magic number to identify database files
pub const MAGIC: u32 = 0xBEEFC0DE;

/// Database statistics
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DbStats {
    /// Size of database in pages
    pub psize: u32,
    /// Depth of B-tree
    pub depth: u32,
    /// Number of internal pages
    pub branch_pages: u64,
    /// Number of leaf pages
    pub leaf_pages: u64,
    /// Number of overflow pages
    pub overflow_pages: u64,
    /// Number of entries
    pub entries: u64,
}

/// Database info stored in branch pages
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DbInfo {
    /// Database flags
    pub flags: u32,
    /// Depth of tree
    pub depth: u32,
    /// Number of pages
    pub branch_pages: u64,
    /// Number of leaf pages
    pub leaf_pages: u64,
    /// Number of overflow pages
    pub overflow_pages: u64,
    /// Number of entries
    pub entries: u64,
    /// Root page number
    pub root: PageId,
    /// Last key page for append optimization (0 = not cached)
    pub last_key_page: PageId,
}

impl Default for DbInfo {
    fn default() -> Self {
        Self {
            flags: 0,
            depth: 0,
            branch_pages: 0,
            leaf_pages: 0,
            overflow_pages: 0,
            entries: 0,
            root: PageId(0),
            last_key_page: PageId(0),
        }
    }
}

/// Meta page structure - contains database metadata
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MetaPage {
    /// Magic number
    pub magic: u32,
    /// Database format version
    pub version: u32,
    /// Process boot id that last wrote this slot: a fresh random value
    /// generated once per process start. Used at open time to tell
    /// "this process's own prior commit" from "another process's unclean
    /// shutdown" when choosing between the recent and steady slots.
    pub bootid: u128,
    /// Commit signature: 0 means the slot was written without a following
    /// fsync (`Signature::Weak`); nonzero means it was fsynced
    /// (`Signature::Steady`).
    pub signature: u32,
    /// Database flags
    pub flags: u32,
    /// Database page size
    pub psize: u32,
    /// Max reader slots
    pub maxreaders: u32,
    /// Database ID for lock file
    pub dbs: u32,
    /// Last page number in database
    pub last_pg: PageId,
    /// Last transaction ID
    pub last_txnid: TransactionId,
    /// Total map size
    pub mapsize: u64,
    /// Packed file-size geometry
    pub geometry: Geometry,
    /// Main database info
    pub main_db: DbInfo,
    /// Free database info
    pub free_db: DbInfo,
}

impl Default for MetaPage {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaPage {
    /// Create a new meta page
    pub fn new() -> Self {
        Self {
            magic: MAGIC,
            version: DB_VERSION,
            bootid: 0,
            signature: 0,
            flags: 0,
            psize: PAGE_SIZE as u32,
            maxreaders: 126,
            dbs: 2,
            last_pg: PageId(1),
            last_txnid: TransactionId(0),
            mapsize: 0,
            geometry: Geometry::new(0, 1, 0, 1, 0, 0),
            main_db: DbInfo::default(),
            free_db: DbInfo::default(),
        }
    }

    /// Validate the meta page
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::Corruption {
                details: format!("Invalid magic number: 0x{:x}", self.magic),
                page_id: None,
            });
        }

        if self.version != DB_VERSION {
            return Err(Error::VersionMismatch { expected: DB_VERSION, found: self.version });
        }

        if self.psize as usize != PAGE_SIZE {
            return Err(Error::Corruption {
                details: format!("Invalid page size: {}", self.psize),
                page_id: None,
            });
        }

        Ok(())
    }

    /// The troika-compatible snapshot of this meta-page slot, used to
    /// select which of the three rotating pages is authoritative.
    pub fn snapshot(&self, slot: usize) -> MetaSnapshot {
        MetaSnapshot {
            slot,
            valid: self.validate().is_ok(),
            txnid: self.last_txnid.0,
            signature: if self.signature == 0 { Signature::Weak } else { Signature::Steady(self.signature) },
            bootid: self.bootid,
        }
    }

    /// Convert to a page
    pub fn to_page(&self, pgno: u64) -> Box<Page> {
        let mut page = Page::new(PageId(pgno), PageFlags::META);

        // Copy meta page data into page
        unsafe {
            let meta_ptr = page.data.as_mut_ptr() as *mut MetaPage;
            *meta_ptr = *self;
        }

        page
    }

    /// Create from a page
    pub fn from_page(page: &Page) -> Result<&Self> {
        if !page.header.flags.contains(PageFlags::META) {
            return Err(Error::InvalidPageType {
                expected: crate::error::PageType::Meta,
                found: page.header.page_type(),
            });
        }

        let meta = unsafe { &*(page.data.as_ptr() as *const MetaPage) };
        meta.validate()?;
        Ok(meta)
    }
}

const_assert!(size_of::<MetaPage>() < PAGE_SIZE - size_of::<crate::page::PageHeader>());
