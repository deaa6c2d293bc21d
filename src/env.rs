//! Environment management with type-state pattern

use parking_lot::Mutex;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{Error, PageId, Result, TransactionId};
use crate::geometry::Geometry;
use crate::io::{IoBackend, MmapBackend};
use crate::meta::{DbInfo, MetaPage, META_PAGES};
use crate::page::Page;
use crate::reader::ReaderTable;
use crate::troika::{self, MetaSnapshot, OpenSelection, Troika};
use crate::txn::{Read, Transaction, Write};



/// Environment state marker traits
pub mod state {
    /// Sealed trait for environment states
    mod sealed {
        pub trait Sealed {}
    }

    /// Environment state trait
    pub trait State: sealed::Sealed {}

    /// Closed environment state
    #[derive(Debug)]
    pub struct Closed;
    impl sealed::Sealed for Closed {}
    impl State for Closed {}

    /// Open environment state
    #[derive(Debug)]
    pub struct Open;
    impl sealed::Sealed for Open {}
    impl State for Open {}

    /// Read-only environment state
    #[derive(Debug)]
    pub struct ReadOnly;
    impl sealed::Sealed for ReadOnly {}
    impl State for ReadOnly {}
}

use state::*;

/// Maximum number of named databases
pub const MAX_DBS: u32 = 128;

/// Default map size (1GB)
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Durability modes for write transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// No sync - fastest but no durability guarantees
    NoSync,
    /// Async sync - data is flushed asynchronously (default)
    AsyncFlush,
    /// Sync data pages only - metadata might be lost
    SyncData,
    /// Full sync - both data and metadata are synced (safest)
    FullSync,
}

/// Tunables that affect how a write transaction allocates and checksums
/// pages, as opposed to [`DurabilityMode`] which affects commit syncing.
#[derive(Debug, Clone, Copy)]
pub struct EnvConfig {
    /// Use the segregated (size-class-bucketed) free list instead of the
    /// simple sorted one.
    pub use_segregated_freelist: bool,
    /// Maximum number of pages a single write transaction may dirty before
    /// `alloc_page` starts refusing further allocations.
    pub max_txn_pages: usize,
    /// Budget, in pages, a write transaction's dirty-page set may hold in
    /// memory before the writer starts spilling victims out to their
    /// on-disk slot ahead of commit.
    pub dp_limit: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self { use_segregated_freelist: false, max_txn_pages: 10_000, dp_limit: 1_024 }
    }
}

/// Shared environment data
pub(crate) struct EnvInner {
    /// Path to the database
    _path: PathBuf,
    /// I/O backend
    pub(crate) io: Box<dyn IoBackend>,
    /// Current map size
    pub(crate) map_size: usize,
    /// Current transaction ID
    pub(crate) txn_id: AtomicU64,
    /// Write lock
    pub(crate) write_lock: Mutex<()>,
    /// Reader table
    pub(crate) readers: ReaderTable,
    /// Named databases
    pub(crate) databases: RwLock<HashMap<Option<String>, DbInfo>>,
    /// Free pages tracking
    pub(crate) _free_pages: RwLock<Vec<PageId>>,
    /// Durability mode
    pub(crate) durability: DurabilityMode,
    /// Checksum mode applied to dirty pages at commit time
    pub(crate) checksum_mode: crate::checksum::ChecksumMode,
    /// Allocation/freelist tunables
    pub(crate) config: EnvConfig,
    /// This process's boot id, fresh per `EnvBuilder::open` call. Stamped
    /// into every meta-page this process writes; used at open time to tell
    /// this process's own prior commits from another process's unclean
    /// shutdown.
    pub(crate) bootid: u128,

    /// Next page ID to allocate
    pub(crate) next_page_id: AtomicU64,
}

// Safety: EnvInner is Send/Sync because IoBackend is Send/Sync
unsafe impl Send for EnvInner {}
unsafe impl Sync for EnvInner {}

impl EnvInner {
    /// Read the three meta-page slots into troika snapshots. A slot that
    /// fails to read or fails structural validation is reported as invalid
    /// rather than propagating the error, mirroring the tolerance the
    /// troika scheme is built for (one torn write must not sink the file).
    fn read_meta_snapshots(&self) -> Result<[MetaSnapshot; 3]> {
        let mut snapshots: [Option<MetaSnapshot>; 3] = [None; 3];
        for (slot, page_id) in META_PAGES.into_iter().enumerate() {
            let snap = self
                .io
                .read_page(page_id)
                .ok()
                .filter(|page| size_of::<MetaPage>() <= page.data.len())
                .filter(|page| page.data.as_ptr() as usize % std::mem::align_of::<MetaPage>() == 0)
                .map(|page| {
                    let meta = unsafe { &*(page.data.as_ptr() as *const MetaPage) };
                    meta.snapshot(slot)
                })
                .unwrap_or(MetaSnapshot {
                    slot,
                    valid: false,
                    txnid: 0,
                    signature: crate::troika::Signature::Weak,
                    bootid: 0,
                });
            snapshots[slot] = Some(snap);
        }
        Ok(snapshots.map(|s| s.expect("every slot filled above")))
    }

    /// Compute the troika and read the full meta-page at the slot that
    /// open-time selection chooses: the recent slot if its boot id matches
    /// this process's (no reboot happened since it was written), otherwise
    /// the steady predecessor (rolling back an unclean shutdown).
    pub(crate) fn meta(&self) -> Result<MetaPage> {
        let snapshots = self.read_meta_snapshots()?;
        if !snapshots.iter().any(|s| s.valid) {
            return Err(Error::Corrupted);
        }
        let troika = troika::compute(&snapshots);
        let selection = troika::select_on_open(&snapshots, troika, self.bootid);
        let slot = match selection {
            OpenSelection::UseRecent { slot } => slot,
            OpenSelection::RollbackToSteady { slot } => slot,
        };
        self.read_meta_at_slot(slot)
    }

    fn read_meta_at_slot(&self, slot: usize) -> Result<MetaPage> {
        let page = self.io.read_page(META_PAGES[slot])?;
        if size_of::<MetaPage>() > page.data.len() {
            return Err(Error::Corruption { details: "MetaPage size exceeds page data".into(), page_id: None });
        }
        if page.data.as_ptr() as usize % std::mem::align_of::<MetaPage>() != 0 {
            return Err(Error::Corruption { details: "MetaPage not properly aligned".into(), page_id: None });
        }
        let meta = unsafe { &*(page.data.as_ptr() as *const MetaPage) };
        meta.validate()?;
        Ok(*meta)
    }

    /// The current troika, for commit to pick its write (tail) slot.
    pub(crate) fn troika(&self) -> Result<Troika> {
        let snapshots = self.read_meta_snapshots()?;
        if !snapshots.iter().any(|s| s.valid) {
            return Err(Error::Corrupted);
        }
        Ok(troika::compute(&snapshots))
    }

    /// The page id of the troika's tail slot: the next meta-page a commit
    /// should overwrite.
    pub(crate) fn next_meta_page_id(&self) -> Result<PageId> {
        Ok(META_PAGES[self.troika()?.tail])
    }
}

/// Database environment
pub struct Environment<S: State = Closed> {
    inner: Option<Arc<EnvInner>>,
    _state: PhantomData<S>,
}

/// Builder for creating environments
pub struct EnvBuilder {
    map_size: usize,
    max_readers: u32,
    max_dbs: u32,
    _flags: u32,
    durability: DurabilityMode,
    checksum_mode: crate::checksum::ChecksumMode,
    config: EnvConfig,
}

impl EnvBuilder {
    /// Create a new environment builder
    pub fn new() -> Self {
        Self {
            map_size: DEFAULT_MAP_SIZE,
            max_readers: 126,
            max_dbs: MAX_DBS,
            _flags: 0,
            durability: DurabilityMode::AsyncFlush,
            checksum_mode: crate::checksum::ChecksumMode::Full,
            config: EnvConfig::default(),
        }
    }

    /// Set the map size
    pub fn map_size(mut self, size: usize) -> Self {
        self.map_size = size;
        self
    }

    /// Set the maximum number of readers
    pub fn max_readers(mut self, readers: u32) -> Self {
        self.max_readers = readers;
        self
    }

    /// Set the maximum number of named databases
    pub fn max_dbs(mut self, dbs: u32) -> Self {
        self.max_dbs = dbs.min(MAX_DBS);
        self
    }

    /// Set the durability mode
    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Set the checksum mode applied to pages at commit time
    pub fn checksum_mode(mut self, mode: crate::checksum::ChecksumMode) -> Self {
        self.checksum_mode = mode;
        self
    }

    /// Use the segregated (size-class-bucketed) free list instead of the
    /// simple sorted one.
    pub fn use_segregated_freelist(mut self, enabled: bool) -> Self {
        self.config.use_segregated_freelist = enabled;
        self
    }

    /// Maximum number of pages a single write transaction may dirty.
    pub fn max_txn_pages(mut self, max: usize) -> Self {
        self.config.max_txn_pages = max;
        self
    }

    /// Budget, in pages, a write transaction's dirty-page set may hold in
    /// memory before it starts spilling victims to disk ahead of commit.
    pub fn dp_limit(mut self, limit: usize) -> Self {
        self.config.dp_limit = limit;
        self
    }


    /// Build and open the environment
    pub fn open(self, path: impl AsRef<Path>) -> Result<Environment<Open>> {
        let path = path.as_ref();

        // Create directory if it doesn't exist
        std::fs::create_dir_all(path)?;

        let data_path = path.join("data.mdb");
        let _lock_path = path.join("lock.mdb");

        // Create I/O backend
        let mut io: Box<dyn IoBackend> =
            Box::new(MmapBackend::with_options(&data_path, self.map_size as u64)?);

        // Check if this is a new database by trying to read meta pages
        let is_new_db = match io.read_page(META_PAGES[0]) {
            Ok(page) => {
                let meta = unsafe { &*(page.data.as_ptr() as *const MetaPage) };
                meta.magic != crate::meta::MAGIC
            }
            Err(_) => true,
        };

        let bootid = rand::random::<u128>();
        let last_txn_id;
        let mut last_page_id = 4; // After three meta pages and two root pages
        let meta_info;

        if is_new_db {
            // Initialize new database. The free-db root lives at page 3,
            // the main-db root at page 4 (pages 0-2 are the troika's three
            // meta-page slots). All three meta-page slots start out
            // identical except for an increasing txnid, so `troika::compute`
            // picks slot 2 (the highest txnid) as `recent` on the very next
            // open.
            let mut meta = MetaPage::new();
            meta.mapsize = self.map_size as u64;
            meta.maxreaders = self.max_readers;
            meta.dbs = self.max_dbs;
            meta.free_db.root = PageId(3);
            meta.main_db.root = PageId(4);
            meta.last_pg = PageId(4);
            meta.bootid = bootid;
            meta.signature = 1; // steady: this initial image is synced below
            let page_size = self.map_size as u64 / crate::page::PAGE_SIZE as u64;
            meta.geometry = Geometry::new(0, page_size, page_size, 5, 0, 0);

            for (slot, page_id) in META_PAGES.into_iter().enumerate() {
                meta.last_txnid = TransactionId(slot as u64);
                let meta_page = Page::from_meta(&meta, page_id);
                io.write_page(&meta_page)?;
            }

            // Initialize free DB root page
            let free_page = Page::new(PageId(3), crate::page::PageFlags::LEAF);
            io.write_page(&free_page)?;

            // Initialize main DB root page
            let main_page = Page::new(PageId(4), crate::page::PageFlags::LEAF);
            io.write_page(&main_page)?;

            // Sync to disk
            io.sync()?;

            last_txn_id = (META_PAGES.len() - 1) as u64;
            meta_info = meta;
        } else {
            // Load existing meta info
            let inner = Arc::new(EnvInner {
                _path: path.to_path_buf(),
                io,
                map_size: self.map_size,
                txn_id: AtomicU64::new(0),
                write_lock: Mutex::new(()),
                readers: ReaderTable::new(self.max_readers as usize),
                databases: RwLock::new(HashMap::new()),
                _free_pages: RwLock::new(Vec::new()),
                durability: self.durability,
                checksum_mode: self.checksum_mode,
                config: self.config,
                bootid,
                next_page_id: AtomicU64::new(0),
            });

            meta_info = inner.meta()?;
            last_txn_id = meta_info.last_txnid.0;
            last_page_id = meta_info.last_pg.0;

            // Recreate with correct values
            drop(inner);
            io = Box::new(MmapBackend::with_options(&data_path, self.map_size as u64)?);
        }

        // Initialize reader table
        let readers = ReaderTable::new(self.max_readers as usize);

        let inner = Arc::new(EnvInner {
            _path: path.to_path_buf(),
            io,
            map_size: self.map_size,
            txn_id: AtomicU64::new(last_txn_id),
            write_lock: Mutex::new(()),
            readers,
            databases: RwLock::new(HashMap::new()),
            _free_pages: RwLock::new(Vec::new()),
            durability: self.durability,
            checksum_mode: self.checksum_mode,
            config: self.config,
            bootid,
            next_page_id: AtomicU64::new(last_page_id + 1),
        });

        // Initialize main database entry
        {
            let mut dbs = inner.databases.write()
                .expect("Failed to acquire database lock during initialization");
            dbs.insert(None, meta_info.main_db);
        }

        // Note: Named databases will be loaded on-demand from the catalog
        // We can't load them here because we'd need a transaction, but the
        // environment isn't fully constructed yet

        Ok(Environment { inner: Some(inner), _state: PhantomData })
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Environment<Closed> {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment<Closed> {
    /// Create a new closed environment
    pub fn new() -> Self {
        Self { inner: None, _state: PhantomData }
    }

    /// Open the environment
    pub fn open(self, path: impl AsRef<Path>) -> Result<Environment<Open>> {
        EnvBuilder::new().open(path)
    }
}

impl Environment<Open> {
    /// Allocation/freelist tunables for this environment.
    pub fn config(&self) -> &EnvConfig {
        &self.inner().config
    }

    /// Begin a read transaction
    pub fn read_txn(&self) -> Result<Transaction<'_, Read>> {
        Transaction::new_read(self)
    }

    /// Begin a write transaction
    pub fn write_txn(&self) -> Result<Transaction<'_, Write>> {
        Transaction::new_write(self)
    }

    /// Get inner reference (for internal use)
    pub(crate) fn inner(&self) -> &Arc<EnvInner> {
        self.inner.as_ref().expect("Environment not open")
    }



    /// Get inner reference (for testing)
    #[cfg(test)]
    #[allow(dead_code)]
    pub(crate) fn inner_test(&self) -> &Arc<EnvInner> {
        self.inner()
    }

    /// Sync data to disk
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner();
        match inner.durability {
            DurabilityMode::NoSync => {
                // No sync requested
                Ok(())
            }
            DurabilityMode::AsyncFlush | DurabilityMode::SyncData | DurabilityMode::FullSync => {
                inner.io.sync()?;
                Ok(())
            }
        }
    }

    /// Force a full synchronous sync regardless of durability mode
    pub fn force_sync(&self) -> Result<()> {
        let inner = self.inner();
        inner.io.sync()?;
        Ok(())
    }
    
    /// Get current space usage information
    pub fn space_info(&self) -> Result<crate::space_info::SpaceInfo> {
        let inner = self.inner();
        let total_pages = inner.io.size_in_pages();
        let next_page_id = inner.next_page_id.load(std::sync::atomic::Ordering::Acquire);
        
        // Get free pages count from a read transaction
        let free_pages = {
            let _txn = self.read_txn()?;
            // Count regular freelist pages
            total_pages.saturating_sub(next_page_id)
        };
        
        let used_pages = next_page_id;
        let map_size = inner.map_size as u64;
        
        Ok(crate::space_info::SpaceInfo::new(
            total_pages,
            used_pages,
            free_pages,
            map_size,
        ))
    }

    /// Get environment statistics
    pub fn stat(&self) -> Result<crate::meta::DbStats> {
        let inner = self.inner();
        let meta = inner.meta()?;

        Ok(crate::meta::DbStats {
            psize: meta.psize,
            depth: meta.main_db.depth,
            branch_pages: meta.main_db.branch_pages,
            leaf_pages: meta.main_db.leaf_pages,
            overflow_pages: meta.main_db.overflow_pages,
            entries: meta.main_db.entries,
        })
    }
}

impl<S: State> Drop for Environment<S> {
    fn drop(&mut self) {
        if let Some(_inner) = self.inner.take() {
            // Meta page alternation handled in commit
        }
    }
}
