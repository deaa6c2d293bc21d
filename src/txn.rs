//! Transaction management with compile-time safety

use parking_lot::MutexGuard;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use crate::env::{state, Environment};
use crate::error::{Error, PageId, Result, TransactionId};
use crate::freelist::FreeList;
use crate::meta::DbInfo;
pub use crate::nested_txn::NestedTransactionExt;
use crate::page::{Page, PageFlags};
use crate::segregated_freelist::SegregatedFreeList;

/// Helper function to safely read from a RwLock
fn read_lock<'a, T>(
    lock: &'a std::sync::RwLock<T>,
    context: &'static str,
) -> Result<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| Error::Custom(format!("RwLock poisoned: {}", context).into()))
}

/// Helper function to safely write to a RwLock
fn write_lock<'a, T>(
    lock: &'a std::sync::RwLock<T>,
    context: &'static str,
) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| Error::Custom(format!("RwLock poisoned: {}", context).into()))
}

/// Helper function to get a mutable reference from HashMap with proper error
fn get_mut_page<'a>(pages: &'a mut HashMap<PageId, Box<Page>>, page_id: &PageId) -> Result<&'a mut Box<Page>> {
    pages.get_mut(page_id)
        .ok_or_else(|| Error::Custom(format!("Page {} not found in dirty pages", page_id.0).into()))
}

/// Allocate a fresh page for the free database's own tree, in the same
/// way [`Transaction::alloc_page`] does for the main tree, but usable
/// from inside `commit()` where `self.mode_data` is already borrowed.
fn alloc_free_db_page(
    inner: &crate::env::EnvInner,
    dirty: &mut DirtyPages,
    next_pgno: &mut PageId,
    flags: PageFlags,
) -> Result<PageId> {
    let page_id = PageId(inner.next_page_id.fetch_add(1, Ordering::SeqCst));
    *next_pgno = PageId(page_id.0 + 1);
    let page = Page::new(page_id, flags | PageFlags::DIRTY);
    dirty.mark_dirty(page_id, page);
    dirty.allocated.push(page_id);
    Ok(page_id)
}

/// Make a free-database page modifiable, copy-on-write if it isn't
/// already dirty in this commit.
fn dirty_free_db_page<'a>(
    dirty: &'a mut DirtyPages,
    inner: &crate::env::EnvInner,
    checksum_mode: crate::checksum::ChecksumMode,
    page_id: PageId,
) -> Result<&'a mut Box<Page>> {
    if !dirty.pages.contains_key(&page_id) {
        let num_pages = inner.io.size_in_pages();
        if page_id.0 >= num_pages {
            return Err(Error::InvalidPageId(page_id));
        }
        let page = inner.io.read_page(page_id)?;
        if checksum_mode != crate::checksum::ChecksumMode::None {
            use crate::checksum::ChecksummedPage;
            page.validate_checksum()?;
        }
        let mut new_page = Page::new(page_id, page.header.flags | PageFlags::DIRTY);
        new_page.header = page.header;
        new_page.header.flags |= PageFlags::DIRTY;
        new_page.data.copy_from_slice(&page.data);
        dirty.mark_dirty(page_id, new_page);
    }
    get_mut_page(&mut dirty.pages, &page_id)
}

/// Insert `(key, value)` into the free database's tree, walking down
/// from the root and splitting the leaf (and, transitively, any full
/// ancestor branch) rather than rejecting the insert when a page is
/// full. See `insert_into_free_db`'s caller for why this matters: a
/// flat single-page insert would silently drop retired page-list
/// entries once the free database's root leaf filled up.
fn insert_into_free_db(
    inner: &crate::env::EnvInner,
    dirty: &mut DirtyPages,
    next_pgno: &mut PageId,
    checksum_mode: crate::checksum::ChecksumMode,
    free_db_info: &mut DbInfo,
    key: &[u8],
    value: &[u8],
) -> Result<()> {
    use crate::page::SearchResult;

    let mut path = Vec::new();
    let mut page_id = free_db_info.root;
    loop {
        let page = dirty_free_db_page(dirty, inner, checksum_mode, page_id)?;
        if page.header.flags.contains(PageFlags::LEAF) {
            break;
        }
        let child = crate::branch::BranchPage::find_child(page, key)?;
        path.push(page_id);
        page_id = child;
    }
    let leaf_id = page_id;

    // An entry for this key may already be on disk from a prior commit
    // (the in-memory freelist reloads the whole free database on every
    // write txn); replace it instead of erroring on "key exists".
    {
        let leaf = get_mut_page(&mut dirty.pages, &leaf_id)?;
        if let SearchResult::Found { index } = leaf.search_key(key)? {
            leaf.remove_node(index)?;
        }
    }

    let leaf = get_mut_page(&mut dirty.pages, &leaf_id)?;
    match leaf.add_node_sorted(key, value) {
        Ok(_) => {
            free_db_info.entries += 1;
            Ok(())
        }
        Err(Error::Custom(msg)) if msg.contains("Page full") => {
            split_free_db_leaf(inner, dirty, next_pgno, leaf_id, key, value, path, free_db_info)
        }
        Err(e) => Err(e),
    }
}

/// Split a full free-database leaf page in two, insert `(key, value)`
/// into whichever half it belongs to, and bubble the new separator key
/// up through `path` (the branch pages between the root and this leaf).
fn split_free_db_leaf(
    inner: &crate::env::EnvInner,
    dirty: &mut DirtyPages,
    next_pgno: &mut PageId,
    leaf_id: PageId,
    key: &[u8],
    value: &[u8],
    path: Vec<PageId>,
    free_db_info: &mut DbInfo,
) -> Result<()> {
    let (right_nodes, median_key) = {
        let leaf = get_mut_page(&mut dirty.pages, &leaf_id)?;
        let (right_nodes, median_key) = leaf.split()?;
        let mid_idx = leaf.header.num_keys as usize / 2;
        leaf.truncate(mid_idx);
        (right_nodes, median_key)
    };

    let right_id = alloc_free_db_page(inner, dirty, next_pgno, PageFlags::LEAF)?;
    {
        let right = get_mut_page(&mut dirty.pages, &right_id)?;
        for (k, v) in &right_nodes {
            right.add_node_sorted(k, v)?;
        }
    }

    if key < median_key.as_slice() {
        get_mut_page(&mut dirty.pages, &leaf_id)?.add_node_sorted(key, value)?;
    } else {
        get_mut_page(&mut dirty.pages, &right_id)?.add_node_sorted(key, value)?;
    }
    free_db_info.entries += 1;
    free_db_info.leaf_pages += 1;

    propagate_free_db_split(inner, dirty, next_pgno, path, median_key, right_id, free_db_info)
}

/// Re-split a full branch page together with the separator key/child
/// being bubbled up into it, the way `BTree::split_branch_page` does
/// for the main tree: gather all existing entries plus the new one,
/// sort, and divide evenly so the promoted median reflects the new
/// entry too (not just the page's pre-existing contents).
fn split_free_db_branch(
    inner: &crate::env::EnvInner,
    dirty: &mut DirtyPages,
    next_pgno: &mut PageId,
    branch_id: PageId,
    new_key: Vec<u8>,
    new_child: PageId,
) -> Result<(Vec<u8>, PageId)> {
    let leftmost_child = {
        let page = get_mut_page(&mut dirty.pages, &branch_id)?;
        crate::branch::BranchPage::get_leftmost_child(page)?
    };

    let mut all_entries = Vec::new();
    {
        let page = get_mut_page(&mut dirty.pages, &branch_id)?;
        for i in 0..page.header.num_keys as usize {
            let node = page.node(i)?;
            all_entries.push((node.key()?.to_vec(), node.page_number()?));
        }
    }
    all_entries.push((new_key, new_child));
    all_entries.sort_by(|a, b| a.0.cmp(&b.0));

    let split_point = all_entries.len() / 2;
    let median_key = all_entries[split_point].0.clone();
    let median_child = all_entries[split_point].1;

    let right_id = alloc_free_db_page(inner, dirty, next_pgno, PageFlags::BRANCH)?;

    {
        let left = get_mut_page(&mut dirty.pages, &branch_id)?;
        left.clear();
        left.header.flags = PageFlags::BRANCH;
        crate::branch::BranchPage::init_from_split(left, leftmost_child, &all_entries[..split_point])?;
    }
    {
        let right = get_mut_page(&mut dirty.pages, &right_id)?;
        crate::branch::BranchPage::init_from_split(right, median_child, &all_entries[split_point + 1..])?;
    }

    Ok((median_key, right_id))
}

/// Bubble a leaf (or branch) split's separator key up through `path`,
/// splitting each ancestor branch in turn if it's also full, and
/// growing the tree by one level (a fresh branch root) if the split
/// reaches the top.
fn propagate_free_db_split(
    inner: &crate::env::EnvInner,
    dirty: &mut DirtyPages,
    next_pgno: &mut PageId,
    mut path: Vec<PageId>,
    mut median_key: Vec<u8>,
    mut right_child: PageId,
    free_db_info: &mut DbInfo,
) -> Result<()> {
    loop {
        let parent_id = match path.pop() {
            Some(id) => id,
            None => {
                let old_root = free_db_info.root;
                let new_root_id = alloc_free_db_page(inner, dirty, next_pgno, PageFlags::BRANCH)?;
                let new_root = get_mut_page(&mut dirty.pages, &new_root_id)?;
                crate::branch::BranchPage::init_root(new_root, &median_key, old_root, right_child)?;
                free_db_info.root = new_root_id;
                free_db_info.depth += 1;
                free_db_info.branch_pages += 1;
                return Ok(());
            }
        };

        let parent = get_mut_page(&mut dirty.pages, &parent_id)?;
        match crate::branch::BranchPage::add_split_child(parent, &median_key, right_child) {
            Ok(()) => return Ok(()),
            Err(Error::Custom(msg)) if msg.contains("Page full") => {
                let (new_median, new_right) =
                    split_free_db_branch(inner, dirty, next_pgno, parent_id, median_key, right_child)?;
                free_db_info.branch_pages += 1;
                median_key = new_median;
                right_child = new_right;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Transaction mode marker traits
pub mod mode {
    /// Sealed trait for transaction modes
    pub(crate) mod sealed {
        pub trait Sealed {}
    }

    /// Transaction mode trait
    pub trait Mode: sealed::Sealed {
        /// Whether this is a write transaction
        const IS_WRITE: bool;
    }
}

/// Read-only transaction mode
#[derive(Debug)]
pub struct Read;

impl crate::txn::mode::sealed::Sealed for Read {}
impl mode::Mode for Read {
    const IS_WRITE: bool = false;
}

/// Read-write transaction mode
#[derive(Debug)]
pub struct Write;

impl crate::txn::mode::sealed::Sealed for Write {}
impl mode::Mode for Write {
    const IS_WRITE: bool = true;
}

/// Dirty page tracking for write transactions
pub struct DirtyPages {
    /// Map of page ID to dirty page
    pub(crate) pages: HashMap<PageId, Box<Page>>,
    /// Allocated pages that need to be written
    pub(crate) allocated: Vec<PageId>,
    /// Pages marked for COW but not yet copied (lazy COW)
    #[allow(dead_code)]
    pub(crate) cow_pending: HashMap<PageId, PageId>, // old_id -> new_id
    /// Sorted index of `pages`, carrying the age/pinned bookkeeping the
    /// spill victim scorer needs. Every `mark_dirty` touches this in
    /// lockstep; every removal from `pages` (spill, sift, abort) removes
    /// the matching entry here too.
    pub(crate) dpl: crate::dpl::Dpl,
    /// Pages written out to their on-disk slot ahead of commit because
    /// the dirty set exceeded `dp_limit`. Consulted by `get_page_cow`/
    /// `get_page_mut` so a page this txn already owns gets read back and
    /// re-dirtied at the same pgno instead of copy-on-written again.
    pub(crate) spill_list: crate::spill::SpillList,
}

impl DirtyPages {
    /// Create new dirty page tracker
    pub(crate) fn new() -> Self {
        Self {
            pages: HashMap::new(),
            allocated: Vec::new(),
            cow_pending: HashMap::new(),
            dpl: crate::dpl::Dpl::new(),
            spill_list: crate::spill::SpillList::new(),
        }
    }

    /// Mark a page as dirty
    pub(crate) fn mark_dirty(&mut self, page_id: PageId, page: Box<Page>) {
        self.dpl.touch(page_id, 1);
        self.pages.insert(page_id, page);
    }

    /// Get a dirty page
    pub(crate) fn get(&self, page_id: &PageId) -> Option<&Page> {
        self.pages.get(page_id).map(|p| p.as_ref())
    }

    /// Get a mutable dirty page
    #[allow(dead_code)]
    pub(crate) fn get_mut(&mut self, page_id: &PageId) -> Option<&mut Page> {
        self.pages.get_mut(page_id).map(|p| p.as_mut())
    }

    /// Whether `page_id` belongs to this txn but currently lives only on
    /// disk, written out by an earlier spill and not yet re-dirtied.
    pub(crate) fn is_spilled(&self, page_id: PageId) -> bool {
        self.spill_list.is_live(page_id)
    }

    /// Re-attach a page this txn already owns after reading it back from
    /// its spilled-out on-disk slot: clears the spill tombstone and
    /// re-enters it in the in-memory dirty set at the same pgno. No new
    /// pgno is allocated, since this page was never visible to any reader.
    pub(crate) fn reattach_spilled(&mut self, page_id: PageId, page: Box<Page>) {
        self.spill_list.tombstone(page_id);
        self.mark_dirty(page_id, page);
    }

    /// If the in-memory dirty set exceeds `dp_limit`, write the
    /// coldest/largest entries out to their on-disk slot via `io` and
    /// drop them from memory, recording each in `spill_list` so a later
    /// touch can read it back and re-dirty it.
    pub(crate) fn maybe_spill(
        &mut self,
        io: &dyn crate::io::IoBackend,
        dp_limit: usize,
        checksum_mode: crate::checksum::ChecksumMode,
    ) -> Result<()> {
        let held = self.dpl.pages_including_loose();
        let dp_limit = dp_limit as u64;
        if held <= dp_limit {
            return Ok(());
        }

        let plan = crate::spill::select_victims(&self.dpl, held - dp_limit);
        if plan.victims.is_empty() {
            return Ok(());
        }

        for &pgno in &plan.victims {
            if let Some(page) = self.pages.get_mut(&pgno) {
                if checksum_mode != crate::checksum::ChecksumMode::None {
                    use crate::checksum::ChecksummedPage;
                    page.update_checksum();
                }
                io.write_page(page)?;
            }
            self.pages.remove(&pgno);
            self.spill_list.push(pgno);
        }

        let victims: crate::pnl::Pnl = plan.victims.iter().copied().collect();
        self.dpl.sift(&victims, true);
        Ok(())
    }
}

/// Transaction data shared between read and write modes
pub(crate) struct TxnData<'env> {
    /// Reference to environment
    pub(crate) env: &'env Environment<state::Open>,
    /// Transaction ID
    id: TransactionId,
    /// Database info cache
    pub(crate) databases: HashMap<Option<String>, DbInfo>,
}

/// A database transaction
pub struct Transaction<'env, M: mode::Mode> {
    /// Shared transaction data
    pub(crate) data: TxnData<'env>,
    /// Mode-specific data
    pub(crate) mode_data: ModeData<'env>,
    /// Phantom for mode
    _mode: PhantomData<M>,
}

/// Mode-specific transaction data
pub(crate) enum ModeData<'env> {
    /// Read transaction data
    Read {
        /// Reader slot index (for cleanup)
        reader_slot: Option<usize>,
    },
    /// Write transaction data
    Write {
        /// Write lock guard
        _write_guard: MutexGuard<'env, ()>,
        /// Dirty pages
        dirty: Box<DirtyPages>,
        /// Free list manager (old)
        freelist: FreeList,
        /// Segregated free list (new)
        segregated_freelist: Box<Option<SegregatedFreeList>>,
        /// Next page ID to allocate
        next_pgno: PageId,
        /// Stack of nested-transaction savepoints. The basal write txn's
        /// own state is index -1 (not stored); each `begin_nested` pushes
        /// a snapshot of everything a child might mutate, so `abort` on
        /// the child can roll back to exactly this point without
        /// touching anything the parent did before the child began.
        savepoints: Vec<Savepoint>,
    },
}

/// A snapshot of everything a nested write transaction may shadow:
/// dirty pages, allocation bookkeeping, the dbi-state cache, and the
/// free list. Restoring one is the "discard" half of nested-txn abort;
/// dropping one without restoring is the "merge" half of nested-txn
/// commit (the child already mutated the parent's own fields in place,
/// so committing is simply forgetting the rollback point).
pub(crate) struct Savepoint {
    pages: HashMap<PageId, Box<Page>>,
    allocated: Vec<PageId>,
    next_pgno: PageId,
    databases: HashMap<Option<String>, DbInfo>,
    freelist: FreeList,
    dpl: crate::dpl::Dpl,
    spill_list: crate::spill::SpillList,
}

impl<'env> Transaction<'env, Read> {
    /// Create a new read transaction
    pub(crate) fn new_read(env: &'env Environment<state::Open>) -> Result<Self> {
        let inner = env.inner();

        // Get the current transaction ID for snapshot isolation
        // Read transactions see the state as of the last committed write transaction
        let current_txn_id = TransactionId(inner.txn_id.load(Ordering::Acquire));

        // Try to acquire a reader slot
        let reader_slot = inner.readers.acquire(current_txn_id).map_err(|_| Error::ReadersFull)?;

        // Publish the snapshot bounds this reader observed: lets the
        // writer's GC reclaim scan compute its bound without re-reading
        // this slot's actual tree root.
        let pages_used = inner.io.size_in_pages();
        inner.readers.publish_snapshot(reader_slot, pages_used, 0);

        // Copy database info at this snapshot
        let databases = read_lock(&inner.databases, "reading databases for read transaction")?.clone();

        Ok(Self {
            data: TxnData { env, id: current_txn_id, databases },
            mode_data: ModeData::Read { reader_slot: Some(reader_slot) },
            _mode: PhantomData,
        })
    }
}

impl<'env> Transaction<'env, Write> {
    /// Create a new write transaction
    pub(crate) fn new_write(env: &'env Environment<state::Open>) -> Result<Self> {
        let inner = env.inner();

        // Get write lock first to ensure exclusive access
        let write_guard = inner.write_lock.lock();

        // Increment transaction ID for the new write transaction
        // This ensures write transactions have unique, monotonically increasing IDs
        let new_txn_id = TransactionId(inner.txn_id.fetch_add(1, Ordering::AcqRel) + 1);

        // Copy database info under write lock to ensure consistency
        let databases = read_lock(&inner.databases, "reading databases for write transaction")?.clone();

        // Get current meta page to read database state
        let meta = inner.meta()?;
        let next_pgno = PageId(meta.last_pg.0 + 1);

        // Create a temporary read transaction to load the free list
        // This is safe because we hold the write lock
        let temp_read_txn = Transaction {
            data: TxnData {
                env,
                id: TransactionId(meta.last_txnid.0), // Use last committed txn ID
                databases: databases.clone(),
            },
            mode_data: ModeData::Read { reader_slot: None },
            _mode: PhantomData::<Read>,
        };

        // Load the free list from the last committed state
        let mut freelist =
            FreeList::load(&temp_read_txn, &meta.free_db).unwrap_or_else(|_| FreeList::new());

        // Update freelist with current reader state
        if let Some(oldest_reader) = inner.readers.oldest_reader() {
            freelist.set_oldest_reader(oldest_reader);
        } else {
            // No active readers
            freelist.set_oldest_reader(TransactionId(0));
        }

        // Update free pages based on reader state
        freelist.update_free_pages();

        // Initialize segregated freelist if enabled
        let segregated_freelist = if env.config().use_segregated_freelist {
            let seg_list = SegregatedFreeList::new();
            // Migrate existing free pages from simple freelist
            // This will be populated as pages are freed
            Some(seg_list)
        } else {
            None
        };

        Ok(Self {
            data: TxnData { env, id: new_txn_id, databases },
            mode_data: ModeData::Write {
                _write_guard: write_guard,
                dirty: Box::new(DirtyPages::new()),
                freelist,
                segregated_freelist: Box::new(segregated_freelist),
                next_pgno,
                savepoints: Vec::new(),
            },
            _mode: PhantomData,
        })
    }
}

/// Type alias for read-only transaction
pub type ReadTransaction<'env> = Transaction<'env, Read>;

/// Type alias for read-write transaction
pub type WriteTransaction<'env> = Transaction<'env, Write>;

impl<'env, M: mode::Mode> Transaction<'env, M> {
    /// Get the transaction ID
    pub fn id(&self) -> TransactionId {
        self.data.id
    }

    /// Get a page by ID
    #[inline]
    pub fn get_page(&self, page_id: PageId) -> Result<&Page> {
        // Validate page ID bounds first
        let inner = self.data.env.inner();
        let num_pages = inner.io.size_in_pages();
        if page_id.0 >= num_pages {
            return Err(Error::InvalidPageId(page_id));
        }
        
        // Special handling for meta pages (0 and 1)
        if page_id.0 <= 1 {
            // Meta pages should always exist, but double-check
            if num_pages < 2 {
                return Err(Error::Corruption {
                    details: "Database file too small to contain meta pages".to_string(),
                    page_id: Some(page_id),
                });
            }
        }
        
        // Check dirty pages first if write transaction
        if M::IS_WRITE {
            if let ModeData::Write { ref dirty, .. } = self.mode_data {
                if let Some(page) = dirty.get(&page_id) {
                    return Ok(page);
                }
            }
        }

        // For read operations, use zero-copy access directly from mmap
        // SAFETY: The returned page reference is valid for the transaction lifetime
        // because:
        // 1. The environment (and thus the mmap) outlives the transaction
        // 2. The mmap base address is stable during the transaction
        // 3. Pages are immutable once written (COW semantics)
        // 4. We validated the page ID is within bounds above
        let page = unsafe { inner.io.get_page_ref(page_id)? };
        
        // Validate checksum if enabled
        self.validate_page_checksum(page)?;
        
        Ok(page)
    }

    /// Get database info
    pub fn db_info(&self, name: Option<&str>) -> Result<&DbInfo> {
        self.data.databases.get(&name.map(|s| s.to_string())).ok_or(Error::InvalidDatabase)
    }

    /// Update database info (only for write transactions)
    pub fn update_db_info(&mut self, name: Option<&str>, info: DbInfo) -> Result<()> {
        if !M::IS_WRITE {
            return Err(Error::InvalidOperation("Cannot update database info in read transaction"));
        }

        self.data.databases.insert(name.map(|s| s.to_string()), info);
        Ok(())
    }
    
    /// Validate page checksum based on environment checksum mode
    #[inline]
    fn validate_page_checksum(&self, page: &Page) -> Result<()> {
        let inner = self.data.env.inner();
        
        match inner.checksum_mode {
            crate::checksum::ChecksumMode::None => Ok(()),
            crate::checksum::ChecksumMode::MetaOnly => {
                // Only validate meta pages
                if page.header.flags.contains(PageFlags::META) {
                    use crate::checksum::ChecksummedPage;
                    page.validate_checksum()
                } else {
                    Ok(())
                }
            }
            crate::checksum::ChecksumMode::Full => {
                // Validate all pages
                use crate::checksum::ChecksummedPage;
                page.validate_checksum()
            }
        }
    }

    /// Commit the transaction
    pub fn commit(mut self) -> Result<()> {
        // Extract checksum mode before the mutable borrow
        let checksum_mode = self.data.env.inner().checksum_mode;

        if self.nesting_depth() > 0 {
            return Err(Error::InvalidOperation(
                "cannot commit a write transaction while a nested transaction is still open",
            ));
        }

        match self.mode_data {
            ModeData::Read { .. } => {
                // Nothing to do for read transactions
                Ok(())
            }
            ModeData::Write {
                ref mut dirty,
                ref mut freelist,
                ref mut segregated_freelist,
                ref mut next_pgno,
                ..
            } => {
                if dirty.pages.is_empty() && dirty.spill_list.is_empty() && freelist.pending_len() == 0 {
                    // No changes, nothing to commit
                    return Ok(());
                }

                let inner = self.data.env.inner();

                // Get oldest reader to determine which pages can be freed
                if let Some(oldest_reader) = inner.readers.oldest_reader() {
                    freelist.set_oldest_reader(oldest_reader);
                }

                // Don't commit here - we'll do it after updating reader state

                // Get current meta page and determine which meta-page slot
                // (the troika's tail) this commit will write to
                let current_meta = inner.meta()?;
                let tail_slot = inner.troika()?.tail;

                // Create new meta content
                let mut new_meta = current_meta;
                new_meta.bootid = inner.bootid;

                // Update transaction ID and last page
                new_meta.last_txnid = self.data.id;
                new_meta.last_pg =
                    PageId(next_pgno.0.saturating_sub(1).max(current_meta.last_pg.0));

                // Update main database info
                if let Some(main_db_info) = self.data.databases.get(&None) {
                    new_meta.main_db = *main_db_info;
                }

                // Update freelist with current reader state
                if let Some(oldest_reader) = inner.readers.oldest_reader() {
                    freelist.set_oldest_reader(oldest_reader);
                    if let Some(seg_list) = segregated_freelist.as_mut() {
                        seg_list.update_oldest_reader(oldest_reader);
                    }
                } else {
                    // No active readers
                    freelist.set_oldest_reader(TransactionId(0));
                    if let Some(seg_list) = segregated_freelist.as_mut() {
                        seg_list.update_oldest_reader(TransactionId(0));
                    }
                }

                // Commit pending pages to the appropriate freelist
                if let Some(seg_list) = segregated_freelist.as_mut() {
                    seg_list.commit(self.data.id);
                } else {
                    freelist.commit_pending(self.data.id);
                }

                // Save the freelist to the free database if needed
                if freelist.has_txn_free_pages() {
                    // Get the data to save before any borrows
                    let freelist_data = freelist.get_save_data();

                    // Make a copy of free_db info to modify
                    let mut free_db_info = new_meta.free_db;

                    // If free database doesn't exist, create it
                    if free_db_info.root.0 == 0 {
                        // Allocate a new page for the free database root
                        let page_id = PageId(next_pgno.0);
                        next_pgno.0 += 1;
                        
                        // Ensure we're not allocating beyond reasonable limits
                        const MAX_PAGE_ID: u64 = 1 << 48; // 256TB with 4KB pages
                        if page_id.0 >= MAX_PAGE_ID {
                            return Err(Error::Custom(
                                format!("Page ID {} exceeds maximum allowed value", page_id.0).into()
                            ));
                        }

                        let page = Page::new(page_id, PageFlags::LEAF | PageFlags::DIRTY);
                        dirty.mark_dirty(page_id, page);

                        let root_page = get_mut_page(&mut dirty.pages, &page_id)?;
                        root_page.header.num_keys = 0;

                        free_db_info.root = page_id;
                        free_db_info.leaf_pages = 1;
                        free_db_info.depth = 1;
                    }

                    // Save the freelist data to the free database. Splits the
                    // leaf (and, if needed, bubbles the split up through its
                    // ancestor branches) instead of dropping an entry when the
                    // current leaf is full: the reclaim table must never lose
                    // a retired page-list once it no longer fits on a single
                    // page.
                    for (key, value) in freelist_data {
                        insert_into_free_db(
                            inner,
                            dirty,
                            next_pgno,
                            checksum_mode,
                            &mut free_db_info,
                            &key,
                            &value,
                        )?;
                    }

                    // Update meta with the free database info
                    new_meta.free_db = free_db_info;
                }

                // Write all dirty pages BEFORE meta page
                // This ensures data is on disk before the meta page references it
                for (_page_id, page) in dirty.pages.iter_mut() {
                    // Update checksum if enabled
                    if checksum_mode != crate::checksum::ChecksumMode::None {
                        use crate::checksum::ChecksummedPage;
                        page.update_checksum();
                    }

                    // Write page to disk
                    inner.io.write_page(page)?;
                }

                // Durability: translate the environment's durability mode
                // into the sync-mode bitflags `plan_commit` understands,
                // and drive the resulting ordered steps. `SyncData` and
                // `SyncMeta` both resolve to `inner.io.sync()` on this
                // mmap-backed I/O layer (there is no separate data/meta
                // fsync range), but the step order is still the one the
                // durability engine prescribes.
                let sync_mode = match inner.durability {
                    crate::env::DurabilityMode::NoSync => crate::durability::SyncMode::UTTERLY_NOSYNC,
                    crate::env::DurabilityMode::AsyncFlush => crate::durability::SyncMode::SAFE_NOSYNC,
                    crate::env::DurabilityMode::SyncData => crate::durability::SyncMode::NOMETASYNC,
                    crate::env::DurabilityMode::FullSync => crate::durability::SyncMode::empty(),
                };

                let page_size = crate::page::PAGE_SIZE as u64;
                let pending_geometry = crate::geometry::Geometry::new(
                    current_meta.geometry.lower,
                    current_meta.mapsize / page_size,
                    current_meta.geometry.upper,
                    next_pgno.0,
                    current_meta.geometry.shrink_pages(),
                    current_meta.geometry.grow_pages(),
                );
                new_meta.geometry = pending_geometry;

                let steps = crate::durability::plan_commit(
                    sync_mode,
                    tail_slot,
                    &pending_geometry,
                    &current_meta.geometry,
                    false,
                );

                for step in steps {
                    match step {
                        crate::durability::DurabilityStep::SyncData { .. } => {
                            if !dirty.pages.is_empty() || !dirty.spill_list.is_empty() {
                                inner.io.sync()?;
                            }
                        }
                        crate::durability::DurabilityStep::StampSignature(sig) => {
                            new_meta.signature = match sig {
                                crate::troika::Signature::Weak => 0,
                                crate::troika::Signature::Steady(_) => 1,
                            };
                        }
                        crate::durability::DurabilityStep::WriteMeta { slot } => {
                            let mut meta_page =
                                Page::from_meta(&new_meta, crate::meta::META_PAGES[slot]);
                            if checksum_mode != crate::checksum::ChecksumMode::None {
                                use crate::checksum::ChecksummedPage;
                                meta_page.update_checksum();
                            }
                            inner.io.write_page(&meta_page)?;
                        }
                        crate::durability::DurabilityStep::SyncMeta => {
                            inner.io.sync()?;
                        }
                        crate::durability::DurabilityStep::RepublishTroika => {
                            // The troika is recomputed from the on-disk
                            // slots on every read; nothing to propagate.
                        }
                        crate::durability::DurabilityStep::ShrinkFile { .. } => {
                            // File shrinking requires truncating the
                            // backing mmap, which this I/O backend does
                            // not yet support.
                        }
                    }
                }

                // Update databases in environment atomically
                {
                    let mut env_dbs = write_lock(&inner.databases, "updating databases on commit")?;
                    *env_dbs = self.data.databases.clone();
                }

                // Update the global transaction ID to reflect this commit
                // This makes the committed changes visible to new readers
                inner.txn_id.store(self.data.id.0, Ordering::Release);

                // The free list changes are already persisted in the free_db
                // They will be loaded by the next write transaction

                Ok(())
            }
        }
    }

    /// Abort the transaction
    pub fn abort(self) {
        // Transaction is aborted on drop
    }
}

impl<'env> Transaction<'env, Read> {
    /// Upgrade a read transaction to a write transaction
    pub fn upgrade(self) -> Result<Transaction<'env, Write>> {
        let inner = self.data.env.inner();

        // Try to acquire write lock
        let _write_guard =
            inner.write_lock.try_lock().ok_or(Error::Conflict(crate::error::ConflictDetails {
                txn_id: self.data.id,
                conflicting_page: PageId(0),
                operation: crate::error::Operation::Write,
            }))?;

        // Drop the read transaction and create a new write transaction
        let env = self.data.env;
        drop(self);

        // Now create a fresh write transaction
        Transaction::new_write(env)
    }
}

impl<'env> Transaction<'env, Write> {
    /// Get a mutable page with Copy-on-Write semantics
    /// Returns the page ID (which may be new) and a mutable reference to the page
    pub fn get_page_cow(&mut self, page_id: PageId) -> Result<(PageId, &mut Page)> {
        // Validate page ID bounds first
        let inner = self.data.env.inner();
        let num_pages = inner.io.size_in_pages();
        if page_id.0 >= num_pages {
            return Err(Error::InvalidPageId(page_id));
        }
        
        // Check if already dirty in this transaction
        if let ModeData::Write { ref dirty, .. } = self.mode_data {
            if dirty.pages.contains_key(&page_id) {
                if let ModeData::Write { ref mut dirty, .. } = self.mode_data {
                    return Ok((page_id, get_mut_page(&mut dirty.pages, &page_id)?.as_mut()));
                }
            }
        }

        // Page was this txn's own copy but got spilled out under dirty-set
        // pressure: read it back and re-dirty it at the same pgno rather
        // than copy-on-writing it again under a fresh pgno.
        let was_spilled = if let ModeData::Write { ref dirty, .. } = self.mode_data {
            dirty.is_spilled(page_id)
        } else {
            false
        };
        if was_spilled {
            let page = inner.io.read_page(page_id)?;
            self.validate_page_checksum(&page)?;
            if let ModeData::Write { ref mut dirty, .. } = self.mode_data {
                dirty.reattach_spilled(page_id, page);
                return Ok((page_id, get_mut_page(&mut dirty.pages, &page_id)?.as_mut()));
            }
        }

        // Page is not dirty - need to copy it (Copy-on-Write)
        let original_page = inner.io.read_page(page_id)?;
        
        // Validate checksum if enabled
        self.validate_page_checksum(&original_page)?;

        // Check if this is a leaf page with overflow references that need copying
        let overflow_updates = if original_page.header.flags.contains(PageFlags::LEAF)
            && original_page.header.num_keys > 0
        {
            let mut updates = Vec::new();
            for i in 0..original_page.header.num_keys as usize {
                if let Ok(node) = original_page.node(i) {
                    if let Ok(Some(overflow_id)) = node.overflow_page() {
                        updates.push((i, overflow_id));
                    }
                } 
            }
            updates
        } else {
            Vec::new()
        };

        // Copy overflow chains if needed
        let mut overflow_mappings = Vec::new();
        for (node_idx, old_overflow_id) in overflow_updates {
            let new_overflow_id = crate::overflow::copy_overflow_chain(self, old_overflow_id)?;
            overflow_mappings.push((node_idx, new_overflow_id));
        }

        // Now create the new page with updated overflow references
        if let ModeData::Write { ref mut dirty, ref mut freelist, ref mut next_pgno, .. } =
            self.mode_data
        {
            // Allocate a new page for the copy
            let new_page_id = if let Some(free_page_id) = freelist.alloc_page() {
                free_page_id
            } else {
                // Allocate new page from end of file
                let id =
                    PageId(inner.next_page_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
                *next_pgno = PageId(id.0 + 1);
                id
            };

            // Get page from pool or allocate new one
            let mut new_page =
                inner.page_pool.get(new_page_id, original_page.header.flags | PageFlags::DIRTY);

            // Copy header fields (except pgno and flags which are already set)
            new_page.header.num_keys = original_page.header.num_keys;
            new_page.header.lower = original_page.header.lower;
            new_page.header.upper = original_page.header.upper;
            new_page.header.overflow = original_page.header.overflow;
            new_page.header.next_pgno = original_page.header.next_pgno;
            new_page.header.prev_pgno = original_page.header.prev_pgno;
            new_page.header.checksum = 0; // Reset checksum for new page

            // Copy data
            new_page.data = original_page.data;

            // Update overflow references in the new page
            // Only update if we have overflow mappings
            if !overflow_mappings.is_empty() {
                // We need to be careful here - the node indices from the original page
                // should still be valid in the copied page since we copied the data array as-is
                for (node_idx, new_overflow_id) in overflow_mappings {
                    // Double-check that the node index is valid
                    if node_idx >= new_page.header.num_keys as usize {
                        return Err(Error::Corruption {
                            details: format!(
                                "Node index {} out of bounds during COW (num_keys={})",
                                node_idx, new_page.header.num_keys
                            ),
                            page_id: Some(page_id),
                        });
                    }

                    let mut node_data = new_page.node_data_mut(node_idx)?;
                    node_data.set_overflow(new_overflow_id)?;
                }
            }

            // Mark the new page as dirty and track allocation
            dirty.mark_dirty(new_page_id, new_page);
            dirty.allocated.push(new_page_id);

            // Free the old page (it will be added to freelist after oldest reader)
            freelist.free_page(page_id);

            // Spill other victims if over budget, but never the page we're
            // about to hand back to the caller for writing.
            dirty.dpl.set_pinned(new_page_id, true);
            dirty.maybe_spill(inner.io.as_ref(), inner.config.dp_limit, inner.checksum_mode)?;
            dirty.dpl.set_pinned(new_page_id, false);

            Ok((new_page_id, get_mut_page(&mut dirty.pages, &new_page_id)?))
        } else {
            unreachable!("Write transaction must have write mode data");
        }
    }

    /// Make a page modifiable, copy-on-write if it isn't already dirty in this txn.
    pub fn get_page_mut(&mut self, page_id: PageId) -> Result<&mut Page> {
        // Validate page ID bounds first
        let inner = self.data.env.inner();
        let num_pages = inner.io.size_in_pages();
        if page_id.0 >= num_pages {
            return Err(Error::InvalidPageId(page_id));
        }

        // First check if already dirty
        let already_dirty = if let ModeData::Write { ref dirty, .. } = self.mode_data {
            dirty.pages.contains_key(&page_id)
        } else {
            unreachable!("Write transaction must have write mode data");
        };
        
        if already_dirty {
            if let ModeData::Write { ref mut dirty, .. } = self.mode_data {
                return Ok(get_mut_page(&mut dirty.pages, &page_id)?);
            }
        }

        // Page may have been this txn's own dirty copy that got spilled
        // out under dirty-set pressure: re-dirty it at the same pgno
        // rather than reading the stale on-disk original as a fresh page.
        let was_spilled = if let ModeData::Write { ref dirty, .. } = self.mode_data {
            dirty.is_spilled(page_id)
        } else {
            false
        };

        // Load and copy page
        let mut page = inner.io.read_page(page_id)?;

        // Validate checksum if enabled
        self.validate_page_checksum(&page)?;

        if was_spilled {
            if let ModeData::Write { ref mut dirty, .. } = self.mode_data {
                dirty.reattach_spilled(page_id, page);
                return Ok(get_mut_page(&mut dirty.pages, &page_id)?);
            }
        }

        // Mark as dirty
        page.header.flags.insert(PageFlags::DIRTY);

        if let ModeData::Write { ref mut dirty, .. } = self.mode_data {
            dirty.mark_dirty(page_id, page);
            dirty.dpl.set_pinned(page_id, true);
            dirty.maybe_spill(inner.io.as_ref(), inner.config.dp_limit, inner.checksum_mode)?;
            dirty.dpl.set_pinned(page_id, false);
            Ok(get_mut_page(&mut dirty.pages, &page_id)?)
        } else {
            unreachable!("Write transaction must have write mode data");
        }
    }

    /// Allocate a new page
    pub fn alloc_page(&mut self, flags: PageFlags) -> Result<(PageId, &mut Page)> {
        if let ModeData::Write {
            ref mut dirty,
            ref mut freelist,
            ref mut segregated_freelist,
            ref mut next_pgno,
            ..
        } = self.mode_data
        {
            // Check transaction page limit to prevent runaway allocation
            let max_txn_pages = self.data.env.config().max_txn_pages;
            if dirty.allocated.len() >= max_txn_pages {
                return Err(Error::Custom(
                    format!("Transaction page limit exceeded: {} pages. Consider committing more frequently for random write workloads.", 
                            max_txn_pages).into()
                ));
            }
            // Try to get a page from the appropriate free list
            let page_id = if let Some(seg_list) = segregated_freelist.as_mut() {
                // Use segregated freelist if enabled
                if let Some(free_page_id) = seg_list.allocate(1) {
                    free_page_id
                } else {
                    // Allocate new page from end of file
                    let inner = self.data.env.inner();
                    let id = PageId(
                        inner.next_page_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst),
                    );
                    // Update local tracking
                    *next_pgno = PageId(id.0 + 1);
                    id
                }
            } else {
                // Use simple freelist
                if let Some(free_page_id) = freelist.alloc_page() {
                    free_page_id
                } else {
                    // Allocate new page from end of file
                    let inner = self.data.env.inner();
                    let id = PageId(
                        inner.next_page_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst),
                    );
                    // Update local tracking
                    *next_pgno = PageId(id.0 + 1);
                    id
                }
            };

            // Create new page
            let page = Page::new(page_id, flags | PageFlags::DIRTY);
            dirty.mark_dirty(page_id, page);
            dirty.allocated.push(page_id);

            let inner = self.data.env.inner();
            dirty.dpl.set_pinned(page_id, true);
            dirty.maybe_spill(inner.io.as_ref(), inner.config.dp_limit, inner.checksum_mode)?;
            dirty.dpl.set_pinned(page_id, false);

            Ok((page_id, get_mut_page(&mut dirty.pages, &page_id)?.as_mut()))
        } else {
            unreachable!("Write transaction must have write mode data");
        }
    }

    /// Free a page
    pub fn free_page(&mut self, page_id: PageId) -> Result<()> {
        // Validate page ID
        if page_id.0 <= 1 {
            return Err(Error::Custom("Cannot free meta pages (0 or 1)".into()));
        }
        
        let inner = self.data.env.inner();
        let num_pages = inner.io.size_in_pages();
        if page_id.0 >= num_pages {
            return Err(Error::InvalidPageId(page_id));
        }
        
        if let ModeData::Write { ref mut freelist, ref mut segregated_freelist, .. } =
            self.mode_data
        {
            if let Some(seg_list) = segregated_freelist.as_mut() {
                // Use segregated freelist
                seg_list.free(page_id, 1);
            } else {
                // Use simple freelist
                freelist.free_page(page_id);
            }
            Ok(())
        } else {
            unreachable!("Write transaction must have write mode data");
        }
    }

    /// Free multiple contiguous pages
    pub fn free_pages(&mut self, start_page_id: PageId, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        
        // Validate start page ID
        if start_page_id.0 <= 1 {
            return Err(Error::Custom("Cannot free meta pages (0 or 1)".into()));
        }
        
        let inner = self.data.env.inner();
        let num_pages = inner.io.size_in_pages();
        
        // Validate start and end pages
        if start_page_id.0 >= num_pages {
            return Err(Error::InvalidPageId(start_page_id));
        }
        
        let end_page_id = PageId(start_page_id.0 + count as u64 - 1);
        if end_page_id.0 >= num_pages {
            return Err(Error::Custom(
                format!("Cannot free pages beyond database bounds: {} to {}", start_page_id.0, end_page_id.0).into()
            ));
        }

        if let ModeData::Write { ref mut freelist, ref mut segregated_freelist, .. } =
            self.mode_data
        {
            if let Some(seg_list) = segregated_freelist.as_mut() {
                // Use segregated freelist - can free as a single extent
                seg_list.free(start_page_id, count);
            } else {
                // Use simple freelist - free pages one by one
                for i in 0..count {
                    let page_id = PageId(start_page_id.0 + i as u64);
                    freelist.free_page(page_id);
                }
            }
            Ok(())
        } else {
            unreachable!("Write transaction must have write mode data");
        }
    }

    /// Internal method to allocate a page (used during commit)
    #[allow(dead_code)]
    fn alloc_page_internal<'a>(
        &mut self,
        dirty: &'a mut DirtyPages,
        next_pgno: &mut PageId,
        flags: PageFlags,
    ) -> Result<(PageId, &'a mut Page)> {
        if let ModeData::Write { ref mut freelist, .. } = self.mode_data {
            // Try to get a page from the free list first
            let page_id = if let Some(free_page_id) = freelist.alloc_page() {
                free_page_id
            } else {
                // Allocate new page from end of file
                let id = *next_pgno;
                *next_pgno = PageId(id.0 + 1);
                id
            };

            // Create new page
            let page = Page::new(page_id, flags | PageFlags::DIRTY);
            dirty.mark_dirty(page_id, page);
            dirty.allocated.push(page_id);

            Ok((page_id, get_mut_page(&mut dirty.pages, &page_id)?.as_mut()))
        } else {
            unreachable!("Write transaction must have write mode data");
        }
    }

    /// Depth of nested-transaction shadowing currently open on this
    /// write transaction (0 means this is the basal/outermost write).
    pub fn nesting_depth(&self) -> usize {
        match &self.mode_data {
            ModeData::Write { savepoints, .. } => savepoints.len(),
            ModeData::Read { .. } => 0,
        }
    }

    /// Push a nested-transaction savepoint: snapshot everything a child
    /// might mutate so a later `abort_savepoint` can roll back to exactly
    /// this point.
    ///
    /// The segregated free list does not support snapshotting (its
    /// buckets are behind `parking_lot::RwLock`s with no cheap `Clone`),
    /// so nesting is refused while it is enabled.
    pub(crate) fn push_savepoint(&mut self) -> Result<()> {
        if let ModeData::Write {
            ref dirty,
            ref freelist,
            ref next_pgno,
            ref segregated_freelist,
            ref mut savepoints,
            ..
        } = self.mode_data
        {
            if segregated_freelist.is_some() {
                return Err(Error::InvalidOperation(
                    "nested transactions are not supported while the segregated free list is enabled",
                ));
            }
            savepoints.push(Savepoint {
                pages: dirty.pages.clone(),
                allocated: dirty.allocated.clone(),
                next_pgno: *next_pgno,
                databases: self.data.databases.clone(),
                freelist: freelist.clone(),
                dpl: dirty.dpl.clone(),
                spill_list: dirty.spill_list.clone(),
            });
            Ok(())
        } else {
            Err(Error::BadTransaction)
        }
    }

    /// Commit a nested transaction into its parent: the child already
    /// mutated the parent's own dirty-page/freelist/dbi-state fields in
    /// place, so merging the child's dirty-page list into the parent's
    /// reduces to a no-op when they share one underlying list, and
    /// committing is just discarding the rollback point.
    pub(crate) fn commit_savepoint(&mut self) -> Result<()> {
        if let ModeData::Write { ref mut savepoints, .. } = self.mode_data {
            savepoints.pop().ok_or(Error::BadTransaction)?;
            Ok(())
        } else {
            Err(Error::BadTransaction)
        }
    }

    /// Abort a nested transaction: restore the parent's dirty pages,
    /// allocation bookkeeping, dbi-state cache, and free list to the
    /// snapshot taken at `begin_nested`, discarding everything the child
    /// did.
    pub(crate) fn abort_savepoint(&mut self) -> Result<()> {
        if let ModeData::Write {
            ref mut dirty,
            ref mut freelist,
            ref mut next_pgno,
            ref mut savepoints,
            ..
        } = self.mode_data
        {
            let sp = savepoints.pop().ok_or(Error::BadTransaction)?;
            dirty.pages = sp.pages;
            dirty.allocated = sp.allocated;
            *next_pgno = sp.next_pgno;
            *freelist = sp.freelist;
            dirty.dpl = sp.dpl;
            dirty.spill_list = sp.spill_list;
            self.data.databases = sp.databases;
            Ok(())
        } else {
            Err(Error::BadTransaction)
        }
    }

    /// Downgrade a write transaction to a read transaction
    pub fn downgrade(self) -> Result<Transaction<'env, Read>> {
        let env = self.data.env;

        // Abort any changes
        drop(self);

        // Create new read transaction
        Transaction::new_read(env)
    }
}

impl<'env, M: mode::Mode> Drop for Transaction<'env, M> {
    fn drop(&mut self) {
        match &self.mode_data {
            ModeData::Read { reader_slot } => {
                // Release reader slot
                if let Some(slot_idx) = reader_slot {
                    let inner = self.data.env.inner();
                    inner.readers.release(*slot_idx);
                }
            }
            ModeData::Write { .. } => {
                // Write transaction aborted if not committed
                // Write lock released automatically
            }
        }
    }
}
