//! Dirty Page List (DPL): a sorted index of a writer's in-memory-modified
//! pages, carrying the per-page bookkeeping the spill path needs on top of
//! the plain `pgno -> page` map in [`crate::txn::DirtyPages`], which owns
//! one alongside that map and keeps both in lockstep.

use crate::error::PageId;

/// Bookkeeping kept per dirty page, mirroring libmdbx's `dp_t`.
#[derive(Debug, Clone, Copy)]
pub struct DirtyEntry {
    /// Page number of the entry.
    pub pgno: PageId,
    /// Number of pages the entry spans (1 for ordinary pages, >1 for a
    /// large/overflow run).
    pub npages: u32,
    /// LRU-ish age stamp, bumped every time the page is touched again.
    /// Used by the spill victim scorer: lower age is a better spill
    /// candidate.
    pub age: u32,
    /// Set by the non-spillable marking pass when an open cursor still
    /// references this page.
    pub pinned: bool,
}

/// A growable array of [`DirtyEntry`] kept sorted by `pgno`, plus the
/// aggregate counters spill decisions need.
#[derive(Debug, Default, Clone)]
pub struct Dpl {
    entries: Vec<DirtyEntry>,
    /// Monotonic counter; each touch stamps the touched entry with the
    /// current value then increments it, giving pages a total LRU order.
    dirtylru: u32,
    /// Running total of pages across all entries, including "loose"
    /// (freed-and-cached) ones, used to decide whether `dp_limit` would be
    /// exceeded.
    pages_including_loose: u64,
}

impl Dpl {
    /// Create an empty DPL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct entries (not pages: a large entry with
    /// `npages > 1` still counts once here).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the DPL is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total pages tracked, including multi-page (large) entries.
    pub fn pages_including_loose(&self) -> u64 {
        self.pages_including_loose
    }

    /// Exact match or insertion point for `pgno`, mirroring libmdbx's
    /// `dpl_search`: `Ok(i)` is the index of the entry, `Err(i)` is where
    /// it would be inserted to keep the array sorted.
    pub fn search(&self, pgno: PageId) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by_key(&pgno, |e| e.pgno)
    }

    /// Look up an entry by pgno.
    pub fn get(&self, pgno: PageId) -> Option<&DirtyEntry> {
        self.search(pgno).ok().map(|i| &self.entries[i])
    }

    /// Insert a freshly dirtied page, or bump the LRU age of an existing
    /// one (the "already modifiable" branch of touching a page).
    pub fn touch(&mut self, pgno: PageId, npages: u32) {
        self.dirtylru = self.dirtylru.wrapping_add(1);
        match self.search(pgno) {
            Ok(i) => {
                self.entries[i].age = self.dirtylru;
            }
            Err(at) => {
                self.entries.insert(
                    at,
                    DirtyEntry { pgno, npages, age: self.dirtylru, pinned: false },
                );
                self.pages_including_loose += npages as u64;
            }
        }
    }

    /// Mark (or clear) an entry as pinned by an open cursor, making it
    /// ineligible as a spill victim.
    pub fn set_pinned(&mut self, pgno: PageId, pinned: bool) {
        if let Ok(i) = self.search(pgno) {
            self.entries[i].pinned = pinned;
        }
    }

    /// Remove every entry whose pgno appears in `pnl` — the `sift`
    /// operation used both by spill (`is_spill = true`, removing
    /// spilled-out entries from the live DPL) and by abort/merge
    /// (removing retired or superseded entries).
    pub fn sift(&mut self, pnl: &crate::pnl::Pnl, is_spill: bool) {
        let _ = is_spill;
        self.entries.retain(|e| {
            let keep = !pnl.contains(e.pgno);
            if !keep {
                self.pages_including_loose =
                    self.pages_including_loose.saturating_sub(e.npages as u64);
            }
            keep
        });
    }

    /// Remove a single entry, returning it if present.
    pub fn remove(&mut self, pgno: PageId) -> Option<DirtyEntry> {
        match self.search(pgno) {
            Ok(i) => {
                let e = self.entries.remove(i);
                self.pages_including_loose = self.pages_including_loose.saturating_sub(e.npages as u64);
                Some(e)
            }
            Err(_) => None,
        }
    }

    /// Iterate entries in ascending pgno order.
    pub fn iter(&self) -> std::slice::Iter<'_, DirtyEntry> {
        self.entries.iter()
    }

    /// Iterate entries ordered from best to worst spill candidate (oldest
    /// `age` first, unpinned only). Ties broken by pgno for determinism.
    pub fn spill_candidates(&self) -> Vec<&DirtyEntry> {
        let mut v: Vec<&DirtyEntry> = self.entries.iter().filter(|e| !e.pinned).collect();
        v.sort_by_key(|e| (e.age, e.pgno));
        v
    }
}
