//! Page-number list (PNL): a sorted, duplicate-free array of page numbers.
//!
//! Used for the retired-list, the reclaimable pool, and the spill-list. The
//! list is kept sorted ascending (a build-time choice — libmdbx supports
//! either direction, this crate fixes ascending to match the existing
//! `BTreeSet`-based free-page tracking in [`crate::freelist`]).

use crate::error::PageId;

/// A sorted, duplicate-free list of page numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pnl {
    ids: Vec<PageId>,
}

impl Pnl {
    /// Create an empty list.
    pub fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Create an empty list with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { ids: Vec::with_capacity(capacity) }
    }

    /// Number of page numbers in the list.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Borrow the sorted contents.
    pub fn as_slice(&self) -> &[PageId] {
        &self.ids
    }

    /// Reserve room for at least `additional` more entries.
    pub fn reserve(&mut self, additional: usize) {
        self.ids.reserve(additional);
    }

    /// Lower-bound search: the index of the first entry `>= pgno`, or
    /// `ids.len()` if every entry is smaller. `Ok(i)` means an exact match
    /// at `i`; `Err(i)` means `pgno` would be inserted at `i`.
    pub fn search(&self, pgno: PageId) -> std::result::Result<usize, usize> {
        self.ids.binary_search(&pgno)
    }

    /// Whether `pgno` is present.
    pub fn contains(&self, pgno: PageId) -> bool {
        self.search(pgno).is_ok()
    }

    /// Insert a single page number, keeping the list sorted. Returns `false`
    /// if the page number was already present (duplicates are forbidden).
    pub fn insert(&mut self, pgno: PageId) -> bool {
        match self.search(pgno) {
            Ok(_) => false,
            Err(at) => {
                self.ids.insert(at, pgno);
                true
            }
        }
    }

    /// Insert a contiguous run of `n` page numbers starting at `pgno`,
    /// keeping the list sorted. Panics (in debug) if any page in the span
    /// is already present — callers are expected to only ever retire a
    /// page-number span once.
    pub fn insert_span(&mut self, pgno: PageId, n: u32) {
        for i in 0..n as u64 {
            self.insert(PageId(pgno.0 + i));
        }
    }

    /// Append a page number known to be prereserved — i.e. known to sort
    /// after every existing entry. This is the fast path used when pages
    /// are retired in increasing pgno order (the common case for a
    /// sequential allocator); falls back to `insert` if the invariant is
    /// violated by the caller.
    pub fn append_prereserved(&mut self, pgno: PageId) -> bool {
        if let Some(&last) = self.ids.last() {
            if pgno <= last {
                return self.insert(pgno);
            }
        }
        self.ids.push(pgno);
        true
    }

    /// Merge another (sorted, duplicate-free) list into this one, keeping
    /// the result sorted and duplicate-free.
    pub fn merge(&mut self, other: &Pnl) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            self.ids = other.ids.clone();
            return;
        }
        let mut merged = Vec::with_capacity(self.ids.len() + other.ids.len());
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() && j < other.ids.len() {
            match self.ids[i].cmp(&other.ids[j]) {
                std::cmp::Ordering::Less => {
                    merged.push(self.ids[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    merged.push(other.ids[j]);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    merged.push(self.ids[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&self.ids[i..]);
        merged.extend_from_slice(&other.ids[j..]);
        self.ids = merged;
    }

    /// Remove a single page number if present. Returns whether it was found.
    pub fn remove(&mut self, pgno: PageId) -> bool {
        match self.search(pgno) {
            Ok(at) => {
                self.ids.remove(at);
                true
            }
            Err(_) => false,
        }
    }

    /// Remove every page number present in `other`.
    pub fn subtract(&mut self, other: &Pnl) {
        if other.is_empty() || self.is_empty() {
            return;
        }
        self.ids.retain(|id| !other.contains(*id));
    }

    /// Iterate in ascending order.
    pub fn iter(&self) -> std::slice::Iter<'_, PageId> {
        self.ids.iter()
    }

    /// Clear the list.
    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

impl FromIterator<PageId> for Pnl {
    fn from_iter<T: IntoIterator<Item = PageId>>(iter: T) -> Self {
        let mut ids: Vec<PageId> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }
}

impl<'a> IntoIterator for &'a Pnl {
    type Item = &'a PageId;
    type IntoIter = std::slice::Iter<'a, PageId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_sorted_and_dedups() {
        let mut pnl = Pnl::new();
        assert!(pnl.insert(PageId(5)));
        assert!(pnl.insert(PageId(1)));
        assert!(pnl.insert(PageId(3)));
        assert!(!pnl.insert(PageId(3)));
        assert_eq!(
            pnl.as_slice().to_vec(),
            vec![PageId(1), PageId(3), PageId(5)]
        );
    }

    #[test]
    fn search_is_lower_bound() {
        let mut pnl = Pnl::new();
        for p in [2, 4, 6, 8] {
            pnl.insert(PageId(p));
        }
        assert_eq!(pnl.search(PageId(4)), Ok(1));
        assert_eq!(pnl.search(PageId(5)), Err(2));
        assert_eq!(pnl.search(PageId(0)), Err(0));
        assert_eq!(pnl.search(PageId(9)), Err(4));
    }

    #[test]
    fn insert_span_adds_contiguous_run() {
        let mut pnl = Pnl::new();
        pnl.insert_span(PageId(10), 4);
        assert_eq!(
            pnl.as_slice().to_vec(),
            vec![PageId(10), PageId(11), PageId(12), PageId(13)]
        );
    }

    #[test]
    fn append_prereserved_fast_path() {
        let mut pnl = Pnl::new();
        pnl.append_prereserved(PageId(1));
        pnl.append_prereserved(PageId(2));
        pnl.append_prereserved(PageId(3));
        assert_eq!(pnl.as_slice(), &[PageId(1), PageId(2), PageId(3)]);

        // Out-of-order append still lands correctly via the fallback.
        pnl.append_prereserved(PageId(0));
        assert_eq!(
            pnl.as_slice(),
            &[PageId(0), PageId(1), PageId(2), PageId(3)]
        );
    }

    #[test]
    fn merge_dedups_overlap() {
        let mut a: Pnl = [1u64, 3, 5].into_iter().map(PageId).collect();
        let b: Pnl = [2u64, 3, 4].into_iter().map(PageId).collect();
        a.merge(&b);
        assert_eq!(
            a.as_slice().to_vec(),
            vec![1, 2, 3, 4, 5].into_iter().map(PageId).collect::<Vec<_>>()
        );
    }

    #[test]
    fn subtract_removes_present_entries() {
        let mut a: Pnl = (0..10).map(PageId).collect();
        let b: Pnl = [2u64, 4, 6].into_iter().map(PageId).collect();
        a.subtract(&b);
        assert_eq!(
            a.as_slice().to_vec(),
            vec![0u64, 1, 3, 5, 7, 8, 9].into_iter().map(PageId).collect::<Vec<_>>()
        );
    }
}
