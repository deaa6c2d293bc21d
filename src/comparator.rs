//! Key comparators: a small, closed set of built-in orderings selected by
//! table flags at `open_table`/`create_database` time.
//!
//! libmdbx never exposes pluggable user comparators through its core API —
//! ordering is always one of a fixed handful of built-ins chosen by
//! `DatabaseFlags` (`REVERSE_KEY`, `INTEGER_KEY`, and their `*_DUP`
//! counterparts for DUPSORT value ordering). This module mirrors that: the
//! `Comparator` trait is sealed, so only the types below can implement it,
//! and [`KeyOrdering`] gives callers a runtime-selectable handle onto the
//! same closed set for code paths (like `Database::create_database`) that
//! need to pick an ordering from flags rather than from a compile-time
//! generic parameter.

use std::cmp::Ordering;

mod sealed {
    pub trait Sealed {}
}

/// A key (or DUPSORT value) ordering. Sealed: the engine only ever
/// instantiates the built-ins below, never an externally supplied type.
pub trait Comparator: sealed::Sealed + Send + Sync + 'static {
    /// Compare two encoded keys (or dup-values) and return their ordering.
    fn compare(a: &[u8], b: &[u8]) -> Ordering;

    /// Name for diagnostics (`mdbx_stat`-equivalent output, tracing).
    fn name() -> &'static str;
}

/// Byte-wise lexicographic comparison — the default ordering.
pub struct LexicographicComparator;
impl sealed::Sealed for LexicographicComparator {}
impl Comparator for LexicographicComparator {
    #[inline]
    fn compare(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name() -> &'static str {
        "lexicographic"
    }
}

/// `REVERSEKEY` / `REVERSEDUP`: lexicographic comparison of the bytes in
/// reverse order. This is distinct from negating the result of a normal
/// lexicographic comparison: it reverses which end of the key dominates
/// the ordering, not just the sort direction.
pub struct ReverseKeyComparator;
impl sealed::Sealed for ReverseKeyComparator {}
impl Comparator for ReverseKeyComparator {
    fn compare(a: &[u8], b: &[u8]) -> Ordering {
        a.iter().rev().cmp(b.iter().rev())
    }

    fn name() -> &'static str {
        "reversekey"
    }
}

/// `INTEGERKEY` / `INTEGERDUP`: native-byte-order integer comparison.
/// Valid key sizes are 4 or 8 bytes; any other size falls back to a byte
/// comparison (callers are expected to reject mismatched sizes earlier,
/// at `put`/`get`, via `MDBX_BAD_VALSIZE`-equivalent validation).
pub struct IntegerKeyComparator;
impl sealed::Sealed for IntegerKeyComparator {}
impl Comparator for IntegerKeyComparator {
    fn compare(a: &[u8], b: &[u8]) -> Ordering {
        match (a.len(), b.len()) {
            (4, 4) => {
                let x = u32::from_ne_bytes([a[0], a[1], a[2], a[3]]);
                let y = u32::from_ne_bytes([b[0], b[1], b[2], b[3]]);
                x.cmp(&y)
            }
            (8, 8) => {
                let mut xb = [0u8; 8];
                let mut yb = [0u8; 8];
                xb.copy_from_slice(a);
                yb.copy_from_slice(b);
                u64::from_ne_bytes(xb).cmp(&u64::from_ne_bytes(yb))
            }
            _ => a.cmp(b),
        }
    }

    fn name() -> &'static str {
        "integerkey"
    }
}

/// Integer comparison without assuming aligned storage: identical
/// semantics to [`IntegerKeyComparator`] but documents that the node's
/// key bytes may not satisfy the target's alignment requirements (the
/// `from_ne_bytes` copy above already never dereferences an unaligned
/// pointer, so this is the same code path under a distinct name —
/// libmdbx keeps both because its C implementation has a true unaligned
/// variant that avoids a strict-aliasing violation the Rust port doesn't
/// have).
pub type IntegerUnalignedComparator = IntegerKeyComparator;

/// `FastLengthOrdered`: compares by length first, then lexicographically.
/// Used internally by nodes whose keys are known to share a common prefix
/// structure; not selectable directly via `DatabaseFlags`.
pub struct FastLengthOrderedComparator;
impl sealed::Sealed for FastLengthOrderedComparator {}
impl Comparator for FastLengthOrderedComparator {
    fn compare(a: &[u8], b: &[u8]) -> Ordering {
        match a.len().cmp(&b.len()) {
            Ordering::Equal => a.cmp(b),
            other => other,
        }
    }

    fn name() -> &'static str {
        "fast_length_ordered"
    }
}

/// A runtime handle onto the same closed set of comparators, for code
/// paths that select an ordering from `DatabaseFlags` rather than from a
/// compile-time generic parameter (e.g. validating that a table reopened
/// with different flags still agrees with the comparator baked into its
/// `BTree<C>` instantiation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrdering {
    /// Plain lexicographic byte comparison.
    Lexicographic,
    /// `REVERSEKEY`/`REVERSEDUP`.
    ReverseKey,
    /// `INTEGERKEY`/`INTEGERDUP`.
    IntegerKey,
}

impl KeyOrdering {
    /// Compare two keys under this ordering.
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyOrdering::Lexicographic => LexicographicComparator::compare(a, b),
            KeyOrdering::ReverseKey => ReverseKeyComparator::compare(a, b),
            KeyOrdering::IntegerKey => IntegerKeyComparator::compare(a, b),
        }
    }

    /// The comparator name, for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            KeyOrdering::Lexicographic => LexicographicComparator::name(),
            KeyOrdering::ReverseKey => ReverseKeyComparator::name(),
            KeyOrdering::IntegerKey => IntegerKeyComparator::name(),
        }
    }

    /// The ordering implied by a table's `DatabaseFlags` (`REVERSE_KEY`,
    /// `INTEGER_KEY`). Both bits set is not a valid combination and is the
    /// caller's responsibility to reject before calling this.
    pub fn from_key_flags(reverse_key: bool, integer_key: bool) -> KeyOrdering {
        match (reverse_key, integer_key) {
            (false, false) => KeyOrdering::Lexicographic,
            (true, false) => KeyOrdering::ReverseKey,
            (false, true) => KeyOrdering::IntegerKey,
            (true, true) => KeyOrdering::IntegerKey, // caller should have rejected this combination
        }
    }
}
