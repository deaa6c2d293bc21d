//! The three-way troika: the ordered tuple `(recent, prefer_steady, tail)`
//! computed over the three rotating meta-pages, and the algorithm for
//! selecting which one to trust when opening the environment.
//!
//! This module works against a small [`MetaSnapshot`] view rather than
//! [`crate::meta::MetaPage`] directly, so it can be unit tested without an
//! open environment; `Environment::open` (or a future revision of it)
//! constructs the snapshots from the three on-disk meta-pages.

/// The three meta-page slot indices, in a fixed physical order.
pub const NUM_META_PAGES: usize = 3;

/// The durability signature carried by a meta-page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// Placeholder signature: must be rolled past on crash recovery.
    Weak,
    /// Valid checksum: crash-recoverable, durable.
    Steady(u32),
}

impl Signature {
    /// Whether this signature is steady (crash-recoverable).
    pub fn is_steady(self) -> bool {
        matches!(self, Signature::Steady(_))
    }
}

/// A read-only view of one on-disk meta-page slot, sufficient to compute
/// the troika and run the open-time selection algorithm.
#[derive(Debug, Clone, Copy)]
pub struct MetaSnapshot {
    /// Physical slot index (0, 1, or 2).
    pub slot: usize,
    /// Whether the slot parsed as structurally valid (magic, version,
    /// pre/post txnid halves agree).
    pub valid: bool,
    /// The transaction id committed by this slot, if valid.
    pub txnid: u64,
    /// The durability signature of this slot.
    pub signature: Signature,
    /// The boot id recorded in this slot.
    pub bootid: u128,
}

impl MetaSnapshot {
    fn is_steady(&self) -> bool {
        self.valid && self.signature.is_steady()
    }
}

/// The computed troika: indices into the three-element meta-page array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Troika {
    /// Slot with the largest valid txnid.
    pub recent: usize,
    /// Slot with the largest txnid among steady slots (may equal `recent`).
    pub prefer_steady: usize,
    /// The remaining slot: the next write target.
    pub tail: usize,
}

/// Compute the troika from the three meta-page snapshots (order must match
/// physical slot order: `metas[i].slot == i`).
///
/// Panics if fewer or more than [`NUM_META_PAGES`] snapshots are given, or
/// if none of them is valid (the caller must have already rejected a
/// completely unreadable file).
pub fn compute(metas: &[MetaSnapshot; NUM_META_PAGES]) -> Troika {
    let recent = (0..NUM_META_PAGES)
        .filter(|&i| metas[i].valid)
        .max_by_key(|&i| metas[i].txnid)
        .expect("at least one meta-page must be valid to compute a troika");

    let prefer_steady = (0..NUM_META_PAGES)
        .filter(|&i| metas[i].is_steady())
        .max_by_key(|&i| metas[i].txnid)
        .unwrap_or(recent);

    let tail = (0..NUM_META_PAGES)
        .find(|&i| i != recent && i != prefer_steady)
        .unwrap_or_else(|| (0..NUM_META_PAGES).find(|&i| i != recent).unwrap_or(recent));

    Troika { recent, prefer_steady, tail }
}

/// Outcome of the open-time meta-page selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenSelection {
    /// Use the recent slot as-is (bootid matches and recent is valid).
    UseRecent { slot: usize },
    /// Unclean shutdown detected (bootid mismatch, or recent is non-steady
    /// and this is the first open since reboot): roll back to the steady
    /// predecessor.
    RollbackToSteady { slot: usize },
}

/// Run the open-time selection algorithm: prefer `recent` when its bootid
/// matches `current_bootid` (meaning no reboot happened since it was
/// written); otherwise fall back to `prefer_steady`, discarding any
/// non-steady head written before an intervening reboot.
pub fn select_on_open(
    metas: &[MetaSnapshot; NUM_META_PAGES],
    troika: Troika,
    current_bootid: u128,
) -> OpenSelection {
    let recent = &metas[troika.recent];
    if recent.valid && recent.bootid == current_bootid {
        OpenSelection::UseRecent { slot: troika.recent }
    } else {
        OpenSelection::RollbackToSteady { slot: troika.prefer_steady }
    }
}

/// Whether an exclusive read-write opener should overwrite the non-steady
/// head with the steady predecessor's txnid to force a rollback after an
/// unclean shutdown. Read-only and non-exclusive openers must never
/// rewrite meta-pages.
pub fn should_force_rollback(
    metas: &[MetaSnapshot; NUM_META_PAGES],
    troika: Troika,
    current_bootid: u128,
    exclusive_write: bool,
) -> bool {
    if !exclusive_write {
        return false;
    }
    let recent = &metas[troika.recent];
    troika.recent != troika.prefer_steady && (!recent.is_steady() || recent.bootid != current_bootid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(slot: usize, valid: bool, txnid: u64, sig: Signature, bootid: u128) -> MetaSnapshot {
        MetaSnapshot { slot, valid, txnid, signature: sig, bootid }
    }

    #[test]
    fn recent_is_largest_valid_txnid() {
        let metas = [
            snap(0, true, 5, Signature::Steady(1), 1),
            snap(1, true, 10, Signature::Weak, 1),
            snap(2, true, 7, Signature::Steady(1), 1),
        ];
        let troika = compute(&metas);
        assert_eq!(troika.recent, 1);
    }

    #[test]
    fn prefer_steady_ignores_weak_heads() {
        let metas = [
            snap(0, true, 5, Signature::Steady(1), 1),
            snap(1, true, 10, Signature::Weak, 1),
            snap(2, true, 7, Signature::Steady(1), 1),
        ];
        let troika = compute(&metas);
        assert_eq!(troika.prefer_steady, 2);
    }

    #[test]
    fn tail_is_the_remaining_slot() {
        let metas = [
            snap(0, true, 5, Signature::Steady(1), 1),
            snap(1, true, 10, Signature::Weak, 1),
            snap(2, true, 7, Signature::Steady(1), 1),
        ];
        let troika = compute(&metas);
        assert_eq!(troika.tail, 0);
    }

    #[test]
    fn invalid_slots_are_skipped() {
        let metas = [
            snap(0, false, 99, Signature::Steady(1), 1),
            snap(1, true, 3, Signature::Steady(1), 1),
            snap(2, true, 2, Signature::Weak, 1),
        ];
        let troika = compute(&metas);
        assert_eq!(troika.recent, 1);
        assert_eq!(troika.prefer_steady, 1);
        assert_eq!(troika.tail, 2);
    }

    #[test]
    fn same_bootid_prefers_recent() {
        let metas = [
            snap(0, true, 5, Signature::Steady(1), 1),
            snap(1, true, 10, Signature::Weak, 1),
            snap(2, true, 7, Signature::Steady(1), 1),
        ];
        let troika = compute(&metas);
        let sel = select_on_open(&metas, troika, 1);
        assert_eq!(sel, OpenSelection::UseRecent { slot: 1 });
    }

    #[test]
    fn mismatched_bootid_rolls_back_to_steady() {
        let metas = [
            snap(0, true, 5, Signature::Steady(1), 1),
            snap(1, true, 10, Signature::Weak, 1),
            snap(2, true, 7, Signature::Steady(1), 1),
        ];
        let troika = compute(&metas);
        let sel = select_on_open(&metas, troika, 999);
        assert_eq!(sel, OpenSelection::RollbackToSteady { slot: 2 });
    }

    #[test]
    fn force_rollback_only_when_exclusive_and_non_steady_recent() {
        let metas = [
            snap(0, true, 5, Signature::Steady(1), 1),
            snap(1, true, 10, Signature::Weak, 1),
            snap(2, true, 7, Signature::Steady(1), 1),
        ];
        let troika = compute(&metas);
        assert!(!should_force_rollback(&metas, troika, 1, false));
        assert!(should_force_rollback(&metas, troika, 1, true));
        // A fully steady recent head never forces rollback.
        let all_steady = [
            snap(0, true, 5, Signature::Steady(1), 1),
            snap(1, true, 10, Signature::Steady(1), 1),
            snap(2, true, 7, Signature::Steady(1), 1),
        ];
        let t2 = compute(&all_steady);
        assert!(!should_force_rollback(&all_steady, t2, 1, true));
    }
}
