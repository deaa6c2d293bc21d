//! Durability engine (`dxb_sync_locked` equivalent): the ordered steps a
//! commit takes to make dirty pages and a new meta-page image durable,
//! and to decide whether the file can be shrunk afterward.
//!
//! [`crate::txn::Transaction::commit`] already performs "write dirty
//! pages, then write meta, then sync" inline; this module factors the
//! policy decisions (which sync calls are required, which meta signature
//! to stamp, whether to shrink) out into pure, independently testable
//! functions that a commit path can drive.

use crate::geometry::Geometry;
use crate::troika::Signature;
use bitflags::bitflags;

bitflags! {
    /// Effective sync mode, a disjunction of durability knobs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncMode: u32 {
        /// Skip the dedicated meta-page fsync (data fsync still happens).
        const NOMETASYNC = 0b0001;
        /// Defer fsync of data pages; only the meta-page write is ordered.
        const SAFE_NOSYNC = 0b0010;
        /// Skip all syncing (caller accepts full data loss on crash).
        const UTTERLY_NOSYNC = 0b0100;
        /// The map is opened with `MAP_SHARED` and dirty pages are
        /// mutated in place; "sync" means `msync` instead of `pwrite`+`fsync`.
        const WRITEMAP = 0b1000;
    }
}

/// One step of the durability protocol, in the order they must execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityStep {
    /// fsync/msync the data extent `[0, first_unallocated * page_size)`.
    SyncData { include_size_sync: bool },
    /// Stamp the pending meta image as steady or weak.
    StampSignature(Signature),
    /// Overwrite the troika's tail slot with the pending meta image.
    WriteMeta { slot: usize },
    /// fsync/msync just the three-meta-page extent.
    SyncMeta,
    /// Re-tap the troika and propagate it to all live transactions.
    RepublishTroika,
    /// Truncate the file to the new (smaller) size.
    ShrinkFile { new_size_pages: u64 },
}

/// Decide the steps a commit must execute, in order, given the sync mode
/// and the before/after geometry. Does not perform any I/O itself — it is
/// the policy the caller (the durability/commit path) drives.
pub fn plan_commit(
    mode: SyncMode,
    tail_slot: usize,
    pending: &Geometry,
    current: &Geometry,
    any_reader_pins_shrunk_range: bool,
) -> Vec<DurabilityStep> {
    let mut steps = Vec::new();

    let must_sync_data = !mode.contains(SyncMode::UTTERLY_NOSYNC) && !mode.contains(SyncMode::SAFE_NOSYNC);
    if must_sync_data {
        let include_size_sync = pending.first_unallocated > current.now;
        steps.push(DurabilityStep::SyncData { include_size_sync });
    }

    let signature = if mode.contains(SyncMode::UTTERLY_NOSYNC) || mode.contains(SyncMode::SAFE_NOSYNC) {
        Signature::Weak
    } else {
        Signature::Steady(0) // caller fills in the real checksum
    };
    steps.push(DurabilityStep::StampSignature(signature));
    steps.push(DurabilityStep::WriteMeta { slot: tail_slot });

    if !mode.contains(SyncMode::NOMETASYNC) {
        steps.push(DurabilityStep::SyncMeta);
    }

    steps.push(DurabilityStep::RepublishTroika);

    if should_shrink(pending, current, any_reader_pins_shrunk_range) {
        steps.push(DurabilityStep::ShrinkFile { new_size_pages: pending.now });
    }

    steps
}

/// Whether the file should be shrunk after this commit: the pending
/// geometry's `now` is smaller than the current one's by at least
/// `shrink_pv` pages, and no reader pins anything in the shrunk range.
pub fn should_shrink(pending: &Geometry, current: &Geometry, any_reader_pins_shrunk_range: bool) -> bool {
    if any_reader_pins_shrunk_range {
        return false;
    }
    if pending.now >= current.now {
        return false;
    }
    current.now - pending.now >= pending.shrink_pages().max(1)
}

/// A torn meta-page write: the pre- and post-payload txnid halves
/// disagree, meaning the write was interrupted mid-page. Detected at the
/// next open by comparing the two halves.
pub fn is_torn(txnid_lo: u64, txnid_hi: u64) -> bool {
    txnid_lo != txnid_hi
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo(now: u64, first_unallocated: u64) -> Geometry {
        Geometry::new(16, now, 4096, first_unallocated, 16, 16)
    }

    #[test]
    fn default_mode_syncs_data_and_meta() {
        let pending = geo(100, 100);
        let current = geo(100, 90);
        let steps = plan_commit(SyncMode::empty(), 2, &pending, &current, false);
        assert!(matches!(steps[0], DurabilityStep::SyncData { .. }));
        assert!(steps.iter().any(|s| matches!(s, DurabilityStep::SyncMeta)));
        assert!(matches!(steps.last().unwrap(), DurabilityStep::RepublishTroika));
    }

    #[test]
    fn nometasync_skips_meta_fsync() {
        let pending = geo(100, 100);
        let current = geo(100, 90);
        let steps = plan_commit(SyncMode::NOMETASYNC, 2, &pending, &current, false);
        assert!(!steps.iter().any(|s| matches!(s, DurabilityStep::SyncMeta)));
    }

    #[test]
    fn safe_nosync_defers_data_sync_but_keeps_meta_sync() {
        let pending = geo(100, 100);
        let current = geo(100, 90);
        let steps = plan_commit(SyncMode::SAFE_NOSYNC, 2, &pending, &current, false);
        assert!(!steps.iter().any(|s| matches!(s, DurabilityStep::SyncData { .. })));
        assert!(steps.iter().any(|s| matches!(s, DurabilityStep::SyncMeta)));
        assert!(steps.iter().any(|s| matches!(s, DurabilityStep::StampSignature(Signature::Weak))));
    }

    #[test]
    fn utterly_nosync_stamps_weak_and_skips_all_sync() {
        let pending = geo(100, 100);
        let current = geo(100, 90);
        let steps = plan_commit(SyncMode::UTTERLY_NOSYNC, 2, &pending, &current, false);
        assert!(!steps.iter().any(|s| matches!(s, DurabilityStep::SyncData { .. })));
        assert!(steps.iter().any(|s| matches!(s, DurabilityStep::StampSignature(Signature::Weak))));
    }

    #[test]
    fn shrink_step_present_when_geometry_shrinks_enough_and_unpinned() {
        let pending = Geometry::new(16, 100, 4096, 100, 32, 16);
        let current = Geometry::new(16, 200, 4096, 180, 32, 16);
        assert!(should_shrink(&pending, &current, false));
        assert!(!should_shrink(&pending, &current, true));

        let steps = plan_commit(SyncMode::empty(), 1, &pending, &current, false);
        assert!(steps
            .iter()
            .any(|s| matches!(s, DurabilityStep::ShrinkFile { new_size_pages: 100 })));
    }

    #[test]
    fn no_shrink_when_growing() {
        let pending = geo(200, 190);
        let current = geo(100, 90);
        assert!(!should_shrink(&pending, &current, false));
    }

    #[test]
    fn torn_meta_detected_when_halves_disagree() {
        assert!(!is_torn(5, 5));
        assert!(is_torn(5, 6));
    }
}
