//! Reader slot management for MVCC
//!
//! This module manages reader slots to track active read transactions
//! and determine which pages can be safely recycled.

use crate::error::{Error, Result, TransactionId};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum number of readers
pub const MAX_READERS: usize = 126;

/// Sentinel `tid` meaning the slot's owner voluntarily parked the
/// snapshot: the writer may oust it to reclaim pages the snapshot would
/// otherwise pin.
pub const TID_PARKED: u64 = u64::MAX - 1;

/// Sentinel `tid` meaning the writer forcibly invalidated a parked
/// reader's snapshot. The owner's only recourse is to renew (begin a
/// fresh read transaction).
pub const TID_OUSTED: u64 = u64::MAX;

/// Reader slot information stored in shared memory
#[repr(C)]
#[derive(Debug)]
pub struct ReaderSlot {
    /// Process ID
    pub pid: AtomicU32,
    /// Thread ID, or one of the `TID_PARKED`/`TID_OUSTED` sentinels.
    pub tid: AtomicU64,
    /// Transaction ID being read
    pub txn_id: AtomicU64,
    /// Timestamp when slot was acquired (for stale reader detection)
    pub timestamp: AtomicU64,
    /// `first_unallocated` as observed by this reader at `begin_read`:
    /// lets the GC reclaim scan compute its bound without re-reading the
    /// snapshot's actual root page.
    pub snapshot_pages_used: AtomicU64,
    /// Count of pages retired (not yet reclaimed) as observed by this
    /// reader at `begin_read`.
    pub snapshot_pages_retired: AtomicU64,
}

impl ReaderSlot {
    /// Create a new empty reader slot
    pub fn new() -> Self {
        Self {
            pid: AtomicU32::new(0),
            tid: AtomicU64::new(0),
            txn_id: AtomicU64::new(0),
            timestamp: AtomicU64::new(0),
            snapshot_pages_used: AtomicU64::new(0),
            snapshot_pages_retired: AtomicU64::new(0),
        }
    }

    /// Publish the snapshot bounds this reader observed at begin-read
    /// time.
    pub fn publish_snapshot(&self, pages_used: u64, pages_retired: u64) {
        self.snapshot_pages_used.store(pages_used, Ordering::Release);
        self.snapshot_pages_retired.store(pages_retired, Ordering::Release);
    }

    /// Voluntarily mark this slot as parked: the writer may now oust it
    /// if it blocks reclamation. Returns the real `tid` that was parked,
    /// so `unpark` can restore it.
    pub fn park(&self) -> u64 {
        self.tid.swap(TID_PARKED, Ordering::AcqRel)
    }

    /// Unpark this slot, restoring `owner_tid` if it is still parked.
    /// Returns `true` if unparked successfully, `false` if the writer
    /// had already ousted it (`tid == TID_OUSTED`) — the caller must
    /// then renew its transaction.
    pub fn unpark(&self, owner_tid: u64) -> bool {
        self.tid.compare_exchange(TID_PARKED, owner_tid, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// True if the writer has ousted this (previously parked) slot.
    pub fn is_ousted(&self) -> bool {
        self.tid.load(Ordering::Acquire) == TID_OUSTED
    }

    /// True if this slot is currently parked (freezable by a writer).
    pub fn is_parked(&self) -> bool {
        self.tid.load(Ordering::Acquire) == TID_PARKED
    }

    /// Writer-side: atomically oust a parked slot, freeing its snapshot
    /// for reclamation. Fails if the slot is not currently parked (it
    /// may have unparked itself, or never parked at all).
    pub fn oust(&self) -> bool {
        self.tid.compare_exchange(TID_PARKED, TID_OUSTED, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Check if this slot is free
    pub fn is_free(&self) -> bool {
        self.pid.load(Ordering::Acquire) == 0
    }

    /// Try to acquire this slot
    pub fn try_acquire(&self, txn_id: TransactionId) -> bool {
        // Try to atomically set PID from 0 to current process ID
        let pid = std::process::id();
        let old_pid = self.pid.compare_exchange(0, pid, Ordering::AcqRel, Ordering::Acquire);

        if old_pid.is_ok() {
            // Successfully acquired the slot
            self.tid.store(thread_id(), Ordering::Release);
            self.txn_id.store(txn_id.0, Ordering::Release);
            self.timestamp.store(current_timestamp(), Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Release this slot
    pub fn release(&self) {
        // Clear transaction ID first to ensure readers see consistent state
        self.txn_id.store(0, Ordering::Release);
        self.tid.store(0, Ordering::Release);
        self.timestamp.store(0, Ordering::Release);
        // Clear PID last to make slot available
        self.pid.store(0, Ordering::Release);
    }

    /// Check if this slot is stale (process died without releasing)
    pub fn is_stale(&self) -> bool {
        let pid = self.pid.load(Ordering::Acquire);
        if pid == 0 {
            return false;
        }

        // Check if process is still alive
        #[cfg(unix)]
        {
            unsafe {
                // Send signal 0 to check if process exists
                libc::kill(pid as i32, 0) != 0
            }
        }

        #[cfg(not(unix))]
        {
            // On non-Unix systems, use a timeout approach
            let timestamp = self.timestamp.load(Ordering::Acquire);
            let now = current_timestamp();
            // Consider stale after 5 minutes of inactivity
            now.saturating_sub(timestamp) > 300_000_000_000 // 5 minutes in nanoseconds
        }
    }
}

/// Reader table for managing all reader slots
pub struct ReaderTable {
    /// Array of reader slots
    slots: Vec<ReaderSlot>,
}

impl ReaderTable {
    /// Create a new reader table
    pub fn new(max_readers: usize) -> Self {
        let mut slots = Vec::with_capacity(max_readers);
        for _ in 0..max_readers {
            slots.push(ReaderSlot::new());
        }
        Self { slots }
    }

    /// Try to acquire a reader slot
    pub fn acquire(&self, txn_id: TransactionId) -> Result<usize> {
        // First pass: try to find a free slot
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.try_acquire(txn_id) {
                return Ok(i);
            }
        }

        // Second pass: check for stale slots
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.is_stale() {
                // Force release the stale slot
                slot.release();
                if slot.try_acquire(txn_id) {
                    return Ok(i);
                }
            }
        }

        Err(Error::ReadersFull)
    }

    /// Release a reader slot
    pub fn release(&self, slot_index: usize) {
        if let Some(slot) = self.slots.get(slot_index) {
            slot.release();
        }
    }

    /// Publish the snapshot bounds observed by the reader at `slot_index`.
    pub fn publish_snapshot(&self, slot_index: usize, pages_used: u64, pages_retired: u64) {
        if let Some(slot) = self.slots.get(slot_index) {
            slot.publish_snapshot(pages_used, pages_retired);
        }
    }

    /// Park the reader slot at `slot_index`, returning the real `tid`
    /// that was parked so the caller can `unpark` with it later.
    pub fn park(&self, slot_index: usize) -> Result<u64> {
        self.slots.get(slot_index).map(|s| s.park()).ok_or(Error::BadRslot)
    }

    /// Unpark the reader slot at `slot_index`. Returns `Err(Error::Ousted)`
    /// if the writer had ousted it in the meantime.
    pub fn unpark(&self, slot_index: usize, owner_tid: u64) -> Result<()> {
        let slot = self.slots.get(slot_index).ok_or(Error::BadRslot)?;
        if slot.unpark(owner_tid) {
            Ok(())
        } else {
            Err(Error::Ousted)
        }
    }

    /// Writer-side: oust every currently-parked reader whose snapshot
    /// txnid is `<= up_to`, freeing their pages for reclamation. Returns
    /// the number of readers ousted.
    pub fn oust_parked_up_to(&self, up_to: TransactionId) -> usize {
        let mut ousted = 0;
        for slot in &self.slots {
            if slot.is_parked() && slot.txn_id.load(Ordering::Acquire) <= up_to.0 && slot.oust() {
                ousted += 1;
            }
        }
        ousted
    }

    /// Get the oldest active reader transaction ID
    pub fn oldest_reader(&self) -> Option<TransactionId> {
        let mut oldest = None;

        for slot in &self.slots {
            let txn_id = slot.txn_id.load(Ordering::Acquire);
            if txn_id > 0 {
                match oldest {
                    None => oldest = Some(TransactionId(txn_id)),
                    Some(TransactionId(old)) if txn_id < old => {
                        oldest = Some(TransactionId(txn_id));
                    }
                    _ => {}
                }
            }
        }

        oldest
    }

    /// Clean up stale reader slots
    pub fn cleanup_stale(&self) -> usize {
        let mut cleaned = 0;

        for slot in &self.slots {
            if slot.is_stale() {
                slot.release();
                cleaned += 1;
            }
        }

        cleaned
    }

    /// Get all active reader transaction IDs
    pub fn active_readers(&self) -> Vec<TransactionId> {
        let mut readers = Vec::new();

        for slot in &self.slots {
            let txn_id = slot.txn_id.load(Ordering::Acquire);
            if txn_id > 0 {
                readers.push(TransactionId(txn_id));
            }
        }

        readers
    }

    /// Get reader count
    pub fn reader_count(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_free()).count()
    }

    /// Enumerate all active readers with detailed information
    pub fn enumerate_readers(&self) -> Vec<ReaderInfo> {
        let mut readers = Vec::new();

        for (slot_idx, slot) in self.slots.iter().enumerate() {
            let pid = slot.pid.load(Ordering::Acquire);
            if pid > 0 {
                readers.push(ReaderInfo {
                    slot_index: slot_idx,
                    pid,
                    tid: slot.tid.load(Ordering::Acquire),
                    txn_id: TransactionId(slot.txn_id.load(Ordering::Acquire)),
                    timestamp: slot.timestamp.load(Ordering::Acquire),
                    is_stale: slot.is_stale(),
                });
            }
        }

        readers
    }
}

/// Detailed information about an active reader
#[derive(Debug, Clone)]
pub struct ReaderInfo {
    /// Slot index
    pub slot_index: usize,
    /// Process ID
    pub pid: u32,
    /// Thread ID
    pub tid: u64,
    /// Transaction ID
    pub txn_id: TransactionId,
    /// Timestamp when acquired (nanoseconds since epoch)
    pub timestamp: u64,
    /// Whether this reader appears to be stale
    pub is_stale: bool,
}

impl ReaderInfo {
    /// Get age of this reader in seconds
    pub fn age_seconds(&self) -> u64 {
        let now = current_timestamp();
        (now.saturating_sub(self.timestamp)) / 1_000_000_000
    }
}

/// Get current thread ID
fn thread_id() -> u64 {
    #[cfg(unix)]
    {
        unsafe { libc::pthread_self() as u64 }
    }

    #[cfg(windows)]
    {
        unsafe { winapi::um::processthreadsapi::GetCurrentThreadId() as u64 }
    }

    #[cfg(not(any(unix, windows)))]
    {
        // Fallback: use thread local storage address as ID
        thread_local! {
            static THREAD_ID: u8 = 0;
        }
        THREAD_ID.with(|id| id as *const _ as u64)
    }
}

/// Get current timestamp in nanoseconds
fn current_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}
