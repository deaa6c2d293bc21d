//! Nested write transactions.
//!
//! A nested transaction shadows its parent's dirty-page list, free list,
//! and dbi-state cache: `begin_nested` takes a savepoint of everything a
//! child might mutate, `commit` discards the savepoint (the child's
//! writes already live in the parent's own state), and `abort` restores
//! the savepoint, undoing every write the child made without touching
//! anything the parent did before the child began.
//!
//! Nesting is LIFO: a child must commit or abort before its parent (or an
//! earlier sibling) does. `front_txnid` is not tracked separately from
//! `txnid` here — parent and child observe the same MVCC snapshot, and
//! since they share one underlying `Transaction` there is nothing else to
//! distinguish.

use crate::error::Result;
use crate::txn::{Transaction, Write};

/// A nested transaction borrowed from a parent write transaction.
///
/// Dropping a `NestedTransaction` without calling `commit` or `abort`
/// aborts it, rolling back to the savepoint and discarding every write
/// the child made.
pub struct NestedTransaction<'env, 'parent> {
    parent: &'parent mut Transaction<'env, Write>,
    finished: bool,
}

impl<'env, 'parent> std::fmt::Debug for NestedTransaction<'env, 'parent> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedTransaction").field("finished", &self.finished).finish()
    }
}

impl<'env, 'parent> NestedTransaction<'env, 'parent> {
    pub(crate) fn new(parent: &'parent mut Transaction<'env, Write>) -> Result<Self> {
        parent.push_savepoint()?;
        Ok(Self { parent, finished: false })
    }

    /// Merge this nested transaction's changes into its parent.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.parent.commit_savepoint()
    }

    /// Discard every change made since `begin_nested`, restoring the
    /// parent to the state it was in beforehand.
    pub fn abort(mut self) {
        self.finished = true;
        let _ = self.parent.abort_savepoint();
    }
}

impl<'env, 'parent> Drop for NestedTransaction<'env, 'parent> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.parent.abort_savepoint();
        }
    }
}

/// Extension trait for starting a nested transaction on a write txn.
pub trait NestedTransactionExt<'env> {
    /// Begin a nested (child) write transaction shadowing `self`.
    ///
    /// Returns `Err` if the segregated free list is enabled for this
    /// environment (it cannot be cheaply snapshotted) or if a deeper
    /// nested transaction is still open out of LIFO order.
    fn begin_nested(&mut self) -> Result<NestedTransaction<'env, '_>>;
}

impl<'env> NestedTransactionExt<'env> for Transaction<'env, Write> {
    fn begin_nested(&mut self) -> Result<NestedTransaction<'env, '_>> {
        NestedTransaction::new(self)
    }
}
