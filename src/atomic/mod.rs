//! # Atomic Operations
//!
//! This module provides the atomic-operation manager coordinating
//! mutations that span the key index and the record cluster. A mutation
//! of the configuration store always touches up to two independent
//! persistent structures; wrapping both in one atomic-operation scope is
//! what makes an entry's creation, update, and deletion all-or-nothing.
//!
//! ## Scope Protocol
//!
//! ```text
//! let mut op = manager.start_atomic_operation("dbConfig")?;
//! // ... mutate index and cluster; each mutation records an undo entry
//! manager.end_atomic_operation(op, rollback, &mut index, &mut cluster)?;
//! ```
//!
//! On a rollback end, the accumulated undo log is applied in reverse,
//! restoring both structures to their pre-scope state. On a commit end,
//! both structures flush their snapshot files, the cluster first, so a
//! tear between the two flushes can orphan a record but never publish a
//! key whose record is missing.
//!
//! Scopes do not nest: at most one operation is in flight, and starting a
//! second is an error. The store serializes mutators under its write
//! lock, so the single-scope rule is a consistency assertion rather than
//! a synchronization mechanism.
//!
//! ## Undo Entries
//!
//! Collaborators record before-images as [`UndoEntry`] values: the prior
//! mapping for index mutations, the prior payload for record mutations.
//! Undo application bypasses the undo log (it must not log itself).

use eyre::{bail, Result};
use smallvec::SmallVec;

use crate::cluster::RecordCluster;
use crate::index::{KeyIndex, RecordRef};

/// A before-image recorded by a collaborator inside an atomic scope.
#[derive(Debug)]
pub enum UndoEntry {
    /// An index mapping was inserted or overwritten; `prior` is the
    /// replaced reference, if any.
    IndexPut {
        key: String,
        prior: Option<RecordRef>,
    },
    /// An index mapping was removed.
    IndexRemove { key: String, prior: RecordRef },
    /// A record was created at `position`.
    RecordCreate { position: u64 },
    /// A record's payload was overwritten.
    RecordUpdate { position: u64, prior: Vec<u8> },
    /// A record was deleted.
    RecordDelete { position: u64, prior: Vec<u8> },
}

/// An in-flight atomic operation accumulating undo entries.
///
/// Obtained from [`AtomicOpsManager::start_atomic_operation`] and consumed
/// by [`AtomicOpsManager::end_atomic_operation`].
#[derive(Debug)]
pub struct AtomicOp {
    name: &'static str,
    undo: SmallVec<[UndoEntry; 4]>,
}

impl AtomicOp {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn record_undo(&mut self, entry: UndoEntry) {
        self.undo.push(entry);
    }

    #[cfg(test)]
    pub(crate) fn undo_len(&self) -> usize {
        self.undo.len()
    }
}

/// Coordinator for atomic-operation scopes.
#[derive(Debug, Default)]
pub struct AtomicOpsManager {
    in_flight: Option<&'static str>,
}

impl AtomicOpsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new scope. Fails if a scope is already in flight; scopes
    /// do not nest.
    pub fn start_atomic_operation(&mut self, name: &'static str) -> Result<AtomicOp> {
        if let Some(active) = self.in_flight {
            bail!(
                "atomic operation '{}' cannot start: operation '{}' is already in flight",
                name,
                active
            );
        }

        self.in_flight = Some(name);
        Ok(AtomicOp {
            name,
            undo: SmallVec::new(),
        })
    }

    /// Closes a scope.
    ///
    /// With `rollback` set, the undo log is applied in reverse and no
    /// flush happens. Otherwise both structures flush their snapshot
    /// files, cluster before index.
    pub fn end_atomic_operation(
        &mut self,
        op: AtomicOp,
        rollback: bool,
        index: &mut KeyIndex,
        cluster: &mut RecordCluster,
    ) -> Result<()> {
        debug_assert_eq!(self.in_flight, Some(op.name));
        self.in_flight = None;

        if rollback {
            for entry in op.undo.into_iter().rev() {
                match entry {
                    UndoEntry::IndexPut { key, prior } => index.apply_undo_put(&key, prior),
                    UndoEntry::IndexRemove { key, prior } => index.apply_undo_remove(key, prior),
                    UndoEntry::RecordCreate { position } => cluster.apply_undo_create(position),
                    UndoEntry::RecordUpdate { position, prior } => {
                        cluster.apply_undo_update(position, prior)
                    }
                    UndoEntry::RecordDelete { position, prior } => {
                        cluster.apply_undo_delete(position, prior)
                    }
                }
            }
            return Ok(());
        }

        cluster.flush()?;
        index.flush()?;
        Ok(())
    }
}
