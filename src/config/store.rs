//! # Catalog Store
//!
//! The keyed transactional map underneath the configuration facade. An
//! entry is a UTF-8 key mapped to a binary payload; the key and link live
//! in the [`KeyIndex`], the payload lives in the [`RecordCluster`], and
//! every mutation composes the two inside one atomic-operation scope
//! named `dbConfig`.
//!
//! ## Contract
//!
//! - `get`: resolve the key through the index, read the payload from the
//!   cluster. Absent keys read as `None`; a key whose record is missing
//!   is corruption and fails.
//! - `put`: overwrite the existing record in place, or append a record
//!   and insert the mapping. All inside one scope; the update listener
//!   fires only after the scope committed.
//! - `drop_key`: remove the mapping, then delete the record it referenced.
//! - `prefix_scan`: ascending index iteration from the prefix, stopping
//!   at the first key outside the prefix; payloads read per entry. The
//!   scan holds no scope, so it sees a live view of the index.
//! - `clear_prefix`: one scan collects the family, then a single scope
//!   removes every mapping and deletes every record.
//!
//! ## Rollback
//!
//! Any error out of a scope's body flips the rollback flag; the scope
//! exit applies the undo log and the error is rethrown to the caller
//! wrapped with the entry's key.

use std::path::Path;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use tracing::error;

use crate::atomic::{AtomicOp, AtomicOpsManager};
use crate::cluster::RecordCluster;
use crate::index::{KeyIndex, RecordRef, DEFAULT_MAX_KEY_SIZE};

/// Name shared by the cluster and index storage components.
pub const CONFIG_COMPONENT_NAME: &str = "config";

/// Name of the atomic-operation scope wrapping every mutation.
pub const CONFIG_ATOMIC_OP: &str = "dbConfig";

/// Hook invoked after a configuration entry committed.
pub trait ConfigUpdateListener: Send + Sync {
    fn on_update(&self, key: &str);
}

/// Keyed transactional map over the key index and the record cluster.
pub struct ConfigStore {
    index: KeyIndex,
    cluster: RecordCluster,
    atomic_ops: AtomicOpsManager,
    listener: Option<Arc<dyn ConfigUpdateListener>>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("index", &self.index)
            .field("cluster", &self.cluster)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl ConfigStore {
    /// Creates the cluster and the index in `dir` and returns the empty
    /// store.
    pub fn create(dir: &Path) -> Result<Self> {
        Self::create_with_max_key_size(dir, DEFAULT_MAX_KEY_SIZE)
    }

    /// Creates the store with a custom key-size bound on the index.
    pub fn create_with_max_key_size(dir: &Path, max_key_size: usize) -> Result<Self> {
        let cluster = RecordCluster::create(dir, CONFIG_COMPONENT_NAME)?;
        let index = KeyIndex::create(dir, CONFIG_COMPONENT_NAME, max_key_size)?;

        Ok(Self {
            index,
            cluster,
            atomic_ops: AtomicOpsManager::new(),
            listener: None,
        })
    }

    /// Opens the cluster and the index of an existing store.
    pub fn load(dir: &Path) -> Result<Self> {
        let cluster = RecordCluster::load(dir, CONFIG_COMPONENT_NAME)?;
        let index = KeyIndex::load(dir, CONFIG_COMPONENT_NAME)?;

        Ok(Self {
            index,
            cluster,
            atomic_ops: AtomicOpsManager::new(),
            listener: None,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.get(key).is_some()
    }

    /// Reads an entry's payload, or `None` when the key is absent.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(reference) = self.index.get(key) else {
            return Ok(None);
        };

        let payload = self
            .cluster
            .read_record(reference.position())
            .wrap_err_with(|| format!("error during read of configuration entry '{key}'"))?;
        Ok(Some(payload.to_vec()))
    }

    /// Creates or overwrites an entry, then notifies the update listener.
    pub fn put(&mut self, key: &str, payload: &[u8]) -> Result<()> {
        self.run_atomic(|op, index, cluster| match index.get(key) {
            Some(reference) => cluster.update_record(op, reference.position(), payload),
            None => {
                let position = cluster.create_record(op, payload)?;
                index.put(op, key, RecordRef::new(position))
            }
        })
        .wrap_err_with(|| format!("error during update of configuration entry '{key}'"))?;

        if let Some(listener) = &self.listener {
            listener.on_update(key);
        }
        Ok(())
    }

    /// Removes an entry if present: the mapping first, then the record it
    /// referenced.
    pub fn drop_key(&mut self, key: &str) -> Result<()> {
        self.run_atomic(|op, index, cluster| {
            if let Some(reference) = index.remove(op, key) {
                cluster.delete_record(op, reference.position())?;
            }
            Ok(())
        })
        .wrap_err_with(|| format!("error during drop of configuration entry '{key}'"))
    }

    /// Returns every `(key, payload)` whose key starts with `prefix`, in
    /// ascending key order.
    pub fn prefix_scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut result = Vec::new();

        for (key, reference) in self.index.iterate_major(prefix, false) {
            if !key.starts_with(prefix) {
                break;
            }

            let payload = self
                .cluster
                .read_record(reference.position())
                .wrap_err_with(|| format!("error during read of configuration entry '{key}'"))?;
            result.push((key.to_string(), payload.to_vec()));
        }

        Ok(result)
    }

    /// Removes every entry whose key starts with `prefix` in one atomic
    /// scope.
    pub fn clear_prefix(&mut self, prefix: &str) -> Result<()> {
        let doomed: Vec<(String, RecordRef)> = self
            .index
            .iterate_major(prefix, false)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, reference)| (key.to_string(), reference))
            .collect();

        self.run_atomic(|op, index, cluster| {
            for (key, _) in &doomed {
                let _ = index.remove(op, key);
            }
            for (_, reference) in &doomed {
                cluster.delete_record(op, reference.position())?;
            }
            Ok(())
        })
        .wrap_err_with(|| format!("error during clear of configuration entries '{prefix}*'"))
    }

    pub fn set_update_listener(&mut self, listener: Option<Arc<dyn ConfigUpdateListener>>) {
        self.listener = listener;
    }

    /// Flushes both structures.
    pub fn flush(&self) -> Result<()> {
        self.cluster.flush()?;
        self.index.flush()
    }

    /// Flushes and closes both structures.
    pub fn close(self) -> Result<()> {
        self.cluster.close()?;
        self.index.close()
    }

    /// Deletes the files of both structures.
    pub fn delete(self) -> Result<()> {
        self.cluster.delete()?;
        self.index.delete()
    }

    /// Runs `body` inside one atomic-operation scope, committing on
    /// success and rolling back on any error.
    fn run_atomic<T>(
        &mut self,
        body: impl FnOnce(&mut AtomicOp, &mut KeyIndex, &mut RecordCluster) -> Result<T>,
    ) -> Result<T> {
        let mut op = self.atomic_ops.start_atomic_operation(CONFIG_ATOMIC_OP)?;
        let result = body(&mut op, &mut self.index, &mut self.cluster);

        match result {
            Ok(value) => {
                self.atomic_ops.end_atomic_operation(
                    op,
                    false,
                    &mut self.index,
                    &mut self.cluster,
                )?;
                Ok(value)
            }
            Err(cause) => {
                if let Err(rollback_error) = self.atomic_ops.end_atomic_operation(
                    op,
                    true,
                    &mut self.index,
                    &mut self.cluster,
                ) {
                    error!(
                        "rollback of atomic operation '{}' failed: {:#}",
                        CONFIG_ATOMIC_OP, rollback_error
                    );
                }
                Err(cause)
            }
        }
    }
}
