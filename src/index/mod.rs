//! # Key Index
//!
//! This module implements the ordered persistent index mapping
//! configuration keys to record references. It is one half of every
//! configuration entry: the index owns the key and the link, the record
//! cluster owns the payload.
//!
//! ## Design
//!
//! The configuration store holds dozens to low hundreds of keys, so the
//! index keeps the whole map in memory (`BTreeMap`, giving the ascending
//! iteration order prefix scans rely on) and snapshots it to disk as a
//! pair of files:
//!
//! ```text
//! <name>.bd   entries: (key_len: u16 LE | key bytes | position: u64 LE)*
//! <name>.nd   64-byte header: magic, format version, max key size,
//!             entry count, CRC-64 of the .bd file
//! ```
//!
//! Snapshots are written temp-then-rename; the header's checksum makes a
//! torn flush detectable on load.
//!
//! ## Atomicity
//!
//! `put` and `remove` take the in-flight [`AtomicOp`] and record the
//! before-image of the touched mapping, so the atomic-operation manager
//! can restore it on rollback. Undo application mutates the map without
//! logging.
//!
//! ## Key Size
//!
//! Keys longer than the configured maximum are rejected by `put`. The
//! limit is persisted in the header so a reloaded index keeps enforcing
//! the bound it was created with.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use eyre::{bail, ensure, Result, WrapErr};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::atomic::{AtomicOp, UndoEntry};
use crate::snapshot;

pub const INDEX_DATA_EXTENSION: &str = "bd";
pub const INDEX_HEADER_EXTENSION: &str = "nd";

pub const INDEX_MAGIC: &[u8; 16] = b"RookDB CfgIdx\x00\x00\x00";
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Default upper bound on key length, in bytes.
pub const DEFAULT_MAX_KEY_SIZE: usize = 10 * 1024;

const INDEX_HEADER_SIZE: usize = 64;

/// A stable reference to a record in the record cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordRef {
    position: u64,
}

impl RecordRef {
    pub fn new(position: u64) -> Self {
        Self { position }
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct IndexHeader {
    magic: [u8; 16],
    version: U32,
    max_key_size: U32,
    entry_count: U64,
    data_checksum: U64,
    reserved: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<IndexHeader>() == INDEX_HEADER_SIZE);

impl IndexHeader {
    fn new(max_key_size: u32, entry_count: u64, data_checksum: u64) -> Self {
        Self {
            magic: *INDEX_MAGIC,
            version: U32::new(INDEX_FORMAT_VERSION),
            max_key_size: U32::new(max_key_size),
            entry_count: U64::new(entry_count),
            data_checksum: U64::new(data_checksum),
            reserved: [0u8; 24],
        }
    }

    le_getters! {
        version: u32,
        max_key_size: u32,
        entry_count: u64,
        data_checksum: u64,
    }
}

/// Ordered persistent map from configuration keys to record references.
#[derive(Debug)]
pub struct KeyIndex {
    name: String,
    data_path: PathBuf,
    header_path: PathBuf,
    entries: BTreeMap<String, RecordRef>,
    max_key_size: usize,
}

impl KeyIndex {
    /// Creates an empty index and writes its initial snapshot.
    pub fn create(dir: &Path, name: &str, max_key_size: usize) -> Result<Self> {
        let index = Self {
            name: name.to_string(),
            data_path: dir.join(format!("{name}.{INDEX_DATA_EXTENSION}")),
            header_path: dir.join(format!("{name}.{INDEX_HEADER_EXTENSION}")),
            entries: BTreeMap::new(),
            max_key_size,
        };

        index
            .flush()
            .wrap_err_with(|| format!("failed to create key index '{name}'"))?;
        Ok(index)
    }

    /// Opens an existing index, validating magic, version, and checksum.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let data_path = dir.join(format!("{name}.{INDEX_DATA_EXTENSION}"));
        let header_path = dir.join(format!("{name}.{INDEX_HEADER_EXTENSION}"));

        let header_bytes = snapshot::read_file(&header_path)?;
        let header: &IndexHeader = snapshot::parse_header(&header_bytes, "IndexHeader")?;

        ensure!(
            &header.magic == INDEX_MAGIC,
            "invalid magic bytes in '{}'",
            header_path.display()
        );
        ensure!(
            header.version() == INDEX_FORMAT_VERSION,
            "unsupported key index format version: {} (expected {})",
            header.version(),
            INDEX_FORMAT_VERSION
        );

        let data = snapshot::read_file(&data_path)?;
        ensure!(
            snapshot::checksum(&data) == header.data_checksum(),
            "checksum mismatch in '{}': the snapshot is torn or corrupt",
            data_path.display()
        );

        let entries = decode_entries(&data, header.entry_count())
            .wrap_err_with(|| format!("failed to decode key index '{name}'"))?;

        Ok(Self {
            name: name.to_string(),
            data_path,
            header_path,
            entries,
            max_key_size: header.max_key_size() as usize,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<RecordRef> {
        self.entries.get(key).copied()
    }

    /// Inserts or overwrites a mapping inside the given atomic scope.
    pub fn put(&mut self, op: &mut AtomicOp, key: &str, reference: RecordRef) -> Result<()> {
        if key.len() > self.max_key_size {
            let preview: String = key.chars().take(32).collect();
            bail!(
                "key '{}...' exceeds the maximum key size of {} bytes",
                preview,
                self.max_key_size
            );
        }

        let prior = self.entries.insert(key.to_string(), reference);
        op.record_undo(UndoEntry::IndexPut {
            key: key.to_string(),
            prior,
        });
        Ok(())
    }

    /// Removes a mapping inside the given atomic scope, returning the
    /// reference it held.
    pub fn remove(&mut self, op: &mut AtomicOp, key: &str) -> Option<RecordRef> {
        let prior = self.entries.remove(key)?;
        op.record_undo(UndoEntry::IndexRemove {
            key: key.to_string(),
            prior,
        });
        Some(prior)
    }

    /// Iterates entries in ascending key order starting at `from`
    /// (exclusive unless `inclusive` is set).
    pub fn iterate_major<'a>(
        &'a self,
        from: &str,
        inclusive: bool,
    ) -> impl Iterator<Item = (&'a str, RecordRef)> + 'a {
        let lower = if inclusive {
            Bound::Included(from.to_string())
        } else {
            Bound::Excluded(from.to_string())
        };

        self.entries
            .range((lower, Bound::Unbounded))
            .map(|(key, reference)| (key.as_str(), *reference))
    }

    /// Writes the current snapshot: data file first, then the header
    /// describing it.
    pub fn flush(&self) -> Result<()> {
        let data = encode_entries(&self.entries);
        snapshot::write_atomically(&self.data_path, &data)?;

        let header = IndexHeader::new(
            self.max_key_size as u32,
            self.entries.len() as u64,
            snapshot::checksum(&data),
        );
        snapshot::write_atomically(&self.header_path, header.as_bytes())
    }

    /// Flushes and releases the index.
    pub fn close(self) -> Result<()> {
        self.flush()
            .wrap_err_with(|| format!("failed to close key index '{}'", self.name))
    }

    /// Removes the index files.
    pub fn delete(self) -> Result<()> {
        snapshot::remove_file(&self.data_path)?;
        snapshot::remove_file(&self.header_path)
    }

    pub(crate) fn apply_undo_put(&mut self, key: &str, prior: Option<RecordRef>) {
        match prior {
            Some(reference) => {
                self.entries.insert(key.to_string(), reference);
            }
            None => {
                self.entries.remove(key);
            }
        }
    }

    pub(crate) fn apply_undo_remove(&mut self, key: String, prior: RecordRef) {
        self.entries.insert(key, prior);
    }
}

fn encode_entries(entries: &BTreeMap<String, RecordRef>) -> Vec<u8> {
    let mut buf = Vec::new();
    for (key, reference) in entries {
        buf.extend((key.len() as u16).to_le_bytes());
        buf.extend(key.as_bytes());
        buf.extend(reference.position().to_le_bytes());
    }
    buf
}

fn decode_entries(bytes: &[u8], expected: u64) -> Result<BTreeMap<String, RecordRef>> {
    let mut entries = BTreeMap::new();
    let mut pos = 0;

    while pos < bytes.len() {
        ensure!(
            pos + 2 <= bytes.len(),
            "unexpected end of data reading key length at offset {}",
            pos
        );
        let key_len = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]) as usize;
        pos += 2;

        ensure!(
            pos + key_len <= bytes.len(),
            "unexpected end of data reading key at offset {}",
            pos
        );
        let key = std::str::from_utf8(&bytes[pos..pos + key_len])
            .map_err(|e| eyre::eyre!("invalid UTF-8 in key at offset {}: {}", pos, e))?
            .to_string();
        pos += key_len;

        ensure!(
            pos + 8 <= bytes.len(),
            "unexpected end of data reading record position at offset {}",
            pos
        );
        let position = u64::from_le_bytes([
            bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3],
            bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7],
        ]);
        pos += 8;

        entries.insert(key, RecordRef::new(position));
    }

    ensure!(
        entries.len() as u64 == expected,
        "entry count mismatch: header says {}, data holds {}",
        expected,
        entries.len()
    );

    Ok(entries)
}
