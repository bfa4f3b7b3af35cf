//! # Record Cluster
//!
//! This module implements the positional record store holding the payload
//! of every configuration entry. The key index links a key to a record
//! position; the cluster owns the bytes at that position.
//!
//! ## Design
//!
//! Records are variable-length byte payloads addressed by a `u64`
//! position. Positions are issued monotonically and never reused, so a
//! stale reference can only miss, never alias another record. The record
//! directory lives in memory and snapshots to disk as a pair of files:
//!
//! ```text
//! <name>.cd   records: (position: u64 LE | payload_len: u32 LE | payload)*
//! <name>.cm   64-byte header: magic, format version, record count,
//!             next position, CRC-64 of the .cd file
//! ```
//!
//! The snapshot is ordered by position so identical contents always
//! produce identical bytes.
//!
//! ## Atomicity
//!
//! `create_record`, `update_record`, and `delete_record` take the
//! in-flight [`AtomicOp`] and record the before-image of the touched
//! record. Undo application mutates the directory without logging; the
//! position counter is not rewound on rollback, which only leaves a gap.

use std::path::{Path, PathBuf};

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::atomic::{AtomicOp, UndoEntry};
use crate::snapshot;

pub const CLUSTER_DATA_EXTENSION: &str = "cd";
pub const CLUSTER_HEADER_EXTENSION: &str = "cm";

pub const CLUSTER_MAGIC: &[u8; 16] = b"RookDB CfgClu\x00\x00\x00";
pub const CLUSTER_FORMAT_VERSION: u32 = 1;

const CLUSTER_HEADER_SIZE: usize = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct ClusterHeader {
    magic: [u8; 16],
    version: U32,
    record_count: U64,
    next_position: U64,
    data_checksum: U64,
    reserved: [u8; 20],
}

const _: () = assert!(std::mem::size_of::<ClusterHeader>() == CLUSTER_HEADER_SIZE);

impl ClusterHeader {
    fn new(record_count: u64, next_position: u64, data_checksum: u64) -> Self {
        Self {
            magic: *CLUSTER_MAGIC,
            version: U32::new(CLUSTER_FORMAT_VERSION),
            record_count: U64::new(record_count),
            next_position: U64::new(next_position),
            data_checksum: U64::new(data_checksum),
            reserved: [0u8; 20],
        }
    }

    le_getters! {
        version: u32,
        record_count: u64,
        next_position: u64,
        data_checksum: u64,
    }
}

/// Positional store of variable-length record payloads.
#[derive(Debug)]
pub struct RecordCluster {
    name: String,
    data_path: PathBuf,
    header_path: PathBuf,
    records: HashMap<u64, Vec<u8>>,
    next_position: u64,
}

impl RecordCluster {
    /// Creates an empty cluster and writes its initial snapshot.
    pub fn create(dir: &Path, name: &str) -> Result<Self> {
        let cluster = Self {
            name: name.to_string(),
            data_path: dir.join(format!("{name}.{CLUSTER_DATA_EXTENSION}")),
            header_path: dir.join(format!("{name}.{CLUSTER_HEADER_EXTENSION}")),
            records: HashMap::new(),
            next_position: 0,
        };

        cluster
            .flush()
            .wrap_err_with(|| format!("failed to create record cluster '{name}'"))?;
        Ok(cluster)
    }

    /// Opens an existing cluster, validating magic, version, and checksum.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let data_path = dir.join(format!("{name}.{CLUSTER_DATA_EXTENSION}"));
        let header_path = dir.join(format!("{name}.{CLUSTER_HEADER_EXTENSION}"));

        let header_bytes = snapshot::read_file(&header_path)?;
        let header: &ClusterHeader = snapshot::parse_header(&header_bytes, "ClusterHeader")?;

        ensure!(
            &header.magic == CLUSTER_MAGIC,
            "invalid magic bytes in '{}'",
            header_path.display()
        );
        ensure!(
            header.version() == CLUSTER_FORMAT_VERSION,
            "unsupported record cluster format version: {} (expected {})",
            header.version(),
            CLUSTER_FORMAT_VERSION
        );

        let data = snapshot::read_file(&data_path)?;
        ensure!(
            snapshot::checksum(&data) == header.data_checksum(),
            "checksum mismatch in '{}': the snapshot is torn or corrupt",
            data_path.display()
        );

        let records = decode_records(&data, header.record_count())
            .wrap_err_with(|| format!("failed to decode record cluster '{name}'"))?;

        Ok(Self {
            name: name.to_string(),
            data_path,
            header_path,
            records,
            next_position: header.next_position(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a new record inside the given atomic scope, returning its
    /// position.
    pub fn create_record(&mut self, op: &mut AtomicOp, payload: &[u8]) -> Result<u64> {
        let position = self.next_position;
        self.next_position += 1;

        self.records.insert(position, payload.to_vec());
        op.record_undo(UndoEntry::RecordCreate { position });
        Ok(position)
    }

    /// Overwrites an existing record's payload inside the given atomic
    /// scope.
    pub fn update_record(&mut self, op: &mut AtomicOp, position: u64, payload: &[u8]) -> Result<()> {
        let Some(slot) = self.records.get_mut(&position) else {
            bail!(
                "record at position {} does not exist in cluster '{}'",
                position,
                self.name
            );
        };

        let prior = std::mem::replace(slot, payload.to_vec());
        op.record_undo(UndoEntry::RecordUpdate { position, prior });
        Ok(())
    }

    /// Deletes a record inside the given atomic scope.
    pub fn delete_record(&mut self, op: &mut AtomicOp, position: u64) -> Result<()> {
        let Some(prior) = self.records.remove(&position) else {
            bail!(
                "record at position {} does not exist in cluster '{}'",
                position,
                self.name
            );
        };

        op.record_undo(UndoEntry::RecordDelete { position, prior });
        Ok(())
    }

    /// Reads a record's payload.
    pub fn read_record(&self, position: u64) -> Result<&[u8]> {
        match self.records.get(&position) {
            Some(payload) => Ok(payload),
            None => bail!(
                "record at position {} does not exist in cluster '{}'",
                position,
                self.name
            ),
        }
    }

    /// Writes the current snapshot: data file first, then the header
    /// describing it.
    pub fn flush(&self) -> Result<()> {
        let data = encode_records(&self.records);
        snapshot::write_atomically(&self.data_path, &data)?;

        let header = ClusterHeader::new(
            self.records.len() as u64,
            self.next_position,
            snapshot::checksum(&data),
        );
        snapshot::write_atomically(&self.header_path, header.as_bytes())
    }

    /// Flushes and releases the cluster.
    pub fn close(self) -> Result<()> {
        self.flush()
            .wrap_err_with(|| format!("failed to close record cluster '{}'", self.name))
    }

    /// Removes the cluster files.
    pub fn delete(self) -> Result<()> {
        snapshot::remove_file(&self.data_path)?;
        snapshot::remove_file(&self.header_path)
    }

    pub(crate) fn apply_undo_create(&mut self, position: u64) {
        self.records.remove(&position);
    }

    pub(crate) fn apply_undo_update(&mut self, position: u64, prior: Vec<u8>) {
        self.records.insert(position, prior);
    }

    pub(crate) fn apply_undo_delete(&mut self, position: u64, prior: Vec<u8>) {
        self.records.insert(position, prior);
    }
}

fn encode_records(records: &HashMap<u64, Vec<u8>>) -> Vec<u8> {
    let mut ordered: Vec<(&u64, &Vec<u8>)> = records.iter().collect();
    ordered.sort_by_key(|(position, _)| **position);

    let mut buf = Vec::new();
    for (position, payload) in ordered {
        buf.extend(position.to_le_bytes());
        buf.extend((payload.len() as u32).to_le_bytes());
        buf.extend(payload.as_slice());
    }
    buf
}

fn decode_records(bytes: &[u8], expected: u64) -> Result<HashMap<u64, Vec<u8>>> {
    let mut records = HashMap::new();
    let mut pos = 0;

    while pos < bytes.len() {
        ensure!(
            pos + 12 <= bytes.len(),
            "unexpected end of data reading record header at offset {}",
            pos
        );
        let position = u64::from_le_bytes([
            bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3],
            bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7],
        ]);
        pos += 8;
        let payload_len = u32::from_le_bytes([
            bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3],
        ]) as usize;
        pos += 4;

        ensure!(
            pos + payload_len <= bytes.len(),
            "unexpected end of data reading record payload at offset {}",
            pos
        );
        records.insert(position, bytes[pos..pos + payload_len].to_vec());
        pos += payload_len;
    }

    ensure!(
        records.len() as u64 == expected,
        "record count mismatch: header says {}, data holds {}",
        expected,
        records.len()
    );

    Ok(records)
}
