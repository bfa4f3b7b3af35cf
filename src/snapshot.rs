//! # Snapshot File Helpers
//!
//! Shared primitives for the small snapshot files the storage core keeps
//! on disk. Both the key index and the record cluster persist as a data
//! file plus a fixed-size zerocopy header file carrying a magic, a format
//! version, and a CRC-64 checksum of the data file.
//!
//! Writes go to a temporary sibling first and are published by rename, so
//! a torn write leaves the previous snapshot intact. The header is
//! written after the data file it describes; a crash in between is
//! detected on open by the checksum mismatch.

use std::fs;
use std::io::Write;
use std::path::Path;

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result, WrapErr};
use zerocopy::{FromBytes, Immutable, KnownLayout};

pub(crate) const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

pub(crate) fn checksum(bytes: &[u8]) -> u64 {
    CRC64.checksum(bytes)
}

/// Writes `bytes` to `path` via a temporary sibling and an atomic rename.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp_path)
        .wrap_err_with(|| format!("failed to create '{}'", tmp_path.display()))?;
    file.write_all(bytes)
        .wrap_err_with(|| format!("failed to write '{}'", tmp_path.display()))?;
    file.sync_all()
        .wrap_err_with(|| format!("failed to sync '{}'", tmp_path.display()))?;
    drop(file);

    fs::rename(&tmp_path, path).wrap_err_with(|| {
        format!(
            "failed to publish '{}' over '{}'",
            tmp_path.display(),
            path.display()
        )
    })
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).wrap_err_with(|| format!("failed to read '{}'", path.display()))
}

pub(crate) fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).wrap_err_with(|| format!("failed to delete '{}'", path.display()))
}

/// Parses a zerocopy header struct from a byte slice with size validation.
pub(crate) fn parse_header<'a, T: FromBytes + KnownLayout + Immutable>(
    bytes: &'a [u8],
    type_name: &str,
) -> Result<&'a T> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );

    T::ref_from_bytes(&bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}
