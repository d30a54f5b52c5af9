//! Immutable, sorted on-disk segments.

use crate::error::{Result, StoreError};
use crate::memtable::now_micros;
use crate::record::{self, Record};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// An immutable on-disk file of length-prefixed records, sorted ascending
/// by key. Point lookups are a linear scan; there is no sparse index or
/// bloom filter in this design (not required for correctness, per the
/// design notes — a placeholder worth revisiting if lookup latency ever
/// matters more than simplicity).
pub struct SSTable {
    path: PathBuf,
}

impl SSTable {
    /// Registers an existing `.ss` file found on disk during recovery.
    /// The file's contents are trusted to already be a valid sstable.
    pub fn open(path: PathBuf) -> Self {
        Self { path }
    }

    /// Serializes every record in `pairs` (already in ascending key order)
    /// to a new file under `dir`. Writes to a temporary name first and
    /// renames on success, so a partial file from a crash mid-write is
    /// never observable as a `.ss` file.
    pub fn write_from_ordered<'a, I>(dir: &Path, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let final_path = unique_path(dir, "ss")?;
        let tmp_path = final_path.with_extension("ss.tmp");

        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for (key, value) in pairs {
                record::write_record(&mut writer, key, value)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &final_path)?;
        Ok(Self { path: final_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Linear scan of the file decoding records until a match or EOF.
    /// A tombstone hit is returned as-is — the caller (the engine) is
    /// responsible for translating it to "absent" and for not consulting
    /// older sources once it sees one.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let bytes = self.read_bytes()?;
        let mut pos = 0;
        while let Some((record, new_pos)) = decode_or_corrupt(&self.path, &bytes, pos)? {
            if record.key == key {
                return Ok(Some(record.value));
            }
            pos = new_pos;
        }
        Ok(None)
    }

    /// Full-file iteration in on-disk (ascending key) order, for compaction.
    pub fn iterate(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let bytes = self.read_bytes()?;
        let mut pos = 0;
        let mut out = Vec::new();
        while let Some((record, new_pos)) = decode_or_corrupt(&self.path, &bytes, pos)? {
            out.push((record.key, record.value));
            pos = new_pos;
        }
        Ok(out)
    }

    fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }
}

fn decode_or_corrupt(
    path: &Path,
    bytes: &[u8],
    pos: usize,
) -> Result<Option<(Record, usize)>> {
    record::decode_next(bytes, pos).map_err(|err| match err {
        StoreError::CorruptRecord(reason) => {
            StoreError::CorruptStore(format!("{}: {reason}", path.display()))
        }
        other => other,
    })
}

fn unique_path(dir: &Path, ext: &str) -> Result<PathBuf> {
    let mut micros = now_micros()?;
    loop {
        let candidate = dir.join(format!("{micros}.{ext}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
        micros += 1;
    }
}
