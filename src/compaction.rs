//! Background logic that merges small sstables into one, dropping
//! tombstoned and shadowed keys.

use crate::error::Result;
use crate::record::is_tombstone;
use crate::sstable::SSTable;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Copies each chosen sstable's file to a `.tmp` sidecar so the merge can
/// proceed without holding the sstable list lock; the originals stay live
/// for readers throughout.
pub fn copy_sidecars(tables: &[&SSTable]) -> Result<Vec<PathBuf>> {
    let mut sidecars = Vec::with_capacity(tables.len());
    for table in tables {
        let sidecar = sidecar_path(table.path());
        fs::copy(table.path(), &sidecar)?;
        sidecars.push(sidecar);
    }
    Ok(sidecars)
}

fn sidecar_path(original: &Path) -> PathBuf {
    let mut name = original.file_name().unwrap().to_os_string();
    name.push(".tmp");
    original.with_file_name(name)
}

/// Merges the sidecar files, most-recent first, keeping only the
/// newest-seen value per key and dropping keys whose newest value is a
/// tombstone. Returns the merged set in ascending key order, ready to be
/// written out with [`SSTable::write_from_ordered`].
pub fn merge_sidecars(sidecar_paths: &[PathBuf]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    let mut seen: std::collections::HashSet<Vec<u8>> = std::collections::HashSet::new();

    // `sidecar_paths` is ordered newest-first: the first time we see a key
    // wins, matching the freshness rule.
    for path in sidecar_paths {
        let table = SSTable::open(path.clone());
        for (key, value) in table.iterate()? {
            if seen.contains(&key) {
                continue;
            }
            seen.insert(key.clone());
            if !is_tombstone(&value) {
                merged.insert(key, value);
            }
        }
    }

    Ok(merged.into_iter().collect())
}

/// Removes the sidecar files once a merge has completed (successfully or
/// not) so `.tmp` artifacts never linger past the compaction pass.
pub fn remove_sidecars(sidecar_paths: &[PathBuf]) {
    for path in sidecar_paths {
        let _ = fs::remove_file(path);
    }
}
