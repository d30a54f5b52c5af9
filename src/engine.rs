//! The top-level coordinator: active memtable, flush queue, sstable list,
//! and the background flush/compaction workers.

use crate::compaction;
use crate::config::EngineConfig;
use crate::error::{Result, StoreError};
use crate::flush_queue::FlushQueue;
use crate::memtable::Memtable;
use crate::record::{is_tombstone, TOMBSTONE};
use crate::sstable::SSTable;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

struct Inner {
    directory: PathBuf,
    active: Mutex<Memtable>,
    queue: Mutex<FlushQueue>,
    sstables: Mutex<Vec<SSTable>>,
    max_memtable_bytes: AtomicUsize,
    max_sstable_size: u64,
    flush_interval: Duration,
    compaction_interval: Duration,
    running: AtomicBool,
}

struct Workers {
    flush: JoinHandle<()>,
    compaction: JoinHandle<()>,
}

/// The embedding API: open a directory, `put`/`get`/`delete`, and shut down
/// cleanly.
pub struct Engine {
    inner: Arc<Inner>,
    workers: Mutex<Option<Workers>>,
}

fn lock<T>(mutex: &Mutex<T>, name: &'static str) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| StoreError::LockPoisoned(name))
}

impl Engine {
    /// Creates the directory if missing, then recovers: every `*.log` file
    /// becomes a queued memtable (oldest at the tail), every `*.ss` file is
    /// registered as an sstable (newest at the head). Allocates a fresh
    /// active memtable with a new log file.
    pub fn open(config: EngineConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let (mut log_files, mut ss_files) = (Vec::new(), Vec::new());
        for entry in fs::read_dir(&config.data_dir)? {
            let entry = entry?;
            let path = entry.path();
            match (path.extension().and_then(|e| e.to_str()), numeric_stem(&path)) {
                (Some("log"), Some(ts)) => log_files.push((ts, path)),
                (Some("ss"), Some(ts)) => ss_files.push((ts, path)),
                (Some("tmp"), _) => {
                    warn!("removing leftover compaction artifact {}", path.display());
                    let _ = fs::remove_file(&path);
                }
                _ => {}
            }
        }

        // Oldest first, so pushing each to the head of the queue in this
        // order leaves the oldest deepest (tail) and the newest at the head.
        log_files.sort_by_key(|(ts, _)| *ts);
        let mut queue = FlushQueue::new();
        for (_, path) in log_files {
            match Memtable::open_existing(path.clone()) {
                Ok(memtable) => queue.push_sealed(memtable),
                Err(err) => warn!("failed to recover log {}: {err}", path.display()),
            }
        }

        // Newest first.
        ss_files.sort_by_key(|(ts, _)| std::cmp::Reverse(*ts));
        let sstables: Vec<SSTable> = ss_files.into_iter().map(|(_, path)| SSTable::open(path)).collect();

        let active = Memtable::create(&config.data_dir)?;

        info!(
            "engine recovered: {} queued memtable(s), {} sstable(s)",
            queue.len(),
            sstables.len()
        );

        let inner = Arc::new(Inner {
            directory: config.data_dir,
            active: Mutex::new(active),
            queue: Mutex::new(queue),
            sstables: Mutex::new(sstables),
            max_memtable_bytes: AtomicUsize::new(config.max_memtable_bytes),
            max_sstable_size: config.max_sstable_size,
            flush_interval: config.flush_interval,
            compaction_interval: config.compaction_interval,
            running: AtomicBool::new(false),
        });

        Ok(Self {
            inner,
            workers: Mutex::new(None),
        })
    }

    /// Writes `(key, value)`. `value` must not equal the tombstone
    /// sentinel `[0x00]` — use [`Engine::delete`] for deletions.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("key must not be empty".into()));
        }
        if is_tombstone(value) {
            return Err(StoreError::InvalidArgument(
                "value collides with the tombstone sentinel; use delete() instead".into(),
            ));
        }
        self.put_raw(key, value)
    }

    /// Equivalent to `put(key, [0x00])`.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("key must not be empty".into()));
        }
        self.put_raw(key, &[TOMBSTONE])
    }

    fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut active = lock(&self.inner.active, "memtable")?;
        let threshold = self.inner.max_memtable_bytes.load(Ordering::SeqCst);
        if !active.is_empty() && active.size_bytes() >= threshold {
            self.seal_locked(&mut active)?;
        }
        active.put(key, value)
    }

    /// Moves the active memtable into the flush queue and installs a fresh
    /// one. Must be called with the memtable lock already held; the queue
    /// lock is taken and released within this call, never held across it.
    fn seal_locked(&self, active: &mut MutexGuard<'_, Memtable>) -> Result<()> {
        let fresh = Memtable::create(&self.inner.directory)?;
        let sealed = std::mem::replace(&mut **active, fresh);
        let mut queue = lock(&self.inner.queue, "queue")?;
        debug!(
            "sealed memtable {} ({} entries)",
            sealed.log_path().display(),
            sealed.len()
        );
        queue.push_sealed(sealed);
        Ok(())
    }

    /// Consults, in order: active memtable, flush queue (head to tail),
    /// sstable list (head to tail). Returns the first hit, translating a
    /// tombstone to absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        {
            let active = lock(&self.inner.active, "memtable")?;
            if let Some(value) = active.get(key) {
                return Ok(resolve(value.to_vec()));
            }
        }
        {
            let queue = lock(&self.inner.queue, "queue")?;
            if let Some(value) = queue.get(key) {
                return Ok(resolve(value.to_vec()));
            }
        }
        {
            let sstables = lock(&self.inner.sstables, "sstables")?;
            for table in sstables.iter() {
                if let Some(value) = table.get(key)? {
                    return Ok(resolve(value));
                }
            }
        }
        Ok(None)
    }

    /// Changes the memtable sealing threshold.
    pub fn set_max_size(&self, bytes: usize) -> Result<()> {
        self.inner.max_memtable_bytes.store(bytes, Ordering::SeqCst);
        Ok(())
    }

    /// Launches the flush worker and the compactor worker. Idempotent: a
    /// second call while already running is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut workers = lock(&self.workers, "workers")?;
        if workers.is_some() {
            return Ok(());
        }

        self.inner.running.store(true, Ordering::SeqCst);

        let flush_inner = Arc::clone(&self.inner);
        let flush = thread::spawn(move || flush_worker_loop(flush_inner));

        let compaction_inner = Arc::clone(&self.inner);
        let compaction = thread::spawn(move || compaction_worker_loop(compaction_inner));

        *workers = Some(Workers { flush, compaction });
        Ok(())
    }

    /// Seals the active memtable, drains every queued memtable
    /// synchronously into sstables, and stops the background workers.
    pub fn graceful_shutdown(&self) -> Result<()> {
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(workers) = lock(&self.workers, "workers")?.take() {
            let _ = workers.flush.join();
            let _ = workers.compaction.join();
        }

        {
            let mut active = lock(&self.inner.active, "memtable")?;
            if !active.is_empty() {
                self.seal_locked(&mut active)?;
            }
        }

        loop {
            let next = { lock(&self.inner.queue, "queue")?.pop_oldest() };
            match next {
                None => break,
                Some(memtable) => flush_memtable(&self.inner, memtable)?,
            }
        }

        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// Number of sealed memtables currently awaiting flush. Mainly useful
    /// for tests and diagnostics.
    pub fn flush_queue_len(&self) -> Result<usize> {
        Ok(lock(&self.inner.queue, "queue")?.len())
    }

    /// Number of live sstables. Mainly useful for tests and diagnostics.
    pub fn sstable_count(&self) -> Result<usize> {
        Ok(lock(&self.inner.sstables, "sstables")?.len())
    }

    /// A human-readable summary of engine state, analogous to a debug
    /// `stats` command on an interactive store.
    pub fn stats(&self) -> Result<String> {
        let active_len = lock(&self.inner.active, "memtable")?.len();
        let queue_len = lock(&self.inner.queue, "queue")?.len();
        let sstable_count = lock(&self.inner.sstables, "sstables")?.len();
        Ok(format!(
            "active memtable: {active_len} entries; flush queue: {queue_len}; sstables: {sstable_count}"
        ))
    }
}

fn resolve(value: Vec<u8>) -> Option<Vec<u8>> {
    if is_tombstone(&value) {
        None
    } else {
        Some(value)
    }
}

fn numeric_stem(path: &Path) -> Option<u128> {
    path.file_stem()?.to_str()?.parse().ok()
}

/// Builds an sstable from `memtable`'s contents, publishes it at the head
/// of the sstable list, and unlinks the memtable's log file. Does not
/// re-queue on failure — callers decide the retry policy.
fn flush_memtable(inner: &Arc<Inner>, memtable: Memtable) -> Result<()> {
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = memtable
        .iterate()
        .map(|(k, v)| (k.to_vec(), v.to_vec()))
        .collect();

    let log_path = memtable.log_path().to_path_buf();

    if pairs.is_empty() {
        let _ = fs::remove_file(&log_path);
        return Ok(());
    }

    let sstable = SSTable::write_from_ordered(
        &inner.directory,
        pairs.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
    )?;

    {
        let mut sstables = lock(&inner.sstables, "sstables")?;
        sstables.insert(0, sstable);
    }

    fs::remove_file(&log_path)?;
    Ok(())
}

fn flush_worker_loop(inner: Arc<Inner>) {
    while inner.running.load(Ordering::SeqCst) {
        let next = match lock(&inner.queue, "queue") {
            Ok(mut queue) => queue.pop_oldest(),
            Err(_) => None,
        };

        match next {
            None => thread::sleep(inner.flush_interval),
            Some(memtable) => {
                let log_path = memtable.log_path().to_path_buf();
                if let Err(err) = try_flush_or_requeue(&inner, memtable) {
                    warn!("flush of {} failed, will retry: {err}", log_path.display());
                }
            }
        }
    }
}

/// Flushes `memtable`; on failure, puts it back at the tail of the queue
/// (it is still the oldest entry) so the next tick retries the same data
/// instead of losing it.
fn try_flush_or_requeue(inner: &Arc<Inner>, memtable: Memtable) -> Result<()> {
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = memtable
        .iterate()
        .map(|(k, v)| (k.to_vec(), v.to_vec()))
        .collect();
    let log_path = memtable.log_path().to_path_buf();

    if pairs.is_empty() {
        let _ = fs::remove_file(&log_path);
        return Ok(());
    }

    match SSTable::write_from_ordered(
        &inner.directory,
        pairs.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
    ) {
        Ok(sstable) => {
            {
                let mut sstables = lock(&inner.sstables, "sstables")?;
                sstables.insert(0, sstable);
            }
            fs::remove_file(&log_path)?;
            Ok(())
        }
        Err(err) => {
            if let Ok(mut queue) = lock(&inner.queue, "queue") {
                queue.push_oldest_back(memtable);
            }
            Err(err)
        }
    }
}

fn compaction_worker_loop(inner: Arc<Inner>) {
    while inner.running.load(Ordering::SeqCst) {
        if let Err(err) = compaction_tick(&inner) {
            warn!("compaction pass failed: {err}");
        }
        thread::sleep(inner.compaction_interval);
    }
}

fn compaction_tick(inner: &Arc<Inner>) -> Result<()> {
    // The sstable lock covers both candidate selection and the sidecar
    // copy: per the locking discipline, the initial copy happens under
    // the lock so a concurrent flush can't publish (or a concurrent
    // compaction pass, were there more than one, can't remove) a
    // candidate out from under the copy. The merge that follows runs
    // entirely unlocked against the sidecar files.
    let (candidates, min_index, sidecars) = {
        let sstables = lock(&inner.sstables, "sstables")?;
        let mut candidates = Vec::new();
        let mut min_index = None;
        for (index, table) in sstables.iter().enumerate() {
            if table.size_bytes()? <= inner.max_sstable_size {
                candidates.push(PathBuf::from(table.path()));
                min_index = Some(min_index.map_or(index, |m: usize| m.min(index)));
            }
        }

        if candidates.len() < 2 {
            return Ok(());
        }

        let wrapped: Vec<SSTable> = candidates.iter().cloned().map(SSTable::open).collect();
        let refs: Vec<&SSTable> = wrapped.iter().collect();
        let sidecars = compaction::copy_sidecars(&refs)?;

        (candidates, min_index.unwrap(), sidecars)
    };

    let merged = compaction::merge_sidecars(&sidecars);
    compaction::remove_sidecars(&sidecars);
    let merged = merged?;

    let new_sstable = if merged.is_empty() {
        None
    } else {
        Some(SSTable::write_from_ordered(
            &inner.directory,
            merged.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
        )?)
    };

    let selected: HashSet<PathBuf> = candidates.iter().cloned().collect();
    {
        let mut sstables = lock(&inner.sstables, "sstables")?;
        let insert_pos = sstables
            .iter()
            .take(min_index)
            .filter(|t| !selected.contains(t.path()))
            .count();
        sstables.retain(|t| !selected.contains(t.path()));
        if let Some(new_sstable) = new_sstable {
            let insert_pos = insert_pos.min(sstables.len());
            sstables.insert(insert_pos, new_sstable);
        }
    }

    for path in &candidates {
        let _ = fs::remove_file(path);
    }

    info!(
        "compacted {} sstable(s) into {}",
        candidates.len(),
        merged.len()
    );
    Ok(())
}
