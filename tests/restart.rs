//! Crash-recovery behavior across a drop-and-reopen of the same directory.

use logkv::{Engine, EngineConfig};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use tempfile::tempdir;

#[test]
fn restart_recovers_from_log() {
    let dir = tempdir().unwrap();
    let config = EngineConfig::new(dir.path());

    {
        let engine = Engine::open(config.clone()).unwrap();
        engine.put(b"k1", b"v1").unwrap();
    } // dropped without graceful_shutdown: log file is the only record.

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.get(b"k1").unwrap(), Some(b"v1".to_vec()));
}

#[test]
fn restart_after_flush_reads_sstable() {
    let dir = tempdir().unwrap();
    let config = EngineConfig::new(dir.path()).with_max_memtable_bytes(64);

    {
        let engine = Engine::open(config.clone()).unwrap();
        for i in 0..50 {
            engine
                .put(format!("k{i}").as_bytes(), &vec![b'x'; 20])
                .unwrap();
        }
        engine.graceful_shutdown().unwrap();
    }

    let engine = Engine::open(config).unwrap();
    assert!(engine.sstable_count().unwrap() > 0);
    let v = engine.get(b"k1").unwrap().unwrap();
    assert_eq!(v, vec![b'x'; 20]);
}

#[test]
fn tombstone_persists_across_restart() {
    let dir = tempdir().unwrap();
    let config = EngineConfig::new(dir.path());

    {
        let engine = Engine::open(config.clone()).unwrap();
        engine.put(b"k", b"v").unwrap();
        engine.delete(b"k").unwrap();
    }

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.get(b"k").unwrap(), None);
}

#[test]
fn truncated_log_tail_is_dropped_on_recovery() {
    let dir = tempdir().unwrap();
    let config = EngineConfig::new(dir.path());

    let log_path = {
        let engine = Engine::open(config.clone()).unwrap();
        engine.put(b"k1", b"v1").unwrap();
        engine.put(b"k2", b"v2").unwrap();
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.extension().and_then(|e| e.to_str()) == Some("log"))
            .unwrap()
    };

    // Simulate a torn tail write: append a partial header past the last
    // complete record.
    let mut bytes = Vec::new();
    std::fs::File::open(&log_path).unwrap().read_to_end(&mut bytes).unwrap();
    bytes.extend_from_slice(&[0x00, 0x01, 0x02]);
    let mut file = OpenOptions::new().write(true).truncate(true).open(&log_path).unwrap();
    file.write_all(&bytes).unwrap();
    drop(file);

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(engine.get(b"k2").unwrap(), Some(b"v2".to_vec()));
}
