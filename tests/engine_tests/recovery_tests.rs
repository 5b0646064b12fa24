//! Tests for crash recovery
//!
//! These tests verify:
//! - Index is rebuilt from segments after an unclean shutdown
//! - Tombstones survive restarts, including across segments
//! - Torn tails are cut off and writing resumes after them
//! - Mid-file corruption fails the open
//! - Leftovers of an interrupted compaction are cleaned up
//! - Choice of active segment after restart
//! - Read-only verification of a data directory

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use emberkv::config::Config;
use emberkv::engine::Engine;
use emberkv::record;
use emberkv::recovery::Recovery;
use emberkv::storage::SegmentBuilder;
use emberkv::EmberError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(dir: &Path, limit: u64) -> Config {
    Config::builder()
        .data_dir(dir)
        .segment_size_limit(limit)
        .disable_background_compaction()
        .build()
}

fn open(dir: &Path) -> Engine {
    Engine::open(config_for(dir, 1024 * 1024)).unwrap()
}

fn append_raw(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

// =============================================================================
// Replay Tests
// =============================================================================

#[test]
fn test_empty_directory() {
    let temp = TempDir::new().unwrap();
    let engine = open(temp.path());

    let result = engine.recovery_result();
    assert_eq!(result.segments_scanned, 0);
    assert_eq!(result.records_replayed, 0);
    assert_eq!(engine.active_segment_id(), 1);
}

#[test]
fn test_recover_after_unclean_shutdown() {
    let temp = TempDir::new().unwrap();
    {
        let engine = open(temp.path());
        engine.put(b"key1", b"value1").unwrap();
        engine.put(b"key2", b"value2").unwrap();
        engine.put(b"key1", b"value1b").unwrap();
        // Dropped without close
    }

    let engine = open(temp.path());

    assert_eq!(engine.get(b"key1").unwrap(), Some(b"value1b".to_vec()));
    assert_eq!(engine.get(b"key2").unwrap(), Some(b"value2".to_vec()));
    assert_eq!(engine.key_count(), 2);

    let result = engine.recovery_result();
    assert_eq!(result.segments_scanned, 1);
    assert_eq!(result.records_replayed, 3);
    assert_eq!(result.keys_recovered, 2);
    assert!(!result.was_truncated());
}

#[test]
fn test_tombstone_survives_restart() {
    let temp = TempDir::new().unwrap();
    {
        let engine = open(temp.path());
        engine.put(b"keep", b"1").unwrap();
        engine.put(b"gone", b"2").unwrap();
        engine.delete(b"gone").unwrap();
    }

    let engine = open(temp.path());

    assert_eq!(engine.get(b"gone").unwrap(), None);
    assert_eq!(engine.get(b"keep").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.key_count(), 1);
}

#[test]
fn test_tombstone_in_later_segment() {
    let temp = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(temp.path(), 30)).unwrap();
        engine.put(b"a", b"xy").unwrap();
        engine.put(b"b", b"xy").unwrap();
        engine.delete(b"a").unwrap(); // lands in segment 2
        assert_eq!(engine.segment_count(), 2);
    }

    let engine = Engine::open(config_for(temp.path(), 30)).unwrap();

    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), Some(b"xy".to_vec()));
    assert_eq!(engine.recovery_result().segments_scanned, 2);
}

#[test]
fn test_reput_after_delete_survives_restart() {
    let temp = TempDir::new().unwrap();
    {
        let engine = open(temp.path());
        engine.put(b"k", b"v1").unwrap();
        engine.delete(b"k").unwrap();
        engine.put(b"k", b"v2").unwrap();
    }

    let engine = open(temp.path());
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn test_unrelated_files_ignored() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("README.txt"), b"not a segment").unwrap();
    fs::create_dir(temp.path().join("segment_000009.log")).unwrap();

    let engine = open(temp.path());

    assert_eq!(engine.recovery_result().segments_scanned, 0);
    assert!(temp.path().join("README.txt").exists());
}

// =============================================================================
// Torn Write Tests
// =============================================================================

#[test]
fn test_torn_tail_is_truncated() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000001.log");
    {
        let engine = open(temp.path());
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
    }
    let good_len = fs::metadata(&path).unwrap().len();

    let torn = record::encode(b"c", Some(b"333")).unwrap();
    append_raw(&path, &torn[..10]);

    let engine = open(temp.path());

    assert!(engine.recovery_result().was_truncated());
    assert_eq!(engine.recovery_result().bytes_truncated, 10);
    assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.get(b"c").unwrap(), None);
}

#[test]
fn test_zero_filled_tail_is_truncated() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000001.log");
    {
        let engine = open(temp.path());
        engine.put(b"a", b"1").unwrap();
    }
    append_raw(&path, &[0u8; 8]);

    let engine = open(temp.path());

    assert_eq!(engine.recovery_result().bytes_truncated, 8);
    assert_eq!(fs::metadata(&path).unwrap().len(), 14);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));

    engine.put(b"b", b"2").unwrap();
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_zero_prefix_before_data_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000001.log");
    {
        let engine = open(temp.path());
        engine.put(b"a", b"1").unwrap();
    }
    // Zero length prefix followed by non-zero garbage
    append_raw(&path, &[0, 0, 0, 0, 7, 7, 7, 7]);

    match Engine::open(config_for(temp.path(), 1024 * 1024)) {
        Err(e) => assert!(e.is_corruption(), "unexpected error: {}", e),
        Ok(_) => panic!("open should fail on non-zero bytes after a zero prefix"),
    }
}

#[test]
fn test_writes_resume_after_torn_tail() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000001.log");
    {
        let engine = open(temp.path());
        engine.put(b"a", b"1").unwrap();
    }
    append_raw(&path, &[0xFF, 0x00, 0x00]);

    {
        let engine = open(temp.path());
        assert_eq!(engine.recovery_result().bytes_truncated, 3);
        engine.put(b"b", b"2").unwrap();
    }

    let engine = open(temp.path());
    assert!(!engine.recovery_result().was_truncated());
    assert_eq!(engine.recovery_result().records_replayed, 2);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_mid_file_corruption_fails_open() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000001.log");
    {
        let engine = open(temp.path());
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
    }

    // Declared size below the 12 byte minimum on the first record
    let mut bytes = fs::read(&path).unwrap();
    bytes[0..4].copy_from_slice(&4u32.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    match Engine::open(config_for(temp.path(), 1024 * 1024)) {
        Err(e) => assert!(e.is_corruption(), "unexpected error: {}", e),
        Ok(_) => panic!("open should fail on a corrupt segment"),
    }
}

// =============================================================================
// Active Segment Tests
// =============================================================================

#[test]
fn test_reuses_active_segment_below_limit() {
    let temp = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(temp.path(), 45)).unwrap();
        engine.put(b"a", b"xy").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(config_for(temp.path(), 45)).unwrap();
    assert_eq!(engine.active_segment_id(), 1);
    assert_eq!(engine.active_segment_size(), 15);

    engine.put(b"b", b"xy").unwrap();
    assert_eq!(engine.segment_count(), 1);
}

#[test]
fn test_full_segment_gets_successor() {
    let temp = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(temp.path(), 45)).unwrap();
        for key in [b"a", b"b", b"c"] {
            engine.put(key, b"xy").unwrap();
        }
        engine.close().unwrap();
    }

    let engine = Engine::open(config_for(temp.path(), 45)).unwrap();

    assert_eq!(engine.active_segment_id(), 2);
    assert_eq!(engine.closed_segment_count(), 1);
    assert!(temp.path().join("segment_000002.log").exists());
}

#[test]
fn test_compacted_segment_is_never_active() {
    let temp = TempDir::new().unwrap();
    let mut builder = SegmentBuilder::new(temp.path(), 5).unwrap();
    builder.add(b"k", b"merged").unwrap();
    builder.finish().unwrap();

    let engine = open(temp.path());

    assert_eq!(engine.active_segment_id(), 6);
    assert_eq!(engine.segment_ids(), vec![5, 6]);
    assert_eq!(engine.get(b"k").unwrap(), Some(b"merged".to_vec()));

    engine.put(b"k", b"fresh").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(b"fresh".to_vec()));
}

// =============================================================================
// Interrupted Compaction Tests
// =============================================================================

#[test]
fn test_temp_files_removed() {
    let temp = TempDir::new().unwrap();
    let stale = temp.path().join("compact_000003.log.tmp");
    fs::write(&stale, b"partial output").unwrap();

    let engine = open(temp.path());

    assert!(!stale.exists());
    assert_eq!(engine.recovery_result().stale_files, 1);
}

#[test]
fn test_superseded_segments_removed() {
    let temp = TempDir::new().unwrap();
    let config = config_for(temp.path(), 30);
    let names = ["segment_000001.log", "segment_000002.log", "segment_000003.log"];

    // Segments 1..=3 closed, 4 active; "g" is put in 1 and deleted in 2
    let saved: Vec<Vec<u8>> = {
        let engine = Engine::open(config.clone()).unwrap();
        engine.put(b"a", b"xy").unwrap();
        engine.put(b"g", b"xy").unwrap();
        engine.delete(b"g").unwrap();
        engine.put(b"b", b"xy").unwrap();
        engine.put(b"c", b"xy").unwrap();
        engine.put(b"d", b"xy").unwrap();
        engine.put(b"a", b"zz").unwrap();
        engine.put(b"e", b"xy").unwrap();
        assert_eq!(engine.segment_ids(), vec![1, 2, 3, 4]);
        engine.close().unwrap();

        names
            .iter()
            .map(|n| fs::read(temp.path().join(n)).unwrap())
            .collect()
    };

    {
        let engine = Engine::open(config.clone()).unwrap();
        let stats = engine.compact().unwrap();
        assert_eq!(stats.merged_segment_id, Some(3));
        engine.close().unwrap();
    }

    // Crash between installing compact_000003.log and deleting its inputs
    for (name, bytes) in names.iter().zip(&saved) {
        fs::write(temp.path().join(name), bytes).unwrap();
    }

    let engine = Engine::open(config).unwrap();

    assert_eq!(engine.recovery_result().stale_files, 3);
    for name in names {
        assert!(!temp.path().join(name).exists());
    }
    assert_eq!(engine.segment_ids(), vec![3, 4]);
    assert_eq!(engine.get(b"g").unwrap(), None);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"zz".to_vec()));
    assert_eq!(engine.get(b"e").unwrap(), Some(b"xy".to_vec()));
}

// =============================================================================
// Verify Tests
// =============================================================================

#[test]
fn test_verify_is_read_only() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000001.log");
    {
        let engine = open(temp.path());
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.delete(b"a").unwrap();
    }
    append_raw(&path, &[1, 2, 3, 4, 5]);
    let stale = temp.path().join("compact_000001.log.tmp");
    fs::write(&stale, b"x").unwrap();
    let len_before = fs::metadata(&path).unwrap().len();

    let result = Recovery::verify(temp.path()).unwrap();

    assert_eq!(result.segments_scanned, 1);
    assert_eq!(result.records_replayed, 3);
    assert_eq!(result.keys_recovered, 1);
    assert_eq!(result.bytes_truncated, 5);
    assert_eq!(result.stale_files, 1);

    // Nothing touched
    assert!(stale.exists());
    assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
}

#[test]
fn test_verify_reports_corruption() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000001.log");
    {
        let engine = open(temp.path());
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
    }
    let mut bytes = fs::read(&path).unwrap();
    bytes[0..4].copy_from_slice(&0u32.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    let result = Recovery::verify(temp.path());
    assert!(matches!(result, Err(EmberError::CorruptRecord(_))));
}
