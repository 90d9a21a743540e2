//! Integration tests for the on-disk history tree.
//!
//! These tests verify the persistence lifecycle:
//! - build on disk, close, reopen, and get the in-memory answers back
//! - damaged or unfinished files are refused and rebuilt
//! - queries on a damaged node fail instead of returning partial data
//! - readers stay consistent while the writer splits nodes and grows roots

use alopex_history::backend::history_tree::{HEADER_SIZE, LATEST_STORABLE_TIME};
use alopex_history::{
    Backend, BackendKind, CancellationToken, Interval, Quark, StateError, StateSystem,
    StateValue, StoreConfig, TimeRangeCondition, Timestamp,
};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const BLOCK_SIZE: usize = 1024;
const END: Timestamp = 3_000;

fn tree_config(path: &Path) -> StoreConfig {
    StoreConfig::history_tree("kernel", path)
        .with_block_size(BLOCK_SIZE)
        .with_max_children(3)
        .with_provider_version(2)
}

/// Builds the same trace into `ss` and returns the quarks it used.
fn build(ss: &StateSystem) -> Vec<Quark> {
    let mut quarks = Vec::new();
    for cpu in 0..4 {
        quarks.push(ss.quark_for(&format!("CPUs/{}/Current_thread", cpu)).unwrap());
        quarks.push(ss.quark_for(&format!("CPUs/{}/Status", cpu)).unwrap());
    }
    let name = ss.quark_for("Threads/1/Exec_name").unwrap();
    quarks.push(name);
    ss.modify_attribute(0, "init", name).unwrap();

    for t in 1..END {
        let quark = quarks[(t as usize * 5) % (quarks.len() - 1)];
        let value = if quark % 2 == 0 {
            StateValue::Long(t * 1_000)
        } else if t % 4 == 0 {
            StateValue::Null
        } else {
            StateValue::from(format!("state-{}", t % 3))
        };
        ss.modify_attribute(t, value, quark).unwrap();
    }
    let load = ss.quark_for("Load").unwrap();
    ss.modify_attribute(END - 1, 1.5, load).unwrap();
    ss.close_history(END).unwrap();
    quarks
}

/// Smallest geometry the tree accepts, so a short trace already builds
/// several levels.
fn narrow_config(path: &Path) -> StoreConfig {
    StoreConfig::history_tree("narrow", path)
        .with_block_size(512)
        .with_max_children(2)
}

fn history_tree(ss: &StateSystem) -> &alopex_history::HistoryTree {
    let Backend::HistoryTree(backend) = ss.backend() else {
        panic!("expected history tree backend");
    };
    backend.tree()
}

fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    std::io::Read::read_exact(&mut file, &mut byte).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[byte[0] ^ 0xFF]).unwrap();
}

#[test]
fn test_persistence_roundtrip_matches_in_memory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("kernel.ht");

    let memory = StateSystem::new(StoreConfig::in_memory("kernel")).unwrap();
    let quarks = build(&memory);

    let on_disk = StateSystem::new(tree_config(&path)).unwrap();
    build(&on_disk);
    let Backend::HistoryTree(backend) = on_disk.backend() else {
        panic!("expected history tree backend");
    };
    assert!(backend.tree().node_count() > 10);
    drop(on_disk);

    let reopened = StateSystem::open_existing(tree_config(&path)).unwrap();
    assert!(!reopened.is_freshly_built());
    assert!(reopened.is_built());
    assert_eq!(reopened.start_time(), memory.start_time());
    assert_eq!(reopened.current_end_time(), memory.current_end_time());
    assert_eq!(reopened.attribute_count(), memory.attribute_count());

    for &quark in &quarks {
        assert_eq!(reopened.path_for(quark).unwrap(), memory.path_for(quark).unwrap());
        for t in (0..=END).step_by(37) {
            assert_eq!(
                reopened.query_at(quark, t).unwrap(),
                memory.query_at(quark, t).unwrap(),
                "quark {} at {}",
                quark,
                t
            );
        }
        assert_eq!(
            reopened.query_range(quark, 100, 900).unwrap(),
            memory.query_range(quark, 100, 900).unwrap()
        );
    }

    for t in [0, 1, 1_234, END] {
        assert_eq!(
            reopened.query_full_state(t).unwrap(),
            memory.query_full_state(t).unwrap()
        );
    }
    assert_eq!(
        reopened.query_2d_at_times(&quarks, &[5, 500, 2_999]).unwrap(),
        memory.query_2d_at_times(&quarks, &[5, 500, 2_999]).unwrap()
    );
}

#[test]
fn test_open_or_create_reuses_closed_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("reuse.ht");

    let first = StateSystem::open_or_create(tree_config(&path)).unwrap();
    assert!(first.is_freshly_built());
    build(&first);
    drop(first);

    let second = StateSystem::open_or_create(tree_config(&path)).unwrap();
    assert!(!second.is_freshly_built());
    let name = second.quark_absolute("Threads/1/Exec_name").unwrap();
    assert_eq!(second.query_value(name, 2).unwrap(), StateValue::from("init"));
}

#[test]
fn test_damaged_header_triggers_rebuild() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("damaged.ht");
    build(&StateSystem::new(tree_config(&path)).unwrap());

    flip_byte(&path, 0x1A);
    let result = StateSystem::open_existing(tree_config(&path));
    assert!(result.as_ref().is_err_and(StateError::requires_rebuild));

    let rebuilt = StateSystem::open_or_create(tree_config(&path)).unwrap();
    assert!(rebuilt.is_freshly_built());
    assert_eq!(rebuilt.attribute_count(), 0);
}

#[test]
fn test_unclosed_file_triggers_rebuild() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("unclosed.ht");

    let ss = StateSystem::new(tree_config(&path)).unwrap();
    let quark = ss.quark_for("a").unwrap();
    for t in 0..500 {
        ss.modify_attribute(t, t as i32, quark).unwrap();
    }
    // Simulates a crash: the writer goes away without closing or disposing.
    std::mem::forget(ss);

    let err = StateSystem::open_existing(tree_config(&path)).unwrap_err();
    assert!(err.requires_rebuild(), "unexpected error: {}", err);
}

#[test]
fn test_provider_version_mismatch() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("versioned.ht");
    build(&StateSystem::new(tree_config(&path)).unwrap());

    let newer = tree_config(&path).with_provider_version(3);
    assert!(matches!(
        StateSystem::open_existing(newer.clone()),
        Err(StateError::ProviderVersionMismatch { expected: 3, actual: 2 })
    ));
    assert!(StateSystem::open_or_create(newer).unwrap().is_freshly_built());
}

#[test]
fn test_damaged_node_is_never_partially_valid() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("node.ht");
    let quarks = build(&StateSystem::new(tree_config(&path)).unwrap());

    flip_byte(&path, HEADER_SIZE + 200);
    let reopened = StateSystem::open_existing(tree_config(&path)).unwrap();

    let failures: Vec<StateError> = (0..=END)
        .step_by(10)
        .filter_map(|t| reopened.query_at(quarks[0], t).err())
        .collect();
    assert!(!failures.is_empty());
    assert!(failures.iter().all(StateError::requires_rebuild));
}

#[test]
fn test_dispose_while_building_removes_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("abandoned.ht");

    let ss = StateSystem::new(tree_config(&path)).unwrap();
    let quark = ss.quark_for("a").unwrap();
    ss.modify_attribute(5, 1, quark).unwrap();
    ss.dispose();

    assert!(ss.is_build_cancelled());
    assert!(!path.exists());
}

#[test]
fn test_remove_files() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("removed.ht");
    let ss = StateSystem::new(tree_config(&path)).unwrap();
    build(&ss);

    assert!(path.exists());
    ss.remove_files().unwrap();
    assert!(!path.exists());
}

#[test]
fn test_backend_kind_is_recorded() {
    let config = tree_config(Path::new("/tmp/unused.ht"));
    let BackendKind::HistoryTree(ht) = &config.backend else {
        panic!("expected history tree backend");
    };
    assert_eq!(ht.block_size, BLOCK_SIZE);
    assert_eq!(ht.max_children, 3);
}

// ============================================================================
// Readers during splits
// ============================================================================

#[test]
fn test_concurrent_readers_during_splits() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("splits.ht");
    let ss = Arc::new(StateSystem::new(narrow_config(&path)).unwrap());
    let quarks: Arc<Vec<Quark>> = Arc::new(
        (0..6)
            .map(|i| ss.quark_for(&format!("Threads/{}/Status", i)).unwrap())
            .collect(),
    );
    let ticks: Timestamp = 4_000;

    let readers: Vec<_> = (0..4)
        .map(|reader| {
            let ss = Arc::clone(&ss);
            let quarks = Arc::clone(&quarks);
            thread::spawn(move || {
                let mut rounds = 0;
                while !ss.is_built() {
                    let end = ss.current_end_time();
                    let quark = quarks[(rounds + reader) % quarks.len()];
                    let interval = ss.query_at(quark, end).unwrap();
                    assert!(interval.map_or(false, |i| i.contains(end)));

                    let from = end / 2;
                    let intervals = ss.query_range(quark, from, end).unwrap();
                    assert!(intervals.first().map_or(false, |i| i.contains(from)));
                    assert!(intervals.last().map_or(false, |i| i.end() >= end));
                    for pair in intervals.windows(2) {
                        assert_eq!(pair[0].end() + 1, pair[1].start(), "quark {}", quark);
                    }
                    rounds += 1;
                }
            })
        })
        .collect();

    for t in 1..=ticks {
        let quark = quarks[(t as usize * 7) % quarks.len()];
        ss.modify_attribute(t, StateValue::Long(t), quark).unwrap();
    }
    ss.close_history(ticks).unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(history_tree(&ss).node_count() > 20);
    for &quark in quarks.iter() {
        let intervals = ss.query_range(quark, 0, ticks).unwrap();
        assert_eq!(intervals.first().map(Interval::start), Some(0));
        assert_eq!(intervals.last().map(Interval::end), Some(ticks));
    }
}

#[test]
fn test_cancelled_2d_query_on_deep_tree() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("deep.ht");
    let ss = Arc::new(StateSystem::new(narrow_config(&path)).unwrap());
    let quarks: Vec<Quark> = (0..6).map(|i| ss.quark_for(&i.to_string()).unwrap()).collect();
    for t in 1..=3_000 {
        ss.modify_attribute(t, StateValue::Long(t), quarks[t as usize % quarks.len()])
            .unwrap();
    }
    ss.close_history(3_000).unwrap();
    assert!(history_tree(&ss).node_count() > 20);

    let times = TimeRangeCondition::continuous(0, 3_000);
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(
        ss.query_2d_cancellable(&quarks, &times, &cancelled),
        Err(StateError::Cancelled)
    ));

    let cancel = CancellationToken::new();
    let worker = {
        let ss = Arc::clone(&ss);
        let cancel = cancel.clone();
        thread::spawn(move || loop {
            match ss.query_2d_cancellable(&quarks, &times, &cancel) {
                Ok(found) => assert_eq!(found.len(), 3_000 + quarks.len()),
                Err(StateError::Cancelled) => return,
                Err(other) => panic!("unexpected error: {}", other),
            }
        })
    };
    thread::sleep(Duration::from_millis(20));
    cancel.cancel();
    worker.join().unwrap();
}

// ============================================================================
// Time limits
// ============================================================================

#[test]
fn test_close_at_max_timestamp_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("limits.ht");
    let ss = StateSystem::new(narrow_config(&path)).unwrap();
    let quarks: Vec<Quark> = (0..200)
        .map(|i| ss.quark_for(&format!("CPUs/{}", i)).unwrap())
        .collect();
    for (t, &quark) in (1..).zip(&quarks) {
        ss.modify_attribute(t, StateValue::Int(quark), quark).unwrap();
    }

    assert!(matches!(
        ss.modify_attribute(Timestamp::MAX, 0, quarks[0]),
        Err(StateError::TimeRangeOutOfBounds { time: Timestamp::MAX, .. })
    ));
    assert!(matches!(
        ss.close_history(Timestamp::MAX),
        Err(StateError::TimeRangeOutOfBounds { time: Timestamp::MAX, .. })
    ));
    assert!(!ss.is_built());

    ss.close_history(LATEST_STORABLE_TIME).unwrap();
    assert_eq!(ss.current_end_time(), LATEST_STORABLE_TIME);
    for (t, &quark) in (1..).zip(&quarks).step_by(13) {
        let last = ss.query_at(quark, LATEST_STORABLE_TIME).unwrap().unwrap();
        assert_eq!(last.value(), &StateValue::Int(quark));
        assert_eq!(last.start(), t);
    }
    drop(ss);

    let reopened = StateSystem::open_existing(narrow_config(&path)).unwrap();
    assert_eq!(reopened.current_end_time(), LATEST_STORABLE_TIME);
    assert_eq!(
        reopened.query_value(quarks[150], LATEST_STORABLE_TIME).unwrap(),
        StateValue::Int(quarks[150])
    );
}
