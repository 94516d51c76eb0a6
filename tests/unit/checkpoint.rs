//! Checkpoint persistence through the public API

use igscraper::output::ProfileLayout;
use igscraper::resume::checkpoint::CHECKPOINT_VERSION;
use igscraper::resume::{CheckpointError, CheckpointStore, StartMode};
use std::time::Duration;
use tempfile::TempDir;

fn touch(layout: &ProfileLayout, code: &str) {
    std::fs::write(layout.media_path(code), b"jpeg").unwrap();
}

#[test]
fn test_batched_writes_reach_disk_on_flush() {
    let dir = TempDir::new().unwrap();
    let layout = ProfileLayout::at(dir.path().join("nasa"));
    let store = CheckpointStore::open(layout.clone(), "nasa", StartMode::Fresh)
        .unwrap()
        .with_batching(10, Duration::from_secs(3600));

    for code in ["A", "B", "C"] {
        touch(&layout, code);
        assert!(store.mark_downloaded(code).unwrap());
    }
    assert!(!store.mark_downloaded("A").unwrap());
    store.set_cursor("next", true).unwrap();

    let on_disk = CheckpointStore::load(&layout).unwrap().unwrap();
    assert_eq!(on_disk.count, 0);

    store.flush().unwrap();
    let on_disk = CheckpointStore::load(&layout).unwrap().unwrap();
    assert_eq!(on_disk.count, 3);
    assert_eq!(on_disk.cursor, "next");
    assert!(on_disk.has_next_page);
    assert_eq!(on_disk.version, CHECKPOINT_VERSION);
}

#[test]
fn test_write_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let layout = ProfileLayout::at(dir.path().join("nasa"));
    let store = CheckpointStore::open(layout.clone(), "nasa", StartMode::Fresh)
        .unwrap()
        .with_batching(1, Duration::from_secs(3600));
    touch(&layout, "A");
    store.mark_downloaded("A").unwrap();

    let mut names: Vec<String> = std::fs::read_dir(layout.dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec![".checkpoint.json", ".checkpoint.lock", "A.jpg"]);
}

#[test]
fn test_load_forgets_files_deleted_from_disk() {
    let dir = TempDir::new().unwrap();
    let layout = ProfileLayout::at(dir.path().join("nasa"));
    let store = CheckpointStore::open(layout.clone(), "nasa", StartMode::Fresh).unwrap();
    for code in ["A", "B"] {
        touch(&layout, code);
        store.mark_downloaded(code).unwrap();
    }
    store.flush().unwrap();

    std::fs::remove_file(layout.media_path("B")).unwrap();
    let reloaded = CheckpointStore::load(&layout).unwrap().unwrap();
    assert_eq!(reloaded.count, 1);
    assert!(reloaded.contains("A"));
    assert!(!reloaded.contains("B"));
}

#[test]
fn test_foreign_version_blocks_resume_but_not_fresh_start() {
    let dir = TempDir::new().unwrap();
    let layout = ProfileLayout::at(dir.path().join("nasa"));
    layout.create().unwrap();
    std::fs::write(
        layout.checkpoint_path(),
        r#"{"version": 99, "username": "nasa", "downloaded": ["A"], "count": 1}"#,
    )
    .unwrap();

    let err = CheckpointStore::open(layout.clone(), "nasa", StartMode::Resume).unwrap_err();
    assert_eq!(
        err,
        CheckpointError::Incompatible {
            found: 99,
            expected: CHECKPOINT_VERSION
        }
    );

    let store = CheckpointStore::open(layout.clone(), "nasa", StartMode::Fresh).unwrap();
    assert_eq!(store.downloaded_count(), 0);
    let on_disk = CheckpointStore::load(&layout).unwrap().unwrap();
    assert_eq!(on_disk.version, CHECKPOINT_VERSION);
}

#[test]
fn test_resume_refuses_other_profiles_checkpoint() {
    let dir = TempDir::new().unwrap();
    let layout = ProfileLayout::at(dir.path().join("shared"));
    CheckpointStore::open(layout.clone(), "alice", StartMode::Fresh).unwrap();

    let err = CheckpointStore::open(layout, "bob", StartMode::Resume).unwrap_err();
    assert!(matches!(err, CheckpointError::Serialization(msg) if msg.contains("alice")));
}
