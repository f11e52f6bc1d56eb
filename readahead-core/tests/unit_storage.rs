//! Storage backend contract tests

use readahead_core::storage::{LocalStorage, MemoryStorage, StorageBackend};
use readahead_core::ReaderError;

fn backends(dir: &tempfile::TempDir) -> Vec<(&'static str, Box<dyn StorageBackend>)> {
    vec![
        ("local", Box::new(LocalStorage::new(dir.path()))),
        ("memory", Box::new(MemoryStorage::new())),
    ]
}

#[test]
fn test_overwrite_semantics() {
    let dir = tempfile::tempdir().unwrap();
    for (name, storage) in backends(&dir) {
        assert_eq!(storage.write("obj", b"first", false).unwrap(), 5, "{name}");
        assert!(
            matches!(storage.write("obj", b"second", false), Err(ReaderError::AlreadyExists { .. })),
            "{name}"
        );
        assert_eq!(&storage.read_range("obj", 0, 16).unwrap()[..], b"first", "{name}");

        storage.write("obj", b"second", true).unwrap();
        assert_eq!(storage.size("obj").unwrap(), 6, "{name}");
    }
}

#[test]
fn test_missing_object_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    for (name, storage) in backends(&dir) {
        let mut buffer = [0u8; 4];
        assert!(
            matches!(storage.read("nope", &mut buffer, 0), Err(ReaderError::ObjectNotFound { .. })),
            "{name}"
        );
        assert!(matches!(storage.size("nope"), Err(ReaderError::ObjectNotFound { .. })), "{name}");
    }
}

#[test]
fn test_reads_past_end_are_short() {
    let dir = tempfile::tempdir().unwrap();
    for (name, storage) in backends(&dir) {
        storage.write("obj", b"0123456789", false).unwrap();

        let mut buffer = [0u8; 8];
        assert_eq!(storage.read("obj", &mut buffer, 6).unwrap(), 4, "{name}");
        assert_eq!(&buffer[..4], b"6789", "{name}");
        assert_eq!(storage.read("obj", &mut buffer, 10).unwrap(), 0, "{name}");
        assert_eq!(storage.read("obj", &mut buffer, 50).unwrap(), 0, "{name}");
    }
}

#[test]
fn test_read_range_follows_short_transfers() {
    let storage = MemoryStorage::with_max_transfer(2);
    storage.insert("obj", &b"abcdefg"[..]);

    let mut buffer = [0u8; 8];
    assert_eq!(storage.read("obj", &mut buffer, 0).unwrap(), 2);
    assert_eq!(&storage.read_range("obj", 1, 5).unwrap()[..], b"bcdef");
    assert_eq!(&storage.read_range("obj", 0, 100).unwrap()[..], b"abcdefg");
}

#[test]
fn test_copy_to_local() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("copied.bin");

    let local = LocalStorage::new(dir.path().join("store"));
    local.write("nested/src.bin", b"payload", false).unwrap();
    assert_eq!(local.copy_to_local("nested/src.bin", &target).unwrap(), 7);
    assert_eq!(std::fs::read(&target).unwrap(), b"payload");

    let memory = MemoryStorage::new();
    memory.insert("src", &b"in-memory"[..]);
    assert_eq!(memory.copy_to_local("src", &target).unwrap(), 9);
    assert_eq!(std::fs::read(&target).unwrap(), b"in-memory");

    assert!(matches!(
        memory.copy_to_local("missing", &target),
        Err(ReaderError::ObjectNotFound { .. })
    ));
}
