use std::collections::HashSet;
use std::time::Duration;

use super::version_id::UuidVersionSource;
use super::version_id::VersionSource;

#[test]
fn test_tokens_are_non_empty_and_filename_safe() {
    let source = UuidVersionSource;
    let token = source.next_version();
    assert_eq!(token.len(), 32);
    assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn test_tokens_are_unique() {
    let source = UuidVersionSource;
    let mut seen = HashSet::new();
    for _ in 0..1000 {
        assert!(seen.insert(source.next_version()));
    }
}

#[test]
fn test_tokens_are_time_ordered() {
    let source = UuidVersionSource;
    let first = source.next_version();
    std::thread::sleep(Duration::from_millis(5));
    let second = source.next_version();
    assert!(second > first);
}
