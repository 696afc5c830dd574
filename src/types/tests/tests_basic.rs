use crate::types::{Batch, KeyRange, KvRecord, shard_hash};

#[test]
fn test_batch_capacity_enforced() {
    let mut batch = Batch::with_capacity(2);
    batch.push(KvRecord::put(b"a".to_vec(), b"1".to_vec())).unwrap();
    batch.push(KvRecord::put(b"b".to_vec(), b"2".to_vec())).unwrap();

    let err = batch
        .push(KvRecord::put(b"c".to_vec(), b"3".to_vec()))
        .unwrap_err();
    assert_eq!(err.capacity, 2);
    assert_eq!(batch.len(), 2);
}

#[test]
fn test_batch_preserves_order() {
    let mut batch = Batch::with_capacity(3);
    for key in [b"x", b"a", b"m"] {
        batch.push(KvRecord::key_only(key.to_vec())).unwrap();
    }
    let keys: Vec<_> = batch.iter().map(|r| r.key.clone()).collect();
    assert_eq!(keys, vec![b"x".to_vec(), b"a".to_vec(), b"m".to_vec()]);
}

#[test]
fn test_key_range_inclusivity_flags() {
    let mut range = KeyRange::inclusive(b"b".to_vec(), b"d".to_vec());
    assert!(range.contains(b"b"));
    assert!(range.contains(b"c"));
    assert!(range.contains(b"d"));
    assert!(!range.contains(b"a"));
    assert!(!range.contains(b"e"));

    range.include_start = false;
    assert!(!range.contains(b"b"));
    assert!(range.contains(b"c"));

    range.include_end = false;
    assert!(!range.contains(b"d"));
}

#[test]
fn test_key_range_unbounded_sides() {
    let range = KeyRange {
        start: None,
        end: Some(b"m".to_vec()),
        include_start: true,
        include_end: true,
        limit: None,
    };
    assert!(range.contains(b""));
    assert!(range.contains(b"m"));
    assert!(!range.contains(b"n"));

    assert!(KeyRange::all().contains(b"anything"));
}

#[test]
fn test_key_range_is_binary_safe() {
    let range = KeyRange::inclusive(vec![0x00, 0xff], vec![0x01, 0x00]);
    assert!(range.contains(&[0x00, 0xff]));
    assert!(range.contains(&[0x00, 0xff, 0x00]));
    assert!(range.contains(&[0x01, 0x00]));
    assert!(!range.contains(&[0x01, 0x00, 0x01]));
}

#[test]
fn test_shard_hash_is_stable_and_spreads() {
    // Known FNV-1a vectors; these values must never change across releases.
    assert_eq!(shard_hash(b""), 0xcbf2_9ce4_8422_2325);
    assert_eq!(shard_hash(b"a"), 0xaf63_dc4c_8601_ec8c);

    // Different keys land in different buckets often enough to be useful.
    let buckets = 16usize;
    let mut seen = std::collections::HashSet::new();
    for i in 0..100u32 {
        let key = format!("key-{i:04}");
        seen.insert(shard_hash(key.as_bytes()) as usize % buckets);
    }
    assert!(seen.len() > buckets / 2);
}

#[test]
fn test_record_constructors() {
    let put = KvRecord::put(b"k".to_vec(), b"v".to_vec());
    assert!(put.found());
    assert!(!put.deleted);

    let probe = KvRecord::key_only(b"k".to_vec());
    assert!(!probe.found());

    let tomb = KvRecord::tombstone(b"k".to_vec());
    assert!(tomb.deleted);
    assert!(!tomb.found());
}
