#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::backend::rbtree::{RbTree, RbTreeBackend};
    use crate::backend::{Backend, BackendError};
    use crate::types::KeyRange;

    fn in_order_keys(tree: &RbTree) -> Vec<Vec<u8>> {
        tree.pairs().into_iter().map(|pair| pair.key).collect()
    }

    #[test]
    fn test_insert_delete_in_order() {
        let mut tree = RbTree::new();
        for key in [b"M", b"F", b"T", b"A", b"H", b"P", b"Z", b"B"] {
            tree.insert(key, b"x");
            tree.validate();
        }
        assert_eq!(tree.len(), 8);

        assert!(tree.remove(b"F").is_some());
        tree.validate();

        let keys = in_order_keys(&tree);
        let expected: Vec<Vec<u8>> = [b"A", b"B", b"H", b"M", b"P", b"T", b"Z"]
            .iter()
            .map(|k| k.to_vec())
            .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_duplicate_insert_replaces_value() {
        let mut tree = RbTree::new();
        assert_eq!(tree.insert(b"k", b"v1"), None);
        assert_eq!(tree.insert(b"k", b"v2"), Some(b"v1".to_vec()));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(b"k"), Some(b"v2".as_slice()));
        tree.validate();
    }

    #[test]
    fn test_remove_missing_returns_none() {
        let mut tree = RbTree::new();
        tree.insert(b"a", b"1");
        assert_eq!(tree.remove(b"b"), None);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_sequential_insert_stays_balanced() {
        let mut tree = RbTree::new();
        for i in 0..512u32 {
            let key = format!("key-{i:05}");
            tree.insert(key.as_bytes(), b"v");
        }
        let black_height = tree.validate();
        // 512 sequential inserts into a degenerate BST would give depth
        // 512; a valid red-black tree stays logarithmic.
        assert!(black_height <= 10, "black height {black_height} too deep");
        assert_eq!(tree.len(), 512);

        for i in (0..512u32).step_by(2) {
            let key = format!("key-{i:05}");
            assert!(tree.remove(key.as_bytes()).is_some());
        }
        tree.validate();
        assert_eq!(tree.len(), 256);
    }

    #[test]
    fn test_randomized_against_reference() {
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        let mut tree = RbTree::new();
        let mut reference: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for round in 0..4000u32 {
            let key = format!("k{:03}", rng.random_range(0..300u32)).into_bytes();
            if rng.random_range(0..3u8) == 0 {
                assert_eq!(tree.remove(&key), reference.remove(&key));
            } else {
                let value = format!("v{round}").into_bytes();
                assert_eq!(
                    tree.insert(&key, &value),
                    reference.insert(key.clone(), value)
                );
            }
            if round % 256 == 0 {
                tree.validate();
            }
        }
        tree.validate();

        assert_eq!(tree.len(), reference.len());
        let keys = in_order_keys(&tree);
        let expected: Vec<Vec<u8>> = reference.keys().cloned().collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_backend_adapter_contract() {
        let mut backend = RbTreeBackend::new();
        assert!(backend.is_ordered());

        backend.set(b"b", b"2").unwrap();
        backend.set(b"a", b"1").unwrap();
        backend.set(b"c", b"3").unwrap();
        assert_eq!(backend.count(), 3);
        assert_eq!(backend.get(b"b"), Some(b"2".to_vec()));

        assert_eq!(backend.update(b"zz", b"?"), Err(BackendError::NotFound));
        assert_eq!(backend.delete(b"zz"), Err(BackendError::NotFound));

        let keys: Vec<_> = backend.entries().into_iter().map(|p| p.key).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_backend_range_scan_respects_bounds_and_limit() {
        let mut backend = RbTreeBackend::new();
        for i in 0..10u32 {
            backend.set(format!("k{i}").as_bytes(), b"v").unwrap();
        }

        let mut range = KeyRange::inclusive(b"k2".to_vec(), b"k5".to_vec());
        let keys: Vec<_> = backend
            .range_scan(&range)
            .into_iter()
            .map(|p| p.key)
            .collect();
        assert_eq!(
            keys,
            vec![b"k2".to_vec(), b"k3".to_vec(), b"k4".to_vec(), b"k5".to_vec()]
        );

        range.include_start = false;
        range.include_end = false;
        let keys: Vec<_> = backend
            .range_scan(&range)
            .into_iter()
            .map(|p| p.key)
            .collect();
        assert_eq!(keys, vec![b"k3".to_vec(), b"k4".to_vec()]);

        let capped = backend.range_scan(&KeyRange::all().with_limit(3));
        assert_eq!(capped.len(), 3);
    }

    #[test]
    fn test_backend_prefix_scan() {
        let mut backend = RbTreeBackend::new();
        for key in [b"ab".as_slice(), b"ac", b"ba", b"aa"] {
            backend.set(key, b"v").unwrap();
        }
        let keys: Vec<_> = backend
            .prefix_scan(b"a", None)
            .into_iter()
            .map(|p| p.key)
            .collect();
        assert_eq!(keys, vec![b"aa".to_vec(), b"ab".to_vec(), b"ac".to_vec()]);
    }
}
