#[cfg(test)]
mod tests {
    use crate::backend::btree::BTreeBackend;
    use crate::backend::{Backend, BackendError};
    use crate::types::KeyRange;

    /// Small fan-out so a handful of inserts exercises leaf and internal
    /// splits.
    fn small_tree() -> BTreeBackend {
        BTreeBackend::new(3, 0)
    }

    #[test]
    fn test_inserts_split_and_stay_ordered() {
        let mut tree = small_tree();
        // Descending inserts force splits at every level.
        for i in (0..64u32).rev() {
            tree.set(format!("k{i:03}").as_bytes(), format!("v{i}").as_bytes())
                .unwrap();
        }

        assert_eq!(tree.count(), 64);
        assert!(tree.is_ordered());
        let keys: Vec<_> = tree.entries().into_iter().map(|p| p.key).collect();
        let expected: Vec<Vec<u8>> = (0..64u32).map(|i| format!("k{i:03}").into_bytes()).collect();
        assert_eq!(keys, expected, "leaf chain lost ordering");

        for i in 0..64u32 {
            assert_eq!(
                tree.get(format!("k{i:03}").as_bytes()),
                Some(format!("v{i}").into_bytes())
            );
        }
    }

    #[test]
    fn test_replace_does_not_grow() {
        let mut tree = small_tree();
        tree.set(b"k", b"v1").unwrap();
        tree.set(b"k", b"v2").unwrap();
        assert_eq!(tree.count(), 1);
        assert_eq!(tree.get(b"k"), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_delete_without_rebalance() {
        let mut tree = small_tree();
        for i in 0..32u32 {
            tree.set(format!("k{i:02}").as_bytes(), b"v").unwrap();
        }
        for i in (0..32u32).step_by(2) {
            tree.delete(format!("k{i:02}").as_bytes()).unwrap();
        }

        assert_eq!(tree.count(), 16);
        assert_eq!(tree.delete(b"k00"), Err(BackendError::NotFound));
        for i in 0..32u32 {
            let found = tree.get(format!("k{i:02}").as_bytes()).is_some();
            assert_eq!(found, i % 2 == 1);
        }
        // Scans stay ordered over under-full leaves.
        let keys: Vec<_> = tree.entries().into_iter().map(|p| p.key).collect();
        let expected: Vec<Vec<u8>> = (0..32u32)
            .filter(|i| i % 2 == 1)
            .map(|i| format!("k{i:02}").into_bytes())
            .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_update_requires_existing_key() {
        let mut tree = small_tree();
        assert_eq!(tree.update(b"k", b"v"), Err(BackendError::NotFound));
        tree.set(b"k", b"v").unwrap();
        tree.update(b"k", b"w").unwrap();
        assert_eq!(tree.get(b"k"), Some(b"w".to_vec()));
    }

    #[test]
    fn test_range_scan_uses_leaf_chain() {
        let mut tree = small_tree();
        for i in 0..50u32 {
            tree.set(format!("k{i:02}").as_bytes(), b"v").unwrap();
        }

        let range = KeyRange::inclusive(b"k10".to_vec(), b"k20".to_vec());
        let keys: Vec<_> = tree
            .range_scan(&range)
            .into_iter()
            .map(|p| p.key)
            .collect();
        let expected: Vec<Vec<u8>> = (10..=20u32).map(|i| format!("k{i:02}").into_bytes()).collect();
        assert_eq!(keys, expected);

        let capped = tree.range_scan(&KeyRange::all().with_limit(7));
        assert_eq!(capped.len(), 7);

        let prefixed = tree.prefix_scan(b"k4", None);
        assert_eq!(prefixed.len(), 10);
    }

    #[test]
    fn test_clear_then_reuse() {
        let mut tree = small_tree();
        for i in 0..20u32 {
            tree.set(format!("k{i}").as_bytes(), b"v").unwrap();
        }
        tree.clear();
        assert_eq!(tree.count(), 0);
        assert_eq!(tree.get(b"k1"), None);

        tree.set(b"fresh", b"start").unwrap();
        assert_eq!(tree.count(), 1);
        assert_eq!(tree.get(b"fresh"), Some(b"start".to_vec()));
    }
}
