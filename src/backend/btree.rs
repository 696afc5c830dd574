//! B+Tree backend (skeletal).
//!
//! An ordered map with page-style nodes: internal nodes route through
//! separator keys, leaves hold the pairs and chain together for in-order
//! scans. Inserts split full leaves and internals recursively; deletes
//! remove from the leaf **without rebalancing** — under-full or empty
//! leaves are tolerated and separators are left in place, which keeps
//! routing correct at the cost of space. A full implementation with
//! merge/borrow on underflow and disk-backed pages is future work; the
//! structure and operation surface are what this backend declares.

use crate::backend::{Backend, BackendError};
use crate::types::{KeyRange, KvPair};

/// Default separator fan-out when the engine config leaves it unset.
pub const DEFAULT_MAX_KEYS_PER_NODE: usize = 32;

/// Default page size recorded from configuration; nothing is sized by it
/// until pages become disk-backed.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Sentinel "no next leaf" link.
const NO_LEAF: usize = usize::MAX;

#[derive(Debug)]
enum BtNode {
    Internal {
        /// Separator keys; `children[i]` covers keys `< keys[i]`,
        /// `children[i+1]` covers keys `>= keys[i]`.
        keys: Vec<Vec<u8>>,
        children: Vec<usize>,
    },
    Leaf {
        entries: Vec<KvPair>,
        next: usize,
    },
}

/// Ordered B+Tree backend with leaf-chained scans.
#[derive(Debug)]
pub struct BTreeBackend {
    nodes: Vec<BtNode>,
    root: usize,
    max_keys: usize,
    page_size: usize,
    len: usize,
    data_bytes: usize,
}

impl BTreeBackend {
    /// Creates an empty tree. `max_keys_per_node` below 3 (or 0) falls
    /// back to a sane minimum; `page_size` 0 selects the default.
    pub fn new(max_keys_per_node: usize, page_size: usize) -> Self {
        let max_keys = if max_keys_per_node < 3 {
            if max_keys_per_node == 0 {
                DEFAULT_MAX_KEYS_PER_NODE
            } else {
                3
            }
        } else {
            max_keys_per_node
        };
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        Self {
            nodes: vec![BtNode::Leaf {
                entries: Vec::new(),
                next: NO_LEAF,
            }],
            root: 0,
            max_keys,
            page_size,
            len: 0,
            data_bytes: 0,
        }
    }

    /// The configured page size (recorded; not yet load-bearing).
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Index of the leaf that would hold `key`.
    fn leaf_for(&self, key: &[u8]) -> usize {
        let mut idx = self.root;
        loop {
            match &self.nodes[idx] {
                BtNode::Internal { keys, children } => {
                    let pos = keys.partition_point(|k| k.as_slice() <= key);
                    idx = children[pos];
                }
                BtNode::Leaf { .. } => return idx,
            }
        }
    }

    /// Leftmost leaf, where in-order iteration starts.
    fn first_leaf(&self) -> usize {
        let mut idx = self.root;
        loop {
            match &self.nodes[idx] {
                BtNode::Internal { children, .. } => idx = children[0],
                BtNode::Leaf { .. } => return idx,
            }
        }
    }

    /// Recursive insert; returns whether the key was new, plus a
    /// `(separator, right-node)` pair when `idx` split.
    fn insert_rec(
        &mut self,
        idx: usize,
        key: &[u8],
        value: &[u8],
    ) -> (bool, Option<(Vec<u8>, usize)>) {
        // Route through an internal node.
        if let BtNode::Internal { keys, children } = &self.nodes[idx] {
            let pos = keys.partition_point(|k| k.as_slice() <= key);
            let child = children[pos];

            let (is_new, split) = self.insert_rec(child, key, value);
            if let Some((sep, right)) = split {
                let BtNode::Internal { keys, children } = &mut self.nodes[idx] else {
                    unreachable!("node changed kind during insert");
                };
                keys.insert(pos, sep);
                children.insert(pos + 1, right);

                if keys.len() > self.max_keys {
                    let mid = keys.len() / 2;
                    let right_keys = keys.split_off(mid + 1);
                    let sep_up = keys.pop().unwrap_or_default();
                    let right_children = children.split_off(mid + 1);
                    self.nodes.push(BtNode::Internal {
                        keys: right_keys,
                        children: right_children,
                    });
                    return (is_new, Some((sep_up, self.nodes.len() - 1)));
                }
            }
            return (is_new, None);
        }

        // Leaf insert.
        let BtNode::Leaf { entries, next } = &mut self.nodes[idx] else {
            unreachable!("leaf_for returned an internal node");
        };
        match entries.binary_search_by(|pair| pair.key.as_slice().cmp(key)) {
            Ok(pos) => {
                self.data_bytes = self.data_bytes - entries[pos].value.len() + value.len();
                entries[pos].value = value.to_vec();
                (false, None)
            }
            Err(pos) => {
                entries.insert(pos, KvPair::new(key, value));
                self.data_bytes += key.len() + value.len();

                if entries.len() > self.max_keys {
                    let mid = entries.len() / 2;
                    let right_entries = entries.split_off(mid);
                    let sep = right_entries[0].key.clone();
                    let old_next = *next;

                    let new_leaf = self.nodes.len();
                    self.nodes.push(BtNode::Leaf {
                        entries: right_entries,
                        next: old_next,
                    });
                    let BtNode::Leaf { next, .. } = &mut self.nodes[idx] else {
                        unreachable!("leaf changed kind during split");
                    };
                    *next = new_leaf;
                    (true, Some((sep, new_leaf)))
                } else {
                    (true, None)
                }
            }
        }
    }
}

impl Backend for BTreeBackend {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        let (is_new, split) = self.insert_rec(self.root, key, value);
        if let Some((sep, right)) = split {
            let old_root = self.root;
            self.nodes.push(BtNode::Internal {
                keys: vec![sep],
                children: vec![old_root, right],
            });
            self.root = self.nodes.len() - 1;
        }
        if is_new {
            self.len += 1;
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let leaf = self.leaf_for(key);
        let BtNode::Leaf { entries, .. } = &self.nodes[leaf] else {
            return None;
        };
        entries
            .binary_search_by(|pair| pair.key.as_slice().cmp(key))
            .ok()
            .map(|pos| entries[pos].value.clone())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), BackendError> {
        let leaf = self.leaf_for(key);
        let BtNode::Leaf { entries, .. } = &mut self.nodes[leaf] else {
            return Err(BackendError::NotFound);
        };
        let pos = entries
            .binary_search_by(|pair| pair.key.as_slice().cmp(key))
            .map_err(|_| BackendError::NotFound)?;
        let pair = entries.remove(pos);
        self.len -= 1;
        self.data_bytes -= pair.payload_len();
        Ok(())
    }

    fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        let leaf = self.leaf_for(key);
        let BtNode::Leaf { entries, .. } = &mut self.nodes[leaf] else {
            return Err(BackendError::NotFound);
        };
        let pos = entries
            .binary_search_by(|pair| pair.key.as_slice().cmp(key))
            .map_err(|_| BackendError::NotFound)?;
        self.data_bytes = self.data_bytes - entries[pos].value.len() + value.len();
        entries[pos].value = value.to_vec();
        Ok(())
    }

    fn count(&self) -> usize {
        self.len
    }

    fn size_bytes(&self) -> usize {
        self.data_bytes
    }

    fn memory_usage(&self) -> usize {
        let structural: usize = self
            .nodes
            .iter()
            .map(|node| match node {
                BtNode::Internal { keys, children } => {
                    keys.iter().map(|k| k.len()).sum::<usize>()
                        + children.capacity() * std::mem::size_of::<usize>()
                }
                BtNode::Leaf { entries, .. } => entries.capacity() * std::mem::size_of::<KvPair>(),
            })
            .sum();
        self.data_bytes + structural + self.nodes.capacity() * std::mem::size_of::<BtNode>()
    }

    fn is_ordered(&self) -> bool {
        true
    }

    fn entries(&self) -> Vec<KvPair> {
        let mut out = Vec::with_capacity(self.len);
        let mut leaf = self.first_leaf();
        while leaf != NO_LEAF {
            let BtNode::Leaf { entries, next } = &self.nodes[leaf] else {
                break;
            };
            out.extend(entries.iter().cloned());
            leaf = *next;
        }
        out
    }

    fn range_scan(&self, range: &KeyRange) -> Vec<KvPair> {
        let limit = range.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();

        // Start at the leaf holding the lower bound, or the first leaf.
        let mut leaf = match &range.start {
            Some(start) => self.leaf_for(start),
            None => self.first_leaf(),
        };
        'leaves: while leaf != NO_LEAF {
            let BtNode::Leaf { entries, next } = &self.nodes[leaf] else {
                break;
            };
            for pair in entries {
                if let Some(end) = &range.end {
                    if pair.key.as_slice() > end.as_slice()
                        || (pair.key.as_slice() == end.as_slice() && !range.include_end)
                    {
                        break 'leaves;
                    }
                }
                if range.contains(&pair.key) {
                    out.push(pair.clone());
                    if out.len() >= limit {
                        break 'leaves;
                    }
                }
            }
            leaf = *next;
        }
        out
    }

    fn prefix_scan(&self, prefix: &[u8], limit: Option<usize>) -> Vec<KvPair> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        let mut leaf = self.leaf_for(prefix);
        'leaves: while leaf != NO_LEAF {
            let BtNode::Leaf { entries, next } = &self.nodes[leaf] else {
                break;
            };
            for pair in entries {
                if pair.key.starts_with(prefix) {
                    out.push(pair.clone());
                    if out.len() >= limit {
                        break 'leaves;
                    }
                } else if pair.key.as_slice() > prefix {
                    break 'leaves;
                }
            }
            leaf = *next;
        }
        out
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(BtNode::Leaf {
            entries: Vec::new(),
            next: NO_LEAF,
        });
        self.root = 0;
        self.len = 0;
        self.data_bytes = 0;
    }
}
