//! Array backend.
//!
//! A bounded linear slot table. Deleted slots become `None` and are
//! reused by later inserts before the high-water mark `array_idx` is
//! advanced; deleting the highest occupied slot retracts the mark past
//! any trailing holes. No ordering guarantees. Intended for tiny data
//! sets and as the simplest reference implementation of the backend
//! contract.

use crate::backend::{Backend, BackendError};
use crate::types::{KeyRange, KvPair};

/// Default slot capacity when the engine config leaves it unset.
pub const DEFAULT_ARRAY_CAPACITY: usize = 1024;

/// Bounded linear table with tombstone slot reuse.
#[derive(Debug)]
pub struct ArrayBackend {
    slots: Vec<Option<KvPair>>,
    /// High-water mark: slots at index >= `array_idx` have never held data
    /// since the last retraction.
    array_idx: usize,
    capacity: usize,
    live: usize,
    data_bytes: usize,
}

impl ArrayBackend {
    /// Creates a table with `capacity` slots (0 selects the default).
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_ARRAY_CAPACITY
        } else {
            capacity
        };
        let mut slots = Vec::new();
        slots.resize_with(capacity, || None);
        Self {
            slots,
            array_idx: 0,
            capacity,
            live: 0,
            data_bytes: 0,
        }
    }

    /// The configured slot capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn position(&self, key: &[u8]) -> Option<usize> {
        self.slots[..self.array_idx]
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|pair| pair.key == key))
    }
}

impl Backend for ArrayBackend {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        let mut first_hole = None;
        for (idx, slot) in self.slots[..self.array_idx].iter_mut().enumerate() {
            match slot {
                Some(pair) if pair.key == key => {
                    self.data_bytes = self.data_bytes - pair.value.len() + value.len();
                    pair.value = value.to_vec();
                    return Ok(());
                }
                None if first_hole.is_none() => first_hole = Some(idx),
                _ => {}
            }
        }

        let idx = match first_hole {
            Some(idx) => idx,
            None if self.array_idx < self.capacity => {
                let idx = self.array_idx;
                self.array_idx += 1;
                idx
            }
            None => return Err(BackendError::Capacity(self.capacity)),
        };
        self.slots[idx] = Some(KvPair::new(key, value));
        self.live += 1;
        self.data_bytes += key.len() + value.len();
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.position(key)
            .and_then(|idx| self.slots[idx].as_ref())
            .map(|pair| pair.value.clone())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), BackendError> {
        let idx = self.position(key).ok_or(BackendError::NotFound)?;
        let pair = self.slots[idx].take().ok_or(BackendError::NotFound)?;
        self.live -= 1;
        self.data_bytes -= pair.payload_len();

        // Retract the high-water mark past trailing holes.
        while self.array_idx > 0 && self.slots[self.array_idx - 1].is_none() {
            self.array_idx -= 1;
        }
        Ok(())
    }

    fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        let idx = self.position(key).ok_or(BackendError::NotFound)?;
        let pair = self.slots[idx].as_mut().ok_or(BackendError::NotFound)?;
        self.data_bytes = self.data_bytes - pair.value.len() + value.len();
        pair.value = value.to_vec();
        Ok(())
    }

    fn ensure_capacity(&self, key: &[u8]) -> Result<(), BackendError> {
        if self.live == self.capacity && self.position(key).is_none() {
            return Err(BackendError::Capacity(self.capacity));
        }
        Ok(())
    }

    fn count(&self) -> usize {
        self.live
    }

    fn size_bytes(&self) -> usize {
        self.data_bytes
    }

    fn memory_usage(&self) -> usize {
        self.data_bytes + self.slots.capacity() * std::mem::size_of::<Option<KvPair>>()
    }

    fn is_ordered(&self) -> bool {
        false
    }

    fn entries(&self) -> Vec<KvPair> {
        self.slots[..self.array_idx]
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    fn range_scan(&self, range: &KeyRange) -> Vec<KvPair> {
        let limit = range.limit.unwrap_or(usize::MAX);
        self.slots[..self.array_idx]
            .iter()
            .flatten()
            .filter(|pair| range.contains(&pair.key))
            .take(limit)
            .cloned()
            .collect()
    }

    fn prefix_scan(&self, prefix: &[u8], limit: Option<usize>) -> Vec<KvPair> {
        self.slots[..self.array_idx]
            .iter()
            .flatten()
            .filter(|pair| pair.key.starts_with(prefix))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.array_idx = 0;
        self.live = 0;
        self.data_bytes = 0;
    }
}
