//! Identity registry for in-flight async calls.
//!
//! Recently issued promise ids live in a fixed-size ring indexed by
//! `id % ring_size`. An id whose slot is reclaimed by a newer id before it
//! settles spills into an overflow map, so long-running calls cost a map
//! entry while the common short-lived call never allocates.

use super::error::BridgeError;
use super::op_driver::PromiseId;
use std::collections::HashMap;

/// Default number of ring slots.
pub const RING_SIZE: usize = 4 * 1024;

/// Ring buffer of pending records with map spill-over.
///
/// Each slot remembers the id it was registered under, so a slot that has
/// already been recycled never answers for an older id.
pub struct PromiseRing<T> {
    ring: Box<[Option<(PromiseId, T)>]>,
    overflow: HashMap<PromiseId, T>,
    next_id: PromiseId,
    /// Records across ring and overflow
    live: usize,
}

impl<T> PromiseRing<T> {
    /// Create a registry with `ring_size` slots.
    ///
    /// Returns an error for a zero-sized ring.
    pub fn with_capacity(ring_size: usize) -> Result<Self, BridgeError> {
        if ring_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "ring size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            ring: std::iter::repeat_with(|| None).take(ring_size).collect(),
            overflow: HashMap::new(),
            next_id: 1,
            live: 0,
        })
    }

    pub fn ring_size(&self) -> usize {
        self.ring.len()
    }

    /// The id the next call to [`allocate`](Self::allocate) returns.
    pub fn next_id(&self) -> PromiseId {
        self.next_id
    }

    /// Hand out the next promise id.
    pub fn allocate(&mut self) -> Result<PromiseId, BridgeError> {
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or(BridgeError::PromiseIdsExhausted)?;
        Ok(id)
    }

    /// Store the record for `id`, moving the slot's previous occupant into
    /// the overflow map under its own id.
    pub fn register(&mut self, id: PromiseId, record: T) {
        let idx = self.slot(id);
        if let Some((old_id, old_record)) = self.ring[idx].take() {
            tracing::warn!(
                event = "op_bridge.ring.spill",
                promise_id = old_id,
                evicted_by = id,
                overflow = self.overflow.len() + 1,
                "Pending op outlived its ring slot"
            );
            self.overflow.insert(old_id, old_record);
        }
        self.ring[idx] = Some((id, record));
        self.live += 1;
    }

    /// Remove and return the record for `id`.
    ///
    /// A second `take` for the same id returns `None`.
    pub fn take(&mut self, id: PromiseId) -> Option<T> {
        let record = if self.is_out_of_ring(id) {
            self.overflow.remove(&id)
        } else {
            let idx = self.slot(id);
            match &self.ring[idx] {
                Some((slot_id, _)) if *slot_id == id => self.ring[idx].take().map(|(_, r)| r),
                _ => None,
            }
        };
        if record.is_some() {
            self.live -= 1;
        }
        record
    }

    /// Non-destructive variant of [`take`](Self::take).
    pub fn contains(&self, id: PromiseId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: PromiseId) -> Option<&T> {
        if self.is_out_of_ring(id) {
            return self.overflow.get(&id);
        }
        match &self.ring[self.slot(id)] {
            Some((slot_id, record)) if *slot_id == id => Some(record),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: PromiseId) -> Option<&mut T> {
        if self.is_out_of_ring(id) {
            return self.overflow.get_mut(&id);
        }
        let idx = self.slot(id);
        match &mut self.ring[idx] {
            Some((slot_id, record)) if *slot_id == id => Some(record),
            _ => None,
        }
    }

    /// Number of pending records across ring and overflow.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    /// Ids older than the ring window can only be in the overflow map.
    fn is_out_of_ring(&self, id: PromiseId) -> bool {
        id < self.next_id.saturating_sub(self.ring.len() as PromiseId)
    }

    fn slot(&self, id: PromiseId) -> usize {
        (id % self.ring.len() as PromiseId) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(size: usize) -> PromiseRing<String> {
        PromiseRing::with_capacity(size).unwrap()
    }

    fn issue(ring: &mut PromiseRing<String>) -> PromiseId {
        let id = ring.allocate().unwrap();
        ring.register(id, format!("record-{id}"));
        id
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            PromiseRing::<()>::with_capacity(0),
            Err(BridgeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let mut ring = ring(8);
        assert_eq!(ring.allocate().unwrap(), 1);
        assert_eq!(ring.allocate().unwrap(), 2);
        assert_eq!(ring.next_id(), 3);
    }

    #[test]
    fn test_take_returns_each_record_once() {
        let mut ring = ring(16);
        let ids: Vec<_> = (0..10).map(|_| issue(&mut ring)).collect();
        assert_eq!(ring.len(), 10);

        for id in ids.iter().rev() {
            assert!(ring.contains(*id));
            assert_eq!(ring.take(*id), Some(format!("record-{id}")));
            assert!(!ring.contains(*id));
            assert_eq!(ring.take(*id), None);
        }
        assert!(ring.is_empty());
        assert_eq!(ring.overflow_len(), 0);
    }

    #[test]
    fn test_evicted_records_spill_to_overflow() {
        let mut ring = ring(4);
        let ids: Vec<_> = (0..10).map(|_| issue(&mut ring)).collect();

        // Ids 1..=6 were pushed out of the 4-slot window.
        assert_eq!(ring.overflow_len(), 6);
        assert_eq!(ring.len(), 10);

        for id in &ids {
            assert!(ring.contains(*id), "id {id} lost");
            assert_eq!(ring.take(*id), Some(format!("record-{id}")));
            assert!(!ring.contains(*id));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_settled_slot_is_not_spilled() {
        let mut ring = ring(4);
        let first = issue(&mut ring);
        assert!(ring.take(first).is_some());

        for _ in 0..8 {
            issue(&mut ring);
        }
        assert!(!ring.contains(first));
        assert_eq!(ring.take(first), None);
    }

    #[test]
    fn test_recycled_slot_does_not_answer_for_old_id() {
        let mut ring = ring(4);
        let old = issue(&mut ring);
        assert!(ring.take(old).is_some());
        let newer = issue(&mut ring);
        issue(&mut ring);
        issue(&mut ring);
        let same_slot = issue(&mut ring);
        assert_eq!(same_slot % 4, old % 4);

        assert!(!ring.contains(old));
        assert!(ring.contains(newer));
        assert_eq!(ring.take(same_slot), Some(format!("record-{same_slot}")));
    }

    #[test]
    fn test_unknown_ids_are_absent() {
        let mut ring = ring(4);
        issue(&mut ring);
        assert!(!ring.contains(0));
        assert!(!ring.contains(99));
        assert_eq!(ring.take(99), None);
    }

    #[test]
    fn test_get_mut_reaches_overflow() {
        let mut ring = ring(2);
        let first = issue(&mut ring);
        issue(&mut ring);
        issue(&mut ring);
        ring.get_mut(first).unwrap().push_str("-touched");
        assert_eq!(ring.get(first).map(String::as_str), Some("record-1-touched"));
    }

    #[test]
    fn test_len_counts_ring_and_overflow() {
        let mut ring = ring(4);
        let ids: Vec<_> = (0..7).map(|_| issue(&mut ring)).collect();
        assert_eq!(ring.len(), 7);

        ring.take(ids[0]);
        ring.take(ids[6]);
        assert_eq!(ring.take(ids[6]), None);
        assert_eq!(ring.take(99), None);
        assert_eq!(ring.len(), 5);

        issue(&mut ring);
        assert_eq!(ring.len(), 6);
        for id in &ids[1..6] {
            ring.take(*id);
        }
        assert_eq!(ring.len(), 1);
        assert!(!ring.is_empty());
    }

    #[test]
    fn test_default_ring_size() {
        let ring = PromiseRing::<()>::with_capacity(RING_SIZE).unwrap();
        assert_eq!(ring.ring_size(), 4096);
    }
}
