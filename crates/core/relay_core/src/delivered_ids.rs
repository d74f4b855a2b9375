//! The bounded, insertion-ordered `deliveredIds` cache : membership
//! implies "do not call `deliver` again for this id; re-ack instead." Owned
//! exclusively by the outbound poller task; never shared across tasks.

use std::collections::HashSet;
use std::collections::VecDeque;

pub const DELIVERED_IDS_CAPACITY: usize = 1000;

#[derive(Default)]
pub struct DeliveredIds {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl DeliveredIds {
    pub fn new() -> Self {
        DeliveredIds::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Inserts `id`, evicting the oldest entry once the cache would exceed
    /// [`DELIVERED_IDS_CAPACITY`]. A re-insertion of an id already present
    /// is a no-op (it stays at its original position).
    pub fn insert(&mut self, id: String) {
        if self.members.contains(&id) {
            return;
        }
        if self.order.len() >= DELIVERED_IDS_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_after_insert() {
        let mut cache = DeliveredIds::new();
        assert!(!cache.contains("m1"));
        cache.insert("m1".to_string());
        assert!(cache.contains("m1"));
    }

    #[test]
    fn evicts_oldest_once_over_capacity_and_keeps_most_recent_1000() {
        let mut cache = DeliveredIds::new();
        for i in 0..(DELIVERED_IDS_CAPACITY + 250) {
            cache.insert(format!("m{i}"));
        }

        assert_eq!(cache.len(), DELIVERED_IDS_CAPACITY);
        // The earliest 250 ids were evicted.
        assert!(!cache.contains("m0"));
        assert!(!cache.contains("m249"));
        // The most recent 1000 remain, in insertion order.
        assert!(cache.contains("m250"));
        assert!(cache.contains(&format!("m{}", DELIVERED_IDS_CAPACITY + 249)));
    }

    #[test]
    fn reinserting_an_existing_id_does_not_grow_or_reorder() {
        let mut cache = DeliveredIds::new();
        cache.insert("m1".to_string());
        cache.insert("m2".to_string());
        cache.insert("m1".to_string());

        assert_eq!(cache.len(), 2);
    }
}
