//! Connection ids and the house directory

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gavel_types::{ConnectionId, HouseDirectoryEntry};

/// Hands out connection ids starting at 1, never reusing one
#[derive(Debug, Clone)]
pub struct ConnectionIdAllocator {
    next: Arc<AtomicU32>,
}

impl Default for ConnectionIdAllocator {
    fn default() -> Self {
        Self {
            next: Arc::new(AtomicU32::new(1)),
        }
    }
}

impl ConnectionIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Houses currently registered with the Bank
#[derive(Debug, Clone, Default)]
pub struct HouseDirectory {
    entries: Arc<DashMap<ConnectionId, HouseDirectoryEntry>>,
}

impl HouseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: HouseDirectoryEntry) {
        self.entries.insert(entry.house_id, entry);
    }

    pub fn remove(&self, house_id: ConnectionId) -> Option<HouseDirectoryEntry> {
        self.entries.remove(&house_id).map(|(_, entry)| entry)
    }

    /// Snapshot ordered by house id
    pub fn entries(&self) -> Vec<HouseDirectoryEntry> {
        let mut entries: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.house_id);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let ids = ConnectionIdAllocator::new();
        assert_eq!(ids.next_id(), ConnectionId::new(1));
        assert_eq!(ids.next_id(), ConnectionId::new(2));
        let shared = ids.clone();
        assert_eq!(shared.next_id(), ConnectionId::new(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ids_are_unique() {
        let ids = ConnectionIdAllocator::new();
        let mut handles = Vec::new();
        for _ in 0..100 {
            let ids = ids.clone();
            handles.push(tokio::spawn(async move { ids.next_id() }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn test_directory_insert_remove() {
        let directory = HouseDirectory::new();
        for id in [3, 1] {
            directory.insert(HouseDirectoryEntry {
                house_id: ConnectionId::new(id),
                ip: "127.0.0.1".to_string(),
                port: 4000 + id as u16,
            });
        }
        let ids: Vec<u32> = directory.entries().iter().map(|e| e.house_id.get()).collect();
        assert_eq!(ids, vec![1, 3]);

        assert!(directory.remove(ConnectionId::new(1)).is_some());
        assert!(directory.remove(ConnectionId::new(1)).is_none());
        assert_eq!(directory.len(), 1);
    }
}
