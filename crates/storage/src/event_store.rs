use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chainwatch_domain::{
    storage::{EventStore, StorageResult},
    EventKey,
};

/// In-memory processed-event record. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    processed: Arc<Mutex<HashSet<EventKey>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.processed.lock().expect("mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn is_processed(&self, key: &EventKey) -> StorageResult<bool> {
        Ok(self.processed.lock().expect("mutex poisoned").contains(key))
    }

    async fn mark_processed(&self, key: EventKey) -> StorageResult<()> {
        self.processed.lock().expect("mutex poisoned").insert(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(chain_id: u64, hash: &str) -> EventKey {
        EventKey {
            chain_id,
            transaction_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn marks_are_idempotent_and_chain_scoped() {
        let store = MemoryEventStore::new();
        assert!(!store.is_processed(&key(1, "0xaa")).await.unwrap());

        store.mark_processed(key(1, "0xaa")).await.unwrap();
        store.mark_processed(key(1, "0xaa")).await.unwrap();

        assert!(store.is_processed(&key(1, "0xaa")).await.unwrap());
        assert!(!store.is_processed(&key(56, "0xaa")).await.unwrap());
        assert_eq!(store.len(), 1);
    }
}
