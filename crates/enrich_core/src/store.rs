use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{Item, ItemId};

/// Key-value access to item records. Implementations own persistence.
pub trait ItemStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Item>;
    fn set(&self, item: Item);
    fn delete(&self, id: &str) -> Option<Item>;
}

/// In-process store ordered by item id.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: Mutex<BTreeMap<ItemId, Item>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let map = items
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        Self {
            items: Mutex::new(map),
        }
    }

    /// All records, ordered by id.
    pub fn snapshot(&self) -> Vec<Item> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ItemId, Item>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ItemStore for MemoryItemStore {
    fn get(&self, id: &str) -> Option<Item> {
        self.lock().get(id).cloned()
    }

    fn set(&self, item: Item) {
        self.lock().insert(item.id.clone(), item);
    }

    fn delete(&self, id: &str) -> Option<Item> {
        self.lock().remove(id)
    }
}
