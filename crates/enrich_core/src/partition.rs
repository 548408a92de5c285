use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::Item;

/// Items sharing one grouping key, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group<K> {
    pub key: K,
    pub items: Vec<Item>,
}

/// Splits items by `key_of`. Groups appear in first-seen order and keep the
/// input order of their items.
pub fn partition_by<K, F>(items: Vec<Item>, key_of: F) -> Vec<Group<K>>
where
    K: Eq + Hash + Clone,
    F: Fn(&Item) -> K,
{
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<Group<K>> = Vec::new();
    for item in items {
        let key = key_of(&item);
        match slots.get(&key) {
            Some(&slot) => groups[slot].items.push(item),
            None => {
                slots.insert(key.clone(), groups.len());
                groups.push(Group {
                    key,
                    items: vec![item],
                });
            }
        }
    }
    groups
}

/// First text that occurs more than once among `items`.
pub fn first_duplicate_text(items: &[Item]) -> Option<&str> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|item| item.text.as_str())
        .find(|text| !seen.insert(*text))
}
