//! Transactional object store: typed collections keyed by a stable id, with
//! secondary ordered indexes and nested snapshot/rollback, per §6 and the
//! "multi-indexed containers" design note in §9.
//!
//! Generalizes the source's intrusive multi-index container into a primary
//! `BTreeMap` plus explicit secondary indexes kept in sync through
//! `modify`, so iteration order is always the deterministic `BTreeMap`
//! order rather than an implementation-defined hash order.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineError, EngineResult};

/// A single typed collection: primary records keyed by `Id`, plus named
/// secondary indexes mapping an index key to the set of ids currently
/// carrying it.
pub struct Collection<Id: Ord + Clone, T: Clone> {
    records: BTreeMap<Id, T>,
    indexes: BTreeMap<&'static str, BTreeMap<Vec<u8>, BTreeSet<Id>>>,
}

impl<Id: Ord + Clone, T: Clone> Default for Collection<Id, T> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }
}

impl<Id: Ord + Clone, T: Clone> Collection<Id, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, id: Id, value: T) -> EngineResult<()> {
        crate::validate!(
            !self.records.contains_key(&id),
            EngineError::constraint("create called on an id that already exists")
        )?;
        self.records.insert(id, value);
        Ok(())
    }

    pub fn get(&self, id: &Id) -> Option<&T> {
        self.records.get(id)
    }

    pub fn modify(&mut self, id: &Id, mutator: impl FnOnce(&mut T)) -> EngineResult<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| EngineError::constraint("modify called on a missing id"))?;
        mutator(record);
        Ok(())
    }

    pub fn remove(&mut self, id: &Id) -> Option<T> {
        for index in self.indexes.values_mut() {
            for set in index.values_mut() {
                set.remove(id);
            }
        }
        self.records.remove(id)
    }

    /// Replaces the full key set for `index_name` associated with `id`.
    /// Call after any `modify` that changes an indexed field.
    pub fn reindex(&mut self, index_name: &'static str, id: &Id, keys: Vec<Vec<u8>>) {
        let index = self.indexes.entry(index_name).or_default();
        for set in index.values_mut() {
            set.remove(id);
        }
        for key in keys {
            index.entry(key).or_default().insert(id.clone());
        }
    }

    pub fn find_by_index(&self, index_name: &str, key: &[u8]) -> Vec<&T> {
        self.indexes
            .get(index_name)
            .and_then(|idx| idx.get(key))
            .into_iter()
            .flatten()
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    /// Ids whose index key falls within `[low, high]`, in ascending key
    /// order, then ascending id within a key.
    pub fn range_by_index(&self, index_name: &str, low: &[u8], high: &[u8]) -> Vec<&T> {
        let Some(index) = self.indexes.get(index_name) else { return Vec::new() };
        index
            .range(low.to_vec()..=high.to_vec())
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    /// Every record in ascending primary-key order; the only iteration order
    /// the store contract permits.
    pub fn iter(&self) -> impl Iterator<Item = (&Id, &T)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A transactional snapshot stack: `begin_snapshot` pushes a full clone of
/// `T`, `commit` discards it, `rollback` restores it. Correctness over
/// cleverness: a block applies at most a few hundred operations, so
/// clone-on-snapshot is cheap relative to match-loop work.
pub struct SnapshotStack<T: Clone> {
    stack: Vec<T>,
}

impl<T: Clone> Default for SnapshotStack<T> {
    fn default() -> Self {
        Self { stack: Vec::new() }
    }
}

impl<T: Clone> SnapshotStack<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_snapshot(&mut self, current: &T) {
        self.stack.push(current.clone());
    }

    pub fn commit(&mut self) -> EngineResult<()> {
        self.stack
            .pop()
            .map(|_| ())
            .ok_or_else(|| EngineError::constraint("commit called with no open snapshot"))
    }

    pub fn rollback(&mut self) -> EngineResult<T> {
        self.stack
            .pop()
            .ok_or_else(|| EngineError::constraint("rollback called with no open snapshot"))
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_modify_remove_round_trip() {
        let mut collection: Collection<u64, String> = Collection::new();
        collection.create(1, "alice".to_string()).unwrap();
        assert_eq!(collection.get(&1), Some(&"alice".to_string()));
        collection.modify(&1, |v| v.push_str("!")).unwrap();
        assert_eq!(collection.get(&1), Some(&"alice!".to_string()));
        assert_eq!(collection.remove(&1), Some("alice!".to_string()));
        assert!(collection.get(&1).is_none());
    }

    #[test]
    fn secondary_index_range_query() {
        let mut collection: Collection<u64, String> = Collection::new();
        collection.create(1, "alice".to_string()).unwrap();
        collection.create(2, "bob".to_string()).unwrap();
        collection.reindex("by_price", &1, vec![10u64.to_be_bytes().to_vec()]);
        collection.reindex("by_price", &2, vec![20u64.to_be_bytes().to_vec()]);

        let results = collection.range_by_index(
            "by_price",
            &5u64.to_be_bytes(),
            &15u64.to_be_bytes(),
        );
        assert_eq!(results, vec![&"alice".to_string()]);
    }

    #[test]
    fn snapshot_rollback_restores_prior_state() {
        let mut stack = SnapshotStack::new();
        let state = vec![1, 2, 3];
        stack.begin_snapshot(&state);
        let restored = stack.rollback().unwrap();
        assert_eq!(restored, state);
    }
}
