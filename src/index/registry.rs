//! Feature name to id mapping.

use crate::compute::spatial::FeatureId;
use crate::error::{IndexError, Result};
use rustc_hash::FxHashMap;

/// How new ids are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationMode {
    #[default]
    Uninitialized,
    /// Counter-based allocation while a bulk-load stream is running
    BulkLoading { next: FeatureId },
    /// Ids derived from the tree's entry count
    Incremental,
}

#[derive(Debug, Default)]
pub struct IdRegistry {
    mode: AllocationMode,
    by_name: FxHashMap<String, FeatureId>,
    by_id: FxHashMap<FeatureId, String>,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> AllocationMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Start a bulk load: forget every mapping and restart the counter at 0.
    pub fn begin_bulk(&mut self) {
        self.clear();
        self.mode = AllocationMode::BulkLoading { next: 0 };
    }

    pub fn begin_incremental(&mut self) {
        self.mode = AllocationMode::Incremental;
    }

    /// Allocate an id for `name` and register it.
    ///
    /// `entry_count` is the tree's stored-entry count, `None` when no tree is open.
    /// `in_use` reports ids the tree still stores, including entries whose name has
    /// since been rebound.
    pub fn allocate<F>(
        &mut self,
        name: &str,
        entry_count: Option<u64>,
        in_use: F,
    ) -> Result<FeatureId>
    where
        F: Fn(FeatureId) -> bool,
    {
        let id = match self.mode {
            AllocationMode::BulkLoading { next } => {
                self.mode = AllocationMode::BulkLoading { next: next + 1 };
                next
            }
            AllocationMode::Incremental | AllocationMode::Uninitialized => {
                let count = entry_count.ok_or_else(|| {
                    IndexError::Configuration(format!(
                        "cannot allocate an id for {}: no tree is open",
                        name
                    ))
                })?;
                self.mode = AllocationMode::Incremental;
                // deletes shrink the entry count, so skip ids still in use
                let mut id = count as FeatureId;
                while self.by_id.contains_key(&id) || in_use(id) {
                    id += 1;
                }
                id
            }
        };
        self.register(name, id);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<FeatureId> {
        self.by_name.get(name).copied()
    }

    /// Bind `name` to `id`, replacing any earlier binding of either.
    pub fn register(&mut self, name: &str, id: FeatureId) {
        if let Some(old) = self.by_name.insert(name.to_owned(), id)
            && old != id
        {
            log::warn!("{} rebound from id {} to {}", name, old, id);
            self.by_id.remove(&old);
        }
        if let Some(previous) = self.by_id.insert(id, name.to_owned())
            && previous != name
        {
            self.by_name.remove(&previous);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<FeatureId> {
        let id = self.by_name.remove(name)?;
        self.by_id.remove(&id);
        Some(id)
    }

    /// Drop every mapping and return to the uninitialized mode.
    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
        self.mode = AllocationMode::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_ids_increase_from_zero() {
        let mut ids = IdRegistry::new();
        ids.begin_bulk();
        let allocated: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|name| ids.allocate(name, None, |_| false).unwrap())
            .collect();
        assert_eq!(allocated, vec![0, 1, 2, 3]);
        assert_eq!(ids.lookup("c"), Some(2));
        assert_eq!(ids.mode(), AllocationMode::BulkLoading { next: 4 });
    }

    #[test]
    fn test_begin_bulk_resets_counter() {
        let mut ids = IdRegistry::new();
        ids.begin_bulk();
        ids.allocate("a", None, |_| false).unwrap();
        ids.begin_bulk();
        assert!(ids.is_empty());
        assert_eq!(ids.allocate("b", None, |_| false).unwrap(), 0);
    }

    #[test]
    fn test_incremental_needs_tree() {
        let mut ids = IdRegistry::new();
        ids.begin_incremental();
        assert!(matches!(
            ids.allocate("a", None, |_| false),
            Err(IndexError::Configuration(_))
        ));
        assert!(ids.lookup("a").is_none());
    }

    #[test]
    fn test_incremental_uses_entry_count() {
        let mut ids = IdRegistry::new();
        assert_eq!(ids.allocate("a", Some(0), |_| false).unwrap(), 0);
        assert_eq!(ids.mode(), AllocationMode::Incremental);
        assert_eq!(ids.allocate("b", Some(1), |_| false).unwrap(), 1);
        assert_eq!(ids.allocate("c", Some(2), |_| false).unwrap(), 2);

        // "a" deleted: entry count drops to 2 while id 2 is still taken
        ids.remove("a");
        assert_eq!(ids.allocate("d", Some(2), |_| false).unwrap(), 3);
    }

    #[test]
    fn test_incremental_skips_ids_held_by_tree() {
        let mut ids = IdRegistry::new();
        let stored = [1, 2];
        let id = ids
            .allocate("c", Some(1), |id| stored.contains(&id))
            .unwrap();
        assert_eq!(id, 3);
    }

    #[test]
    fn test_keys_by_value() {
        let mut ids = IdRegistry::new();
        ids.begin_bulk();
        let mut buffer = String::from("first");
        ids.allocate(&buffer, None, |_| false).unwrap();
        buffer.clear();
        buffer.push_str("second");
        ids.allocate(&buffer, None, |_| false).unwrap();
        assert_eq!(ids.lookup("first"), Some(0));
        assert_eq!(ids.lookup("second"), Some(1));
    }

    #[test]
    fn test_register_rebinds() {
        let mut ids = IdRegistry::new();
        ids.register("a", 1);
        ids.register("a", 5);
        assert_eq!(ids.lookup("a"), Some(5));

        ids.register("b", 5);
        assert!(ids.lookup("a").is_none());
        assert_eq!(ids.lookup("b"), Some(5));

        // id 1 was released by the rebind
        ids.begin_incremental();
        assert_eq!(ids.allocate("c", Some(1), |_| false).unwrap(), 1);

        ids.clear();
        assert_eq!(ids.mode(), AllocationMode::Uninitialized);
        assert!(ids.is_empty());
    }
}
