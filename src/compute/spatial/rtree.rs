//! Persistent R*-tree engine.
//!
//! The in-memory structure is an `rstar` R*-tree. Every entry is also persisted in
//! leaf pages of a [`PageStore`], together with a header page whose id doubles as the
//! tree identifier. Reopening a tree reads the header, then the leaves, and rebuilds the
//! R*-tree with rstar's packing bulk load.
//!
//! ## Page layout
//!
//! - header page: [`TreeProperties`], entry count, list of leaf pages with their fill
//! - leaf page: up to `leaf_capacity` entries. Bulk loads pack
//!   `floor(leaf_capacity * utilization)` entries per leaf after a sort-tile pass over
//!   the entry centers; incremental inserts top up the last leaf.

use crate::error::{IndexError, Result};
use crate::storage::{PageId, PageStore};
use crate::stream::{RecordStream, StreamRecord};
use bytes::Bytes;
use rstar::{AABB, RTree, RTreeObject};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use shapeindex_types::bbox::{BoundingBox, MAX_DIMENSIONS};

/// Identifier of an indexed entry.
pub type FeatureId = i64;

/// Node split policy. Only the R* variant is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TreeVariant {
    #[default]
    RStar,
}

/// Shape parameters of a tree, persisted in its header page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeProperties {
    pub dimensionality: usize,
    pub utilization: f64,
    pub leaf_capacity: usize,
    pub index_capacity: usize,
    pub variant: TreeVariant,
}

impl TreeProperties {
    pub fn new(dimensionality: usize, utilization: f64, node_capacity: usize) -> Self {
        Self {
            dimensionality,
            utilization,
            leaf_capacity: node_capacity,
            index_capacity: node_capacity,
            variant: TreeVariant::RStar,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_DIMENSIONS).contains(&self.dimensionality) {
            return Err(IndexError::Configuration(format!(
                "only dimensionality from 1 to {} supported, not {}",
                MAX_DIMENSIONS, self.dimensionality
            )));
        }
        if !(self.utilization > 0.0 && self.utilization <= 1.0) {
            return Err(IndexError::Configuration(format!(
                "utilization must be in (0, 1], got {}",
                self.utilization
            )));
        }
        if self.leaf_capacity < 2 || self.index_capacity < 2 {
            return Err(IndexError::Configuration(
                "node capacities must be at least 2".into(),
            ));
        }
        Ok(())
    }

    /// Entries per leaf written by a bulk load.
    fn bulk_fill(&self) -> usize {
        ((self.leaf_capacity as f64 * self.utilization).floor() as usize).max(1)
    }
}

/// An indexed entry: opaque payload, bounding box and id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: FeatureId,
    pub payload: Bytes,
    pub bounds: BoundingBox,
}

impl IndexEntry {
    /// Payload decoded as a feature name.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl From<StreamRecord> for IndexEntry {
    fn from(record: StreamRecord) -> Self {
        Self {
            id: record.id,
            payload: record.payload,
            bounds: record.bounds,
        }
    }
}

impl RTreeObject for IndexEntry {
    type Envelope = AABB<[f64; MAX_DIMENSIONS]>;

    fn envelope(&self) -> Self::Envelope {
        envelope_of(&self.bounds)
    }
}

fn envelope_of(bounds: &BoundingBox) -> AABB<[f64; MAX_DIMENSIONS]> {
    let (low, high) = bounds.padded();
    AABB::from_corners(low, high)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LeafRef {
    page: PageId,
    len: usize,
}

/// Where an entry is persisted, plus its bounds for in-memory lookups.
#[derive(Debug, Clone)]
struct Location {
    leaf: usize,
    bounds: BoundingBox,
}

#[derive(Debug, Serialize, Deserialize)]
struct TreeHeader {
    properties: TreeProperties,
    entry_count: u64,
    leaves: Vec<LeafRef>,
}

pub struct RTreeEngine<S: PageStore> {
    storage: S,
    tree_id: PageId,
    properties: TreeProperties,
    tree: RTree<IndexEntry>,
    leaves: Vec<LeafRef>,
    locations: FxHashMap<FeatureId, Location>,
    /// header page is stale; rewritten on flush and drop
    header_dirty: bool,
}

impl<S: PageStore> RTreeEngine<S> {
    /// Allocate an empty tree in `storage`.
    pub fn create_empty(mut storage: S, properties: TreeProperties) -> Result<Self> {
        properties.validate()?;
        let tree_id = storage.store(None, &[])?;
        let mut engine = Self {
            storage,
            tree_id,
            properties,
            tree: RTree::new(),
            leaves: Vec::new(),
            locations: FxHashMap::default(),
            header_dirty: true,
        };
        engine.write_header()?;
        log::debug!("created empty tree {}", tree_id);
        Ok(engine)
    }

    /// Drain `stream` and build a packed tree from its records.
    pub fn bulk_load(
        stream: &mut dyn RecordStream,
        mut storage: S,
        properties: TreeProperties,
    ) -> Result<Self> {
        properties.validate()?;
        let tree_id = storage.store(None, &[])?;

        let mut entries = Vec::new();
        while stream.has_next()? {
            let Some(record) = stream.next_record()? else {
                break;
            };
            check_dimension(&record.bounds, properties.dimensionality)?;
            entries.push(IndexEntry::from(record));
        }

        let fill = properties.bulk_fill();
        sort_tile(&mut entries, fill);

        let mut leaves = Vec::with_capacity(entries.len().div_ceil(fill));
        let mut locations = FxHashMap::default();
        for chunk in entries.chunks(fill) {
            let page = storage.store(None, &bincode::serialize(chunk)?)?;
            for entry in chunk {
                locations.insert(
                    entry.id,
                    Location {
                        leaf: leaves.len(),
                        bounds: entry.bounds.clone(),
                    },
                );
            }
            leaves.push(LeafRef {
                page,
                len: chunk.len(),
            });
        }

        let count = entries.len();
        let mut engine = Self {
            storage,
            tree_id,
            properties,
            tree: RTree::bulk_load(entries),
            leaves,
            locations,
            header_dirty: true,
        };
        engine.write_header()?;
        log::debug!(
            "bulk loaded tree {} with {} entries in {} leaves",
            tree_id,
            count,
            engine.leaves.len()
        );
        Ok(engine)
    }

    /// Reopen a tree persisted in `storage` under `tree_id`.
    pub fn open(mut storage: S, tree_id: PageId) -> Result<Self> {
        let header: TreeHeader = bincode::deserialize(&storage.load(tree_id)?)?;
        header.properties.validate()?;

        let mut entries = Vec::with_capacity(header.entry_count as usize);
        let mut locations = FxHashMap::default();
        for (slot, leaf) in header.leaves.iter().enumerate() {
            let chunk: Vec<IndexEntry> = bincode::deserialize(&storage.load(leaf.page)?)?;
            if chunk.len() != leaf.len {
                return Err(IndexError::Engine(format!(
                    "leaf page {} holds {} entries, header says {}",
                    leaf.page,
                    chunk.len(),
                    leaf.len
                )));
            }
            for entry in &chunk {
                locations.insert(
                    entry.id,
                    Location {
                        leaf: slot,
                        bounds: entry.bounds.clone(),
                    },
                );
            }
            entries.extend(chunk);
        }

        if entries.len() as u64 != header.entry_count {
            return Err(IndexError::Engine(format!(
                "tree {} holds {} entries, header says {}",
                tree_id,
                entries.len(),
                header.entry_count
            )));
        }

        Ok(Self {
            storage,
            tree_id,
            properties: header.properties,
            tree: RTree::bulk_load(entries),
            leaves: header.leaves,
            locations,
            header_dirty: false,
        })
    }

    pub fn insert(&mut self, payload: Bytes, bounds: BoundingBox, id: FeatureId) -> Result<()> {
        check_dimension(&bounds, self.properties.dimensionality)?;
        let entry = IndexEntry {
            id,
            payload,
            bounds,
        };

        let slot = match self.leaves.last().copied() {
            Some(leaf) if leaf.len < self.properties.leaf_capacity => {
                let slot = self.leaves.len() - 1;
                let mut chunk = self.read_leaf(slot)?;
                chunk.push(entry.clone());
                self.storage
                    .store(Some(leaf.page), &bincode::serialize(&chunk)?)?;
                slot
            }
            _ => {
                let page = self
                    .storage
                    .store(None, &bincode::serialize(std::slice::from_ref(&entry))?)?;
                self.leaves.push(LeafRef { page, len: 0 });
                self.leaves.len() - 1
            }
        };
        self.leaves[slot].len += 1;
        self.locations.insert(
            id,
            Location {
                leaf: slot,
                bounds: entry.bounds.clone(),
            },
        );
        self.tree.insert(entry);
        self.header_dirty = true;
        Ok(())
    }

    /// Remove the entry with `id` whose bounds match `bounds`. Returns whether an entry
    /// was removed.
    pub fn delete(&mut self, bounds: &BoundingBox, id: FeatureId) -> Result<bool> {
        let Some(entry) = self
            .tree
            .locate_in_envelope(&envelope_of(bounds))
            .find(|e| e.id == id)
            .cloned()
        else {
            return Ok(false);
        };

        self.remove_from_leaves(&entry)?;
        self.tree.remove(&entry);
        self.header_dirty = true;
        Ok(true)
    }

    fn remove_from_leaves(&mut self, entry: &IndexEntry) -> Result<()> {
        let count = self.leaves.len();
        let hinted = self.locations.get(&entry.id).map(|l| l.leaf);
        let candidates = hinted
            .into_iter()
            .filter(move |slot| *slot < count)
            .chain(0..count);

        for slot in candidates {
            let mut chunk = self.read_leaf(slot)?;
            let Some(pos) = chunk.iter().position(|e| e == entry) else {
                continue;
            };
            chunk.remove(pos);
            let page = self.leaves[slot].page;
            if chunk.is_empty() {
                self.storage.delete(page)?;
                self.leaves.remove(slot);
                // leaf slots after the removed one shift down by one
                self.locations.retain(|_, l| l.leaf != slot);
                for location in self.locations.values_mut() {
                    if location.leaf > slot {
                        location.leaf -= 1;
                    }
                }
            } else {
                self.storage.store(Some(page), &bincode::serialize(&chunk)?)?;
                self.leaves[slot].len = chunk.len();
                self.locations.remove(&entry.id);
            }
            return Ok(());
        }

        Err(IndexError::Engine(format!(
            "entry {} is indexed but missing from every leaf page",
            entry.id
        )))
    }

    fn read_leaf(&mut self, slot: usize) -> Result<Vec<IndexEntry>> {
        let page = self.leaves[slot].page;
        Ok(bincode::deserialize(&self.storage.load(page)?)?)
    }

    fn write_header(&mut self) -> Result<()> {
        let header = TreeHeader {
            properties: self.properties.clone(),
            entry_count: self.tree.size() as u64,
            leaves: self.leaves.clone(),
        };
        self.storage
            .store(Some(self.tree_id), &bincode::serialize(&header)?)?;
        self.header_dirty = false;
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.tree.size() as u64
    }

    /// Structural consistency between the R*-tree and its persisted leaves.
    pub fn is_valid(&self) -> bool {
        let persisted: usize = self.leaves.iter().map(|l| l.len).sum();
        if persisted != self.tree.size() {
            log::warn!(
                "tree {} holds {} entries but its leaves hold {}",
                self.tree_id,
                self.tree.size(),
                persisted
            );
            return false;
        }
        if let Some(leaf) = self
            .leaves
            .iter()
            .find(|l| l.len == 0 || l.len > self.properties.leaf_capacity)
        {
            log::warn!("leaf page {} holds {} entries", leaf.page, leaf.len);
            return false;
        }
        self.tree
            .iter()
            .all(|e| e.bounds.dimension() <= self.properties.dimensionality)
    }

    pub fn tree_id(&self) -> PageId {
        self.tree_id
    }

    pub fn properties(&self) -> &TreeProperties {
        &self.properties
    }

    pub fn entry(&self, id: FeatureId) -> Option<&IndexEntry> {
        let location = self.locations.get(&id)?;
        self.tree
            .locate_in_envelope(&envelope_of(&location.bounds))
            .find(|e| e.id == id)
    }

    /// Whether any stored entry carries `id`.
    pub fn contains_id(&self, id: FeatureId) -> bool {
        self.locations.contains_key(&id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.tree.iter()
    }

    /// Entries whose bounding box intersects `bounds`.
    pub fn intersecting(&self, bounds: &BoundingBox) -> Vec<&IndexEntry> {
        let envelope = envelope_of(bounds);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .collect()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.header_dirty {
            self.write_header()?;
        }
        self.storage.flush()
    }
}

impl<S: PageStore> Drop for RTreeEngine<S> {
    fn drop(&mut self) {
        if self.header_dirty
            && let Err(err) = self.write_header()
        {
            log::error!("failed to write header of tree {}: {}", self.tree_id, err);
        }
    }
}

fn check_dimension(bounds: &BoundingBox, dimensionality: usize) -> Result<()> {
    if bounds.dimension() > dimensionality {
        return Err(IndexError::Engine(format!(
            "{}-dimensional entry does not fit a {}-dimensional tree",
            bounds.dimension(),
            dimensionality
        )));
    }
    Ok(())
}

fn center(entry: &IndexEntry, axis: usize) -> f64 {
    let (low, high) = entry.bounds.padded();
    (low[axis] + high[axis]) / 2.0
}

/// Sort-tile ordering: slice the entries by x center, then order each slice by y
/// center, so that consecutive chunks of `fill` entries are spatially compact.
fn sort_tile(entries: &mut [IndexEntry], fill: usize) {
    if entries.len() <= fill {
        return;
    }
    let leaf_count = entries.len().div_ceil(fill);
    let slices = (leaf_count as f64).sqrt().ceil() as usize;
    let slice_len = slices * fill;

    entries.sort_by(|a, b| center(a, 0).total_cmp(&center(b, 0)));
    for slice in entries.chunks_mut(slice_len) {
        slice.sort_by(|a, b| center(a, 1).total_cmp(&center(b, 1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::stream::VecStream;

    fn bbox(low: &[f64], high: &[f64]) -> BoundingBox {
        BoundingBox::new(low, high).unwrap()
    }

    fn records(n: i64) -> Vec<StreamRecord> {
        (0..n)
            .map(|i| StreamRecord {
                payload: Bytes::from(format!("f{}", i)),
                bounds: bbox(&[i as f64, 0.0], &[i as f64 + 1.0, 1.0]),
                id: i,
            })
            .collect()
    }

    #[test]
    fn test_create_rejects_bad_dimensionality() {
        for dim in [0, 4] {
            let props = TreeProperties::new(dim, 0.7, 4);
            assert!(matches!(
                RTreeEngine::create_empty(MemoryStorage::new(), props),
                Err(IndexError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_bulk_load_packs_leaves() {
        let mut stream = VecStream::new(records(10));
        let engine = RTreeEngine::bulk_load(
            &mut stream,
            MemoryStorage::new(),
            TreeProperties::new(2, 0.7, 4),
        )
        .unwrap();
        assert_eq!(engine.entry_count(), 10);
        // floor(4 * 0.7) = 2 entries per leaf
        assert_eq!(engine.leaves.len(), 5);
        assert!(engine.is_valid());
        assert_eq!(engine.entry(3).unwrap().name(), "f3");
    }

    #[test]
    fn test_insert_delete() {
        let mut engine =
            RTreeEngine::create_empty(MemoryStorage::new(), TreeProperties::new(2, 0.7, 4))
                .unwrap();
        for record in records(9) {
            engine
                .insert(record.payload, record.bounds, record.id)
                .unwrap();
        }
        assert_eq!(engine.entry_count(), 9);
        assert_eq!(engine.leaves.len(), 3);
        assert!(engine.is_valid());

        let target = bbox(&[4.0, 0.0], &[5.0, 1.0]);
        assert!(engine.delete(&target, 4).unwrap());
        assert!(!engine.delete(&target, 4).unwrap());
        // wrong bounds for an existing id
        assert!(!engine.delete(&target, 5).unwrap());
        assert_eq!(engine.entry_count(), 8);
        assert!(engine.entry(4).is_none());
        assert!(engine.is_valid());
    }

    #[test]
    fn test_delete_empties_leaf() {
        let mut engine =
            RTreeEngine::create_empty(MemoryStorage::new(), TreeProperties::new(2, 1.0, 2))
                .unwrap();
        for record in records(3) {
            engine
                .insert(record.payload, record.bounds, record.id)
                .unwrap();
        }
        assert_eq!(engine.leaves.len(), 2);
        assert!(engine.delete(&bbox(&[2.0, 0.0], &[3.0, 1.0]), 2).unwrap());
        assert_eq!(engine.leaves.len(), 1);
        assert!(engine.delete(&bbox(&[0.0, 0.0], &[1.0, 1.0]), 0).unwrap());
        assert!(engine.is_valid());
        assert_eq!(engine.entry_count(), 1);
    }

    #[test]
    fn test_header_written_on_flush() {
        let mut engine =
            RTreeEngine::create_empty(MemoryStorage::new(), TreeProperties::new(2, 0.7, 4))
                .unwrap();
        let base = engine.storage().stats().writes;
        for record in records(3) {
            engine
                .insert(record.payload, record.bounds, record.id)
                .unwrap();
        }
        // one new leaf page, then two rewrites of it
        assert_eq!(engine.storage().stats().writes, base + 3);
        engine.flush().unwrap();
        assert_eq!(engine.storage().stats().writes, base + 4);
        engine.flush().unwrap();
        assert_eq!(engine.storage().stats().writes, base + 4);
    }

    #[test]
    fn test_entry_and_contains_id_follow_deletes() {
        let mut stream = VecStream::new(records(6));
        let mut engine = RTreeEngine::bulk_load(
            &mut stream,
            MemoryStorage::new(),
            TreeProperties::new(2, 0.7, 4),
        )
        .unwrap();
        assert!(engine.contains_id(5));
        assert_eq!(engine.entry(5).unwrap().bounds.to_vec(), vec![5.0, 0.0, 6.0, 1.0]);

        assert!(engine.delete(&bbox(&[5.0, 0.0], &[6.0, 1.0]), 5).unwrap());
        assert!(!engine.contains_id(5));
        assert!(engine.entry(5).is_none());
        assert!(engine.contains_id(4));
        assert!(!engine.contains_id(42));
    }

    #[test]
    fn test_rejects_entry_beyond_dimensionality() {
        let mut engine =
            RTreeEngine::create_empty(MemoryStorage::new(), TreeProperties::new(1, 0.7, 4))
                .unwrap();
        let err = engine
            .insert(Bytes::from_static(b"a"), bbox(&[0.0, 0.0], &[1.0, 1.0]), 0)
            .unwrap_err();
        assert!(matches!(err, IndexError::Engine(_)));
        assert_eq!(engine.entry_count(), 0);
    }

    #[test]
    fn test_intersecting() {
        let mut stream = VecStream::new(records(5));
        let engine = RTreeEngine::bulk_load(
            &mut stream,
            MemoryStorage::new(),
            TreeProperties::new(2, 0.7, 4),
        )
        .unwrap();
        let mut ids: Vec<_> = engine
            .intersecting(&bbox(&[1.5, 0.5], &[2.5, 0.6]))
            .into_iter()
            .map(|e| e.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_sort_tile_keeps_every_entry() {
        let mut entries: Vec<IndexEntry> =
            records(17).into_iter().rev().map(IndexEntry::from).collect();
        sort_tile(&mut entries, 2);
        let mut ids: Vec<_> = entries.iter().map(|e| e.id).collect();
        ids.sort();
        assert_eq!(ids, (0..17).collect::<Vec<_>>());
    }
}
