//! Index lifecycle management.
//!
//! [`ShapeIndex`] owns the persistent storage, its page buffer and the tree as one
//! [`IndexHandle`], together with the geometry factory, the name registry and the shape
//! cache. Lifecycle:
//!
//! ```text
//! Closed --create / bulk_load / load_from_file / reopen--> Open --clear--> Closed
//! ```
//!
//! Single-feature `insert` and `delete` lazily create a tree when none is open.

mod cache;
mod registry;

pub use cache::ShapeCache;
pub use registry::{AllocationMode, IdRegistry};

use crate::compute::geometry::{GeometryFactory, Shape};
use crate::compute::interpret::interpret;
use crate::compute::spatial::{FeatureId, RTreeEngine, TreeProperties};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::storage::{DiskStorage, PageId, RandomEvictionBuffer};
use crate::stream::{FileStream, RecordSource, SourceStream};
use bytes::Bytes;
use shapeindex_types::bbox::{BoundingBox, MAX_DIMENSIONS};
use shapeindex_types::descriptor::Descriptor;
use std::path::{Path, PathBuf};

/// Page holding the tree header in freshly created storage.
const TREE_HEADER_PAGE: PageId = 0;

type TreeStore = RandomEvictionBuffer<DiskStorage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Closed,
    Building,
    Open,
}

/// Storage, buffer and tree, created and destroyed together. The tree owns the buffer,
/// which owns the disk storage.
struct IndexHandle {
    tree: RTreeEngine<TreeStore>,
}

pub struct ShapeIndex {
    base_name: PathBuf,
    config: IndexConfig,
    factory: GeometryFactory,
    ids: IdRegistry,
    shapes: ShapeCache,
    handle: Option<IndexHandle>,
    state: IndexState,
}

fn check_dimensionality(dimensionality: usize) -> Result<()> {
    if (1..=MAX_DIMENSIONS).contains(&dimensionality) {
        Ok(())
    } else {
        Err(IndexError::Configuration(format!(
            "only dimensionality from 1 to {} supported, not {}",
            MAX_DIMENSIONS, dimensionality
        )))
    }
}

impl ShapeIndex {
    /// A closed index whose storage lives at `<base_name>.dat` / `<base_name>.idx`.
    pub fn new<P: AsRef<Path>>(base_name: P, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            base_name: base_name.as_ref().to_path_buf(),
            config,
            factory: GeometryFactory::new(),
            ids: IdRegistry::new(),
            shapes: ShapeCache::new(),
            handle: None,
            state: IndexState::Closed,
        })
    }

    pub fn base_name(&self) -> &Path {
        &self.base_name
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    fn open_storage(&self, page_size: usize, capacity: usize, write_through: bool) -> Result<TreeStore> {
        let disk = DiskStorage::create(&self.base_name, page_size)?;
        Ok(RandomEvictionBuffer::new(disk, capacity, write_through))
    }

    fn properties(&self, dimensionality: usize) -> TreeProperties {
        TreeProperties::new(
            dimensionality,
            self.config.utilization,
            self.config.node_capacity,
        )
    }

    /// Create an empty tree with the configured fill factor and node capacity.
    pub fn create(&mut self, dimensionality: usize) -> Result<()> {
        self.create_with(
            dimensionality,
            self.config.utilization,
            self.config.node_capacity,
        )
    }

    pub fn create_with(
        &mut self,
        dimensionality: usize,
        utilization: f64,
        node_capacity: usize,
    ) -> Result<()> {
        check_dimensionality(dimensionality)?;
        let config = self
            .config
            .clone()
            .with_utilization(utilization)
            .with_node_capacity(node_capacity);
        config.validate()?;

        self.clear();
        let storage = self.open_storage(
            config.page_size,
            config.buffer_capacity,
            config.write_through,
        )?;
        let properties = TreeProperties::new(dimensionality, utilization, node_capacity);
        let tree = RTreeEngine::create_empty(storage, properties)?;
        log::info!(
            "created {}-dimensional index {} (tree {})",
            dimensionality,
            self.base_name.display(),
            tree.tree_id()
        );
        self.handle = Some(IndexHandle { tree });
        self.state = IndexState::Open;
        Ok(())
    }

    /// Build the index from every record of `source`.
    ///
    /// Bad dimensionality or an unreadable source is an error, raised before the open
    /// index or its files are touched. A failure while building the tree is logged and
    /// reported as `Ok(false)`, leaving the index closed. Otherwise returns whether the
    /// tree reports itself valid.
    pub fn bulk_load<R: RecordSource>(&mut self, source: &R, dimensionality: usize) -> Result<bool> {
        check_dimensionality(dimensionality)?;
        let query = source.open_query()?;
        self.clear();

        let properties = self.properties(dimensionality);
        let storage = self.open_storage(
            self.config.bulk_page_size,
            self.config.bulk_buffer_capacity,
            self.config.bulk_write_through,
        )?;

        self.state = IndexState::Building;
        let built = {
            let mut stream =
                SourceStream::from_query(query, &mut self.factory, &mut self.ids, &mut self.shapes);
            RTreeEngine::bulk_load(&mut stream, storage, properties)
        };
        self.finish_build(built)
    }

    /// Build the index from a bulk-load file of 2-D boxes.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P, dimensionality: usize) -> Result<bool> {
        check_dimensionality(dimensionality)?;
        let mut stream = FileStream::open(path.as_ref())?;
        self.clear();

        let storage = self.open_storage(
            self.config.page_size,
            self.config.buffer_capacity,
            self.config.write_through,
        )?;
        self.state = IndexState::Building;
        let built = RTreeEngine::bulk_load(&mut stream, storage, self.properties(dimensionality));
        drop(stream);

        if let Ok(tree) = &built {
            for entry in tree.entries() {
                self.ids.register(&entry.name(), entry.id);
            }
        }
        self.finish_build(built)
    }

    fn finish_build(&mut self, built: Result<RTreeEngine<TreeStore>>) -> Result<bool> {
        match built {
            Ok(mut tree) => {
                let valid = tree.is_valid();
                if let Err(err) = tree.flush() {
                    log::error!("failed to flush {}: {}", self.base_name.display(), err);
                }
                log::info!(
                    "loaded {} entries into {}: valid={} buffer hits={} tree id={}",
                    tree.entry_count(),
                    self.base_name.display(),
                    valid,
                    tree.storage().hits(),
                    tree.tree_id()
                );
                self.ids.begin_incremental();
                self.handle = Some(IndexHandle { tree });
                self.state = IndexState::Open;
                Ok(valid)
            }
            Err(err) => {
                log::error!("bulk load of {} failed: {}", self.base_name.display(), err);
                self.clear();
                Ok(false)
            }
        }
    }

    /// Reopen the index persisted under the base name.
    pub fn reopen(&mut self) -> Result<()> {
        self.clear();
        let disk = DiskStorage::open(&self.base_name)?;
        let storage =
            RandomEvictionBuffer::new(disk, self.config.buffer_capacity, self.config.write_through);
        let tree = RTreeEngine::open(storage, TREE_HEADER_PAGE)?;
        for entry in tree.entries() {
            self.ids.register(&entry.name(), entry.id);
        }
        self.ids.begin_incremental();
        log::info!(
            "reopened {} with {} entries",
            self.base_name.display(),
            tree.entry_count()
        );
        self.handle = Some(IndexHandle { tree });
        self.state = IndexState::Open;
        Ok(())
    }

    fn interpret(&mut self, name: &str, descriptor: &Descriptor) -> Result<Shape> {
        interpret(&mut self.factory, descriptor).ok_or_else(|| {
            IndexError::Configuration(format!("could not interpret shape of {}", name))
        })
    }

    /// Open a tree sized for `shape` unless one is open already.
    fn ensure_tree(&mut self, shape: &Shape) -> Result<()> {
        if self.handle.is_none() {
            self.create(shape.dimension())?;
        }
        Ok(())
    }

    /// Insert a single named feature.
    pub fn insert(&mut self, name: &str, descriptor: &Descriptor) -> Result<FeatureId> {
        let shape = self.interpret(name, descriptor)?;
        match self.insert_shape(name, &shape) {
            Ok(id) => {
                if let Some(displaced) = self.shapes.store(id, shape) {
                    displaced.release(&mut self.factory);
                }
                Ok(id)
            }
            Err(err) => {
                shape.release(&mut self.factory);
                Err(err)
            }
        }
    }

    fn insert_shape(&mut self, name: &str, shape: &Shape) -> Result<FeatureId> {
        self.ensure_tree(shape)?;
        let Some(handle) = self.handle.as_mut() else {
            return Err(IndexError::Engine("no tree open".into()));
        };

        let previous = self.ids.lookup(name);
        let tree = &handle.tree;
        let id = self
            .ids
            .allocate(name, Some(tree.entry_count()), |id| tree.contains_id(id))?;
        let payload = Bytes::copy_from_slice(name.as_bytes());
        if let Err(err) = handle.tree.insert(payload, shape.bounds().clone(), id) {
            self.ids.remove(name);
            if let Some(previous) = previous {
                self.ids.register(name, previous);
            }
            return Err(err);
        }
        log::debug!("inserted {} as id {}", name, id);
        Ok(id)
    }

    /// Delete a named feature. The descriptor's bounding box locates the entry.
    ///
    /// Returns `Ok(false)` when the tree holds no entry with that id inside the box.
    pub fn delete(&mut self, name: &str, descriptor: &Descriptor) -> Result<bool> {
        let shape = self.interpret(name, descriptor)?;
        let result = self.delete_shape(name, &shape);
        shape.release(&mut self.factory);
        result
    }

    fn delete_shape(&mut self, name: &str, shape: &Shape) -> Result<bool> {
        // a freshly created tree cannot hold the name, so the lookup below fails
        self.ensure_tree(shape)?;
        let id = self
            .ids
            .lookup(name)
            .ok_or_else(|| IndexError::Lookup(format!("{} is not indexed", name)))?;
        let Some(handle) = self.handle.as_mut() else {
            return Err(IndexError::Engine("no tree open".into()));
        };

        if !handle.tree.delete(shape.bounds(), id)? {
            log::warn!("no entry {} for {} inside {:?}", id, name, shape.bounds().to_vec());
            return Ok(false);
        }
        self.ids.remove(name);
        self.shapes.release(id, &mut self.factory);
        log::debug!("deleted {} (id {})", name, id);
        Ok(true)
    }

    /// Close the tree, buffer and storage, then forget every name and release every
    /// cached shape.
    pub fn clear(&mut self) {
        if let Some(mut handle) = self.handle.take()
            && let Err(err) = handle.tree.flush()
        {
            log::error!("failed to flush {}: {}", self.base_name.display(), err);
        }
        self.shapes.clear(&mut self.factory);
        self.ids.clear();
        self.state = IndexState::Closed;
    }

    pub fn flush(&mut self) -> Result<()> {
        match self.handle.as_mut() {
            Some(handle) => handle.tree.flush(),
            None => Ok(()),
        }
    }

    fn tree(&self) -> Option<&RTreeEngine<TreeStore>> {
        self.handle.as_ref().map(|h| &h.tree)
    }

    /// Number of stored entries, 0 when closed.
    pub fn len(&self) -> u64 {
        self.tree().map_or(0, RTreeEngine::entry_count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_valid(&self) -> bool {
        self.tree().is_some_and(RTreeEngine::is_valid)
    }

    pub fn id_of(&self, name: &str) -> Option<FeatureId> {
        self.ids.lookup(name)
    }

    pub fn allocation_mode(&self) -> AllocationMode {
        self.ids.mode()
    }

    /// Cached shape of `name`. Only features inserted or bulk loaded from a record
    /// source have one.
    pub fn shape(&self, name: &str) -> Option<&Shape> {
        self.shapes.get(self.ids.lookup(name)?)
    }

    /// Bounding box the tree holds for `name`.
    pub fn stored_bounds(&self, name: &str) -> Option<BoundingBox> {
        let id = self.ids.lookup(name)?;
        self.tree()?.entry(id).map(|e| e.bounds.clone())
    }

    pub fn tree_id(&self) -> Option<PageId> {
        self.tree().map(RTreeEngine::tree_id)
    }

    pub fn dimensionality(&self) -> Option<usize> {
        self.tree().map(|t| t.properties().dimensionality)
    }

    pub fn buffer_hits(&self) -> u64 {
        self.tree().map_or(0, |t| t.storage().hits())
    }

    /// Geometries issued by this index's factory and not yet released.
    pub fn live_geometries(&self) -> usize {
        self.factory.live_count()
    }

    /// Names of the features whose bounding boxes intersect `bounds`, sorted.
    pub fn query_intersecting(&self, bounds: &BoundingBox) -> Vec<String> {
        let Some(tree) = self.tree() else {
            return Vec::new();
        };
        let mut names: Vec<String> = tree.intersecting(bounds).iter().map(|e| e.name()).collect();
        names.sort();
        names
    }
}

impl Drop for ShapeIndex {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for ShapeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeIndex")
            .field("base_name", &self.base_name)
            .field("state", &self.state)
            .field("entries", &self.len())
            .field("names", &self.ids.len())
            .field("shapes", &self.shapes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemorySource;
    use tempfile::TempDir;

    fn index() -> (TempDir, ShapeIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = ShapeIndex::new(dir.path().join("idx"), IndexConfig::default()).unwrap();
        (dir, index)
    }

    #[test]
    fn test_insert_lazily_creates_tree() {
        let (_dir, mut index) = index();
        assert_eq!(index.state(), IndexState::Closed);

        let id = index
            .insert("a", &Descriptor::bbox(&[0.0, 0.0], &[1.0, 1.0]))
            .unwrap();
        assert_eq!(id, 0);
        assert_eq!(index.state(), IndexState::Open);
        assert_eq!(index.dimensionality(), Some(2));
        assert_eq!(index.allocation_mode(), AllocationMode::Incremental);
        assert_eq!(
            index.stored_bounds("a").unwrap().to_vec(),
            vec![0.0, 0.0, 1.0, 1.0]
        );
        assert!(index.shape("a").is_some());
    }

    #[test]
    fn test_insert_bad_descriptor() {
        let (_dir, mut index) = index();
        let err = index
            .insert("a", &Descriptor::term("circle", vec![Descriptor::Number(1.0)]))
            .unwrap_err();
        assert!(matches!(err, IndexError::Configuration(_)));
        assert_eq!(index.state(), IndexState::Closed);
        assert_eq!(index.live_geometries(), 0);
    }

    #[test]
    fn test_insert_beyond_tree_dimensionality_rolls_back() {
        let (_dir, mut index) = index();
        index.create(1).unwrap();
        let err = index
            .insert("a", &Descriptor::point(&[1.0, 2.0]))
            .unwrap_err();
        assert!(matches!(err, IndexError::Engine(_)));
        assert!(index.id_of("a").is_none());
        assert_eq!(index.live_geometries(), 0);
    }

    #[test]
    fn test_delete_releases_shape() {
        let (_dir, mut index) = index();
        let square = Descriptor::bbox(&[0.0, 0.0], &[1.0, 1.0]);
        index.insert("a", &square).unwrap();
        index.insert("b", &Descriptor::point(&[5.0, 5.0])).unwrap();
        assert_eq!(index.live_geometries(), 2);

        assert!(index.delete("a", &square).unwrap());
        assert_eq!(index.len(), 1);
        assert!(index.id_of("a").is_none());
        assert_eq!(index.live_geometries(), 1);
    }

    #[test]
    fn test_delete_with_wrong_region_reports_false() {
        let (_dir, mut index) = index();
        index.insert("a", &Descriptor::point(&[0.0, 0.0])).unwrap();
        assert!(!index.delete("a", &Descriptor::point(&[9.0, 9.0])).unwrap());
        assert_eq!(index.len(), 1);
        assert_eq!(index.id_of("a"), Some(0));
    }

    #[test]
    fn test_rebound_name_keeps_its_old_id_reserved() {
        let (_dir, mut index) = index();
        let first = Descriptor::point(&[1.0, 1.0]);
        let second = Descriptor::point(&[2.0, 2.0]);
        let origin = Descriptor::point(&[0.0, 0.0]);
        assert_eq!(index.insert("a", &origin).unwrap(), 0);
        assert_eq!(index.insert("b", &first).unwrap(), 1);
        assert_eq!(index.insert("b", &second).unwrap(), 2);
        assert!(index.delete("a", &origin).unwrap());
        assert!(index.delete("b", &second).unwrap());

        // the entry for the first "b" still holds id 1
        let c = index.insert("c", &Descriptor::point(&[3.0, 3.0])).unwrap();
        assert_ne!(c, 1);
        let mut ids: Vec<_> = index
            .handle
            .as_ref()
            .unwrap()
            .tree
            .entries()
            .map(|e| e.id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, c]);
        assert!(index.is_valid());
    }

    #[test]
    fn test_bulk_load_switches_to_incremental() {
        let (_dir, mut index) = index();
        let source: MemorySource = (0..20)
            .map(|i| {
                let x = i as f64;
                (format!("f{}", i), Descriptor::bbox(&[x, x], &[x + 1.0, x + 1.0]))
            })
            .collect();
        assert!(index.bulk_load(&source, 2).unwrap());
        assert_eq!(index.len(), 20);
        assert_eq!(index.id_of("f7"), Some(7));
        assert_eq!(index.allocation_mode(), AllocationMode::Incremental);

        let id = index.insert("extra", &Descriptor::point(&[0.5, 0.5])).unwrap();
        assert_eq!(id, 20);
        assert_eq!(
            index.query_intersecting(&BoundingBox::new(&[0.2, 0.2], &[0.6, 0.6]).unwrap()),
            vec!["extra".to_string(), "f0".to_string()]
        );
    }

    #[test]
    fn test_bulk_load_failure_leaves_index_closed() {
        let (_dir, mut index) = index();
        let source: MemorySource = vec![
            ("a", Descriptor::point(&[0.0, 0.0])),
            ("b", Descriptor::term("circle", vec![])),
        ]
        .into_iter()
        .collect();
        assert!(!index.bulk_load(&source, 2).unwrap());
        assert_eq!(index.state(), IndexState::Closed);
        assert!(index.id_of("a").is_none());
        assert_eq!(index.live_geometries(), 0);
    }

    #[test]
    fn test_clear_releases_everything() {
        let (_dir, mut index) = index();
        for i in 0..5 {
            index
                .insert(&format!("p{}", i), &Descriptor::point(&[i as f64, 0.0]))
                .unwrap();
        }
        index.clear();
        assert_eq!(index.state(), IndexState::Closed);
        assert_eq!(index.len(), 0);
        assert!(index.id_of("p1").is_none());
        assert_eq!(index.live_geometries(), 0);
        assert_eq!(index.allocation_mode(), AllocationMode::Uninitialized);
    }
}
