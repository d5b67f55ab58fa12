//! Owned geometries keyed by feature id.

use crate::compute::geometry::{GeometryFactory, Shape};
use crate::compute::spatial::FeatureId;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct ShapeCache {
    shapes: FxHashMap<FeatureId, Shape>,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `shape`. The shape previously stored under `id`, if any, is
    /// handed back so the caller can release it.
    pub fn store(&mut self, id: FeatureId, shape: Shape) -> Option<Shape> {
        self.shapes.insert(id, shape)
    }

    pub fn get(&self, id: FeatureId) -> Option<&Shape> {
        self.shapes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Release the shape stored under `id` through `factory`.
    pub fn release(&mut self, id: FeatureId, factory: &mut GeometryFactory) -> bool {
        match self.shapes.remove(&id) {
            Some(shape) => {
                shape.release(factory);
                true
            }
            None => false,
        }
    }

    /// Release every shape: detach the geometry, destroy it through the factory, then
    /// drop the emptied wrapper.
    pub fn clear(&mut self, factory: &mut GeometryFactory) {
        for (_, mut shape) in self.shapes.drain() {
            if let Some(geometry) = shape.detach() {
                factory.destroy(geometry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapeindex_types::bbox::BoundingBox;

    fn point(factory: &mut GeometryFactory, x: f64) -> Shape {
        let geometry = factory.point(&[x, x]);
        Shape::new(geometry, BoundingBox::from_point(&[x, x]).unwrap())
    }

    #[test]
    fn test_store_returns_previous_owner() {
        let mut factory = GeometryFactory::new();
        let mut cache = ShapeCache::new();
        assert!(cache.store(1, point(&mut factory, 1.0)).is_none());
        let old = cache.store(1, point(&mut factory, 2.0)).unwrap();
        assert_eq!(old.bounds().low(), &[1.0, 1.0]);
        old.release(&mut factory);
        assert_eq!(cache.get(1).unwrap().bounds().low(), &[2.0, 2.0]);
        assert_eq!(factory.live_count(), 1);
        cache.clear(&mut factory);
    }

    #[test]
    fn test_clear_releases_through_factory() {
        let mut factory = GeometryFactory::new();
        let mut cache = ShapeCache::new();
        for id in 0..5 {
            cache.store(id, point(&mut factory, id as f64));
        }
        assert_eq!(factory.live_count(), 5);

        assert!(cache.release(3, &mut factory));
        assert!(!cache.release(3, &mut factory));
        assert_eq!(factory.live_count(), 4);

        cache.clear(&mut factory);
        assert!(cache.is_empty());
        assert_eq!(factory.live_count(), 0);
    }
}
