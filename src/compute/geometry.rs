//! Geometry construction context.
//!
//! A [`GeometryFactory`] builds points, linear rings and polygons on top of the `geo`
//! crate and keeps track of every geometry it has issued. Geometries are released only
//! through [`GeometryFactory::destroy`]; the owning [`Shape`] wrapper hands its geometry
//! back in two steps (`detach`, then `destroy`) so a release can never bypass the
//! factory or happen twice.

use geo::orient::{Direction, Orient};
use geo::{BoundingRect, Coord, LineString, Polygon};
use rustc_hash::FxHashSet;
use shapeindex_types::bbox::{BoundingBox, BoundsError};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Coordinate tuple of 1 to 3 values.
pub type Coordinate = SmallVec<[f64; 3]>;

pub type GeometryHandle = u64;

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("{0} dimensional coordinates are not supported")]
    UnsupportedDimension(usize),
    #[error("geometry has no coordinates")]
    Empty,
    #[error(transparent)]
    Bounds(#[from] BoundsError),
}

/// Geometry payload.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryKind {
    Point(Coordinate),
    Polygon {
        polygon: Polygon<f64>,
        /// Coordinate dimension of the rings (1, 2 or 3)
        dimension: usize,
        /// z extent when the rings carry a third coordinate
        z_range: Option<(f64, f64)>,
    },
}

/// A geometry issued by a [`GeometryFactory`]. Not `Clone`: exactly one owner exists.
#[derive(Debug, PartialEq)]
pub struct Geometry {
    factory: u64,
    handle: GeometryHandle,
    kind: GeometryKind,
}

impl Geometry {
    pub fn handle(&self) -> GeometryHandle {
        self.handle
    }

    pub fn kind(&self) -> &GeometryKind {
        &self.kind
    }

    pub fn dimension(&self) -> usize {
        match &self.kind {
            GeometryKind::Point(coords) => coords.len(),
            GeometryKind::Polygon { dimension, .. } => *dimension,
        }
    }

    pub fn as_polygon(&self) -> Option<&Polygon<f64>> {
        match &self.kind {
            GeometryKind::Polygon { polygon, .. } => Some(polygon),
            GeometryKind::Point(_) => None,
        }
    }
}

/// A ring under construction, not yet owned by any polygon. It may still be open.
#[derive(Debug, Clone)]
pub struct LinearRing {
    line: LineString<f64>,
    dimension: usize,
    z_range: Option<(f64, f64)>,
}

impl LinearRing {
    pub fn len(&self) -> usize {
        self.line.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.0.is_empty()
    }
}

/// Explicit construction context. Each index owns one; factories never share state.
#[derive(Debug)]
pub struct GeometryFactory {
    id: u64,
    next_handle: GeometryHandle,
    live: FxHashSet<GeometryHandle>,
}

impl GeometryFactory {
    pub fn new() -> Self {
        Self {
            id: NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed),
            next_handle: 0,
            live: FxHashSet::default(),
        }
    }

    fn issue(&mut self, kind: GeometryKind) -> Geometry {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.live.insert(handle);
        Geometry {
            factory: self.id,
            handle,
            kind,
        }
    }

    /// Build a point of any dimension.
    pub fn point(&mut self, coords: &[f64]) -> Geometry {
        self.issue(GeometryKind::Point(coords.iter().copied().collect()))
    }

    /// Build a linear ring from the vertices as given. An open ring is closed later,
    /// when [`GeometryFactory::polygon`] takes it.
    ///
    /// 1-D coordinates map to `(x, 0)`, 3-D coordinates keep their z extent alongside
    /// the planar ring.
    pub fn linear_ring(&self, coords: &[Coordinate]) -> Result<LinearRing, GeometryError> {
        let mut points = Vec::with_capacity(coords.len());
        let mut dimension = 0;
        let mut z_range: Option<(f64, f64)> = None;

        for coord in coords {
            let c = match coord.as_slice() {
                [x] => Coord { x: *x, y: 0.0 },
                [x, y] => Coord { x: *x, y: *y },
                [x, y, z] => {
                    z_range = Some(match z_range {
                        Some((lo, hi)) => (lo.min(*z), hi.max(*z)),
                        None => (*z, *z),
                    });
                    Coord { x: *x, y: *y }
                }
                other => return Err(GeometryError::UnsupportedDimension(other.len())),
            };
            dimension = dimension.max(coord.len());
            points.push(c);
        }

        Ok(LinearRing {
            line: LineString::new(points),
            dimension,
            z_range,
        })
    }

    /// Build a polygon from a shell and holes, then normalize ring orientation
    /// (shell clockwise, holes counter-clockwise).
    ///
    /// Open rings get a closing vertex equal to their first one; closed rings are kept.
    pub fn polygon(
        &mut self,
        shell: LinearRing,
        holes: Vec<LinearRing>,
    ) -> Result<Geometry, GeometryError> {
        if shell.is_empty() {
            return Err(GeometryError::Empty);
        }

        let dimension = holes
            .iter()
            .map(|h| h.dimension)
            .fold(shell.dimension, usize::max);
        let z_range = holes
            .iter()
            .filter_map(|h| h.z_range)
            .fold(shell.z_range, |acc, (lo, hi)| match acc {
                Some((a, b)) => Some((a.min(lo), b.max(hi))),
                None => Some((lo, hi)),
            });

        let polygon = Polygon::new(shell.line, holes.into_iter().map(|h| h.line).collect())
            .orient(Direction::Reversed);

        Ok(self.issue(GeometryKind::Polygon {
            polygon,
            dimension,
            z_range,
        }))
    }

    /// Axis-aligned bounding box of a geometry, in the geometry's own dimension.
    pub fn bounding_box(&self, geometry: &Geometry) -> Result<BoundingBox, GeometryError> {
        match &geometry.kind {
            GeometryKind::Point(coords) => Ok(BoundingBox::from_point(coords)?),
            GeometryKind::Polygon {
                polygon,
                dimension,
                z_range,
            } => {
                let rect = polygon.bounding_rect().ok_or(GeometryError::Empty)?;
                let (min, max) = (rect.min(), rect.max());
                let bbox = match (dimension, z_range) {
                    (1, _) => BoundingBox::new(&[min.x], &[max.x])?,
                    (3, Some((lo, hi))) => {
                        BoundingBox::new(&[min.x, min.y, *lo], &[max.x, max.y, *hi])?
                    }
                    _ => BoundingBox::new(&[min.x, min.y], &[max.x, max.y])?,
                };
                Ok(bbox)
            }
        }
    }

    /// Release a geometry issued by this factory.
    pub fn destroy(&mut self, geometry: Geometry) {
        if geometry.factory != self.id {
            log::error!(
                "geometry #{} belongs to factory {}, not {}; leaking it",
                geometry.handle,
                geometry.factory,
                self.id
            );
            return;
        }
        if !self.live.remove(&geometry.handle) {
            log::warn!("geometry #{} released twice", geometry.handle);
        }
    }

    /// Number of geometries issued and not yet destroyed.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl Default for GeometryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GeometryFactory {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            log::debug!(
                "geometry factory {} dropped with {} live geometries",
                self.id,
                self.live.len()
            );
        }
    }
}

/// Owning wrapper around an interpreted geometry and its bounding box.
#[derive(Debug)]
pub struct Shape {
    geometry: Option<Geometry>,
    bounds: BoundingBox,
}

impl Shape {
    pub fn new(geometry: Geometry, bounds: BoundingBox) -> Self {
        Self {
            geometry: Some(geometry),
            bounds,
        }
    }

    /// `None` once the geometry has been detached.
    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    pub fn dimension(&self) -> usize {
        self.geometry
            .as_ref()
            .map_or(self.bounds.dimension(), Geometry::dimension)
    }

    /// First release phase: take the factory-issued geometry out of the wrapper.
    pub fn detach(&mut self) -> Option<Geometry> {
        self.geometry.take()
    }

    /// Detach the geometry and destroy it through its owning factory.
    pub fn release(mut self, factory: &mut GeometryFactory) {
        if let Some(geometry) = self.detach() {
            factory.destroy(geometry);
        }
    }
}

impl Drop for Shape {
    fn drop(&mut self) {
        if let Some(geometry) = &self.geometry {
            log::warn!(
                "shape geometry #{} dropped without being released through its factory",
                geometry.handle
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn square() -> Vec<Coordinate> {
        vec![
            smallvec![0.0, 0.0],
            smallvec![0.0, 1.0],
            smallvec![1.0, 1.0],
            smallvec![1.0, 0.0],
            smallvec![0.0, 0.0],
        ]
    }

    #[test]
    fn test_point_bounds() {
        let mut factory = GeometryFactory::new();
        let point = factory.point(&[2.0, 3.0, 4.0]);
        assert_eq!(point.dimension(), 3);
        let bbox = factory.bounding_box(&point).unwrap();
        assert_eq!(bbox.to_vec(), vec![2.0, 3.0, 4.0, 2.0, 3.0, 4.0]);
        factory.destroy(point);
        assert_eq!(factory.live_count(), 0);
    }

    #[test]
    fn test_polygon_orientation_is_normalized() {
        let mut factory = GeometryFactory::new();
        let shell = factory.linear_ring(&square()).unwrap();
        let polygon = factory.polygon(shell, vec![]).unwrap();
        let exterior = polygon.as_polygon().unwrap().exterior();
        assert!(exterior.is_closed());
        // shell comes out clockwise
        let area: f64 = exterior
            .lines()
            .map(|l| l.start.x * l.end.y - l.end.x * l.start.y)
            .sum();
        assert!(area < 0.0);
        factory.destroy(polygon);
    }

    #[test]
    fn test_open_shell_is_closed_by_polygon() {
        let mut factory = GeometryFactory::new();
        let coords = square();
        let shell = factory.linear_ring(&coords[..4]).unwrap();
        assert_eq!(shell.len(), 4);

        let polygon = factory.polygon(shell, vec![]).unwrap();
        let exterior = polygon.as_polygon().unwrap().exterior();
        assert_eq!(exterior.0.len(), 5);
        assert_eq!(exterior.0.first(), exterior.0.last());
        let bbox = factory.bounding_box(&polygon).unwrap();
        assert_eq!(bbox.to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
        factory.destroy(polygon);
    }

    #[test]
    fn test_three_dimensional_ring_bounds() {
        let mut factory = GeometryFactory::new();
        let coords: Vec<Coordinate> = vec![
            smallvec![0.0, 0.0, 5.0],
            smallvec![0.0, 1.0, 7.0],
            smallvec![1.0, 1.0, 6.0],
            smallvec![0.0, 0.0, 5.0],
        ];
        let shell = factory.linear_ring(&coords).unwrap();
        let polygon = factory.polygon(shell, vec![]).unwrap();
        assert_eq!(polygon.dimension(), 3);
        let bbox = factory.bounding_box(&polygon).unwrap();
        assert_eq!(bbox.to_vec(), vec![0.0, 0.0, 5.0, 1.0, 1.0, 7.0]);
        factory.destroy(polygon);
    }

    #[test]
    fn test_ring_rejects_four_dimensions() {
        let factory = GeometryFactory::new();
        let coords: Vec<Coordinate> = vec![smallvec![0.0, 0.0, 0.0, 0.0]];
        assert_eq!(
            factory.linear_ring(&coords).unwrap_err(),
            GeometryError::UnsupportedDimension(4)
        );
    }

    #[test]
    fn test_empty_shell_rejected() {
        let mut factory = GeometryFactory::new();
        let shell = factory.linear_ring(&[]).unwrap();
        assert_eq!(
            factory.polygon(shell, vec![]).unwrap_err(),
            GeometryError::Empty
        );
        assert_eq!(factory.live_count(), 0);
    }

    #[test]
    fn test_shape_release_routes_through_factory() {
        let mut factory = GeometryFactory::new();
        let point = factory.point(&[1.0, 1.0]);
        let bbox = factory.bounding_box(&point).unwrap();
        let shape = Shape::new(point, bbox);
        assert_eq!(factory.live_count(), 1);
        shape.release(&mut factory);
        assert_eq!(factory.live_count(), 0);
    }

    #[test]
    fn test_foreign_geometry_is_not_released() {
        let mut a = GeometryFactory::new();
        let mut b = GeometryFactory::new();
        let point = a.point(&[0.0]);
        b.destroy(point);
        assert_eq!(a.live_count(), 1);
        assert_eq!(b.live_count(), 0);
    }
}
