//! Shape descriptor interpretation.
//!
//! Turns a generic [`Descriptor`] term into a factory-issued geometry plus its bounding
//! box. Three shape tags are understood:
//!
//! - `point(C1, ..., Cn)`
//! - `polygon([Shell, Hole1, ...])`, every ring a closed list of 1-3D points
//! - `box(point(..), point(..))`, 1-D or 2-D
//!
//! Interpretation is all-or-nothing: a single bad ring vertex fails the whole shape.

use super::geometry::{Coordinate, Geometry, GeometryError, GeometryFactory, LinearRing, Shape};
use shapeindex_types::descriptor::Descriptor;
use smallvec::smallvec;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Point,
    Polygon,
    Box,
}

impl ShapeKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "point" => Some(ShapeKind::Point),
            "polygon" => Some(ShapeKind::Polygon),
            "box" => Some(ShapeKind::Box),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error("shape type \"{0}\" unsupported")]
    UnsupportedShape(String),
    #[error("malformed shape: {0}")]
    Malformed(String),
    #[error("{0} dimensional points not supported")]
    UnsupportedDimension(usize),
    #[error("3d box regions not implemented")]
    ThreeDimensionalBox,
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Interpret a descriptor, logging and returning `None` on failure.
pub fn interpret(factory: &mut GeometryFactory, descriptor: &Descriptor) -> Option<Shape> {
    match try_interpret(factory, descriptor) {
        Ok(shape) => Some(shape),
        Err(err) => {
            log::warn!("could not interpret shape {}: {}", descriptor, err);
            None
        }
    }
}

pub fn try_interpret(
    factory: &mut GeometryFactory,
    descriptor: &Descriptor,
) -> Result<Shape, ShapeError> {
    let tag = descriptor
        .tag()
        .ok_or_else(|| ShapeError::UnsupportedShape(descriptor.to_string()))?;
    let kind =
        ShapeKind::from_tag(tag).ok_or_else(|| ShapeError::UnsupportedShape(tag.to_string()))?;

    let geometry = match kind {
        ShapeKind::Point => {
            let coords = coordinates(descriptor)?;
            factory.point(&coords)
        }
        ShapeKind::Polygon => polygon(factory, descriptor)?,
        ShapeKind::Box => bbox(factory, descriptor)?,
    };

    match factory.bounding_box(&geometry) {
        Ok(bounds) => {
            log::debug!("interpreted {} with bounds {:?}", tag, bounds.to_vec());
            Ok(Shape::new(geometry, bounds))
        }
        Err(err) => {
            factory.destroy(geometry);
            Err(err.into())
        }
    }
}

/// Numeric arguments of a `point(...)` term.
fn coordinates(point: &Descriptor) -> Result<Coordinate, ShapeError> {
    point
        .args()
        .iter()
        .map(|arg| {
            arg.as_number()
                .ok_or_else(|| ShapeError::Malformed(format!("non-numeric coordinate {}", arg)))
        })
        .collect()
}

/// A ring vertex: a `point` term of dimension 1, 2 or 3.
fn ring_vertex(vertex: &Descriptor, ring: &str) -> Result<Coordinate, ShapeError> {
    if vertex.tag() != Some("point") {
        return Err(ShapeError::Malformed(format!(
            "polygon {} contains non-point {}",
            ring, vertex
        )));
    }
    let coords = coordinates(vertex)?;
    if !(1..=3).contains(&coords.len()) {
        return Err(ShapeError::UnsupportedDimension(coords.len()));
    }
    Ok(coords)
}

fn ring(
    factory: &GeometryFactory,
    vertices: &Descriptor,
    name: &str,
) -> Result<LinearRing, ShapeError> {
    let vertices = vertices
        .as_list()
        .ok_or_else(|| ShapeError::Malformed(format!("polygon {} is not a list", name)))?;
    let coords = vertices
        .iter()
        .map(|v| ring_vertex(v, name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(factory.linear_ring(&coords)?)
}

fn polygon(
    factory: &mut GeometryFactory,
    descriptor: &Descriptor,
) -> Result<Geometry, ShapeError> {
    const USAGE: &str = "polygon takes one argument, a list whose first element is the \
                         shell ring and whose remaining elements are hole rings";

    if descriptor.arity() != 1 {
        return Err(ShapeError::Malformed(format!(
            "arity {}: {}",
            descriptor.arity(),
            USAGE
        )));
    }
    let rings = descriptor.args()[0]
        .as_list()
        .ok_or_else(|| ShapeError::Malformed(format!("first argument not a list: {}", USAGE)))?;
    let (shell, holes) = rings
        .split_first()
        .ok_or_else(|| ShapeError::Malformed(format!("no shell ring: {}", USAGE)))?;

    let shell = ring(factory, shell, "shell")?;
    let holes = holes
        .iter()
        .map(|hole| ring(factory, hole, "hole"))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(factory.polygon(shell, holes)?)
}

fn bbox(
    factory: &mut GeometryFactory,
    descriptor: &Descriptor,
) -> Result<Geometry, ShapeError> {
    if descriptor.arity() != 2 {
        return Err(ShapeError::Malformed(format!(
            "box needs a low and a high point, got {} arguments",
            descriptor.arity()
        )));
    }

    let corners = descriptor
        .args()
        .iter()
        .map(|corner| {
            if corner.tag() != Some("point") {
                return Err(ShapeError::Malformed(format!(
                    "box corner {} is not a point",
                    corner
                )));
            }
            coordinates(corner)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let (low, high) = (&corners[0], &corners[1]);

    if low.len() != high.len() {
        return Err(ShapeError::Malformed(format!(
            "box corners differ in dimension ({} vs {})",
            low.len(),
            high.len()
        )));
    }

    let ring: Vec<Coordinate> = match low.len() {
        2 => vec![
            smallvec![low[0], low[1]],
            smallvec![low[0], high[1]],
            smallvec![high[0], high[1]],
            smallvec![high[0], low[1]],
            smallvec![low[0], low[1]],
        ],
        1 => vec![smallvec![low[0]], smallvec![high[0]]],
        3 => return Err(ShapeError::ThreeDimensionalBox),
        dim => return Err(ShapeError::UnsupportedDimension(dim)),
    };

    let shell = factory.linear_ring(&ring)?;
    Ok(factory.polygon(shell, Vec::new())?)
}
