//! Compute layer: geometry construction, descriptor interpretation and the R*-tree engine.
//!
//! - [`geometry`]: explicit geometry factory and owned [`geometry::Shape`] wrappers
//! - [`interpret`]: turns a [`shapeindex_types::descriptor::Descriptor`] into a shape
//! - [`spatial`]: the persistent R*-tree engine

pub mod geometry;
pub mod interpret;
pub mod spatial;
