//! Persistent, disk-backed R*-tree index over named points, polygons and boxes.
//!
//! Features come in as generic shape [`Descriptor`]s, are interpreted into geometries
//! with bounding boxes, and are indexed either in one pass from a [`RecordSource`] or
//! a bulk-load file, or one at a time.
//!
//! ```rust,no_run
//! use shapeindex::prelude::*;
//!
//! let mut index = IndexBuilder::new().base_name("/tmp/cities").build()?;
//! index.insert("paris", &Descriptor::point(&[2.35, 48.85]))?;
//! index.insert("park", &"box(point(0,0),point(1,1))".parse::<Descriptor>()?)?;
//!
//! let hits = index.query_intersecting(&BoundingBox::new(&[0.0, 0.0], &[3.0, 50.0])?);
//! assert_eq!(hits, vec!["paris", "park"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod compute;
pub mod config;
pub mod error;
pub mod index;
pub mod storage;
pub mod stream;

pub use builder::IndexBuilder;
pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use index::{IndexState, ShapeIndex};

pub use compute::geometry::{GeometryFactory, Shape};
pub use compute::interpret::{ShapeError, interpret};
pub use compute::spatial::{FeatureId, RTreeEngine, TreeProperties};

pub use storage::{DiskStorage, MemoryStorage, PageStore, RandomEvictionBuffer, StorageStats};

pub use stream::{
    FileStream, JsonLinesSource, MemorySource, RecordQuery, RecordSource, RecordStream,
    StreamRecord,
};

pub use shapeindex_types::bbox::BoundingBox;
pub use shapeindex_types::descriptor::{Descriptor, ParseError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {
    pub use crate::{IndexBuilder, IndexConfig, IndexError, Result, ShapeIndex};

    pub use crate::{BoundingBox, Descriptor};

    pub use crate::{JsonLinesSource, MemorySource, RecordSource};
}
