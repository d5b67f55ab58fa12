pub mod rtree;
pub use rtree::{FeatureId, IndexEntry, RTreeEngine, TreeProperties, TreeVariant};
