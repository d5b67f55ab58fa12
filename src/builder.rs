//! Index builder for flexible configuration
//!
//! Collects the base name and tuning parameters, then produces a closed
//! [`ShapeIndex`], or reopens one already persisted under that base name.

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::ShapeIndex;
use std::path::PathBuf;

/// Builder for [`ShapeIndex`] instances.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    base_name: Option<PathBuf>,
    config: IndexConfig,
    open_existing: bool,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage base name; files are `<base>.dat` and `<base>.idx`.
    pub fn base_name<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.base_name = Some(path.into());
        self
    }

    pub fn config(mut self, config: IndexConfig) -> Self {
        self.config = config;
        self
    }

    pub fn utilization(mut self, utilization: f64) -> Self {
        self.config = self.config.with_utilization(utilization);
        self
    }

    pub fn node_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_node_capacity(capacity);
        self
    }

    /// Reopen the index persisted under the base name instead of starting closed.
    pub fn open_existing(mut self) -> Self {
        self.open_existing = true;
        self
    }

    pub fn build(self) -> Result<ShapeIndex> {
        let base_name = self
            .base_name
            .ok_or_else(|| IndexError::Configuration("index base name not set".into()))?;
        let mut index = ShapeIndex::new(base_name, self.config)?;
        if self.open_existing {
            index.reopen()?;
        }
        Ok(index)
    }
}
