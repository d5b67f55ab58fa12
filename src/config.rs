//! Index configuration.
//!
//! Tree shape (fill factor, node capacity) and the storage/buffer parameters used by
//! the two construction paths. The streaming bulk-load path uses a small page size and
//! a tiny write-through buffer; create and file loads use standard pages.

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    /// Target fill fraction of tree nodes, in (0, 1]
    #[serde(default = "IndexConfig::default_utilization")]
    pub utilization: f64,

    /// Maximum entries per leaf and per index node
    #[serde(default = "IndexConfig::default_node_capacity")]
    pub node_capacity: usize,

    /// Page size for create / load-from-file storage
    #[serde(default = "IndexConfig::default_page_size")]
    pub page_size: usize,

    /// Page size for the streaming bulk-load path
    #[serde(default = "IndexConfig::default_bulk_page_size")]
    pub bulk_page_size: usize,

    /// Buffer capacity (in pages) for create / load-from-file
    #[serde(default = "IndexConfig::default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Buffer capacity (in pages) for the streaming bulk-load path
    #[serde(default = "IndexConfig::default_bulk_buffer_capacity")]
    pub bulk_buffer_capacity: usize,

    #[serde(default)]
    pub write_through: bool,

    #[serde(default = "IndexConfig::default_bulk_write_through")]
    pub bulk_write_through: bool,
}

impl IndexConfig {
    const fn default_utilization() -> f64 {
        0.7
    }

    const fn default_node_capacity() -> usize {
        4
    }

    const fn default_page_size() -> usize {
        4096
    }

    const fn default_bulk_page_size() -> usize {
        32
    }

    const fn default_buffer_capacity() -> usize {
        10
    }

    const fn default_bulk_buffer_capacity() -> usize {
        4
    }

    const fn default_bulk_write_through() -> bool {
        true
    }

    pub fn with_utilization(mut self, utilization: f64) -> Self {
        self.utilization = utilization;
        self
    }

    pub fn with_node_capacity(mut self, capacity: usize) -> Self {
        self.node_capacity = capacity;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_write_through(mut self, write_through: bool) -> Self {
        self.write_through = write_through;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.utilization > 0.0 && self.utilization <= 1.0) {
            return Err(IndexError::Configuration(format!(
                "utilization must be in (0, 1], got {}",
                self.utilization
            )));
        }
        if self.node_capacity < 2 {
            return Err(IndexError::Configuration(format!(
                "node capacity must be at least 2, got {}",
                self.node_capacity
            )));
        }
        if self.page_size == 0 || self.bulk_page_size == 0 {
            return Err(IndexError::Configuration(
                "page sizes must be greater than zero".into(),
            ));
        }
        if self.buffer_capacity == 0 || self.bulk_buffer_capacity == 0 {
            return Err(IndexError::Configuration(
                "buffer capacities must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML configuration.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| IndexError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            utilization: Self::default_utilization(),
            node_capacity: Self::default_node_capacity(),
            page_size: Self::default_page_size(),
            bulk_page_size: Self::default_bulk_page_size(),
            buffer_capacity: Self::default_buffer_capacity(),
            bulk_buffer_capacity: Self::default_bulk_buffer_capacity(),
            write_through: false,
            bulk_write_through: Self::default_bulk_write_through(),
        }
    }
}
