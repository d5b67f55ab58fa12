//! Page storage abstraction for the shape index.
//!
//! The tree engine persists itself as variable-length byte arrays ("pages")
//! addressed by [`PageId`]. A [`PageStore`] hands out ids for new pages and reads,
//! overwrites and deletes existing ones. Implementations:
//!
//! - [`DiskStorage`]: fixed-size physical pages in `<base>.dat`, page table in `<base>.idx`
//! - [`RandomEvictionBuffer`]: in-memory buffer with random eviction over another store
//! - [`MemoryStorage`]: plain in-memory map, used for tests and scratch trees

mod buffer;
mod disk;

pub use buffer::RandomEvictionBuffer;
pub use disk::DiskStorage;

use crate::error::{IndexError, Result};
use bytes::Bytes;
use std::collections::BTreeMap;

pub type PageId = u64;

/// Trait for page storage implementations.
pub trait PageStore {
    /// Read the full contents of a page.
    fn load(&mut self, page: PageId) -> Result<Bytes>;

    /// Write a page. `None` allocates a new page; `Some(id)` overwrites an existing one.
    fn store(&mut self, page: Option<PageId>, data: &[u8]) -> Result<PageId>;

    /// Delete a page and release its space.
    fn delete(&mut self, page: PageId) -> Result<()>;

    /// Push pending writes to the underlying medium.
    fn flush(&mut self) -> Result<()>;

    fn stats(&self) -> StorageStats;
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of live pages
    pub page_count: usize,
    /// Pages read from the backing medium
    pub reads: u64,
    /// Pages written to the backing medium
    pub writes: u64,
    /// Loads served from a buffer without touching the backing medium
    pub hits: u64,
}

pub(crate) fn missing_page(page: PageId) -> IndexError {
    IndexError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("page {} does not exist", page),
    ))
}

/// In-memory page store
#[derive(Debug, Default)]
pub struct MemoryStorage {
    pages: BTreeMap<PageId, Bytes>,
    next_page: PageId,
    stats: StorageStats,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for MemoryStorage {
    fn load(&mut self, page: PageId) -> Result<Bytes> {
        let data = self.pages.get(&page).cloned().ok_or_else(|| missing_page(page))?;
        self.stats.reads += 1;
        Ok(data)
    }

    fn store(&mut self, page: Option<PageId>, data: &[u8]) -> Result<PageId> {
        let id = match page {
            Some(id) if self.pages.contains_key(&id) => id,
            Some(id) => return Err(missing_page(id)),
            None => {
                let id = self.next_page;
                self.next_page += 1;
                id
            }
        };
        self.pages.insert(id, Bytes::copy_from_slice(data));
        self.stats.writes += 1;
        Ok(id)
    }

    fn delete(&mut self, page: PageId) -> Result<()> {
        self.pages.remove(&page).ok_or_else(|| missing_page(page))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> StorageStats {
        StorageStats {
            page_count: self.pages.len(),
            ..self.stats.clone()
        }
    }
}
