//! Paged on-disk storage.
//!
//! Logical pages are split across fixed-size physical pages in `<base>.dat`. The page
//! table mapping logical pages to physical ones, plus the free list, lives in
//! `<base>.idx` and is rewritten on every flush.

use super::{PageId, PageStore, StorageStats, missing_page};
use crate::error::{IndexError, Result};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PageEntry {
    length: usize,
    physical: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PageTable {
    page_size: usize,
    next_page: PageId,
    next_physical: u64,
    free: Vec<u64>,
    pages: BTreeMap<PageId, PageEntry>,
}

pub struct DiskStorage {
    data: File,
    index_path: PathBuf,
    table: PageTable,
    dirty: bool,
    stats: StorageStats,
}

/// `<base>.<ext>`, keeping any dots already in the base name.
pub(crate) fn sibling(base: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

impl DiskStorage {
    /// Create fresh storage files, truncating any existing ones.
    pub fn create<P: AsRef<Path>>(base: P, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(IndexError::Configuration(
                "page size must be greater than zero".into(),
            ));
        }
        let base = base.as_ref();
        let data_path = sibling(base, "dat");
        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&data_path)
            .map_err(|e| IndexError::resource(&data_path, e))?;

        let mut storage = Self {
            data,
            index_path: sibling(base, "idx"),
            table: PageTable {
                page_size,
                next_page: 0,
                next_physical: 0,
                free: Vec::new(),
                pages: BTreeMap::new(),
            },
            dirty: true,
            stats: StorageStats::default(),
        };
        storage.write_table()?;
        Ok(storage)
    }

    /// Open storage files written by an earlier [`DiskStorage`].
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref();
        let index_path = sibling(base, "idx");
        let data_path = sibling(base, "dat");

        let mut raw = Vec::new();
        File::open(&index_path)
            .and_then(|mut f| f.read_to_end(&mut raw))
            .map_err(|e| IndexError::resource(&index_path, e))?;
        let table: PageTable = bincode::deserialize(&raw)?;

        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&data_path)
            .map_err(|e| IndexError::resource(&data_path, e))?;

        Ok(Self {
            data,
            index_path,
            table,
            dirty: false,
            stats: StorageStats::default(),
        })
    }

    pub fn page_size(&self) -> usize {
        self.table.page_size
    }

    fn allocate_physical(&mut self) -> u64 {
        self.table.free.pop().unwrap_or_else(|| {
            let page = self.table.next_physical;
            self.table.next_physical += 1;
            page
        })
    }

    fn offset(&self, physical: u64) -> u64 {
        physical * self.table.page_size as u64
    }

    fn write_chunks(&mut self, data: &[u8], physical: &[u64]) -> Result<()> {
        for (chunk, slot) in data.chunks(self.table.page_size).zip(physical) {
            self.data.seek(SeekFrom::Start(self.offset(*slot)))?;
            self.data.write_all(chunk)?;
            self.stats.writes += 1;
        }
        Ok(())
    }

    fn write_table(&mut self) -> Result<()> {
        let encoded = bincode::serialize(&self.table)?;
        let mut file = File::create(&self.index_path)
            .map_err(|e| IndexError::resource(&self.index_path, e))?;
        file.write_all(&encoded)?;
        file.sync_data()?;
        self.dirty = false;
        Ok(())
    }
}

impl PageStore for DiskStorage {
    fn load(&mut self, page: PageId) -> Result<Bytes> {
        let entry = self
            .table
            .pages
            .get(&page)
            .cloned()
            .ok_or_else(|| missing_page(page))?;

        let page_size = self.table.page_size;
        let mut buf = BytesMut::zeroed(entry.length);
        for (i, physical) in entry.physical.iter().enumerate() {
            let start = i * page_size;
            let end = (start + page_size).min(entry.length);
            self.data.seek(SeekFrom::Start(self.offset(*physical)))?;
            self.data.read_exact(&mut buf[start..end])?;
            self.stats.reads += 1;
        }
        Ok(buf.freeze())
    }

    /// Chunks go to freshly allocated physical pages. The page table only switches to
    /// them once every write succeeded, so a failed store leaves the old contents.
    fn store(&mut self, page: Option<PageId>, data: &[u8]) -> Result<PageId> {
        if let Some(id) = page
            && !self.table.pages.contains_key(&id)
        {
            return Err(missing_page(id));
        }

        let needed = data.len().div_ceil(self.table.page_size);
        let physical: Vec<u64> = (0..needed).map(|_| self.allocate_physical()).collect();
        if let Err(err) = self.write_chunks(data, &physical) {
            self.table.free.extend(physical);
            return Err(err);
        }

        let id = page.unwrap_or_else(|| {
            let id = self.table.next_page;
            self.table.next_page += 1;
            id
        });
        let entry = PageEntry {
            length: data.len(),
            physical,
        };
        if let Some(old) = self.table.pages.insert(id, entry) {
            self.table.free.extend(old.physical);
        }
        self.dirty = true;
        Ok(id)
    }

    fn delete(&mut self, page: PageId) -> Result<()> {
        let entry = self
            .table
            .pages
            .remove(&page)
            .ok_or_else(|| missing_page(page))?;
        self.table.free.extend(entry.physical);
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.data.sync_data()?;
        if self.dirty {
            self.write_table()?;
        }
        Ok(())
    }

    fn stats(&self) -> StorageStats {
        StorageStats {
            page_count: self.table.pages.len(),
            ..self.stats.clone()
        }
    }
}

impl Drop for DiskStorage {
    fn drop(&mut self) {
        if self.dirty
            && let Err(err) = self.write_table()
        {
            log::error!(
                "failed to write page table {}: {}",
                self.index_path.display(),
                err
            );
        }
    }
}
