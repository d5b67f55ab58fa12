//! Random-eviction page buffer.
//!
//! Keeps up to `capacity` pages in memory on top of another [`PageStore`]. When the
//! buffer is full a victim is chosen uniformly at random. In write-through mode every
//! store goes straight to the inner store; otherwise overwrites are kept dirty in memory
//! and written back on eviction, flush or drop.

use super::{PageId, PageStore, StorageStats};
use crate::error::Result;
use bytes::Bytes;
use rand::Rng;
use rustc_hash::FxHashMap;

struct BufferedPage {
    data: Bytes,
    dirty: bool,
}

pub struct RandomEvictionBuffer<S: PageStore> {
    inner: S,
    capacity: usize,
    write_through: bool,
    pages: FxHashMap<PageId, BufferedPage>,
    hits: u64,
}

impl<S: PageStore> RandomEvictionBuffer<S> {
    pub fn new(inner: S, capacity: usize, write_through: bool) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            write_through,
            pages: FxHashMap::default(),
            hits: 0,
        }
    }

    /// Loads answered from the buffer.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn buffered(&self) -> usize {
        self.pages.len()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn evict_if_full(&mut self) -> Result<()> {
        while self.pages.len() >= self.capacity {
            let index = rand::thread_rng().gen_range(0..self.pages.len());
            let Some(victim) = self.pages.keys().nth(index).copied() else {
                break;
            };
            if let Some(page) = self.pages.remove(&victim)
                && page.dirty
            {
                self.inner.store(Some(victim), &page.data)?;
            }
        }
        Ok(())
    }

    fn cache(&mut self, page: PageId, data: Bytes, dirty: bool) -> Result<()> {
        if !self.pages.contains_key(&page) {
            self.evict_if_full()?;
        }
        self.pages.insert(page, BufferedPage { data, dirty });
        Ok(())
    }
}

impl<S: PageStore> PageStore for RandomEvictionBuffer<S> {
    fn load(&mut self, page: PageId) -> Result<Bytes> {
        if let Some(buffered) = self.pages.get(&page) {
            self.hits += 1;
            return Ok(buffered.data.clone());
        }
        let data = self.inner.load(page)?;
        self.cache(page, data.clone(), false)?;
        Ok(data)
    }

    fn store(&mut self, page: Option<PageId>, data: &[u8]) -> Result<PageId> {
        let bytes = Bytes::copy_from_slice(data);
        match page {
            // new pages always reach the inner store so it can assign the id
            None => {
                let id = self.inner.store(None, data)?;
                self.cache(id, bytes, false)?;
                Ok(id)
            }
            Some(id) if self.write_through => {
                self.inner.store(Some(id), data)?;
                self.cache(id, bytes, false)?;
                Ok(id)
            }
            Some(id) => {
                self.cache(id, bytes, true)?;
                Ok(id)
            }
        }
    }

    fn delete(&mut self, page: PageId) -> Result<()> {
        self.pages.remove(&page);
        self.inner.delete(page)
    }

    fn flush(&mut self) -> Result<()> {
        let mut dirty: Vec<PageId> = self
            .pages
            .iter()
            .filter(|(_, p)| p.dirty)
            .map(|(id, _)| *id)
            .collect();
        dirty.sort_unstable();
        for id in dirty {
            if let Some(page) = self.pages.get_mut(&id) {
                self.inner.store(Some(id), &page.data)?;
                page.dirty = false;
            }
        }
        self.inner.flush()
    }

    fn stats(&self) -> StorageStats {
        StorageStats {
            hits: self.hits,
            ..self.inner.stats()
        }
    }
}

impl<S: PageStore> Drop for RandomEvictionBuffer<S> {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::error!("failed to flush page buffer: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_hits_are_counted() {
        let mut buffer = RandomEvictionBuffer::new(MemoryStorage::new(), 4, false);
        let page = buffer.store(None, b"data").unwrap();
        assert_eq!(buffer.load(page).unwrap().as_ref(), b"data");
        assert_eq!(buffer.load(page).unwrap().as_ref(), b"data");
        assert_eq!(buffer.hits(), 2);
        assert_eq!(buffer.inner().stats().reads, 0);
    }

    #[test]
    fn test_capacity_is_respected() {
        let mut buffer = RandomEvictionBuffer::new(MemoryStorage::new(), 3, false);
        let pages: Vec<_> = (0..10u8)
            .map(|i| buffer.store(None, &[i]).unwrap())
            .collect();
        assert!(buffer.buffered() <= 3);
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(buffer.load(*page).unwrap().as_ref(), &[i as u8]);
        }
        assert!(buffer.buffered() <= 3);
    }

    #[test]
    fn test_dirty_pages_survive_eviction() {
        let mut buffer = RandomEvictionBuffer::new(MemoryStorage::new(), 2, false);
        let pages: Vec<_> = (0..6u8)
            .map(|i| buffer.store(None, &[i]).unwrap())
            .collect();
        for page in &pages {
            buffer.store(Some(*page), b"updated").unwrap();
        }
        for page in &pages {
            assert_eq!(buffer.load(*page).unwrap().as_ref(), b"updated");
        }
    }

    #[test]
    fn test_write_through_reaches_inner_store() {
        let mut buffer = RandomEvictionBuffer::new(MemoryStorage::new(), 4, true);
        let page = buffer.store(None, b"a").unwrap();
        buffer.store(Some(page), b"b").unwrap();
        assert_eq!(buffer.inner().stats().writes, 2);

        let mut lazy = RandomEvictionBuffer::new(MemoryStorage::new(), 4, false);
        let page = lazy.store(None, b"a").unwrap();
        lazy.store(Some(page), b"b").unwrap();
        assert_eq!(lazy.inner().stats().writes, 1);
        lazy.flush().unwrap();
        assert_eq!(lazy.inner().stats().writes, 2);
    }
}
