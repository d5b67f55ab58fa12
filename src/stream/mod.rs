//! Record streams feeding the tree engine's bulk load.
//!
//! A [`RecordStream`] yields [`StreamRecord`]s one at a time. Two adapters exist:
//! [`SourceStream`] drives a [`RecordSource`] query through the descriptor interpreter,
//! and [`FileStream`] parses the line-oriented bulk-load file format.

mod file;
mod source;

pub use file::FileStream;
pub use source::{JsonLinesSource, MemorySource, RecordQuery, RecordSource, SourceStream};

use crate::compute::spatial::FeatureId;
use crate::error::{IndexError, Result};
use bytes::Bytes;
use shapeindex_types::bbox::BoundingBox;

/// Unit consumed by the bulk-load algorithm. The payload is the feature name.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub payload: Bytes,
    pub bounds: BoundingBox,
    pub id: FeatureId,
}

impl StreamRecord {
    pub fn new(name: &str, bounds: BoundingBox, id: FeatureId) -> Self {
        Self {
            payload: Bytes::copy_from_slice(name.as_bytes()),
            bounds,
            id,
        }
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

pub trait RecordStream {
    fn has_next(&mut self) -> Result<bool>;

    /// Next record, or `None` once the stream is exhausted.
    fn next_record(&mut self) -> Result<Option<StreamRecord>>;

    fn rewind(&mut self) -> Result<()>;

    /// Total number of records, when known ahead of time.
    fn size(&self) -> Result<usize> {
        Err(IndexError::Unsupported("stream size"))
    }
}

/// Single-slot look-ahead buffer.
///
/// `fill` pulls one item ahead into the `pending` slot; `take` hands out the pending
/// item if present and only pulls otherwise, so nothing is consumed twice.
#[derive(Debug)]
pub struct Lookahead<T> {
    pending: Option<T>,
}

impl<T> Default for Lookahead<T> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<T> Lookahead<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn fill<F>(&mut self, pull: F) -> Result<bool>
    where
        F: FnOnce() -> Result<Option<T>>,
    {
        if self.pending.is_none() {
            self.pending = pull()?;
        }
        Ok(self.pending.is_some())
    }

    pub fn take<F>(&mut self, pull: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Result<Option<T>>,
    {
        match self.pending.take() {
            Some(item) => Ok(Some(item)),
            None => pull(),
        }
    }

    /// Replace the pending slot, returning whatever was buffered.
    pub fn replace(&mut self, item: Option<T>) -> Option<T> {
        std::mem::replace(&mut self.pending, item)
    }
}

/// Stream over records already held in memory. Supports rewind and size.
#[derive(Debug, Clone, Default)]
pub struct VecStream {
    records: Vec<StreamRecord>,
    position: usize,
}

impl VecStream {
    pub fn new(records: Vec<StreamRecord>) -> Self {
        Self {
            records,
            position: 0,
        }
    }
}

impl RecordStream for VecStream {
    fn has_next(&mut self) -> Result<bool> {
        Ok(self.position < self.records.len())
    }

    fn next_record(&mut self) -> Result<Option<StreamRecord>> {
        let record = self.records.get(self.position).cloned();
        if record.is_some() {
            self.position += 1;
        }
        Ok(record)
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn size(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}
