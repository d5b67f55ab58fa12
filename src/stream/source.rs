//! Record sources and the stream that turns their solutions into index records.

use super::{Lookahead, RecordStream, StreamRecord};
use crate::compute::geometry::GeometryFactory;
use crate::compute::interpret::interpret;
use crate::error::{IndexError, Result};
use crate::index::{IdRegistry, ShapeCache};
use serde::Deserialize;
use shapeindex_types::descriptor::Descriptor;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// A live, pull-based query. Resources are released when the query is dropped.
pub trait RecordQuery {
    /// Next `(name, descriptor)` solution, `None` once the query is exhausted.
    fn next_solution(&mut self) -> Result<Option<(String, Descriptor)>>;
}

/// Provider of `(name, descriptor)` pairs.
pub trait RecordSource {
    type Query: RecordQuery;

    fn open_query(&self) -> Result<Self::Query>;
}

/// Pairs held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<(String, Descriptor)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, shape: Descriptor) {
        self.records.push((name.into(), shape));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Descriptor)> for MemorySource {
    fn from_iter<I: IntoIterator<Item = (S, Descriptor)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().map(|(n, d)| (n.into(), d)).collect(),
        }
    }
}

pub struct MemoryQuery {
    records: std::vec::IntoIter<(String, Descriptor)>,
}

impl RecordQuery for MemoryQuery {
    fn next_solution(&mut self) -> Result<Option<(String, Descriptor)>> {
        Ok(self.records.next())
    }
}

impl RecordSource for MemorySource {
    type Query = MemoryQuery;

    fn open_query(&self) -> Result<MemoryQuery> {
        Ok(MemoryQuery {
            records: self.records.clone().into_iter(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct JsonRecord {
    name: String,
    shape: Descriptor,
}

/// A file of JSON objects, one per line: `{"name": "...", "shape": <descriptor>}`.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
}

impl JsonLinesSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

pub struct JsonLinesQuery {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    line_number: usize,
}

impl RecordQuery for JsonLinesQuery {
    fn next_solution(&mut self) -> Result<Option<(String, Descriptor)>> {
        for line in self.lines.by_ref() {
            let line = line?;
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record: JsonRecord = serde_json::from_str(&line).map_err(|e| {
                IndexError::Format(format!(
                    "{}:{}: {}",
                    self.path.display(),
                    self.line_number,
                    e
                ))
            })?;
            return Ok(Some((record.name, record.shape)));
        }
        Ok(None)
    }
}

impl RecordSource for JsonLinesSource {
    type Query = JsonLinesQuery;

    fn open_query(&self) -> Result<JsonLinesQuery> {
        let file = File::open(&self.path).map_err(|e| IndexError::resource(&self.path, e))?;
        Ok(JsonLinesQuery {
            path: self.path.clone(),
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }
}

/// Bulk-load stream over a record source query.
///
/// Every record is interpreted, given an id by the registry and its shape handed to the
/// cache before the record is yielded. The query cannot be replayed, so `rewind` only
/// logs a warning.
pub struct SourceStream<'a, Q: RecordQuery> {
    query: Q,
    next: Lookahead<(String, Descriptor)>,
    factory: &'a mut GeometryFactory,
    ids: &'a mut IdRegistry,
    shapes: &'a mut ShapeCache,
}

impl<'a, Q: RecordQuery> SourceStream<'a, Q> {
    /// Open a query on `source` and switch the registry to bulk allocation.
    pub fn new<R>(
        source: &R,
        factory: &'a mut GeometryFactory,
        ids: &'a mut IdRegistry,
        shapes: &'a mut ShapeCache,
    ) -> Result<Self>
    where
        R: RecordSource<Query = Q>,
    {
        let query = source.open_query()?;
        Ok(Self::from_query(query, factory, ids, shapes))
    }

    /// Wrap an already opened query and switch the registry to bulk allocation.
    pub fn from_query(
        query: Q,
        factory: &'a mut GeometryFactory,
        ids: &'a mut IdRegistry,
        shapes: &'a mut ShapeCache,
    ) -> Self {
        ids.begin_bulk();
        Self {
            query,
            next: Lookahead::new(),
            factory,
            ids,
            shapes,
        }
    }
}

impl<Q: RecordQuery> RecordStream for SourceStream<'_, Q> {
    fn has_next(&mut self) -> Result<bool> {
        let query = &mut self.query;
        self.next.fill(|| query.next_solution())
    }

    fn next_record(&mut self) -> Result<Option<StreamRecord>> {
        let query = &mut self.query;
        let Some((name, descriptor)) = self.next.take(|| query.next_solution())? else {
            return Ok(None);
        };

        let shape = interpret(self.factory, &descriptor).ok_or_else(|| {
            IndexError::Configuration(format!("could not interpret shape of {}", name))
        })?;
        let id = match self.ids.lookup(&name) {
            Some(id) => id,
            None => self.ids.allocate(&name, None, |_| false)?,
        };
        let bounds = shape.bounds().clone();
        log::debug!("{} shape {:?} id {}", name, bounds.to_vec(), id);

        if let Some(displaced) = self.shapes.store(id, shape) {
            displaced.release(self.factory);
        }
        Ok(Some(StreamRecord::new(&name, bounds, id)))
    }

    fn rewind(&mut self) -> Result<()> {
        log::warn!("rewinding a record source stream does nothing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn drain<S: RecordStream>(stream: &mut S) -> Vec<StreamRecord> {
        let mut out = Vec::new();
        while stream.has_next().unwrap() {
            out.push(stream.next_record().unwrap().unwrap());
        }
        out
    }

    #[test]
    fn test_source_stream_allocates_and_caches() {
        let source: MemorySource = vec![
            ("a", Descriptor::bbox(&[0.0, 0.0], &[1.0, 1.0])),
            ("b", Descriptor::point(&[2.0, 3.0])),
            ("a", Descriptor::bbox(&[0.0, 0.0], &[2.0, 2.0])),
        ]
        .into_iter()
        .collect();

        let mut factory = GeometryFactory::new();
        let mut ids = IdRegistry::new();
        let mut shapes = ShapeCache::new();
        let records = {
            let mut stream =
                SourceStream::new(&source, &mut factory, &mut ids, &mut shapes).unwrap();
            let records = drain(&mut stream);
            stream.rewind().unwrap();
            assert!(stream.size().is_err());
            records
        };

        let ids_seen: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids_seen, vec![0, 1, 0]);
        assert_eq!(records[1].bounds.to_vec(), vec![2.0, 3.0, 2.0, 3.0]);
        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes.get(0).unwrap().bounds().high(), &[2.0, 2.0]);
        assert_eq!(factory.live_count(), 2);
        shapes.clear(&mut factory);
        assert_eq!(factory.live_count(), 0);
    }

    #[test]
    fn test_bad_descriptor_fails_record() {
        let source: MemorySource = vec![("bad", Descriptor::term("circle", vec![]))]
            .into_iter()
            .collect();
        let mut factory = GeometryFactory::new();
        let mut ids = IdRegistry::new();
        let mut shapes = ShapeCache::new();
        let mut stream = SourceStream::new(&source, &mut factory, &mut ids, &mut shapes).unwrap();
        assert!(stream.has_next().unwrap());
        assert!(matches!(
            stream.next_record(),
            Err(IndexError::Configuration(_))
        ));
    }

    #[test]
    fn test_json_lines_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"name": "a", "shape": {{"tag": "point", "args": [1.0, 2.0]}}}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"name": "b", "shape": {{"tag": "box", "args": [{{"tag": "point", "args": [0, 0]}}, {{"tag": "point", "args": [1, 1]}}]}}}}"#
        )
        .unwrap();
        file.flush().unwrap();

        let source = JsonLinesSource::new(file.path());
        let mut query = source.open_query().unwrap();
        let (name, shape) = query.next_solution().unwrap().unwrap();
        assert_eq!(name, "a");
        assert_eq!(shape, Descriptor::point(&[1.0, 2.0]));
        let (name, shape) = query.next_solution().unwrap().unwrap();
        assert_eq!(name, "b");
        assert_eq!(shape.tag(), Some("box"));
        assert!(query.next_solution().unwrap().is_none());
    }

    #[test]
    fn test_json_lines_missing_file() {
        let source = JsonLinesSource::new("/nonexistent/shapes.jsonl");
        assert!(matches!(
            source.open_query(),
            Err(IndexError::Resource { .. })
        ));
    }
}
