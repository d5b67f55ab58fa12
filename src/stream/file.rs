//! Line-oriented bulk-load file stream.
//!
//! One record per line, whitespace separated:
//!
//! ```text
//! <op> <id> <low_x> <low_y> <high_x> <high_y> <name>
//! ```
//!
//! `op` must be the insert code `1`. The stream always holds the next parsed record so
//! that `has_next` never touches the file.

use super::{Lookahead, RecordStream, StreamRecord};
use crate::error::{IndexError, Result};
use shapeindex_types::bbox::BoundingBox;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const INSERT: u32 = 1;
const FIELDS: usize = 7;

pub struct FileStream {
    path: PathBuf,
    reader: BufReader<File>,
    line_number: usize,
    next: Lookahead<StreamRecord>,
    count: usize,
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream")
            .field("path", &self.path)
            .field("line_number", &self.line_number)
            .field("count", &self.count)
            .finish()
    }
}

impl FileStream {
    /// Open `path` and read its first record.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| IndexError::resource(&path, e))?;
        let mut stream = Self {
            path,
            reader: BufReader::new(file),
            line_number: 0,
            next: Lookahead::new(),
            count: 0,
        };
        stream.advance()?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn advance(&mut self) -> Result<()> {
        let record = self.read_record()?;
        if record.is_some() {
            self.count += 1;
        }
        self.next.replace(record);
        Ok(())
    }

    fn read_record(&mut self) -> Result<Option<StreamRecord>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            if !line.trim().is_empty() {
                break;
            }
        }
        let record = parse_line(&line).map_err(|msg| {
            IndexError::Format(format!(
                "{}:{}: {}",
                self.path.display(),
                self.line_number,
                msg
            ))
        })?;
        log::debug!("read {} as id {}", record.name(), record.id);
        Ok(Some(record))
    }
}

fn parse_line(line: &str) -> std::result::Result<StreamRecord, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != FIELDS {
        return Err(format!("expected {} fields, found {}", FIELDS, fields.len()));
    }

    let op: u32 = fields[0]
        .parse()
        .map_err(|_| format!("bad operation code {:?}", fields[0]))?;
    if op != INSERT {
        return Err("the data input should contain insertions only".into());
    }
    let id = fields[1]
        .parse()
        .map_err(|_| format!("bad id {:?}", fields[1]))?;

    let mut coords = [0.0; 4];
    for (slot, field) in coords.iter_mut().zip(&fields[2..6]) {
        *slot = field
            .parse()
            .map_err(|_| format!("bad coordinate {:?}", field))?;
    }
    let bounds = BoundingBox::new(&coords[..2], &coords[2..]).map_err(|e| e.to_string())?;

    Ok(StreamRecord::new(fields[6], bounds, id))
}

impl RecordStream for FileStream {
    fn has_next(&mut self) -> Result<bool> {
        Ok(self.next.is_pending())
    }

    fn next_record(&mut self) -> Result<Option<StreamRecord>> {
        let Some(record) = self.next.take(|| Ok(None))? else {
            log::debug!("read {} entries from {}", self.count, self.path.display());
            return Ok(None);
        };
        self.advance()?;
        Ok(Some(record))
    }

    fn rewind(&mut self) -> Result<()> {
        self.next.replace(None);
        self.reader.seek(SeekFrom::Start(0))?;
        self.line_number = 0;
        self.count = 0;
        self.advance()
    }
}
