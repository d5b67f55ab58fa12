//! Error types for the shape index.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Unsupported dimensionality, malformed descriptor, invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An input file is missing or cannot be read.
    #[error("cannot open {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A streamed record is malformed or is not an insertion.
    #[error("format error: {0}")]
    Format(String),

    /// Delete requested for a name the index does not know.
    #[error("lookup error: {0}")]
    Lookup(String),

    /// The tree engine rejected an operation or reported an invalid structure.
    #[error("engine error: {0}")]
    Engine(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

impl IndexError {
    pub(crate) fn resource(path: impl Into<PathBuf>, source: io::Error) -> Self {
        IndexError::Resource {
            path: path.into(),
            source,
        }
    }
}
