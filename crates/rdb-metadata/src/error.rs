use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("class `{0}` not found")]
    ClassNotFound(String),
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse `{path}`: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("method {name}{descriptor}: local variable slots must be dense from 0, found {found:?}")]
    InvalidSlots {
        name: String,
        descriptor: String,
        found: Vec<u32>,
    },
    #[error("class `{class}` declares method {name}{descriptor} more than once")]
    DuplicateMethod {
        class: String,
        name: String,
        descriptor: String,
    },
}
