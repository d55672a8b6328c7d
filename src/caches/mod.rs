mod dir;
mod no;
mod sql;

pub use dir::*;
pub use no::*;
pub use sql::*;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache table name is empty")]
    EmptyTableName,
    #[error("invalid cache table name {0:?}, expected ascii letters, digits and underscores")]
    InvalidTableName(String),
    #[error("cache directory {path:?} is not usable: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cache operation timed out")]
    Timeout,
}
