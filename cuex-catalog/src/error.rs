use cuex_core::{Classify, ErrorKind, SequenceError, TestCondition};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("order file: {0}")]
    Csv(#[from] csv::Error),

    #[error("order spreadsheet: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("unsupported order file {0}")]
    UnsupportedFormat(PathBuf),

    #[error("manual order for {test} names images that do not exist: {}", missing.join(", "))]
    MissingImages {
        test: TestCondition,
        missing: Vec<String>,
    },

    #[error("order file {0} lists no images")]
    EmptyOrder(PathBuf),

    #[error("bay {bay} for {name:?} is outside 0..{max}")]
    BayOutOfRange { name: String, bay: u8, max: u8 },

    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

impl Classify for CatalogError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::AssetError
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;
