//! Error types shared by the catalog, the extractors and the clustering run.
//!
//! Per-item failures (`ExtractError`, `CatalogError::DuplicateItem`) are
//! recovered inside the ingestion walker; everything else is fatal to the
//! operation that raised it.

use std::path::PathBuf;
use thiserror::Error;

use crate::db::EmbeddingId;
use crate::scanner::IngestSummary;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog: item already cataloged: {0}")]
    DuplicateItem(String),

    #[error("catalog: embedding {0} not found")]
    NotFound(EmbeddingId),

    #[error("catalog: store unavailable at {path}: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("catalog: sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("catalog: io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extract: unreadable image: {0}")]
    UnreadableImage(String),

    #[error("extract: model error: {0}")]
    Model(String),
}

impl From<image::ImageError> for ExtractError {
    fn from(e: image::ImageError) -> Self {
        ExtractError::UnreadableImage(e.to_string())
    }
}

impl From<ort::Error> for ExtractError {
    fn from(e: ort::Error) -> Self {
        ExtractError::Model(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("cluster: invalid parameters: {0}")]
    InvalidParams(String),

    #[error("cluster: cancelled before persisting")]
    Cancelled,

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("ingest: cannot read root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ingest: failed to start worker pool: {0}")]
    Pool(String),

    /// The catalog failed mid-run. `summary` counts what was committed
    /// before dispatch stopped.
    #[error("ingest: stopped: {source}")]
    Catalog {
        #[source]
        source: CatalogError,
        summary: Box<IngestSummary>,
    },
}

impl IngestError {
    /// Counters for the work done before the run failed, if any was.
    pub fn partial_summary(&self) -> Option<&IngestSummary> {
        match self {
            IngestError::Catalog { summary, .. } => Some(summary.as_ref()),
            _ => None,
        }
    }
}
