//! Incremental face ingestion and clustering for photo collections.
//!
//! Walk an image tree, extract one embedding per detected face into a
//! SQLite catalog, then group the embeddings into clusters of likely
//! identical people with stable cluster ids across runs.

pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod faces;
pub mod logging;
pub mod scanner;
