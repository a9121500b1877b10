//! Item records and atomic item + embedding insertion.

use rusqlite::{params, OptionalExtension};

use super::embeddings::embedding_to_bytes;
use super::{is_unique_violation, Catalog, CatalogResult, ItemId};
use crate::error::CatalogError;

/// An item about to be cataloged.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub path: String,
    pub captured_at: Option<String>,
    pub added_at: String,
    pub metadata: Option<String>,
}

impl NewItem {
    /// New item stamped with the current time as its ingestion timestamp.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            captured_at: None,
            added_at: chrono::Utc::now().to_rfc3339(),
            metadata: None,
        }
    }

    pub fn with_captured_at(mut self, captured_at: Option<String>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A cataloged item
#[derive(Debug, Clone)]
pub struct Item {
    pub id: ItemId,
    pub path: String,
    pub captured_at: Option<String>,
    pub added_at: String,
    pub metadata: Option<String>,
}

impl Catalog {
    /// True iff an item with this path already has a record.
    pub fn has(&self, path: &str) -> CatalogResult<bool> {
        let found = self
            .conn()
            .query_row("SELECT 1 FROM items WHERE path = ?", [path], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert an item and all of its embeddings in one transaction.
    ///
    /// Fails with `DuplicateItem` if the path is already cataloged; in that
    /// case nothing is written.
    pub fn put(&self, item: &NewItem, embeddings: &[Vec<f32>]) -> CatalogResult<ItemId> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO items (path, captured_at, added_at, metadata) VALUES (?, ?, ?, ?)",
            params![item.path, item.captured_at, item.added_at, item.metadata],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(CatalogError::DuplicateItem(item.path.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        let item_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO embeddings (item_id, vector, dim, cluster_id) VALUES (?, ?, ?, NULL)",
            )?;
            for embedding in embeddings {
                stmt.execute(params![
                    item_id,
                    embedding_to_bytes(embedding),
                    embedding.len() as i64
                ])?;
            }
        }

        tx.commit()?;
        Ok(item_id)
    }

    pub fn get_item(&self, path: &str) -> CatalogResult<Option<Item>> {
        let item = self
            .conn()
            .query_row(
                "SELECT id, path, captured_at, added_at, metadata FROM items WHERE path = ?",
                [path],
                |row| {
                    Ok(Item {
                        id: row.get(0)?,
                        path: row.get(1)?,
                        captured_at: row.get(2)?,
                        added_at: row.get(3)?,
                        metadata: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(item)
    }

    pub fn item_count(&self) -> CatalogResult<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count)
    }
}
