//! Embedding snapshot reads and cluster id writes.

use rusqlite::params;

use super::{Catalog, CatalogResult, ClusterId, EmbeddingId, ItemId};
use crate::error::CatalogError;

/// Embedding record from the database
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub id: EmbeddingId,
    pub item_id: ItemId,
    pub vector: Vec<f32>,
    pub cluster_id: Option<ClusterId>,
}

impl Catalog {
    /// Point-in-time snapshot of every embedding, ordered by id.
    pub fn all_embeddings(&self) -> CatalogResult<Vec<EmbeddingRecord>> {
        let mut conn = self.conn();
        // A read transaction pins one consistent view for the whole scan
        let tx = conn.transaction()?;
        let records = {
            let mut stmt = tx.prepare(
                "SELECT id, item_id, vector, cluster_id FROM embeddings ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok(EmbeddingRecord {
                    id: row.get(0)?,
                    item_id: row.get(1)?,
                    vector: bytes_to_embedding(&bytes),
                    cluster_id: row.get(3)?,
                })
            })?;
            let records: Vec<EmbeddingRecord> = rows.collect::<rusqlite::Result<_>>()?;
            records
        };
        tx.commit()?;
        Ok(records)
    }

    /// Assign a cluster id to one embedding. Re-applying the same id is a no-op.
    pub fn set_cluster_id(&self, embedding_id: EmbeddingId, cluster_id: ClusterId) -> CatalogResult<()> {
        let updated = self.conn().execute(
            "UPDATE embeddings SET cluster_id = ? WHERE id = ?",
            params![cluster_id, embedding_id],
        )?;
        if updated == 0 {
            return Err(CatalogError::NotFound(embedding_id));
        }
        Ok(())
    }

    /// Apply a batch of assignments in a single transaction.
    ///
    /// A missing embedding id aborts the whole batch; nothing is written.
    pub fn set_cluster_ids(&self, assignments: &[(EmbeddingId, ClusterId)]) -> CatalogResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE embeddings SET cluster_id = ? WHERE id = ?")?;
            for &(embedding_id, cluster_id) in assignments {
                if stmt.execute(params![cluster_id, embedding_id])? == 0 {
                    return Err(CatalogError::NotFound(embedding_id));
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn embedding_count(&self) -> CatalogResult<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Convert f32 slice to little-endian bytes for storage
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to f32 vector
pub(crate) fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
