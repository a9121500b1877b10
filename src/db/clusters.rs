//! Cluster-level views over the embedding table.

use super::{Catalog, CatalogResult, ClusterId};

/// Per-cluster counts. `cluster_id == None` groups unprocessed embeddings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSummary {
    pub cluster_id: Option<ClusterId>,
    pub embeddings: i64,
    pub items: i64,
}

impl Catalog {
    /// Face and item counts per cluster, largest first.
    pub fn cluster_summary(&self) -> CatalogResult<Vec<ClusterSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT cluster_id, COUNT(*) AS faces, COUNT(DISTINCT item_id) AS items
            FROM embeddings
            GROUP BY cluster_id
            ORDER BY faces DESC, cluster_id ASC
            "#,
        )?;
        let summary = stmt
            .query_map([], |row| {
                Ok(ClusterSummary {
                    cluster_id: row.get(0)?,
                    embeddings: row.get(1)?,
                    items: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(summary)
    }

    /// Distinct item paths with at least one face in the cluster.
    pub fn cluster_members(&self, cluster_id: ClusterId) -> CatalogResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT i.path
            FROM embeddings e
            JOIN items i ON i.id = e.item_id
            WHERE e.cluster_id = ?
            ORDER BY i.path
            "#,
        )?;
        let paths = stmt
            .query_map([cluster_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Forget every cluster assignment. The next clustering run mints fresh ids.
    pub fn reset_clusters(&self) -> CatalogResult<usize> {
        let cleared = self.conn().execute(
            "UPDATE embeddings SET cluster_id = NULL WHERE cluster_id IS NOT NULL",
            [],
        )?;
        Ok(cleared)
    }
}
