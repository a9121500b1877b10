use tracing::{debug, info};

use super::clustering::{cluster_with_index, BruteForceIndex, ClusterParams};
use super::reconcile::reconcile;
use crate::cancel::CancelToken;
use crate::db::{Catalog, ClusterId, EmbeddingId};
use crate::error::ClusterError;

/// Assignments written per transaction. A crash mid-persist leaves earlier
/// batches committed and the next run picks up from there.
const PERSIST_BATCH: usize = 1000;

/// Outcome of one clustering run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusteringReport {
    pub embeddings: usize,
    pub clusters: usize,
    pub noise: usize,
    /// Clusters that kept their previous id.
    pub adopted: usize,
    /// Clusters that received a new id.
    pub minted: usize,
    /// Embeddings whose stored cluster id was written.
    pub changed: usize,
}

/// Cluster every cataloged embedding and persist the reconciled ids.
///
/// Works on a snapshot taken at the start; embeddings committed while the
/// run is in progress are left for the next run. Cancellation is honored up
/// to the point where assignments start being written.
pub fn run_clustering(
    catalog: &Catalog,
    params: &ClusterParams,
    cancel: &CancelToken,
) -> Result<ClusteringReport, ClusterError> {
    params.validate()?;

    let snapshot = catalog.all_embeddings()?;
    info!(embeddings = snapshot.len(), eps = params.eps, min_neighbors = params.min_neighbors, "Clustering faces");

    if cancel.is_cancelled() {
        return Err(ClusterError::Cancelled);
    }

    let index = BruteForceIndex::new(snapshot.iter().map(|r| r.vector.as_slice()));
    let clustering = cluster_with_index(&index, params);
    drop(index);

    let previous: Vec<Option<ClusterId>> = snapshot.iter().map(|r| r.cluster_id).collect();
    let reconciled = reconcile(&previous, &clustering);

    let changes: Vec<(EmbeddingId, ClusterId)> = snapshot
        .iter()
        .zip(&reconciled.cluster_ids)
        .filter(|(record, id)| record.cluster_id != Some(**id))
        .map(|(record, id)| (record.id, *id))
        .collect();

    if cancel.is_cancelled() {
        info!("Clustering cancelled before persisting");
        return Err(ClusterError::Cancelled);
    }

    for batch in changes.chunks(PERSIST_BATCH) {
        catalog.set_cluster_ids(batch)?;
        debug!(written = batch.len(), "Persisted cluster assignments");
    }

    let report = ClusteringReport {
        embeddings: snapshot.len(),
        clusters: clustering.cluster_count,
        noise: clustering.noise_count(),
        adopted: reconciled.adopted,
        minted: reconciled.minted,
        changed: changes.len(),
    };

    info!(
        clusters = report.clusters,
        noise = report.noise,
        adopted = report.adopted,
        minted = report.minted,
        changed = report.changed,
        "Clustering complete"
    );

    Ok(report)
}
