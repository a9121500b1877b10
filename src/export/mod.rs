use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::db::{Catalog, ClusterId, NOISE_CLUSTER_ID};

pub const MANIFEST_FILE: &str = "clusters.json";

/// One cluster folder in the export manifest
#[derive(Debug, Serialize)]
pub struct ExportedCluster {
    pub cluster_id: ClusterId,
    pub folder: String,
    pub files: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub clusters: usize,
    pub copied: usize,
    /// Destination already present from an earlier export.
    pub skipped: usize,
    pub failed: usize,
}

fn folder_name(cluster_id: ClusterId) -> String {
    if cluster_id == NOISE_CLUSTER_ID {
        "noise".to_string()
    } else {
        format!("cluster_{}", cluster_id)
    }
}

/// Copy every clustered item into `out_dir/cluster_<id>/`, one folder per
/// cluster, and write a JSON manifest. An item with faces in several
/// clusters is copied into each. Unclustered embeddings are ignored.
pub fn export_clusters(catalog: &Catalog, out_dir: &Path, include_noise: bool) -> Result<ExportSummary> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create export directory {}", out_dir.display()))?;

    let mut cluster_ids: Vec<ClusterId> = catalog
        .cluster_summary()?
        .into_iter()
        .filter_map(|c| c.cluster_id)
        .filter(|id| include_noise || *id != NOISE_CLUSTER_ID)
        .collect();
    cluster_ids.sort_unstable();

    let mut summary = ExportSummary::default();
    let mut manifest = Vec::with_capacity(cluster_ids.len());

    for cluster_id in cluster_ids {
        let folder = folder_name(cluster_id);
        let cluster_dir = out_dir.join(&folder);
        std::fs::create_dir_all(&cluster_dir)?;

        let mut files = Vec::new();
        for source in catalog.cluster_members(cluster_id)? {
            let source = PathBuf::from(source);
            let dest = cluster_dir.join(destination_name(&source));

            if dest.exists() {
                summary.skipped += 1;
            } else if let Err(e) = std::fs::copy(&source, &dest) {
                warn!(source = %source.display(), error = %e, "Failed to copy");
                summary.failed += 1;
                continue;
            } else {
                summary.copied += 1;
            }
            files.push(dest.to_string_lossy().into_owned());
        }

        summary.clusters += 1;
        manifest.push(ExportedCluster {
            cluster_id,
            folder,
            files,
        });
    }

    let manifest_path = out_dir.join(MANIFEST_FILE);
    let mut file = File::create(&manifest_path)?;
    file.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

    info!(
        clusters = summary.clusters,
        copied = summary.copied,
        skipped = summary.skipped,
        failed = summary.failed,
        "Export complete"
    );
    Ok(summary)
}

/// File name prefixed with a short hash of the full source path, so
/// same-named files from different directories stay distinct.
fn destination_name(source: &Path) -> String {
    let digest = format!("{:x}", Sha256::digest(source.to_string_lossy().as_bytes()));
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}_{}", &digest[..8], name)
}
