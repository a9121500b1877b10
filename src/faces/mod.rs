pub mod clustering;
pub mod detector;
pub mod processor;
pub mod reconcile;

pub use clustering::{cluster_faces, ClusterParams, Clustering, Label};
pub use detector::OnnxExtractor;
pub use processor::{run_clustering, ClusteringReport};

use crate::error::ExtractError;

/// Turns encoded image bytes into one embedding per detected face.
///
/// Implementations are called concurrently from the ingestion workers.
/// An image with no faces yields an empty list.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Vec<Vec<f32>>, ExtractError>;
}

impl<F> FeatureExtractor for F
where
    F: Fn(&[u8]) -> Result<Vec<Vec<f32>>, ExtractError> + Send + Sync,
{
    fn extract(&self, image: &[u8]) -> Result<Vec<Vec<f32>>, ExtractError> {
        self(image)
    }
}
