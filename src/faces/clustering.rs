//! Density-based face clustering.
//!
//! Embeddings are normalized to unit length and compared by Euclidean
//! distance. A point whose `eps`-neighborhood (inclusive, counting itself)
//! holds at least `min_neighbors` points seeds a cluster, which then grows
//! breadth-first through every reachable dense point. Points reached only
//! from the edge of a cluster join it without expanding it further. Points
//! never reached are noise.
//!
//! Neighbor search goes through [`NeighborIndex`] so the all-pairs scan in
//! [`BruteForceIndex`] can be swapped for a spatial index without touching
//! the membership logic.

use std::collections::VecDeque;

use crate::error::ClusterError;

/// Clustering parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    /// Maximum distance between neighbors (inclusive).
    pub eps: f32,
    /// Minimum neighborhood size, including the point itself, to seed a cluster.
    pub min_neighbors: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            eps: 0.5,
            min_neighbors: 2,
        }
    }
}

impl ClusterParams {
    pub fn validate(&self) -> Result<(), ClusterError> {
        if !self.eps.is_finite() || self.eps < 0.0 {
            return Err(ClusterError::InvalidParams(format!(
                "eps must be a finite non-negative number, got {}",
                self.eps
            )));
        }
        if self.min_neighbors == 0 {
            return Err(ClusterError::InvalidParams(
                "min_neighbors must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Label of one input point after clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Noise,
    /// Cluster index, assigned in first-seen order starting at 0.
    Cluster(usize),
}

/// Result of a clustering pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clustering {
    /// One label per input point, in input order.
    pub labels: Vec<Label>,
    pub cluster_count: usize,
}

impl Clustering {
    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| **l == Label::Noise).count()
    }

    /// Member indices per cluster, each sorted ascending.
    pub fn partition(&self) -> Vec<Vec<usize>> {
        let mut clusters = vec![Vec::new(); self.cluster_count];
        for (idx, label) in self.labels.iter().enumerate() {
            if let Label::Cluster(c) = label {
                clusters[*c].push(idx);
            }
        }
        clusters
    }
}

/// Neighbor lookup over a fixed point set.
pub trait NeighborIndex {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices of every point within `eps` of point `idx` (inclusive),
    /// including `idx` itself.
    fn neighbors(&self, idx: usize, eps: f32) -> Vec<usize>;
}

/// All-pairs O(n²) neighbor search over unit-normalized vectors.
pub struct BruteForceIndex {
    vectors: Vec<Vec<f32>>,
}

impl BruteForceIndex {
    pub fn new<'a>(vectors: impl IntoIterator<Item = &'a [f32]>) -> Self {
        Self {
            vectors: vectors.into_iter().map(normalize).collect(),
        }
    }
}

impl NeighborIndex for BruteForceIndex {
    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn neighbors(&self, idx: usize, eps: f32) -> Vec<usize> {
        let point = &self.vectors[idx];
        self.vectors
            .iter()
            .enumerate()
            .filter(|(j, other)| *j == idx || euclidean_distance(point, other) <= eps)
            .map(|(j, _)| j)
            .collect()
    }
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let magnitude = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / magnitude).collect()
}

/// Euclidean distance. Vectors of different dimension are infinitely far apart.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Cluster raw embeddings with the brute-force index.
pub fn cluster_faces(vectors: &[Vec<f32>], params: &ClusterParams) -> Result<Clustering, ClusterError> {
    params.validate()?;
    let index = BruteForceIndex::new(vectors.iter().map(Vec::as_slice));
    Ok(cluster_with_index(&index, params))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointState {
    Unvisited,
    Noise,
    Member(usize),
}

/// Membership pass over any neighbor index. Deterministic for a given index
/// and parameters: points are seeded in index order and expanded FIFO.
pub fn cluster_with_index<I: NeighborIndex + ?Sized>(index: &I, params: &ClusterParams) -> Clustering {
    let n = index.len();
    let mut state = vec![PointState::Unvisited; n];
    let mut cluster_count = 0;
    let mut queue = VecDeque::new();

    for seed in 0..n {
        if state[seed] != PointState::Unvisited {
            continue;
        }

        let neighborhood = index.neighbors(seed, params.eps);
        if neighborhood.len() < params.min_neighbors {
            // Provisional: a later dense neighbor may still absorb it
            state[seed] = PointState::Noise;
            continue;
        }

        let cluster = cluster_count;
        cluster_count += 1;
        state[seed] = PointState::Member(cluster);
        claim(&mut state, &mut queue, &neighborhood, cluster);

        while let Some(point) = queue.pop_front() {
            let neighborhood = index.neighbors(point, params.eps);
            if neighborhood.len() >= params.min_neighbors {
                claim(&mut state, &mut queue, &neighborhood, cluster);
            }
        }
    }

    let labels = state
        .into_iter()
        .map(|s| match s {
            PointState::Member(c) => Label::Cluster(c),
            // Every point is visited by the seed loop
            PointState::Noise | PointState::Unvisited => Label::Noise,
        })
        .collect();

    Clustering {
        labels,
        cluster_count,
    }
}

/// Pull a neighborhood into `cluster`. Unvisited points are queued for
/// expansion; noise points were already found sparse, so they join as
/// border points without being expanded.
fn claim(state: &mut [PointState], queue: &mut VecDeque<usize>, neighborhood: &[usize], cluster: usize) {
    for &idx in neighborhood {
        match state[idx] {
            PointState::Unvisited => {
                state[idx] = PointState::Member(cluster);
                queue.push_back(idx);
            }
            PointState::Noise => state[idx] = PointState::Member(cluster),
            PointState::Member(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit vector in the plane at the given angle.
    fn at(angle: f32) -> Vec<f32> {
        vec![angle.cos(), angle.sin()]
    }

    /// Angle whose chord on the unit circle has the given length.
    fn angle_for_chord(chord: f32) -> f32 {
        2.0 * (chord / 2.0).asin()
    }

    fn params(eps: f32, min_neighbors: usize) -> ClusterParams {
        ClusterParams { eps, min_neighbors }
    }

    #[test]
    fn test_normalize() {
        let v = normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_distance_dimension_mismatch() {
        assert_eq!(euclidean_distance(&[1.0, 0.0], &[1.0, 0.0, 0.0]), f32::INFINITY);
        assert!((euclidean_distance(&[1.0, 0.0], &[0.0, 1.0]) - 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_neighbor_boundary_is_inclusive() {
        let a = at(0.0);
        let b = at(0.4);
        let d = euclidean_distance(&normalize(&a), &normalize(&b));
        let vectors = vec![a, b];

        let exact = cluster_faces(&vectors, &params(d, 2)).unwrap();
        assert_eq!(exact.labels, vec![Label::Cluster(0), Label::Cluster(0)]);

        let just_short = cluster_faces(&vectors, &params(d * 0.999, 2)).unwrap();
        assert_eq!(just_short.labels, vec![Label::Noise, Label::Noise]);
        assert_eq!(just_short.cluster_count, 0);
    }

    #[test]
    fn test_isolated_point_is_noise() {
        let vectors = vec![at(0.0), at(0.05), at(2.0)];
        let clustering = cluster_faces(&vectors, &params(0.3, 2)).unwrap();

        assert_eq!(
            clustering.labels,
            vec![Label::Cluster(0), Label::Cluster(0), Label::Noise]
        );
        assert_eq!(clustering.noise_count(), 1);
    }

    #[test]
    fn test_chained_reachability_forms_one_cluster() {
        // d(A,B) = d(B,C) = 0.25, d(A,C) ~ 0.5
        let step = angle_for_chord(0.25);
        let vectors = vec![at(0.0), at(step), at(2.0 * step)];
        assert!(euclidean_distance(&vectors[0], &vectors[2]) > 0.3);

        let clustering = cluster_faces(&vectors, &params(0.3, 2)).unwrap();
        assert_eq!(clustering.cluster_count, 1);
        assert_eq!(clustering.partition(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_chain_seeded_from_the_far_end() {
        // C is visited first; expansion must still walk back through B to A
        let step = angle_for_chord(0.25);
        let vectors = vec![at(2.0 * step), at(step), at(0.0)];
        let clustering = cluster_faces(&vectors, &params(0.3, 2)).unwrap();
        assert_eq!(clustering.partition(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_provisional_noise_is_absorbed_as_border() {
        // With min_neighbors = 3, A (neighbors A,B) is sparse and seen first.
        // B (neighbors A,B,C) is dense and later pulls A in as a border point.
        let step = angle_for_chord(0.25);
        let vectors = vec![at(0.0), at(step), at(2.0 * step)];
        let clustering = cluster_faces(&vectors, &params(0.3, 3)).unwrap();

        assert_eq!(clustering.labels, vec![Label::Cluster(0); 3]);
    }

    #[test]
    fn test_border_point_does_not_bridge_clusters() {
        // Two dense groups of four; the middle point is within eps of one
        // member of each but has only three neighbors itself
        let step = angle_for_chord(0.2);
        let mut vectors: Vec<Vec<f32>> = [-0.03, -0.02, -0.01, 0.0].iter().map(|a| at(*a)).collect();
        vectors.push(at(step));
        vectors.extend([0.0, 0.01, 0.02, 0.03].iter().map(|a| at(2.0 * step + a)));

        let clustering = cluster_faces(&vectors, &params(0.205, 4)).unwrap();

        assert_eq!(clustering.cluster_count, 2);
        // The middle point is border to whichever cluster reached it first
        assert_eq!(clustering.partition(), vec![vec![0, 1, 2, 3, 4], vec![5, 6, 7, 8]]);
    }

    #[test]
    fn test_scale_invariance() {
        let vectors = vec![vec![1.0, 0.0], vec![10.0, 0.5], vec![0.0, 3.0]];
        let scaled: Vec<Vec<f32>> = vectors
            .iter()
            .map(|v| v.iter().map(|x| x * 42.0).collect())
            .collect();

        let p = params(0.2, 2);
        assert_eq!(cluster_faces(&vectors, &p).unwrap(), cluster_faces(&scaled, &p).unwrap());
    }

    #[test]
    fn test_deterministic() {
        let vectors: Vec<Vec<f32>> = (0..40)
            .map(|i| at((i % 7) as f32 * 0.9 + (i as f32) * 0.001))
            .collect();
        let p = params(0.1, 2);

        let first = cluster_faces(&vectors, &p).unwrap();
        let second = cluster_faces(&vectors, &p).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.cluster_count, 7);
    }

    #[test]
    fn test_min_neighbors_one_makes_singletons() {
        let vectors = vec![at(0.0), at(1.5), at(3.0)];
        let clustering = cluster_faces(&vectors, &params(0.1, 1)).unwrap();
        assert_eq!(
            clustering.labels,
            vec![Label::Cluster(0), Label::Cluster(1), Label::Cluster(2)]
        );
    }

    #[test]
    fn test_empty_input() {
        let clustering = cluster_faces(&[], &ClusterParams::default()).unwrap();
        assert!(clustering.labels.is_empty());
        assert_eq!(clustering.cluster_count, 0);
    }

    #[test]
    fn test_invalid_params() {
        assert!(matches!(
            cluster_faces(&[], &params(-0.1, 2)),
            Err(ClusterError::InvalidParams(_))
        ));
        assert!(matches!(
            cluster_faces(&[], &params(f32::NAN, 2)),
            Err(ClusterError::InvalidParams(_))
        ));
        assert!(matches!(
            cluster_faces(&[], &params(0.5, 0)),
            Err(ClusterError::InvalidParams(_))
        ));
    }

    /// Index over an explicit adjacency list, ignoring eps.
    struct GraphIndex(Vec<Vec<usize>>);

    impl NeighborIndex for GraphIndex {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn neighbors(&self, idx: usize, _eps: f32) -> Vec<usize> {
            let mut n = self.0[idx].clone();
            n.push(idx);
            n
        }
    }

    #[test]
    fn test_membership_logic_is_index_agnostic() {
        // 0-1-2 chain, 3 alone, 4-5 pair
        let index = GraphIndex(vec![vec![1], vec![0, 2], vec![1], vec![], vec![5], vec![4]]);
        let clustering = cluster_with_index(&index, &params(0.0, 2));

        assert_eq!(clustering.partition(), vec![vec![0, 1, 2], vec![4, 5]]);
        assert_eq!(clustering.labels[3], Label::Noise);
    }
}
