//! Map fresh cluster labels onto previously persisted cluster ids.
//!
//! Each new cluster votes for the previous id held by the plurality of its
//! members (unassigned and noise members do not vote; ties go to the smaller
//! id). Claims are granted strongest first, so when a previous cluster splits
//! the larger part keeps the id. A cluster whose claim is already taken, or
//! that has no votes, gets a freshly minted id above every id seen before.

use std::collections::{BTreeMap, HashSet};

use super::clustering::{Clustering, Label};
use crate::db::{ClusterId, NOISE_CLUSTER_ID};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Final cluster id per input point, in input order.
    pub cluster_ids: Vec<ClusterId>,
    /// Clusters that kept a previous id.
    pub adopted: usize,
    /// Clusters that received a new id.
    pub minted: usize,
}

/// Reconcile `clustering` against the ids previously stored for the same
/// points (`previous[i]` belongs to `clustering.labels[i]`).
pub fn reconcile(previous: &[Option<ClusterId>], clustering: &Clustering) -> Reconciliation {
    debug_assert_eq!(previous.len(), clustering.labels.len());

    let mut votes: Vec<BTreeMap<ClusterId, usize>> = vec![BTreeMap::new(); clustering.cluster_count];
    for (label, prev) in clustering.labels.iter().zip(previous) {
        if let (Label::Cluster(c), Some(id)) = (label, prev) {
            if *id != NOISE_CLUSTER_ID {
                *votes[*c].entry(*id).or_default() += 1;
            }
        }
    }

    // (cluster, claimed id, votes)
    let mut claims: Vec<(usize, ClusterId, usize)> = votes
        .iter()
        .enumerate()
        .filter_map(|(c, tally)| {
            // BTreeMap iterates ascending, so the first maximum is the smallest id
            let mut best: Option<(ClusterId, usize)> = None;
            for (&id, &count) in tally {
                if best.map_or(true, |(_, n)| count > n) {
                    best = Some((id, count));
                }
            }
            best.map(|(id, count)| (c, id, count))
        })
        .collect();
    claims.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));

    let mut mapping: Vec<Option<ClusterId>> = vec![None; clustering.cluster_count];
    let mut taken = HashSet::new();
    let mut adopted = 0;
    for (cluster, id, _) in claims {
        if taken.insert(id) {
            mapping[cluster] = Some(id);
            adopted += 1;
        }
    }

    let mut next_id = previous
        .iter()
        .flatten()
        .copied()
        .max()
        .unwrap_or(NOISE_CLUSTER_ID)
        .max(NOISE_CLUSTER_ID)
        + 1;
    let mut minted = 0;
    for slot in mapping.iter_mut().filter(|slot| slot.is_none()) {
        *slot = Some(next_id);
        next_id += 1;
        minted += 1;
    }

    let cluster_ids = clustering
        .labels
        .iter()
        .map(|label| match label {
            Label::Noise => NOISE_CLUSTER_ID,
            Label::Cluster(c) => mapping[*c].unwrap_or(NOISE_CLUSTER_ID),
        })
        .collect();

    Reconciliation {
        cluster_ids,
        adopted,
        minted,
    }
}
