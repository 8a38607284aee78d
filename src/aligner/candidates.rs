// Candidate pools, priority buckets, and merge anchors.
//
// All per-pair allocations live in flat Vecs that only reset between pairs,
// so the hot loops never touch the allocator once the pools are warm.
// Priority buckets are head indices into the candidate pool threaded
// through `score_list_next`.

use crate::genome::{locations_within, GenomeLocation};

use super::{AlignerError, NUM_SET_PAIRS};

/// Sentinel: location not yet scored.
pub const SCORE_UNSCORED: i32 = -2;
/// Sentinel: scoring exceeded the limit in force at the time.
pub const SCORE_OVER_LIMIT: i32 = -1;

/// One location on the more-hits side waiting to be paired.
#[derive(Debug, Clone, Copy)]
pub struct ScoringMateCandidate {
    pub more_hits_location: GenomeLocation,
    pub best_possible_score: u32,
    pub seed_offset: u64,
    pub score: i32,
    pub score_limit: i32,
    pub match_probability: f64,
    pub genome_offset: i32,
}

impl ScoringMateCandidate {
    pub fn new(location: GenomeLocation, best_possible_score: u32, seed_offset: u64) -> Self {
        ScoringMateCandidate {
            more_hits_location: location,
            best_possible_score,
            seed_offset,
            score: SCORE_UNSCORED,
            score_limit: -1,
            match_probability: 0.0,
            genome_offset: 0,
        }
    }
}

/// One location on the fewer-hits side. `mate_candidate_index` is the
/// highest mate-pool index within `max_spacing`; everything at or below it
/// (down to the spacing bound) is a potential mate.
#[derive(Debug, Clone)]
pub struct ScoringCandidate {
    pub fewer_hits_location: GenomeLocation,
    pub which_set_pair: usize,
    pub mate_candidate_index: usize,
    pub seed_offset: u64,
    pub best_possible_score: u32,
    pub score_list_next: Option<usize>,
    pub cluster_idx: i32,
    pub merge_anchor: Option<usize>,
    pub fewer_end_score: i32,
    pub fewer_end_match_probability: f64,
    pub fewer_end_genome_offset: i32,
}

/// A locus-pair mapping claim. Nearby rescorings of the same locus pair
/// merge into the anchor instead of multiplying in the result set.
#[derive(Debug, Clone)]
pub struct MergeAnchor {
    pub more_hits_location: GenomeLocation,
    pub fewer_hits_location: GenomeLocation,
    pub match_probability: f64,
    pub pair_score: i32,
    pub cluster_idx: i32,
    pub candidate: usize,
    pub mate: usize,
}

impl MergeAnchor {
    pub fn new(
        more_hits_location: GenomeLocation,
        fewer_hits_location: GenomeLocation,
        match_probability: f64,
        pair_score: i32,
        cluster_idx: i32,
        candidate: usize,
        mate: usize,
    ) -> Self {
        MergeAnchor {
            more_hits_location,
            fewer_hits_location,
            match_probability,
            pair_score,
            cluster_idx,
            candidate,
            mate,
        }
    }

    fn take(
        &mut self,
        more: GenomeLocation,
        fewer: GenomeLocation,
        probability: f64,
        pair_score: i32,
        cluster_idx: i32,
        candidate: usize,
        mate: usize,
    ) {
        self.more_hits_location = more;
        self.fewer_hits_location = fewer;
        self.match_probability = probability;
        self.pair_score = pair_score;
        self.cluster_idx = cluster_idx;
        self.candidate = candidate;
        self.mate = mate;
    }

    /// Offer a new mapping to the anchor. Returns true when the anchor's
    /// claim changed (a fresh claim outside the merge range, or an in-range
    /// replacement by a better mapping), false when the offer was absorbed
    /// and dropped.
    ///
    /// In-range replacement prefers clustered over unclustered mappings,
    /// then strictly better pair score, then higher probability on a score
    /// tie.
    #[allow(clippy::too_many_arguments)]
    pub fn check_merge(
        &mut self,
        more: GenomeLocation,
        fewer: GenomeLocation,
        probability: f64,
        pair_score: i32,
        cluster_idx: i32,
        candidate: usize,
        mate: usize,
        max_merge_distance: u64,
    ) -> bool {
        let in_range = locations_within(more, self.more_hits_location, max_merge_distance)
            && locations_within(fewer, self.fewer_hits_location, max_merge_distance);
        if !in_range {
            self.take(more, fewer, probability, pair_score, cluster_idx, candidate, mate);
            return true;
        }

        let new_clustered = cluster_idx != crate::cluster::NO_CLUSTER;
        let old_clustered = self.cluster_idx != crate::cluster::NO_CLUSTER;
        let replace = (new_clustered && !old_clustered)
            || (new_clustered == old_clustered
                && (pair_score < self.pair_score
                    || (pair_score == self.pair_score && probability > self.match_probability)));
        if replace {
            log::debug!(
                "merge replacement at anchor ({}, {}) by ({}, {}), score {} -> {}",
                self.more_hits_location,
                self.fewer_hits_location,
                more,
                fewer,
                self.pair_score,
                pair_score
            );
            self.take(more, fewer, probability, pair_score, cluster_idx, candidate, mate);
            true
        } else {
            false
        }
    }
}

/// Flat pools plus the priority buckets. Capacity only grows; `reset`
/// keeps it (the per-pair high-water-mark pattern).
pub struct CandidatePools {
    pub candidates: Vec<ScoringCandidate>,
    pub mates: [Vec<ScoringMateCandidate>; NUM_SET_PAIRS],
    pub anchors: Vec<MergeAnchor>,
    pub buckets: Vec<Option<usize>>,
    pub max_used_bucket: usize,
    candidate_limit: usize,
    mate_limit: usize,
}

impl CandidatePools {
    pub fn new(max_candidate_pool_size: usize, max_bucket: usize) -> Self {
        CandidatePools {
            candidates: Vec::new(),
            mates: [Vec::new(), Vec::new()],
            anchors: Vec::new(),
            buckets: vec![None; max_bucket + 1],
            max_used_bucket: 0,
            candidate_limit: max_candidate_pool_size,
            mate_limit: max_candidate_pool_size / 2,
        }
    }

    pub fn reset(&mut self) {
        self.candidates.clear();
        for mates in &mut self.mates {
            mates.clear();
        }
        self.anchors.clear();
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.max_used_bucket = 0;
    }

    pub fn push_mate(
        &mut self,
        which_set_pair: usize,
        mate: ScoringMateCandidate,
    ) -> Result<usize, AlignerError> {
        let mates = &mut self.mates[which_set_pair];
        if mates.len() >= self.mate_limit {
            return Err(AlignerError::PoolExhausted {
                pool: "scoring mate candidate",
            });
        }
        mates.push(mate);
        Ok(mates.len() - 1)
    }

    /// Push a candidate onto the head of `bucket`.
    pub fn push_candidate(
        &mut self,
        mut candidate: ScoringCandidate,
        bucket: usize,
    ) -> Result<usize, AlignerError> {
        if self.candidates.len() >= self.candidate_limit {
            return Err(AlignerError::PoolExhausted {
                pool: "scoring candidate",
            });
        }
        candidate.score_list_next = self.buckets[bucket];
        let idx = self.candidates.len();
        self.candidates.push(candidate);
        self.buckets[bucket] = Some(idx);
        self.max_used_bucket = self.max_used_bucket.max(bucket);
        Ok(idx)
    }

    pub fn push_anchor(&mut self, anchor: MergeAnchor) -> Result<usize, AlignerError> {
        if self.anchors.len() >= self.candidate_limit {
            return Err(AlignerError::PoolExhausted {
                pool: "merge anchor",
            });
        }
        self.anchors.push(anchor);
        Ok(self.anchors.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NO_CLUSTER;

    fn anchor() -> MergeAnchor {
        MergeAnchor::new(1300, 1000, 0.9, 2, NO_CLUSTER, 0, 0)
    }

    #[test]
    fn test_check_merge_idempotent() {
        let mut a = anchor();
        let changed = a.check_merge(1300, 1000, 0.9, 2, NO_CLUSTER, 0, 0, 31);
        assert!(!changed);
        assert_eq!(a.pair_score, 2);
        assert_eq!(a.match_probability, 0.9);
    }

    #[test]
    fn test_check_merge_replaces_better_score_in_range() {
        let mut a = anchor();
        assert!(a.check_merge(1310, 1010, 0.5, 1, NO_CLUSTER, 3, 4, 31));
        assert_eq!(a.pair_score, 1);
        assert_eq!(a.candidate, 3);
    }

    #[test]
    fn test_check_merge_ignores_worse_in_range() {
        let mut a = anchor();
        assert!(!a.check_merge(1310, 1010, 0.99, 3, NO_CLUSTER, 3, 4, 31));
        assert_eq!(a.pair_score, 2);
    }

    #[test]
    fn test_check_merge_probability_breaks_ties() {
        let mut a = anchor();
        assert!(a.check_merge(1310, 1010, 0.95, 2, NO_CLUSTER, 3, 4, 31));
        assert_eq!(a.match_probability, 0.95);
    }

    #[test]
    fn test_check_merge_prefers_clustered() {
        let mut a = anchor();
        // A clustered mapping with a worse score still wins.
        assert!(a.check_merge(1310, 1010, 0.1, 5, 7, 3, 4, 31));
        assert_eq!(a.cluster_idx, 7);
        // And an unclustered offer cannot displace it, even at score 0.
        assert!(!a.check_merge(1300, 1000, 0.99, 0, NO_CLUSTER, 0, 0, 31));
        assert_eq!(a.cluster_idx, 7);
    }

    #[test]
    fn test_check_merge_out_of_range_takes_over() {
        let mut a = anchor();
        assert!(a.check_merge(2300, 2000, 0.1, 5, NO_CLUSTER, 9, 9, 31));
        assert_eq!(a.fewer_hits_location, 2000);
        assert_eq!(a.pair_score, 5);
    }

    #[test]
    fn test_merge_range_boundary() {
        let mut a = anchor();
        // Both ends exactly at the merge distance: still a merge.
        assert!(!a.check_merge(1331, 1031, 0.1, 5, NO_CLUSTER, 0, 0, 31));
        // One end past it: fresh claim.
        assert!(a.check_merge(1332, 1000, 0.1, 5, NO_CLUSTER, 0, 0, 31));
    }

    #[test]
    fn test_pool_limits() {
        let mut pools = CandidatePools::new(4, 10);
        for i in 0..2 {
            pools
                .push_mate(0, ScoringMateCandidate::new(100 + i, 0, 0))
                .unwrap();
        }
        assert!(pools.push_mate(0, ScoringMateCandidate::new(50, 0, 0)).is_err());
    }

    #[test]
    fn test_bucket_threading() {
        let mut pools = CandidatePools::new(16, 10);
        let cand = ScoringCandidate {
            fewer_hits_location: 100,
            which_set_pair: 0,
            mate_candidate_index: 0,
            seed_offset: 0,
            best_possible_score: 0,
            score_list_next: None,
            cluster_idx: NO_CLUSTER,
            merge_anchor: None,
            fewer_end_score: SCORE_UNSCORED,
            fewer_end_match_probability: 0.0,
            fewer_end_genome_offset: 0,
        };
        let first = pools.push_candidate(cand.clone(), 3).unwrap();
        let second = pools.push_candidate(cand, 3).unwrap();
        // LIFO within a bucket.
        assert_eq!(pools.buckets[3], Some(second));
        assert_eq!(pools.candidates[second].score_list_next, Some(first));
        assert_eq!(pools.max_used_bucket, 3);
    }
}
