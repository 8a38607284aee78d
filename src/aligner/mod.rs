// The intersecting paired-end alignment engine.
//
// One engine aligns one read pair at a time against a read-only seed index:
//
//   phase 1  seed lookups into per-read/per-direction hit sets
//   phase 2  descending intersection of the two ends' hit streams under the
//            spacing constraint, candidates into priority buckets
//   phase 3  bounded edit-distance scoring of the bucket frontier, merge
//            anchors, optional cluster refinement
//   phase 4  MAPQ, adjustment, secondary pruning
//
// `align_pair` composes the phases; they stay public so a cluster-sweeping
// driver can interleave `align_phase_2_to_target_loc` calls across engines
// sharing a barcode's cluster counters. Engines hold no locks; parallelism
// is one engine per thread.

pub mod adjuster;
pub mod candidates;
pub mod finalize;
pub mod hit_set;
pub mod intersection;
pub mod scoring;

use std::fmt;

use crate::cluster::{ClusterContext, NO_CLUSTER};
use crate::genome::normalize_base;
use crate::index::SeedIndex;
use crate::landau_vishkin::LandauVishkin;
use crate::opts::AlignerOptions;
use crate::read::{is_acgt, reverse_complement_into, Read};
use crate::results::{Direction, PairedAlignmentResult, NUM_READS_PER_PAIR};

use candidates::CandidatePools;
use finalize::ContigHitCount;
use hit_set::HashTableHitSet;
use intersection::SetPairState;

/// Two mappings merge when both ends are within this many bases.
pub const MAX_MERGE_DISTANCE: u64 = 31;

pub const NUM_DIRECTIONS: usize = 2;
pub const NUM_SET_PAIRS: usize = 2;

/// How far up and down the candidate pool an existing merge anchor is
/// searched for.
pub(crate) const ANCHOR_SEARCH_WINDOW: u64 = 50;

/// Orientation of `which_read` within `which_set_pair`: set pair 0 is
/// (forward, rc), set pair 1 is (rc, forward).
#[inline]
pub(crate) fn set_pair_direction(which_set_pair: usize, which_read: usize) -> Direction {
    if (which_set_pair == 0) == (which_read == 0) {
        Direction::Forward
    } else {
        Direction::Rc
    }
}

/// Caller-contract violations. Both are fatal for the engine's caller: the
/// CLI reports and exits rather than retrying.
#[derive(Debug)]
pub enum AlignerError {
    InputTooLong { length: usize, max: usize },
    PoolExhausted { pool: &'static str },
}

impl fmt::Display for AlignerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignerError::InputTooLong { length, max } => {
                write!(f, "read of {} bases exceeds the configured maximum of {}", length, max)
            }
            AlignerError::PoolExhausted { pool } => {
                write!(
                    f,
                    "ran out of {} pool entries; rerun with a larger candidate pool size",
                    pool
                )
            }
        }
    }
}

impl std::error::Error for AlignerError {}

/// Outcome of an alignment attempt that did not violate the caller
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignOutcome {
    Ok,
    /// The secondary buffer cannot hold every qualifying result. Phases 1-3
    /// state is intact: call `emit_results` again with a buffer of at least
    /// `required` entries.
    BufferTooSmall { required: usize },
}

pub struct IntersectingPairedEndAligner<'g, I: SeedIndex> {
    pub(crate) index: &'g I,
    pub(crate) opts: AlignerOptions,
    pub(crate) seed_len: usize,
    max_seeds: usize,

    pub(crate) lv: LandauVishkin,
    pub(crate) rev_text_buf: Vec<u8>,

    // Per-pair read state, [read][direction].
    pub(crate) read_len: [usize; NUM_READS_PER_PAIR],
    pub(crate) data: [[Vec<u8>; NUM_DIRECTIONS]; NUM_READS_PER_PAIR],
    pub(crate) quality: [[Vec<u8>; NUM_DIRECTIONS]; NUM_READS_PER_PAIR],
    pub(crate) reversed_data: [[Vec<u8>; NUM_DIRECTIONS]; NUM_READS_PER_PAIR],
    seed_used: Vec<bool>,

    pub(crate) hit_sets: [[HashTableHitSet<'g, I::Loc>; NUM_DIRECTIONS]; NUM_READS_PER_PAIR],
    total_hits: [[usize; NUM_DIRECTIONS]; NUM_READS_PER_PAIR],
    pub(crate) popular_seeds_skipped: [usize; NUM_READS_PER_PAIR],
    pub(crate) read_with_more_hits: usize,
    pub(crate) read_with_fewer_hits: usize,

    pub(crate) pools: CandidatePools,
    pub(crate) set_pairs: [SetPairState; NUM_SET_PAIRS],

    pub(crate) best_compensated_score: i32,
    pub(crate) probability_of_all_pairs: f64,
    pub(crate) n_locations_scored: u64,

    pub(crate) hits_per_contig: Vec<ContigHitCount>,
    pub(crate) contig_count_epoch: u64,
}

impl<'g, I: SeedIndex> IntersectingPairedEndAligner<'g, I> {
    pub fn new(index: &'g I, opts: AlignerOptions) -> Self {
        let seed_len = index.seed_length();
        let max_seeds = opts.max_seeds(seed_len);
        let pool_size = opts
            .max_candidate_pool_size
            .min(opts.max_big_hits * max_seeds * NUM_READS_PER_PAIR);
        let pools = CandidatePools::new(pool_size, opts.max_bucket());
        let hits_per_contig = if opts.max_secondary_alignments_per_contig > 0 {
            vec![ContigHitCount::default(); index.genome().num_contigs()]
        } else {
            Vec::new()
        };
        IntersectingPairedEndAligner {
            index,
            seed_len,
            max_seeds,
            lv: LandauVishkin::new(),
            rev_text_buf: Vec::new(),
            read_len: [0; NUM_READS_PER_PAIR],
            data: Default::default(),
            quality: Default::default(),
            reversed_data: Default::default(),
            seed_used: Vec::new(),
            hit_sets: std::array::from_fn(|_| {
                std::array::from_fn(|_| HashTableHitSet::new(MAX_MERGE_DISTANCE))
            }),
            total_hits: [[0; NUM_DIRECTIONS]; NUM_READS_PER_PAIR],
            popular_seeds_skipped: [0; NUM_READS_PER_PAIR],
            read_with_more_hits: 0,
            read_with_fewer_hits: 1,
            pools,
            set_pairs: Default::default(),
            best_compensated_score: 0,
            probability_of_all_pairs: 0.0,
            n_locations_scored: 0,
            hits_per_contig,
            contig_count_epoch: 0,
            opts,
        }
    }

    /// Locations handed to the edit-distance scorer so far (all pairs).
    pub fn n_locations_scored(&self) -> u64 {
        self.n_locations_scored
    }

    pub fn genome(&self) -> &'g crate::genome::Genome {
        let index: &'g I = self.index;
        index.genome()
    }

    pub fn popular_seeds_skipped(&self) -> [usize; NUM_READS_PER_PAIR] {
        self.popular_seeds_skipped
    }

    #[inline]
    pub(crate) fn hit_set_mut(
        &mut self,
        which_set_pair: usize,
        which_read: usize,
    ) -> &mut HashTableHitSet<'g, I::Loc> {
        let dir = set_pair_direction(which_set_pair, which_read);
        &mut self.hit_sets[which_read][dir.index()]
    }

    /// Sentinel "no pair found yet": one past the largest representable
    /// compensated score.
    pub(crate) fn best_score_sentinel(&self) -> i32 {
        self.opts.max_bucket() as i32 + 1
    }

    /// Phase 1: seed the hit sets. `Ok(true)` means the pair cannot be
    /// aligned (a read shorter than the seed, or too many Ns) and the
    /// caller should report NotFound.
    pub fn align_phase_1(&mut self, read0: &Read, read1: &Read) -> Result<bool, AlignerError> {
        for read in [read0, read1] {
            if read.len() > self.opts.max_read_size {
                return Err(AlignerError::InputTooLong {
                    length: read.len(),
                    max: self.opts.max_read_size,
                });
            }
        }

        self.pools.reset();
        self.set_pairs = Default::default();
        self.best_compensated_score = self.best_score_sentinel();
        self.probability_of_all_pairs = 0.0;
        self.popular_seeds_skipped = [0; NUM_READS_PER_PAIR];
        self.total_hits = [[0; NUM_DIRECTIONS]; NUM_READS_PER_PAIR];
        for read_sets in &mut self.hit_sets {
            for set in read_sets {
                set.init();
            }
        }

        self.read_len = [read0.len(), read1.len()];
        if read0.len() < self.seed_len || read1.len() < self.seed_len {
            return Ok(true);
        }

        // Build forward (normalized), reverse-complement, and reversed
        // copies of both reads.
        let mut count_of_ns = 0usize;
        for (r, read) in [read0, read1].into_iter().enumerate() {
            count_of_ns += read.count_of_ns();

            let fwd = &mut self.data[r][Direction::Forward.index()];
            fwd.clear();
            fwd.extend(read.data.iter().map(|&b| normalize_base(b)));

            let fwd_qual = &mut self.quality[r][Direction::Forward.index()];
            fwd_qual.clear();
            fwd_qual.extend_from_slice(&read.quality);

            let rc_src: Vec<u8> = self.data[r][Direction::Forward.index()].clone();
            let rc = &mut self.data[r][Direction::Rc.index()];
            reverse_complement_into(&rc_src, rc);

            let rc_qual = &mut self.quality[r][Direction::Rc.index()];
            rc_qual.clear();
            rc_qual.extend(read.quality.iter().rev());

            for dir in 0..NUM_DIRECTIONS {
                let src: Vec<u8> = self.data[r][dir].clone();
                let rev = &mut self.reversed_data[r][dir];
                rev.clear();
                rev.extend(src.iter().rev());
            }
        }
        if count_of_ns > self.opts.max_k as usize {
            return Ok(true);
        }

        let max_seeds = if self.opts.num_seeds_from_command_line != 0 {
            self.opts.num_seeds_from_command_line
        } else {
            ((self.read_len[0].max(self.read_len[1]) as f64 * self.opts.seed_coverage)
                / self.seed_len as f64) as usize
        }
        .max(1)
        .min(self.max_seeds.max(1));

        for r in 0..NUM_READS_PER_PAIR {
            self.lookup_seeds_for_read(r, max_seeds);
        }

        let hits0 = self.total_hits[0][0] + self.total_hits[0][1];
        let hits1 = self.total_hits[1][0] + self.total_hits[1][1];
        self.read_with_more_hits = if hits0 > hits1 { 0 } else { 1 };
        self.read_with_fewer_hits = 1 - self.read_with_more_hits;
        log::debug!(
            "phase 1: read 0 has {} hits, read 1 has {} hits, {} popular seeds skipped",
            hits0,
            hits1,
            self.popular_seeds_skipped[0] + self.popular_seeds_skipped[1]
        );

        Ok(false)
    }

    fn lookup_seeds_for_read(&mut self, r: usize, max_seeds: usize) {
        let seed_len = self.seed_len;
        let read_len = self.read_len[r];
        let n_possible_seeds = read_len - seed_len + 1;

        self.seed_used.clear();
        self.seed_used.resize(read_len, false);

        let mut next_seed = 0usize;
        let mut wrap_count = 0usize;
        let mut lookups = 0usize;
        let mut begins_disjoint_hit_set = [true; NUM_DIRECTIONS];

        while lookups < n_possible_seeds && lookups < max_seeds {
            if next_seed >= n_possible_seeds {
                wrap_count += 1;
                begins_disjoint_hit_set = [true; NUM_DIRECTIONS];
                if wrap_count >= seed_len {
                    // Not enough usable seeds to reach the target.
                    break;
                }
                next_seed = wrapped_seed_offset(seed_len, wrap_count);
            }

            while next_seed < n_possible_seeds && self.seed_used[next_seed] {
                next_seed += 1;
            }
            if next_seed >= n_possible_seeds {
                continue; // Wrap via the outer check.
            }
            self.seed_used[next_seed] = true;

            let fwd = Direction::Forward.index();
            if !self.data[r][fwd][next_seed..next_seed + seed_len]
                .iter()
                .all(|&b| is_acgt(b))
            {
                next_seed += 1;
                continue;
            }

            let index = self.index;
            let hits = index.lookup_seed(&self.data[r][fwd][next_seed..next_seed + seed_len]);
            lookups += 1;

            for dir in 0..NUM_DIRECTIONS {
                let (offset, dir_hits) = if dir == Direction::Forward.index() {
                    (next_seed, hits.forward)
                } else {
                    (read_len - seed_len - next_seed, hits.reverse_complement)
                };
                if dir_hits.len() < self.opts.max_big_hits {
                    self.total_hits[r][dir] += dir_hits.len();
                    self.hit_sets[r][dir].record_lookup(
                        offset as u64,
                        dir_hits,
                        begins_disjoint_hit_set[dir],
                    );
                    begins_disjoint_hit_set[dir] = false;
                } else {
                    self.popular_seeds_skipped[r] += 1;
                }
            }

            // Space the remaining lookups evenly over the rest of the read.
            let remaining = max_seeds - lookups + 1;
            if remaining * seed_len + next_seed < n_possible_seeds {
                next_seed += (n_possible_seeds - next_seed - 1) / remaining;
            } else {
                next_seed += seed_len;
            }
        }
    }

    /// Align one pair end to end. On `BufferTooSmall` the caller may grow
    /// the buffer and call `emit_results` without re-running phases 1-3.
    #[allow(clippy::too_many_arguments)]
    pub fn align_pair(
        &mut self,
        read0: &Read,
        read1: &Read,
        max_edit_distance_for_secondary_results: i32,
        max_secondary_results_to_return: usize,
        best_result: &mut PairedAlignmentResult,
        secondary_results: &mut [PairedAlignmentResult],
        n_secondary_results: &mut usize,
        mut cluster: Option<&mut ClusterContext<'_>>,
    ) -> Result<AlignOutcome, AlignerError> {
        if self.align_phase_1(read0, read1)? {
            *best_result = PairedAlignmentResult::not_found();
            *n_secondary_results = 0;
            return Ok(AlignOutcome::Ok);
        }

        if self.align_phase_2_init() {
            self.align_phase_2_to_target_loc(0, NO_CLUSTER)?;
        }

        self.align_phase_3_score(false)?;

        if let Some(ctx) = cluster.as_mut() {
            ctx.begin_pair();
            self.align_phase_3_increment_cluster(ctx);
            self.align_phase_3_correct_best_score(ctx);
        }

        self.emit_results(
            max_edit_distance_for_secondary_results,
            max_secondary_results_to_return,
            best_result,
            secondary_results,
            n_secondary_results,
            cluster.as_deref(),
        )
    }

    /// Count, generate, and finalize results from the already-scored
    /// candidate state. Re-invocable after `BufferTooSmall`.
    pub fn emit_results(
        &mut self,
        max_edit_distance_for_secondary_results: i32,
        max_secondary_results_to_return: usize,
        best_result: &mut PairedAlignmentResult,
        secondary_results: &mut [PairedAlignmentResult],
        n_secondary_results: &mut usize,
        cluster: Option<&ClusterContext<'_>>,
    ) -> Result<AlignOutcome, AlignerError> {
        let (required, too_many) = self.align_phase_3_count_results(
            max_edit_distance_for_secondary_results,
            secondary_results.len(),
            cluster,
        );
        if too_many {
            return Ok(AlignOutcome::BufferTooSmall { required });
        }

        *n_secondary_results = self.align_phase_3_generate_results(
            max_edit_distance_for_secondary_results,
            cluster,
            secondary_results,
            best_result,
        );

        self.align_phase_4(
            max_edit_distance_for_secondary_results,
            max_secondary_results_to_return,
            secondary_results,
            n_secondary_results,
            best_result,
        );
        Ok(AlignOutcome::Ok)
    }
}

/// Starting offset for the `wrap_count`-th pass over a read's seeds:
/// successive passes start at L/2, L/4, 3L/4, L/8, 3L/8, ... so wrapped
/// seeds interleave the ones already taken.
fn wrapped_seed_offset(seed_len: usize, wrap_count: usize) -> usize {
    let mut denominator = 2;
    while denominator <= wrap_count {
        denominator <<= 1;
    }
    let numerator = 2 * (wrap_count + 1 - denominator / 2) - 1;
    seed_len * numerator / denominator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_seed_offsets_spread() {
        assert_eq!(wrapped_seed_offset(16, 1), 8);
        assert_eq!(wrapped_seed_offset(16, 2), 4);
        assert_eq!(wrapped_seed_offset(16, 3), 12);
        assert_eq!(wrapped_seed_offset(16, 4), 2);
        assert_eq!(wrapped_seed_offset(16, 7), 14);
    }

    #[test]
    fn test_set_pair_directions() {
        assert_eq!(set_pair_direction(0, 0), Direction::Forward);
        assert_eq!(set_pair_direction(0, 1), Direction::Rc);
        assert_eq!(set_pair_direction(1, 0), Direction::Rc);
        assert_eq!(set_pair_direction(1, 1), Direction::Forward);
    }
}
