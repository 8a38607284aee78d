// Phase 4: finalize the results.
//
// MAPQ comes from the ratio of the best pair's probability to the mass of
// everything scored; an end whose MAPQ clears the reporting threshold is a
// SingleHit. After adjustment the compensated scores are recomputed from
// the (possibly clipped) per-end scores, then secondaries are pruned
// against the edit-distance budget, the per-contig cap, and the caller's
// result limit.

use crate::cluster::NO_CLUSTER;
use crate::index::SeedIndex;
use crate::mapq::compute_mapq;
use crate::results::{AlignmentStatus, PairedAlignmentResult, NUM_READS_PER_PAIR};

use super::{adjuster, IntersectingPairedEndAligner};

/// Per-contig secondary counting with an epoch so the array never needs
/// clearing between pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContigHitCount {
    pub epoch: u64,
    pub hits: i32,
}

impl<'g, I: SeedIndex> IntersectingPairedEndAligner<'g, I> {
    pub fn align_phase_4(
        &mut self,
        max_edit_distance_for_secondary_results: i32,
        max_secondary_results_to_return: usize,
        secondary_results: &mut [PairedAlignmentResult],
        n_secondary_results: &mut usize,
        best_result: &mut PairedAlignmentResult,
    ) {
        let comp = self.opts.cluster_ed_compensation as i32;
        let index = self.index;
        let genome = index.genome();

        if best_result.compensated_score != -1 {
            let skipped = self.popular_seeds_skipped[0] + self.popular_seeds_skipped[1];
            for r in 0..NUM_READS_PER_PAIR {
                best_result.mapq[r] = compute_mapq(
                    self.probability_of_all_pairs,
                    best_result.probability,
                    best_result.score[r],
                    skipped,
                );
                best_result.status[r] =
                    if best_result.mapq[r] > self.opts.print_stats_mapq_limit as i32 {
                        AlignmentStatus::SingleHit
                    } else {
                        AlignmentStatus::MultipleHits
                    };
                best_result.clipping_for_read_adjustment[r] = 0;
            }
            log::debug!(
                "best pair at ({}, {}), mapq {}/{}, probability of best {:e} of all {:e}",
                best_result.location[0],
                best_result.location[1],
                best_result.mapq[0],
                best_result.mapq[1],
                best_result.probability,
                self.probability_of_all_pairs
            );
        }

        for r in 0..NUM_READS_PER_PAIR {
            best_result.score_prior_to_clipping[r] = best_result.score[r];
        }

        if !self.opts.ignore_alignment_adjustments {
            adjuster::adjust_alignment(genome, self.read_len, best_result);
            if best_result.is_found() {
                let astray = if best_result.cluster_idx != NO_CLUSTER { 0 } else { comp };
                best_result.compensated_score =
                    best_result.score[0] + best_result.score[1] + astray;
                self.best_compensated_score = best_result.compensated_score;
            }
            for i in 0..*n_secondary_results {
                let s = &mut secondary_results[i];
                for r in 0..NUM_READS_PER_PAIR {
                    s.score_prior_to_clipping[r] = s.score[r];
                }
                adjuster::adjust_alignment(genome, self.read_len, s);
                if s.is_found() {
                    let astray = if s.cluster_idx != NO_CLUSTER { 0 } else { comp };
                    s.compensated_score = s.score[0] + s.score[1] + astray;
                    self.best_compensated_score =
                        self.best_compensated_score.min(s.compensated_score);
                }
            }
        } else {
            for i in 0..*n_secondary_results {
                for r in 0..NUM_READS_PER_PAIR {
                    secondary_results[i].score_prior_to_clipping[r] =
                        secondary_results[i].score[r];
                }
            }
        }

        // Secondaries past the edit-distance budget, or broken by
        // adjustment, go away.
        let budget = self.best_compensated_score + max_edit_distance_for_secondary_results;
        let mut i = 0;
        while i < *n_secondary_results {
            if secondary_results[i].compensated_score > budget || !secondary_results[i].is_found()
            {
                secondary_results[i] = secondary_results[*n_secondary_results - 1].clone();
                *n_secondary_results -= 1;
            } else {
                i += 1;
            }
        }

        let cap = self.opts.max_secondary_alignments_per_contig;
        if cap > 0 && best_result.status[0] != AlignmentStatus::NotFound {
            self.contig_count_epoch += 1;
            let epoch = self.contig_count_epoch;

            let primary_contig = genome.contig_num_at_location(best_result.location[0]);
            if let Some(pc) = primary_contig {
                self.hits_per_contig[pc] = ContigHitCount { epoch, hits: 1 };
            }

            let mut any_contig_over_cap = false;
            for s in secondary_results[..*n_secondary_results].iter() {
                // Both ends share a contig, so either end works.
                let Some(c) = genome.contig_num_at_location(s.location[0]) else {
                    continue;
                };
                if self.hits_per_contig[c].epoch != epoch {
                    self.hits_per_contig[c] = ContigHitCount { epoch, hits: 0 };
                }
                self.hits_per_contig[c].hits += 1;
                if self.hits_per_contig[c].hits > cap {
                    any_contig_over_cap = true;
                    break;
                }
            }

            if any_contig_over_cap {
                // Sort by contig then score and keep the first `cap` per
                // contig; the counting trick above cannot drop the right
                // ones without the ordering.
                secondary_results[..*n_secondary_results].sort_by(|a, b| {
                    PairedAlignmentResult::compare_by_contig_and_score(genome, a, b)
                });
                let mut current_contig: Option<usize> = None;
                let mut current_count = 0;
                let mut dest = 0;
                for src in 0..*n_secondary_results {
                    let c = genome.contig_num_at_location(secondary_results[src].location[0]);
                    if c != current_contig {
                        current_contig = c;
                        current_count = if c.is_some() && c == primary_contig { 1 } else { 0 };
                    }
                    current_count += 1;
                    if current_count <= cap {
                        secondary_results[dest] = secondary_results[src].clone();
                        dest += 1;
                    }
                }
                *n_secondary_results = dest;
            }
        }

        if *n_secondary_results > max_secondary_results_to_return {
            secondary_results[..*n_secondary_results]
                .sort_by(PairedAlignmentResult::compare_by_score);
            *n_secondary_results = max_secondary_results_to_return;
        }
    }
}
