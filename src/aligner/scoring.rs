// Phase 3: score the candidate frontier.
//
// Buckets are drained from the best lower bound upward under a working
// score limit; with Ukkonen tightening enabled, every confirmed pair pulls
// the limit down to best + extra search depth (+ cluster compensation), so
// whole buckets die unexamined. Each candidate scores its fewer end once,
// then walks its in-window mates, rescoring a mate only when it was never
// scored or failed under a smaller limit than the one now in force.
// Confirmed pairs flow through merge anchors so near-duplicate loci
// collapse to their best representative.

use crate::cluster::{ClusterContext, NO_CLUSTER};
use crate::genome::{locations_within, GenomeLocation};
use crate::index::SeedIndex;
use crate::landau_vishkin::SNP_PROB;
use crate::results::{AlignmentStatus, Direction, PairedAlignmentResult};

use super::candidates::{MergeAnchor, SCORE_OVER_LIMIT, SCORE_UNSCORED};
use super::{
    set_pair_direction, AlignerError, IntersectingPairedEndAligner, ANCHOR_SEARCH_WINDOW,
    MAX_MERGE_DISTANCE,
};

#[inline]
fn offset_location(location: GenomeLocation, offset: i32) -> GenomeLocation {
    (location as i64 + offset as i64).max(0) as GenomeLocation
}

impl<'g, I: SeedIndex> IntersectingPairedEndAligner<'g, I> {
    /// Drain the priority buckets, scoring candidates and merging confirmed
    /// pairs into anchors. In revise mode the score limit is pinned to the
    /// current best instead of tightening as new bests arrive.
    pub fn align_phase_3_score(&mut self, in_revise: bool) -> Result<(), AlignerError> {
        let comp = self.opts.cluster_ed_compensation;
        let extra = self.opts.extra_search_depth;
        let max_k = self.opts.max_k;
        let min_spacing = self.opts.min_spacing;
        let max_spacing = self.opts.max_spacing;
        let fewer_read = self.read_with_fewer_hits;
        let more_read = self.read_with_more_hits;

        let mut score_limit: u32 = if in_revise {
            self.best_compensated_score.max(0) as u32 + extra + comp
        } else {
            max_k + extra + comp
        };

        let mut bucket = 0usize;
        while bucket <= self.pools.max_used_bucket && bucket as u32 <= score_limit {
            let Some(cand_idx) = self.pools.buckets[bucket] else {
                bucket += 1;
                continue;
            };
            self.pools.buckets[bucket] = self.pools.candidates[cand_idx].score_list_next;

            let cand = self.pools.candidates[cand_idx].clone();
            let sp = cand.which_set_pair;
            let astray_penalty = if cand.cluster_idx == NO_CLUSTER { comp } else { 0 };
            let compensated_limit = (score_limit - astray_penalty) as i32;

            let (fewer_score, fewer_prob, fewer_offset) = self.score_location(
                fewer_read,
                set_pair_direction(sp, fewer_read),
                cand.fewer_hits_location,
                cand.seed_offset,
                compensated_limit,
            );
            {
                let c = &mut self.pools.candidates[cand_idx];
                c.fewer_end_score = fewer_score;
                c.fewer_end_match_probability = fewer_prob;
                c.fewer_end_genome_offset = fewer_offset;
            }
            log::debug!(
                "scored fewer end candidate {} at {}, limit {}, score {}",
                cand_idx,
                cand.fewer_hits_location,
                compensated_limit,
                fewer_score
            );
            debug_assert!(
                fewer_score == SCORE_OVER_LIMIT || fewer_score >= cand.best_possible_score as i32
            );
            if fewer_score == SCORE_OVER_LIMIT {
                continue;
            }

            let mut mate_idx = cand.mate_candidate_index;
            loop {
                let mate = self.pools.mates[sp][mate_idx];
                debug_assert!(locations_within(
                    mate.more_hits_location,
                    cand.fewer_hits_location,
                    max_spacing
                ));

                let remaining_budget = compensated_limit - fewer_score;
                if !locations_within(mate.more_hits_location, cand.fewer_hits_location, min_spacing)
                    && mate.best_possible_score as i32 <= remaining_budget
                {
                    if mate.score == SCORE_UNSCORED
                        || (mate.score == SCORE_OVER_LIMIT && mate.score_limit < remaining_budget)
                    {
                        let (score, prob, offset) = self.score_location(
                            more_read,
                            set_pair_direction(sp, more_read),
                            mate.more_hits_location,
                            mate.seed_offset,
                            remaining_budget,
                        );
                        let m = &mut self.pools.mates[sp][mate_idx];
                        m.score = score;
                        m.match_probability = prob;
                        m.genome_offset = offset;
                        m.score_limit = remaining_budget;
                        debug_assert!(
                            score == SCORE_OVER_LIMIT || score >= m.best_possible_score as i32
                        );
                        log::debug!(
                            "scored mate candidate {} at {}, limit {}, score {}",
                            mate_idx,
                            mate.more_hits_location,
                            remaining_budget,
                            score
                        );
                    }

                    let mate = self.pools.mates[sp][mate_idx];
                    if mate.score != SCORE_OVER_LIMIT {
                        let pair_score = mate.score + fewer_score;
                        let pair_probability = mate.match_probability * fewer_prob;
                        let updated = self.merge_pair_into_anchor(
                            cand_idx,
                            mate_idx,
                            pair_score,
                            pair_probability,
                        )?;

                        let compensated_score = pair_score + astray_penalty as i32;
                        if !in_revise
                            && updated
                            && compensated_score <= (max_k + comp) as i32
                            && compensated_score < self.best_compensated_score
                        {
                            self.best_compensated_score = compensated_score;
                            if !self.opts.no_ukkonen {
                                score_limit = compensated_score as u32 + extra + comp;
                            }
                        }
                    }
                }

                if mate_idx == 0
                    || !locations_within(
                        self.pools.mates[sp][mate_idx - 1].more_hits_location,
                        cand.fewer_hits_location,
                        max_spacing,
                    )
                {
                    break;
                }
                mate_idx -= 1;
            }
        }
        Ok(())
    }

    /// Route a confirmed pair through its merge anchor, finding or creating
    /// the anchor first. Returns whether the anchor's claim changed.
    fn merge_pair_into_anchor(
        &mut self,
        cand_idx: usize,
        mate_idx: usize,
        pair_score: i32,
        pair_probability: f64,
    ) -> Result<bool, AlignerError> {
        let cand = self.pools.candidates[cand_idx].clone();
        let sp = cand.which_set_pair;
        let mate = self.pools.mates[sp][mate_idx];
        let adjusted_fewer = offset_location(cand.fewer_hits_location, cand.fewer_end_genome_offset);
        let adjusted_more = offset_location(mate.more_hits_location, mate.genome_offset);

        let mut anchor_idx = cand.merge_anchor;
        if anchor_idx.is_none() {
            // Neighbors in the pool are nearby loci; one of them may have
            // already claimed an anchor for this locus pair.
            for j in (0..cand_idx).rev() {
                let mc = &self.pools.candidates[j];
                if mc.which_set_pair != sp {
                    continue;
                }
                if !locations_within(mc.fewer_hits_location, adjusted_fewer, ANCHOR_SEARCH_WINDOW) {
                    break;
                }
                if mc.merge_anchor.is_some() {
                    anchor_idx = mc.merge_anchor;
                    break;
                }
            }
            if anchor_idx.is_none() {
                for j in cand_idx + 1..self.pools.candidates.len() {
                    let mc = &self.pools.candidates[j];
                    if mc.which_set_pair != sp {
                        continue;
                    }
                    if !locations_within(mc.fewer_hits_location, adjusted_fewer, ANCHOR_SEARCH_WINDOW)
                    {
                        break;
                    }
                    if mc.merge_anchor.is_some() {
                        anchor_idx = mc.merge_anchor;
                        break;
                    }
                }
            }
        }

        match anchor_idx {
            None => {
                let idx = self.pools.push_anchor(MergeAnchor::new(
                    adjusted_more,
                    adjusted_fewer,
                    pair_probability,
                    pair_score,
                    cand.cluster_idx,
                    cand_idx,
                    mate_idx,
                ))?;
                self.pools.candidates[cand_idx].merge_anchor = Some(idx);
                Ok(true)
            }
            Some(idx) => {
                self.pools.candidates[cand_idx].merge_anchor = Some(idx);
                Ok(self.pools.anchors[idx].check_merge(
                    adjusted_more,
                    adjusted_fewer,
                    pair_probability,
                    pair_score,
                    cand.cluster_idx,
                    cand_idx,
                    mate_idx,
                    MAX_MERGE_DISTANCE,
                ))
            }
        }
    }

    /// Score one end at one location: the tail beyond the seed forward,
    /// then the head before the seed in reverse, probabilities multiplied
    /// with the seed's own match prior. `(-1, 0.0, 0)` when the limit is
    /// exceeded or the location is past the end of the genome.
    pub(crate) fn score_location(
        &mut self,
        which_read: usize,
        direction: Direction,
        location: GenomeLocation,
        seed_offset: u64,
        score_limit: i32,
    ) -> (i32, f64, i32) {
        self.n_locations_scored += 1;
        if score_limit < 0 {
            return (SCORE_OVER_LIMIT, 0.0, 0);
        }

        let index: &'g I = self.index;
        let genome = index.genome();
        let d = direction.index();
        let read_len = self.read_len[which_read];
        let seed_offset = seed_offset as usize;
        let tail_start = seed_offset + self.seed_len;
        debug_assert!(tail_start <= read_len);

        debug_assert_eq!(
            genome.substring(location + seed_offset as u64, self.seed_len as u64),
            Some(&self.data[which_read][d][seed_offset..tail_start]),
            "seed must match where the index said it does"
        );

        let tail_len = read_len - tail_start;
        let (forward_score, forward_prob) = if tail_len == 0 {
            (0, 1.0)
        } else {
            let Some(fwd_text) = genome.substring(
                location + tail_start as u64,
                (tail_len + score_limit as usize + 1) as u64,
            ) else {
                return (SCORE_OVER_LIMIT, 0.0, 0);
            };
            match self.lv.compute(
                fwd_text,
                &self.data[which_read][d][tail_start..],
                &self.quality[which_read][d][tail_start..],
                score_limit,
            ) {
                Some(result) => result,
                None => return (SCORE_OVER_LIMIT, 0.0, 0),
            }
        };

        let limit_left = score_limit - forward_score;
        let Some(head_text) = genome.substring_ending_at(
            location + seed_offset as u64,
            (seed_offset + limit_left as usize + 1) as u64,
        ) else {
            // An empty head is only fine when there is nothing to score.
            if seed_offset == 0 {
                let prob = forward_prob * (1.0 - SNP_PROB).powi(self.seed_len as i32);
                return (forward_score, prob, 0);
            }
            return (SCORE_OVER_LIMIT, 0.0, 0);
        };
        self.rev_text_buf.clear();
        self.rev_text_buf.extend(head_text.iter().rev());

        let reversed_head = &self.reversed_data[which_read][d][read_len - seed_offset..];
        let reversed_quality =
            &self.quality[which_read][direction.opposite().index()][read_len - seed_offset..];
        let Some((head_score, head_prob, text_shift)) = self.lv.compute_reverse(
            &self.rev_text_buf,
            reversed_head,
            reversed_quality,
            limit_left,
        ) else {
            return (SCORE_OVER_LIMIT, 0.0, 0);
        };

        let score = forward_score + head_score;
        debug_assert!(score <= score_limit);
        let probability =
            forward_prob * head_prob * (1.0 - SNP_PROB).powi(self.seed_len as i32);
        (score, probability, -text_shift)
    }

    /// Vote each good-enough anchor's cluster once for this pair.
    pub fn align_phase_3_increment_cluster(&mut self, ctx: &mut ClusterContext<'_>) {
        let comp = self.opts.cluster_ed_compensation as i32;
        let cutoff = self.best_compensated_score + self.opts.extra_search_depth as i32;
        for anchor in &self.pools.anchors {
            let astray = if anchor.cluster_idx == NO_CLUSTER { comp } else { 0 };
            if anchor.pair_score + astray <= cutoff && anchor.cluster_idx != NO_CLUSTER {
                ctx.increment_once(anchor.cluster_idx as usize);
            }
        }
    }

    /// Recompute the best compensated score now that cluster validity is
    /// known. Returns whether it changed.
    pub fn align_phase_3_correct_best_score(&mut self, ctx: &ClusterContext<'_>) -> bool {
        let comp = self.opts.cluster_ed_compensation as i32;
        let mut new_best = self.best_score_sentinel();
        for anchor in &self.pools.anchors {
            let astray = if ctx.is_valid(anchor.cluster_idx) { 0 } else { comp };
            new_best = new_best.min(anchor.pair_score + astray);
        }
        if new_best != self.best_compensated_score {
            self.best_compensated_score = new_best;
            true
        } else {
            false
        }
    }

    /// Tally the probability mass near the best score and count how many
    /// anchors qualify as results. The second return is true when the
    /// caller's buffer cannot hold them.
    pub fn align_phase_3_count_results(
        &mut self,
        max_edit_distance_for_secondary_results: i32,
        secondary_buffer_size: usize,
        cluster: Option<&ClusterContext<'_>>,
    ) -> (usize, bool) {
        let comp = self.opts.cluster_ed_compensation as i32;
        let mapq_cutoff = self.best_compensated_score + self.opts.extra_search_depth as i32;
        let result_cutoff = self.best_compensated_score + max_edit_distance_for_secondary_results;

        let mut probability_of_all_pairs = 0.0;
        let mut n_results = 0usize;
        for anchor in &self.pools.anchors {
            let valid = cluster.is_some_and(|c| c.is_valid(anchor.cluster_idx));
            let (astray, probability_penalty) = if valid {
                (0, 1.0)
            } else {
                (comp, self.opts.unclustered_penalty)
            };
            let compensated_score = anchor.pair_score + astray;
            if compensated_score <= mapq_cutoff {
                probability_of_all_pairs += anchor.match_probability * probability_penalty;
            }
            if compensated_score <= result_cutoff {
                n_results += 1;
            }
        }
        self.probability_of_all_pairs = probability_of_all_pairs;
        (n_results, n_results > secondary_buffer_size)
    }

    /// Write every qualifying anchor into the secondary buffer, then pull
    /// the best `(compensated score, probability)` result out as the
    /// primary. Returns the number of secondaries left in the buffer.
    pub fn align_phase_3_generate_results(
        &mut self,
        max_edit_distance_for_secondary_results: i32,
        cluster: Option<&ClusterContext<'_>>,
        secondary_results: &mut [PairedAlignmentResult],
        best_result: &mut PairedAlignmentResult,
    ) -> usize {
        let comp = self.opts.cluster_ed_compensation as i32;
        let result_cutoff = self.best_compensated_score + max_edit_distance_for_secondary_results;
        let more_read = self.read_with_more_hits;
        let fewer_read = self.read_with_fewer_hits;

        let mut n = 0usize;
        let mut best_idx: Option<usize> = None;
        for anchor in &self.pools.anchors {
            let valid = cluster.is_some_and(|c| c.is_valid(anchor.cluster_idx));
            let (astray, probability_penalty, effective_cluster) = if valid {
                (0, 1.0, anchor.cluster_idx)
            } else {
                (comp, self.opts.unclustered_penalty, NO_CLUSTER)
            };
            let compensated_score = anchor.pair_score + astray;
            if compensated_score > result_cutoff {
                continue;
            }
            debug_assert!(n < secondary_results.len());

            let cand = &self.pools.candidates[anchor.candidate];
            let mate = &self.pools.mates[cand.which_set_pair][anchor.mate];
            let sp = cand.which_set_pair;

            let result = &mut secondary_results[n];
            *result = PairedAlignmentResult::not_found();
            result.aligned_as_pair = true;
            result.from_align_together = true;
            result.location[more_read] = anchor.more_hits_location;
            result.location[fewer_read] = anchor.fewer_hits_location;
            result.direction[more_read] = set_pair_direction(sp, more_read);
            result.direction[fewer_read] = set_pair_direction(sp, fewer_read);
            result.score[more_read] = mate.score;
            result.score[fewer_read] = cand.fewer_end_score;
            result.status = [AlignmentStatus::MultipleHits; 2];
            result.probability = anchor.match_probability * probability_penalty;
            result.compensated_score = compensated_score;
            result.cluster_idx = effective_cluster;

            let better = match best_idx {
                None => true,
                Some(b) => {
                    let best = &secondary_results[b];
                    compensated_score < best.compensated_score
                        || (compensated_score == best.compensated_score
                            && secondary_results[n].probability > best.probability)
                }
            };
            if better {
                best_idx = Some(n);
            }
            n += 1;
        }

        match best_idx {
            Some(b) => {
                *best_result = secondary_results[b].clone();
                secondary_results[b] = secondary_results[n - 1].clone();
                n -= 1;
                self.best_compensated_score = best_result.compensated_score;
            }
            None => {
                *best_result = PairedAlignmentResult::not_found();
                log::debug!("no sufficiently good pairs found");
            }
        }
        n
    }
}
