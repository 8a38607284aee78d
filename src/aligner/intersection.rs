// Phase 2: intersect the two ends' hit streams.
//
// For each set pair the engine co-walks the fewer-hits and more-hits sides
// in descending genome order. The more side is pulled down to within
// `max_spacing` of the fewer cursor; every more-side hit in the window
// becomes a mate candidate, and the fewer-side hit becomes a scoring
// candidate if the combined lower bound survives the edit-distance budget.
// Loop invariant: the fewer cursor is the highest location not yet
// considered; mate candidates above it within the window are already
// pooled.

use crate::cluster::NO_CLUSTER;
use crate::genome::{locations_within, GenomeLocation, INVALID_GENOME_LOCATION};
use crate::index::SeedIndex;

use super::candidates::{ScoringCandidate, ScoringMateCandidate, SCORE_UNSCORED};
use super::{AlignerError, IntersectingPairedEndAligner, NUM_SET_PAIRS};

/// Cursor state for one orientation pairing.
#[derive(Debug, Clone)]
pub(crate) struct SetPairState {
    pub last_loc_fewer: GenomeLocation,
    pub last_seed_fewer: u64,
    pub last_loc_more: GenomeLocation,
    pub last_seed_more: u64,
    pub out_of_more_hits: bool,
    pub no_more_locus: bool,
}

impl Default for SetPairState {
    fn default() -> Self {
        SetPairState {
            last_loc_fewer: 0,
            last_seed_fewer: 0,
            last_loc_more: INVALID_GENOME_LOCATION,
            last_seed_more: 0,
            out_of_more_hits: false,
            no_more_locus: true,
        }
    }
}

/// What one `move_locus` step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    /// Cursors are within pairing range; add candidates.
    InRange,
    /// The fewer side advanced; re-check before adding.
    AdvancedFewer,
    /// This set pair is exhausted.
    Done,
}

impl<'g, I: SeedIndex> IntersectingPairedEndAligner<'g, I> {
    /// Start phase 2: position the fewer-side cursor of each set pair at
    /// its highest hit. Returns false when neither set pair has any locus.
    pub fn align_phase_2_init(&mut self) -> bool {
        let mut keep_going = false;
        let fewer = self.read_with_fewer_hits;
        for sp in 0..NUM_SET_PAIRS {
            self.set_pairs[sp] = SetPairState::default();
            match self.hit_set_mut(sp, fewer).get_first_hit() {
                Some((loc, seed_offset)) => {
                    self.set_pairs[sp].last_loc_fewer = loc;
                    self.set_pairs[sp].last_seed_fewer = seed_offset;
                    self.set_pairs[sp].no_more_locus = false;
                    keep_going = true;
                }
                None => self.set_pairs[sp].no_more_locus = true,
            }
        }
        keep_going
    }

    /// Highest fewer-side locus still pending across live set pairs.
    pub fn align_phase_2_get_locus(&self) -> Option<GenomeLocation> {
        self.set_pairs
            .iter()
            .filter(|s| !s.no_more_locus)
            .map(|s| s.last_loc_fewer)
            .max()
    }

    /// Run the intersection until every live set pair's fewer cursor has
    /// passed `target_loc` (or ran out). Candidates added during this call
    /// are tagged with `cluster_idx`. Returns whether any set pair still
    /// has loci left.
    pub fn align_phase_2_to_target_loc(
        &mut self,
        target_loc: GenomeLocation,
        cluster_idx: i32,
    ) -> Result<bool, AlignerError> {
        let mut keep_going = true;
        let mut target_not_met = self
            .set_pairs
            .iter()
            .any(|s| !s.no_more_locus && s.last_loc_fewer > target_loc);

        while keep_going && target_not_met {
            keep_going = false;
            for sp in 0..NUM_SET_PAIRS {
                if self.set_pairs[sp].no_more_locus {
                    continue;
                }
                match self.align_phase_2_move_locus(sp) {
                    StepOutcome::Done => {
                        self.set_pairs[sp].no_more_locus = true;
                        continue;
                    }
                    StepOutcome::AdvancedFewer => {
                        keep_going = true;
                        continue;
                    }
                    StepOutcome::InRange => {}
                }

                let past_target = self.set_pairs[sp].last_loc_fewer > target_loc;
                target_not_met = target_not_met || past_target;
                if past_target {
                    let done = self.align_phase_2_add_candidates(sp, cluster_idx)?;
                    self.set_pairs[sp].no_more_locus = done;
                    keep_going = keep_going || !done;
                }
            }
        }

        Ok(self.set_pairs.iter().any(|s| !s.no_more_locus))
    }

    /// Whole-genome intersection: everything down to locus 0, unclustered.
    pub fn align_phase_2(&mut self) -> Result<(), AlignerError> {
        if self.align_phase_2_init() {
            self.align_phase_2_to_target_loc(0, NO_CLUSTER)?;
        }
        Ok(())
    }

    fn align_phase_2_move_locus(&mut self, sp: usize) -> StepOutcome {
        let max_spacing = self.opts.max_spacing;
        let more = self.read_with_more_hits;
        let fewer = self.read_with_fewer_hits;

        // Pull the more side down into range of the fewer cursor.
        let fewer_loc = self.set_pairs[sp].last_loc_fewer;
        if self.set_pairs[sp].last_loc_more > fewer_loc.saturating_add(max_spacing) {
            match self
                .hit_set_mut(sp, more)
                .get_next_hit_less_than_or_equal_to(fewer_loc.saturating_add(max_spacing))
            {
                Some((loc, seed_offset)) => {
                    self.set_pairs[sp].last_loc_more = loc;
                    self.set_pairs[sp].last_seed_more = seed_offset;
                }
                None => return StepOutcome::Done,
            }
        }

        // If the more side fell below the window and no pooled mate covers
        // the fewer cursor, the fewer cursor has no mates: skip it ahead.
        let state = &self.set_pairs[sp];
        let more_below_window = state.last_loc_more.saturating_add(max_spacing)
            < state.last_loc_fewer
            || state.out_of_more_hits;
        let last_mate_covers = self.pools.mates[sp].last().is_some_and(|m| {
            locations_within(m.more_hits_location, state.last_loc_fewer, max_spacing)
        });
        if more_below_window && !last_mate_covers {
            if state.out_of_more_hits {
                return StepOutcome::Done;
            }
            let more_loc = state.last_loc_more;
            match self
                .hit_set_mut(sp, fewer)
                .get_next_hit_less_than_or_equal_to(more_loc.saturating_add(max_spacing))
            {
                Some((loc, seed_offset)) => {
                    self.set_pairs[sp].last_loc_fewer = loc;
                    self.set_pairs[sp].last_seed_fewer = seed_offset;
                    StepOutcome::AdvancedFewer
                }
                None => StepOutcome::Done,
            }
        } else {
            StepOutcome::InRange
        }
    }

    /// Pool every more-side hit within the window, then the fewer-side hit
    /// itself if the pair's combined lower bound fits the budget. Returns
    /// true when the fewer side is exhausted.
    fn align_phase_2_add_candidates(
        &mut self,
        sp: usize,
        cluster_idx: i32,
    ) -> Result<bool, AlignerError> {
        let max_spacing = self.opts.max_spacing;
        let more = self.read_with_more_hits;
        let fewer = self.read_with_fewer_hits;
        let budget = self.opts.max_k + self.opts.extra_search_depth;

        while self.set_pairs[sp].last_loc_more.saturating_add(max_spacing)
            >= self.set_pairs[sp].last_loc_fewer
            && !self.set_pairs[sp].out_of_more_hits
        {
            let best_possible_more = if self.opts.no_truncation {
                0
            } else {
                self.hit_set_mut(sp, more)
                    .compute_best_possible_score_for_current_hit()
            };
            let state = &self.set_pairs[sp];
            let mate = ScoringMateCandidate::new(
                state.last_loc_more,
                best_possible_more,
                state.last_seed_more,
            );
            log::debug!(
                "set pair {}: mate candidate {} at {}, best possible {}",
                sp,
                self.pools.mates[sp].len(),
                mate.more_hits_location,
                best_possible_more
            );
            self.pools.push_mate(sp, mate)?;

            match self.hit_set_mut(sp, more).get_next_lower_hit() {
                Some((loc, seed_offset)) => {
                    self.set_pairs[sp].last_loc_more = loc;
                    self.set_pairs[sp].last_seed_more = seed_offset;
                }
                None => {
                    self.set_pairs[sp].last_loc_more = 0;
                    self.set_pairs[sp].out_of_more_hits = true;
                    break;
                }
            }
        }

        // The fewer-side lower bound plus the cheapest in-window mate's
        // bound decide the candidate's bucket. The scan runs from the pool
        // tail because mates are appended in descending location order.
        let best_possible_fewer = if self.opts.no_truncation {
            0
        } else {
            self.hit_set_mut(sp, fewer)
                .compute_best_possible_score_for_current_hit()
        };

        let fewer_loc = self.set_pairs[sp].last_loc_fewer;
        let mut lowest_mate_best = budget;
        for mate in self.pools.mates[sp].iter().rev() {
            if mate.more_hits_location > fewer_loc.saturating_add(max_spacing) {
                break;
            }
            lowest_mate_best = lowest_mate_best.min(mate.best_possible_score);
        }

        let cluster_penalty = if cluster_idx == NO_CLUSTER {
            self.opts.cluster_ed_compensation
        } else {
            0
        };

        if lowest_mate_best + best_possible_fewer + cluster_penalty <= budget {
            let bucket = if self.opts.no_ordered_evaluation {
                0
            } else {
                (lowest_mate_best + best_possible_fewer + cluster_penalty) as usize
            };
            let state = &self.set_pairs[sp];
            let candidate = ScoringCandidate {
                fewer_hits_location: state.last_loc_fewer,
                which_set_pair: sp,
                mate_candidate_index: self.pools.mates[sp].len() - 1,
                seed_offset: state.last_seed_fewer,
                best_possible_score: best_possible_fewer,
                score_list_next: None,
                cluster_idx,
                merge_anchor: None,
                fewer_end_score: SCORE_UNSCORED,
                fewer_end_match_probability: 0.0,
                fewer_end_genome_offset: 0,
            };
            log::debug!(
                "set pair {}: candidate {} at {}, bucket {}",
                sp,
                self.pools.candidates.len(),
                state.last_loc_fewer,
                bucket
            );
            self.pools.push_candidate(candidate, bucket)?;
        }

        match self.hit_set_mut(sp, fewer).get_next_lower_hit() {
            Some((loc, seed_offset)) => {
                self.set_pairs[sp].last_loc_fewer = loc;
                self.set_pairs[sp].last_seed_fewer = seed_offset;
                Ok(false)
            }
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;
    use crate::index::{HashSeedIndex, HashSeedIndex64};
    use crate::opts::AlignerOptions;
    use crate::read::Read;

    // A genome with read0's sequence at 1000 and read1's reverse
    // complement at 1300, embedded in alternating filler that cannot
    // produce accidental seed hits.
    fn fixture() -> (HashSeedIndex64, Read, Read) {
        let mut bases = Vec::new();
        while bases.len() < 2000 {
            bases.extend_from_slice(b"ACGGTCAG");
        }
        bases.truncate(2000);
        let r0 = b"TTCAGGACTTCGAATCCGGTATCCGATAAGTT".to_vec();
        let r1_site = b"GATCCTTGAAGGCCTAGGCATTGCAAGGTCAA".to_vec();
        bases[1000..1032].copy_from_slice(&r0);
        bases[1300..1332].copy_from_slice(&r1_site);
        let genome = Genome::from_contigs(vec![("chr1".to_string(), bases)]);
        let index = HashSeedIndex::build(genome, 16, 1000);

        let read0 = Read::new("p/1", r0, vec![b'I'; 32]);
        let mut r1 = r1_site;
        r1.reverse();
        for b in r1.iter_mut() {
            *b = crate::read::complement(*b);
        }
        let read1 = Read::new("p/2", r1, vec![b'I'; 32]);
        (index, read0, read1)
    }

    fn options() -> AlignerOptions {
        AlignerOptions {
            min_spacing: 50,
            max_spacing: 500,
            ..AlignerOptions::default()
        }
    }

    #[test]
    fn test_phase_2_pools_spaced_pair() {
        let (index, read0, read1) = fixture();
        let mut engine = IntersectingPairedEndAligner::new(&index, options());
        assert!(!engine.align_phase_1(&read0, &read1).unwrap());
        assert!(engine.align_phase_2_init());
        engine.align_phase_2_to_target_loc(0, NO_CLUSTER).unwrap();

        let candidates = &engine.pools.candidates;
        assert!(!candidates.is_empty(), "expected pooled candidates");
        // Spacing bound: every candidate has some pooled mate within the
        // window on its set pair.
        for cand in candidates {
            let mates = &engine.pools.mates[cand.which_set_pair];
            assert!(mates.iter().any(|m| locations_within(
                m.more_hits_location,
                cand.fewer_hits_location,
                engine.opts.max_spacing
            )));
        }
    }

    #[test]
    fn test_phase_2_bucket_matches_lower_bound() {
        let (index, read0, read1) = fixture();
        let mut engine = IntersectingPairedEndAligner::new(&index, options());
        assert!(!engine.align_phase_1(&read0, &read1).unwrap());
        engine.align_phase_2().unwrap();

        // Walk the buckets; every candidate threaded in bucket b must have
        // been inserted with exactly that combined lower bound. Perfect
        // matches from the fixture land in bucket 0.
        assert!(engine.pools.buckets[0].is_some());
        let mut seen = 0;
        for b in 0..=engine.pools.max_used_bucket {
            let mut cursor = engine.pools.buckets[b];
            while let Some(idx) = cursor {
                seen += 1;
                cursor = engine.pools.candidates[idx].score_list_next;
            }
        }
        assert_eq!(seen, engine.pools.candidates.len());
    }

    #[test]
    fn test_phase_2_targeted_stops_at_locus() {
        let (index, read0, read1) = fixture();
        let mut engine = IntersectingPairedEndAligner::new(&index, options());
        assert!(!engine.align_phase_1(&read0, &read1).unwrap());
        assert!(engine.align_phase_2_init());

        // Everything in this fixture sits near locus 1000-1300; a target
        // above it adds nothing.
        engine.align_phase_2_to_target_loc(1500, 3).unwrap();
        let n_above = engine.pools.candidates.len();
        assert!(engine
            .pools
            .candidates
            .iter()
            .all(|c| c.fewer_hits_location > 1500 && c.cluster_idx == 3));

        engine.align_phase_2_to_target_loc(0, NO_CLUSTER).unwrap();
        assert!(engine.pools.candidates.len() > n_above);
        assert!(engine
            .pools
            .candidates
            .iter()
            .skip(n_above)
            .all(|c| c.cluster_idx == NO_CLUSTER));
    }
}
