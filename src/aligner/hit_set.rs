// Per-read, per-direction seed hit storage and the descending merge cursor.
//
// Each recorded lookup keeps a borrowed, descending-sorted hit list from the
// index plus a cursor. The three cursor operations serve a virtual merge of
// all lookups in descending genome order, always returning `hit -
// seed_offset` (the implied mapped start of the read). Lookups with
// remaining hits are threaded on an intrusive doubly-linked list over the
// lookup arena; slot 0 is the sentinel and unlinking happens the moment a
// cursor exhausts its list.
//
// Lookups whose seed offsets do not overlap form disjoint groups. At any
// locus, a group whose lookups all lack a nearby hit forces at least one
// edit, so the maximum miss count over groups lower-bounds the edit
// distance at that locus.

use crate::genome::{locations_within, GenomeLocation};
use crate::index::HitLocation;

const SENTINEL: usize = 0;

struct HashTableLookup<'g, L> {
    seed_offset: u64,
    hits: &'g [L],
    current_hit: usize,
    which_disjoint_set: usize,
    next: usize,
    prev: usize,
}

struct DisjointHitSet {
    count_of_exhausted_hits: u32,
    miss_count: u32,
}

pub struct HashTableHitSet<'g, L> {
    max_merge_distance: u64,
    lookups: Vec<HashTableLookup<'g, L>>,
    disjoint_sets: Vec<DisjointHitSet>,
    most_recent_location_returned: GenomeLocation,
}

impl<'g, L: HitLocation> HashTableHitSet<'g, L> {
    pub fn new(max_merge_distance: u64) -> Self {
        let mut set = HashTableHitSet {
            max_merge_distance,
            lookups: Vec::new(),
            disjoint_sets: Vec::new(),
            most_recent_location_returned: 0,
        };
        set.init();
        set
    }

    /// Reset for a new read pair; keeps the arena capacity.
    pub fn init(&mut self) {
        self.lookups.clear();
        self.lookups.push(HashTableLookup {
            seed_offset: 0,
            hits: &[],
            current_hit: 0,
            which_disjoint_set: 0,
            next: SENTINEL,
            prev: SENTINEL,
        });
        self.disjoint_sets.clear();
        self.most_recent_location_returned = 0;
    }

    /// Record one index lookup. Hits below the seed offset would map before
    /// the start of the genome and are trimmed off the tail.
    pub fn record_lookup(&mut self, seed_offset: u64, hits: &'g [L], begins_disjoint_hit_set: bool) {
        if begins_disjoint_hit_set || self.disjoint_sets.is_empty() {
            self.disjoint_sets.push(DisjointHitSet {
                count_of_exhausted_hits: 0,
                miss_count: 0,
            });
        }
        let which_disjoint_set = self.disjoint_sets.len() - 1;

        let keep = hits.partition_point(|&h| h.as_u64() >= seed_offset);
        let hits = &hits[..keep];
        if hits.is_empty() {
            self.disjoint_sets[which_disjoint_set].count_of_exhausted_hits += 1;
            return;
        }
        debug_assert!(hits.windows(2).all(|w| w[0] > w[1]), "hits must descend");

        let idx = self.lookups.len();
        let head_next = self.lookups[SENTINEL].next;
        self.lookups.push(HashTableLookup {
            seed_offset,
            hits,
            current_hit: 0,
            which_disjoint_set,
            next: head_next,
            prev: SENTINEL,
        });
        self.lookups[head_next].prev = idx;
        self.lookups[SENTINEL].next = idx;
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.lookups[idx].prev, self.lookups[idx].next);
        self.lookups[prev].next = next;
        self.lookups[next].prev = prev;
        self.lookups[idx].next = idx;
        self.lookups[idx].prev = idx;
    }

    /// Highest implied location over all lookups. Establishes the cursor
    /// for the descending walk.
    pub fn get_first_hit(&mut self) -> Option<(GenomeLocation, u64)> {
        let mut best: Option<(GenomeLocation, u64)> = None;
        for lookup in &self.lookups[1..] {
            if let Some(&hit) = lookup.hits.first() {
                let loc = hit.as_u64() - lookup.seed_offset;
                if best.map_or(true, |(b, _)| loc > b) {
                    best = Some((loc, lookup.seed_offset));
                }
            }
        }
        if let Some((loc, _)) = best {
            self.most_recent_location_returned = loc;
        }
        best
    }

    /// Advance past the most recently returned location and return the next
    /// lower one.
    pub fn get_next_lower_hit(&mut self) -> Option<(GenomeLocation, u64)> {
        let most_recent = self.most_recent_location_returned;
        let mut best: Option<(GenomeLocation, u64)> = None;
        let mut any_exhausted = false;

        for idx in 1..self.lookups.len() {
            let lookup = &mut self.lookups[idx];
            let n = lookup.hits.len();
            if lookup.current_hit != n
                && lookup.hits[lookup.current_hit].as_u64() - lookup.seed_offset == most_recent
            {
                lookup.current_hit += 1;
                if lookup.current_hit == n {
                    any_exhausted = true;
                }
            }
            if lookup.current_hit != n {
                let loc = lookup.hits[lookup.current_hit].as_u64() - lookup.seed_offset;
                if best.map_or(true, |(b, _)| loc > b) {
                    best = Some((loc, lookup.seed_offset));
                }
            }
        }

        // Unlink everything that ran dry this call.
        if any_exhausted {
            for idx in 1..self.lookups.len() {
                if self.lookups[idx].current_hit == self.lookups[idx].hits.len()
                    && self.lookups[idx].next != idx
                {
                    self.unlink(idx);
                }
            }
        }

        if let Some((loc, _)) = best {
            debug_assert!(loc < most_recent || most_recent == 0);
            self.most_recent_location_returned = loc;
        }
        best
    }

    /// Jump every cursor to its first hit implying a location `<= max_loc`
    /// and return the highest such location.
    pub fn get_next_hit_less_than_or_equal_to(
        &mut self,
        max_loc: GenomeLocation,
    ) -> Option<(GenomeLocation, u64)> {
        let mut best: Option<(GenomeLocation, u64)> = None;
        let mut any_exhausted = false;

        for idx in 1..self.lookups.len() {
            let lookup = &mut self.lookups[idx];
            let n = lookup.hits.len();
            if lookup.current_hit == n {
                continue;
            }
            let target = max_loc.saturating_add(lookup.seed_offset);
            // Descending order: entries > target form a prefix.
            let rel = lookup.hits[lookup.current_hit..].partition_point(|&h| h.as_u64() > target);
            let probe = lookup.current_hit + rel;
            lookup.current_hit = probe;
            if probe == n {
                any_exhausted = true;
                continue;
            }
            let loc = lookup.hits[probe].as_u64() - lookup.seed_offset;
            if best.map_or(true, |(b, _)| loc > b) {
                best = Some((loc, lookup.seed_offset));
            }
        }

        if any_exhausted {
            for idx in 1..self.lookups.len() {
                if self.lookups[idx].current_hit == self.lookups[idx].hits.len()
                    && self.lookups[idx].next != idx
                {
                    self.unlink(idx);
                }
            }
        }

        if let Some((loc, _)) = best {
            debug_assert!(loc <= max_loc);
            self.most_recent_location_returned = loc;
        }
        best
    }

    /// Lower bound on the edit distance of a read mapped at the most
    /// recently returned location: the worst disjoint group's count of
    /// lookups with no hit within the merge distance of that locus.
    pub fn compute_best_possible_score_for_current_hit(&mut self) -> u32 {
        for set in &mut self.disjoint_sets {
            set.miss_count = set.count_of_exhausted_hits;
        }

        let locus = self.most_recent_location_returned;
        let mut idx = self.lookups[SENTINEL].next;
        while idx != SENTINEL {
            let lookup = &self.lookups[idx];
            let anchor = locus.saturating_add(lookup.seed_offset);
            let cursor = lookup.current_hit;
            let near_current = cursor != lookup.hits.len()
                && locations_within(
                    lookup.hits[cursor].as_u64(),
                    anchor,
                    self.max_merge_distance,
                );
            let near_previous = cursor != 0
                && locations_within(
                    lookup.hits[cursor - 1].as_u64(),
                    anchor,
                    self.max_merge_distance,
                );
            if !near_current && !near_previous {
                self.disjoint_sets[lookup.which_disjoint_set].miss_count += 1;
            }
            idx = lookup.next;
        }

        self.disjoint_sets
            .iter()
            .map(|s| s.miss_count)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit_set<'g>(lookups: &[(u64, &'g [u64], bool)]) -> HashTableHitSet<'g, u64> {
        let mut set = HashTableHitSet::new(31);
        for &(offset, hits, begins) in lookups {
            set.record_lookup(offset, hits, begins);
        }
        set
    }

    #[test]
    fn test_first_hit_is_global_max() {
        let a = [1000u64, 500, 100];
        let b = [800u64, 400];
        let mut set = hit_set(&[(0, &a[..], true), (10, &b[..], false)]);
        assert_eq!(set.get_first_hit(), Some((1000, 0)));
    }

    #[test]
    fn test_descending_walk_merges_lookups() {
        // Offsets shift the implied locations: (0, [1000,500]) and
        // (10, [800, 510]) imply 1000, 790, 500, 500 -- the duplicate 500
        // collapses.
        let a = [1000u64, 500];
        let b = [800u64, 510];
        let mut set = hit_set(&[(0, &a[..], true), (10, &b[..], false)]);
        let mut walk = Vec::new();
        let mut cursor = set.get_first_hit();
        while let Some((loc, _)) = cursor {
            walk.push(loc);
            cursor = set.get_next_lower_hit();
        }
        assert_eq!(walk, vec![1000, 790, 500]);
        // Strictly decreasing.
        assert!(walk.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_next_hit_less_than_or_equal_to() {
        let a = [1000u64, 700, 300];
        let b = [950u64, 720, 250];
        let mut set = hit_set(&[(0, &a[..], true), (0, &b[..], false)]);
        assert_eq!(set.get_first_hit(), Some((1000, 0)));
        assert_eq!(set.get_next_hit_less_than_or_equal_to(800), Some((720, 0)));
        assert_eq!(set.get_next_hit_less_than_or_equal_to(400), Some((300, 0)));
        assert_eq!(set.get_next_hit_less_than_or_equal_to(100), None);
    }

    #[test]
    fn test_upper_bound_accounts_for_seed_offset() {
        // Hit 505 with offset 5 implies location 500, reachable under
        // max_loc 500 because the probe target is 505.
        let a = [505u64];
        let mut set = hit_set(&[(5, &a[..], true)]);
        assert_eq!(set.get_next_hit_less_than_or_equal_to(500), Some((500, 5)));
    }

    #[test]
    fn test_trim_hits_below_seed_offset() {
        // A hit of 3 with seed offset 5 would map before the genome start.
        let a = [900u64, 3];
        let mut set = hit_set(&[(5, &a[..], true)]);
        assert_eq!(set.get_first_hit(), Some((895, 5)));
        assert_eq!(set.get_next_lower_hit(), None);
    }

    #[test]
    fn test_best_possible_score_counts_group_misses() {
        // Two disjoint groups. Group 0 has a hit at the locus; group 1 has
        // neither a near hit nor any hit at all in one lookup.
        let near = [1000u64];
        let far = [5000u64];
        let empty: [u64; 0] = [];
        let mut set = hit_set(&[(0, &near[..], true), (0, &far[..], true), (0, &empty[..], false)]);
        assert_eq!(set.get_first_hit(), Some((5000, 0)));
        // At locus 5000: group 0 misses (1000 is far), group 1 has the far
        // lookup near (it IS 5000) but one exhausted lookup.
        assert_eq!(set.compute_best_possible_score_for_current_hit(), 1);
        assert_eq!(set.get_next_lower_hit(), Some((1000, 0)));
        // At locus 1000: group 0's hit is near, so only group 1's exhausted
        // lookup counts (its other lookup ran dry and was unlinked).
        assert_eq!(set.compute_best_possible_score_for_current_hit(), 1);
    }

    #[test]
    fn test_exhausted_lookup_unlinked() {
        let a = [1000u64];
        let b = [900u64, 800];
        let mut set = hit_set(&[(0, &a[..], true), (0, &b[..], true)]);
        assert_eq!(set.get_first_hit(), Some((1000, 0)));
        assert_eq!(set.get_next_lower_hit(), Some((900, 0)));
        // Lookup a is now exhausted and unlinked; only b's group can miss.
        assert_eq!(set.get_next_lower_hit(), Some((800, 0)));
        let score = set.compute_best_possible_score_for_current_hit();
        assert_eq!(score, 0);
    }

    #[test]
    fn test_zero_hit_lookup_counts_exhausted() {
        let a = [1000u64];
        let empty: [u64; 0] = [];
        let mut set = hit_set(&[(0, &a[..], true), (10, &empty[..], false)]);
        assert_eq!(set.get_first_hit(), Some((1000, 0)));
        assert_eq!(set.compute_best_possible_score_for_current_hit(), 1);
    }
}
