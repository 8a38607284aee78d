// Bounded edit-distance scoring.
//
// Classic Landau-Vishkin diagonal search with a hard score limit: O(k^2)
// state instead of a full DP matrix, early exit as soon as the pattern is
// consumed. The scorer also reports a match probability derived from base
// qualities (mismatches), a flat gap prior (indels), and the per-base SNP
// prior for matched positions, so candidate mappings can be compared by
// probability as well as score.
//
// Two directions: `compute` walks text and pattern left to right; the
// `_reverse` variant takes pre-reversed slices and additionally reports how
// much more (or less) text than pattern it consumed, which is the left
// shift of the mapped start when the head of a read carries indels.

use crate::read::{phred_to_error_probability, QUALITY_BASE};

/// Per-base prior probability that the sample differs from the reference.
pub const SNP_PROB: f64 = 0.001;

/// Flat per-base prior for an indel.
const GAP_PROB: f64 = 2.5e-4;

// Backtrack moves.
const MOVE_MISMATCH: u8 = 0;
const MOVE_TEXT_EXTRA: u8 = 1; // diagonal +1, extra text base consumed
const MOVE_PATTERN_EXTRA: u8 = 2; // diagonal -1, extra pattern base consumed

/// Reusable scratch space; one instance per engine, no allocation per call
/// once warm.
pub struct LandauVishkin {
    rows: Vec<i32>,
    moves: Vec<u8>,
}

impl Default for LandauVishkin {
    fn default() -> Self {
        Self::new()
    }
}

impl LandauVishkin {
    pub fn new() -> Self {
        LandauVishkin {
            rows: Vec::new(),
            moves: Vec::new(),
        }
    }

    /// Edit distance between `pattern` (fully consumed) and a prefix of
    /// `text`, up to `limit` edits. Returns `(score, match_probability)` or
    /// `None` when the distance exceeds the limit (or the limit is
    /// negative).
    pub fn compute(
        &mut self,
        text: &[u8],
        pattern: &[u8],
        quality: &[u8],
        limit: i32,
    ) -> Option<(i32, f64)> {
        self.search(text, pattern, quality, limit)
            .map(|(score, prob, _)| (score, prob))
    }

    /// Reverse-direction scoring over pre-reversed slices. The third field
    /// of the result is `text_consumed - pattern_len`: positive when the
    /// alignment ate extra reference bases (mapped start shifts left),
    /// negative when it ate fewer.
    pub fn compute_reverse(
        &mut self,
        text_rev: &[u8],
        pattern_rev: &[u8],
        quality_rev: &[u8],
        limit: i32,
    ) -> Option<(i32, f64, i32)> {
        self.search(text_rev, pattern_rev, quality_rev, limit)
    }

    fn search(
        &mut self,
        text: &[u8],
        pattern: &[u8],
        quality: &[u8],
        limit: i32,
    ) -> Option<(i32, f64, i32)> {
        if limit < 0 {
            return None;
        }
        let plen = pattern.len();
        if plen == 0 {
            return Some((0, 1.0, 0));
        }
        debug_assert_eq!(plen, quality.len());

        let k = limit as usize;
        let stride = 2 * k + 1;
        self.rows.clear();
        self.rows.resize((k + 1) * stride, -1);
        self.moves.clear();
        self.moves.resize((k + 1) * stride, MOVE_MISMATCH);
        let center = k as i32;
        let at = |e: usize, d: i32| -> usize { e * stride + (d + center) as usize };

        // e = 0: single diagonal, pure match run.
        let run = common_prefix(pattern, text);
        self.rows[at(0, 0)] = run as i32;
        if run == plen {
            return Some((0, powi(1.0 - SNP_PROB, plen), 0));
        }

        for e in 1..=k {
            for d in -(e as i32)..=(e as i32) {
                let mut best = -1i32;
                let mut mv = MOVE_MISMATCH;

                // Mismatch: both sides advance one.
                let prev = self.rows[at(e - 1, d)];
                if prev >= 0 {
                    best = prev + 1;
                    mv = MOVE_MISMATCH;
                }
                // Extra text base: diagonal grows, row unchanged.
                if (-(e as i32 - 1)..=(e as i32 - 1)).contains(&(d - 1)) {
                    let prev = self.rows[at(e - 1, d - 1)];
                    if prev >= 0 && prev > best {
                        best = prev;
                        mv = MOVE_TEXT_EXTRA;
                    }
                }
                // Extra pattern base: diagonal shrinks, row advances one.
                if (-(e as i32 - 1)..=(e as i32 - 1)).contains(&(d + 1)) {
                    let prev = self.rows[at(e - 1, d + 1)];
                    if prev >= 0 && prev + 1 > best {
                        best = prev + 1;
                        mv = MOVE_PATTERN_EXTRA;
                    }
                }

                if best < 0 {
                    continue;
                }
                let mut row = best.min(plen as i32) as usize;
                // Extend the diagonal with free matches, bounded by both
                // sequences.
                let text_pos = row as i64 + d as i64;
                if text_pos < 0 || text_pos > text.len() as i64 {
                    self.rows[at(e, d)] = -1;
                    continue;
                }
                row += common_prefix(&pattern[row..], &text[text_pos as usize..]);
                self.rows[at(e, d)] = row as i32;
                self.moves[at(e, d)] = mv;

                if row == plen {
                    let prob = self.backtrack_probability(quality, e, d, plen, &at);
                    return Some((e as i32, prob, d));
                }
            }
        }
        None
    }

    /// Walk the move chain back to e = 0, collecting edit kinds and the
    /// pattern positions of mismatches.
    fn backtrack_probability(
        &self,
        quality: &[u8],
        e_final: usize,
        d_final: i32,
        plen: usize,
        at: &dyn Fn(usize, i32) -> usize,
    ) -> f64 {
        let mut prob = 1.0;
        let mut pattern_bases_in_edits = 0usize;
        let mut e = e_final;
        let mut d = d_final;
        while e > 0 {
            match self.moves[at(e, d)] {
                MOVE_MISMATCH => {
                    // The mismatched base sits where the parent stopped.
                    let i = self.rows[at(e - 1, d)].clamp(0, plen as i32 - 1) as usize;
                    let q = quality[i].saturating_sub(QUALITY_BASE);
                    prob *= phred_to_error_probability(q) / 3.0;
                    pattern_bases_in_edits += 1;
                }
                MOVE_TEXT_EXTRA => {
                    prob *= GAP_PROB;
                    d -= 1;
                }
                MOVE_PATTERN_EXTRA => {
                    prob *= GAP_PROB;
                    pattern_bases_in_edits += 1;
                    d += 1;
                }
                _ => unreachable!(),
            }
            e -= 1;
        }
        prob * powi(1.0 - SNP_PROB, plen - pattern_bases_in_edits)
    }
}

#[inline]
fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

#[inline]
fn powi(base: f64, exp: usize) -> f64 {
    base.powi(exp as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qual(len: usize) -> Vec<u8> {
        vec![b'I'; len] // Phred 40
    }

    #[test]
    fn test_perfect_match() {
        let mut lv = LandauVishkin::new();
        let (score, prob) = lv
            .compute(b"ACGTACGTAA", b"ACGTACGT", &qual(8), 4)
            .unwrap();
        assert_eq!(score, 0);
        assert!((prob - (1.0 - SNP_PROB).powi(8)).abs() < 1e-12);
    }

    #[test]
    fn test_single_mismatch() {
        let mut lv = LandauVishkin::new();
        let (score, prob) = lv.compute(b"ACGAACGT", b"ACGTACGT", &qual(8), 4).unwrap();
        assert_eq!(score, 1);
        let (_, perfect) = lv.compute(b"ACGTACGT", b"ACGTACGT", &qual(8), 4).unwrap();
        assert!(prob < perfect);
    }

    #[test]
    fn test_deletion_in_pattern_shifts_text() {
        // Pattern is missing one text base: text consumes one extra.
        let mut lv = LandauVishkin::new();
        let (score, _prob, d) = lv
            .compute_reverse(b"ACGGTACG", b"ACGTACG", &qual(7), 4)
            .unwrap();
        assert_eq!(score, 1);
        assert_eq!(d, 1);
    }

    #[test]
    fn test_insertion_in_pattern() {
        let mut lv = LandauVishkin::new();
        let (score, _prob, d) = lv
            .compute_reverse(b"ACGTACG", b"ACGGTACG", &qual(8), 4)
            .unwrap();
        assert_eq!(score, 1);
        assert_eq!(d, -1);
    }

    #[test]
    fn test_limit_exceeded() {
        let mut lv = LandauVishkin::new();
        assert!(lv.compute(b"TTTTTTTT", b"ACGTACGT", &qual(8), 3).is_none());
        assert!(lv.compute(b"ACGAACGT", b"ACGTACGT", &qual(8), 0).is_none());
    }

    #[test]
    fn test_empty_pattern_scores_zero() {
        let mut lv = LandauVishkin::new();
        let (score, prob) = lv.compute(b"ACGT", b"", &[], 4).unwrap();
        assert_eq!(score, 0);
        assert_eq!(prob, 1.0);
    }

    #[test]
    fn test_low_quality_mismatch_more_probable() {
        let mut lv = LandauVishkin::new();
        let (_, prob_high_q) = lv.compute(b"ACGAACGT", b"ACGTACGT", &qual(8), 4).unwrap();
        let (_, prob_low_q) = lv
            .compute(b"ACGAACGT", b"ACGTACGT", &vec![b'#'; 8], 4)
            .unwrap();
        assert!(prob_low_q > prob_high_q);
    }
}
