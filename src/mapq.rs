// Mapping quality from the probability mass of candidate pairs.

/// Hard ceiling on reported MAPQ.
pub const MAX_MAPQ: i32 = 70;

/// Phred discount applied per popular seed skipped during seeding; skipped
/// seeds mean unexplored candidates the probability sum never saw.
const POPULAR_SEED_DISCOUNT: i32 = 3;

/// Phred discount per edit in the end's score; the probability ratio alone
/// overstates confidence in a high-edit placement.
const SCORE_DISCOUNT_PER_EDIT: i32 = 1;

/// Phred-scaled probability that the best pair is the true origin of the
/// read pair, given the summed probability of every candidate considered,
/// the end's edit-distance score, and the seeds skipped as popular.
pub fn compute_mapq(
    probability_of_all_pairs: f64,
    probability_of_best_pair: f64,
    score: i32,
    popular_seeds_skipped: usize,
) -> i32 {
    if probability_of_all_pairs <= 0.0 || probability_of_best_pair <= 0.0 {
        return 0;
    }
    let correctness = (probability_of_best_pair / probability_of_all_pairs).min(1.0);
    let residual = 1.0 - correctness;
    let base = if residual < 1e-7 {
        MAX_MAPQ
    } else {
        ((-10.0 * residual.log10()) as i32).min(MAX_MAPQ)
    };
    (base - POPULAR_SEED_DISCOUNT * popular_seeds_skipped as i32
        - SCORE_DISCOUNT_PER_EDIT * score.max(0))
    .max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_mapping_gets_max() {
        assert_eq!(compute_mapq(0.98, 0.98, 0, 0), MAX_MAPQ);
    }

    #[test]
    fn test_even_split_is_low() {
        let q = compute_mapq(1.0, 0.5, 0, 0);
        assert!(q <= 3, "two equal candidates should give ~3, got {}", q);
    }

    #[test]
    fn test_popular_seed_discount() {
        let full = compute_mapq(0.98, 0.98, 0, 0);
        let discounted = compute_mapq(0.98, 0.98, 0, 2);
        assert_eq!(full - discounted, 6);
    }

    #[test]
    fn test_score_discount() {
        let perfect = compute_mapq(0.98, 0.98, 0, 0);
        let three_edits = compute_mapq(0.98, 0.98, 3, 0);
        assert_eq!(perfect - three_edits, 3);
        // Sentinel scores never raise the result.
        assert_eq!(compute_mapq(0.98, 0.98, -1, 0), perfect);
    }

    #[test]
    fn test_no_probability_mass() {
        assert_eq!(compute_mapq(0.0, 0.0, 0, 0), 0);
    }

    #[test]
    fn test_never_negative() {
        assert_eq!(compute_mapq(1.0, 0.5, 0, 10), 0);
    }
}
