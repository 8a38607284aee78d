// Aligner configuration.
//
// One flat options struct the CLI fills in and the engine borrows. Field
// groups mirror the phases that consume them.

/// Options for the intersecting paired-end aligner.
#[derive(Debug, Clone)]
pub struct AlignerOptions {
    // Input limits
    pub max_read_size: usize, // Reads longer than this are a caller contract violation
    pub max_hits: usize,      // Per-seed hit lists are truncated to this many entries
    pub max_big_hits: usize,  // A seed with >= this many hits is "popular" and skipped
    pub max_k: u32,           // Maximum edit distance for a reportable end

    // Seeding
    pub num_seeds_from_command_line: usize, // 0 = derive from seed_coverage
    pub seed_coverage: f64,                 // Target seed coverage when num_seeds is 0

    // Pairing
    pub min_spacing: u64, // Minimum distance between the two ends
    pub max_spacing: u64, // Maximum distance between the two ends

    // Scoring frontier
    pub extra_search_depth: u32, // Keep scoring this far past the best score found

    // Pools
    pub max_candidate_pool_size: usize,

    // Secondary results
    pub max_secondary_alignments_per_contig: i32, // <= 0 disables the per-contig cap

    // Evaluation switches
    pub no_ukkonen: bool,            // Disable score-limit tightening
    pub no_ordered_evaluation: bool, // Force all candidates into bucket 0
    pub no_truncation: bool,         // Zero all best-possible lower bounds

    // Finalization
    pub ignore_alignment_adjustments: bool,
    pub print_stats_mapq_limit: u8, // MAPQ above this marks an end SingleHit

    // Cluster scoring (zero / 1.0 turn the cluster path into a no-op)
    pub cluster_ed_compensation: u32, // Edit-distance penalty for unclustered mappings
    pub unclustered_penalty: f64,     // Probability weight for unclustered mappings
}

impl Default for AlignerOptions {
    fn default() -> Self {
        AlignerOptions {
            max_read_size: 400,
            max_hits: 16_000,
            max_big_hits: 16_000,
            max_k: 8,
            num_seeds_from_command_line: 0,
            seed_coverage: 4.0,
            min_spacing: 50,
            max_spacing: 1000,
            extra_search_depth: 2,
            max_candidate_pool_size: 1_000_000,
            max_secondary_alignments_per_contig: -1,
            no_ukkonen: false,
            no_ordered_evaluation: false,
            no_truncation: false,
            ignore_alignment_adjustments: false,
            print_stats_mapq_limit: 10,
            cluster_ed_compensation: 0,
            unclustered_penalty: 1.0,
        }
    }
}

impl AlignerOptions {
    /// Seeds to use for a read of `max_read_size`, honoring the command-line
    /// override.
    pub fn max_seeds(&self, seed_len: usize) -> usize {
        if self.num_seeds_from_command_line != 0 {
            self.num_seeds_from_command_line
        } else {
            ((self.max_read_size as f64 * self.seed_coverage) / seed_len as f64).ceil() as usize
        }
    }

    /// Highest priority bucket index that can ever be populated.
    pub fn max_bucket(&self) -> usize {
        (self.max_k + self.extra_search_depth + self.cluster_ed_compensation) as usize
    }
}
