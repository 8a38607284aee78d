// Alignment adjustment.
//
// Mappings are made against the concatenated reference, so an end near a
// contig boundary can hang past it. The adjuster records the overhang as
// clipping and invalidates ends that fell outside every contig entirely.

use crate::genome::Genome;
use crate::results::{AlignmentStatus, PairedAlignmentResult, NUM_READS_PER_PAIR};

pub fn adjust_alignment(
    genome: &Genome,
    read_len: [usize; NUM_READS_PER_PAIR],
    result: &mut PairedAlignmentResult,
) {
    for r in 0..NUM_READS_PER_PAIR {
        if result.status[r] == AlignmentStatus::NotFound {
            continue;
        }
        let location = result.location[r];
        match genome.contig_num_at_location(location) {
            None => {
                result.status[r] = AlignmentStatus::NotFound;
                result.score[r] = -1;
                result.mapq[r] = 0;
            }
            Some(c) => {
                let contig = &genome.contigs()[c];
                let contig_end = contig.start + contig.length;
                let read_end = location + read_len[r] as u64;
                if read_end > contig_end {
                    let clipped = (read_end - contig_end) as u32;
                    result.clipping_for_read_adjustment[r] = clipped;
                    // Edits in the clipped tail were scored against bases
                    // past the contig; drop their share of the score
                    // (rounded up) so the compensated score reflects only
                    // the aligned portion.
                    if result.score[r] > 0 {
                        let len = read_len[r] as u64;
                        let deduction =
                            (result.score[r] as u64 * clipped as u64).div_ceil(len) as i32;
                        result.score[r] -= deduction.min(result.score[r]);
                    }
                }
            }
        }
    }
}
