// Alignment throughput over a synthetic genome.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use interpair::genome::Genome;
use interpair::index::HashSeedIndex32;
use interpair::read::{complement, Read};
use interpair::{AlignerOptions, IntersectingPairedEndAligner, PairedAlignmentResult};

const GENOME_LEN: usize = 200_000;
const READ_LEN: usize = 100;
const N_PAIRS: usize = 64;

fn random_bases(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
}

fn make_pairs(bases: &[u8], rng: &mut StdRng) -> Vec<(Read, Read)> {
    (0..N_PAIRS)
        .map(|i| {
            let loc0 = rng.gen_range(0..GENOME_LEN - 600);
            let loc1 = loc0 + rng.gen_range(150..450);
            let mut r0 = bases[loc0..loc0 + READ_LEN].to_vec();
            // A couple of sequencing errors per pair keeps the scorer busy.
            let e = rng.gen_range(0..READ_LEN);
            r0[e] = complement(r0[e]);
            let r1: Vec<u8> = bases[loc1..loc1 + READ_LEN]
                .iter()
                .rev()
                .map(|&b| complement(b))
                .collect();
            (
                Read::new(format!("b{}/1", i), r0, vec![b'I'; READ_LEN]),
                Read::new(format!("b{}/2", i), r1, vec![b'I'; READ_LEN]),
            )
        })
        .collect()
}

fn bench_align_pairs(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let bases = random_bases(&mut rng, GENOME_LEN);
    let pairs = make_pairs(&bases, &mut rng);
    let genome = Genome::from_contigs(vec![("chr1".to_string(), bases)]);
    let index = HashSeedIndex32::build(genome, 20, 10_000);
    let opts = AlignerOptions {
        min_spacing: 50,
        max_spacing: 1000,
        ..AlignerOptions::default()
    };

    c.bench_function("align_64_pairs", |b| {
        let mut engine = IntersectingPairedEndAligner::new(&index, opts.clone());
        let mut best = PairedAlignmentResult::not_found();
        let mut secondaries = vec![PairedAlignmentResult::not_found(); 32];
        b.iter(|| {
            let mut n_found = 0usize;
            for (r0, r1) in &pairs {
                let mut n_secondary = 0usize;
                engine
                    .align_pair(
                        r0,
                        r1,
                        2,
                        16,
                        &mut best,
                        &mut secondaries,
                        &mut n_secondary,
                        None,
                    )
                    .unwrap();
                n_found += best.is_found() as usize;
            }
            black_box(n_found)
        })
    });
}

criterion_group!(benches, bench_align_pairs);
criterion_main!(benches);
