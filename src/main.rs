use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use interpair::genome::Genome;
use interpair::index::{HashSeedIndex, HitLocation, SeedIndex};
use interpair::io::fastq::PairedFastqReader;
use interpair::read::Read;
use interpair::{
    AlignOutcome, AlignerError, AlignerOptions, AlignmentStatus, Direction,
    IntersectingPairedEndAligner, PairedAlignmentResult,
};

const BATCH_SIZE: usize = 4096;

#[derive(Parser)]
#[command(name = "interpair")]
#[command(about = "Intersecting paired-end short-read aligner", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Align read pairs against a reference FASTA
    Align {
        /// Reference FASTA file
        #[arg(value_name = "REF.FA")]
        reference: PathBuf,

        /// First-in-pair FASTQ (optionally gzipped)
        #[arg(value_name = "READS_1.FQ")]
        read1: PathBuf,

        /// Second-in-pair FASTQ (optionally gzipped)
        #[arg(value_name = "READS_2.FQ")]
        read2: PathBuf,

        /// Seed length for the index
        #[arg(short = 's', long, value_name = "INT", default_value = "20")]
        seed_len: usize,

        /// Minimum distance between the two ends
        #[arg(long, value_name = "INT", default_value = "50")]
        min_spacing: u64,

        /// Maximum distance between the two ends
        #[arg(long, value_name = "INT", default_value = "1000")]
        max_spacing: u64,

        /// Maximum edit distance per end
        #[arg(short = 'k', long, value_name = "INT", default_value = "8")]
        max_k: u32,

        /// Keep scoring this far past the best score found
        #[arg(short = 'e', long, value_name = "INT", default_value = "2")]
        extra_search_depth: u32,

        /// Skip seeds with at least this many hits
        #[arg(long, value_name = "INT", default_value = "16000")]
        max_big_hits: usize,

        /// Fixed number of seeds per read (0 = derive from coverage)
        #[arg(short = 'n', long, value_name = "INT", default_value = "0")]
        num_seeds: usize,

        /// Target seed coverage when --num-seeds is 0
        #[arg(long, value_name = "FLOAT", default_value = "4.0")]
        seed_coverage: f64,

        /// Maximum secondary alignments to report per pair
        #[arg(long, value_name = "INT", default_value = "10")]
        max_secondary: usize,

        /// Report secondaries within this edit distance of the best
        #[arg(long, value_name = "INT", default_value = "2")]
        max_ed_secondary: i32,

        /// Cap secondaries per contig (<= 0 disables)
        #[arg(long, value_name = "INT", default_value = "-1")]
        max_secondary_per_contig: i32,

        /// Disable score-limit tightening
        #[arg(long)]
        no_ukkonen: bool,

        /// Evaluate candidates in genome order instead of score order
        #[arg(long)]
        no_ordered_evaluation: bool,

        /// Disable best-possible-score truncation
        #[arg(long)]
        no_truncation: bool,

        /// Worker threads
        #[arg(short = 't', long, value_name = "INT", default_value = "1")]
        threads: usize,

        /// Output TSV file (default: stdout)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Increase verbosity (-v debug, -vv trace)
        #[arg(short = 'v', long, action = clap::ArgAction::Count)]
        verbose: u8,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Align {
            reference,
            read1,
            read2,
            seed_len,
            min_spacing,
            max_spacing,
            max_k,
            extra_search_depth,
            max_big_hits,
            num_seeds,
            seed_coverage,
            max_secondary,
            max_ed_secondary,
            max_secondary_per_contig,
            no_ukkonen,
            no_ordered_evaluation,
            no_truncation,
            threads,
            output,
            verbose,
        } => {
            let log_level = match verbose {
                0 => log::LevelFilter::Info,
                1 => log::LevelFilter::Debug,
                _ => log::LevelFilter::Trace,
            };
            env_logger::Builder::from_default_env()
                .filter_level(log_level)
                .format_timestamp(None)
                .format_target(false)
                .init();

            if threads > 1 {
                if let Err(e) = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build_global()
                {
                    log::error!("failed to configure {} threads: {}", threads, e);
                    std::process::exit(1);
                }
            }

            let opts = AlignerOptions {
                min_spacing,
                max_spacing,
                max_k,
                extra_search_depth,
                max_big_hits,
                max_hits: max_big_hits,
                num_seeds_from_command_line: num_seeds,
                seed_coverage,
                max_secondary_alignments_per_contig: max_secondary_per_contig,
                no_ukkonen,
                no_ordered_evaluation,
                no_truncation,
                ..AlignerOptions::default()
            };

            log::info!("loading reference {}", reference.display());
            let genome = match Genome::from_fasta(&reference) {
                Ok(g) => g,
                Err(e) => {
                    log::error!("failed to load reference: {}", e);
                    std::process::exit(1);
                }
            };

            // Small genomes fit 32-bit hit lists; the engine is generic
            // over the width.
            let result = if genome.count_of_bases() < u32::MAX as u64 {
                let index: HashSeedIndex<u32> =
                    HashSeedIndex::build(genome, seed_len, opts.max_hits);
                run_alignment(&index, &opts, &read1, &read2, max_ed_secondary, max_secondary, output)
            } else {
                let index: HashSeedIndex<u64> =
                    HashSeedIndex::build(genome, seed_len, opts.max_hits);
                run_alignment(&index, &opts, &read1, &read2, max_ed_secondary, max_secondary, output)
            };

            if let Err(e) = result {
                log::error!("alignment failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run_alignment<I>(
    index: &I,
    opts: &AlignerOptions,
    read1: &PathBuf,
    read2: &PathBuf,
    max_ed_secondary: i32,
    max_secondary: usize,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>>
where
    I: SeedIndex + Sync,
    I::Loc: HitLocation,
{
    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    writeln!(
        writer,
        "#id\tstatus\tcontig0\tpos0\tdir0\tmapq0\tscore0\tcontig1\tpos1\tdir1\tmapq1\tscore1\tprobability\tn_secondary"
    )?;

    let mut reader = PairedFastqReader::open(read1, read2)?;
    let mut n_pairs = 0u64;
    let mut n_aligned = 0u64;
    let start = std::time::Instant::now();

    loop {
        let batch = reader.read_batch(BATCH_SIZE)?;
        if batch.is_empty() {
            break;
        }
        n_pairs += batch.len() as u64;

        let lines: Result<Vec<(String, bool)>, AlignerError> = batch
            .par_iter()
            .map_init(
                || IntersectingPairedEndAligner::new(index, opts.clone()),
                |engine, (r0, r1)| align_one_pair(engine, r0, r1, max_ed_secondary, max_secondary),
            )
            .collect();

        for (line, aligned) in lines? {
            n_aligned += aligned as u64;
            writeln!(writer, "{}", line)?;
        }
    }
    writer.flush()?;

    let elapsed = start.elapsed().as_secs_f64();
    log::info!(
        "aligned {}/{} pairs in {:.2}s ({:.0} pairs/sec)",
        n_aligned,
        n_pairs,
        elapsed,
        n_pairs as f64 / elapsed.max(1e-9)
    );
    Ok(())
}

fn align_one_pair<I: SeedIndex>(
    engine: &mut IntersectingPairedEndAligner<'_, I>,
    r0: &Read,
    r1: &Read,
    max_ed_secondary: i32,
    max_secondary: usize,
) -> Result<(String, bool), AlignerError> {
    let mut best = PairedAlignmentResult::not_found();
    let mut secondaries = vec![PairedAlignmentResult::not_found(); max_secondary.max(8)];
    let mut n_secondary = 0usize;

    let mut outcome = engine.align_pair(
        r0,
        r1,
        max_ed_secondary,
        max_secondary,
        &mut best,
        &mut secondaries,
        &mut n_secondary,
        None,
    )?;
    while let AlignOutcome::BufferTooSmall { required } = outcome {
        secondaries.resize(required, PairedAlignmentResult::not_found());
        outcome = engine.emit_results(
            max_ed_secondary,
            max_secondary,
            &mut best,
            &mut secondaries,
            &mut n_secondary,
            None,
        )?;
    }

    let aligned = best.is_found();
    Ok((
        format_result(engine.genome(), &r0.id, &best, n_secondary),
        aligned,
    ))
}

fn format_result(
    genome: &Genome,
    id: &str,
    best: &PairedAlignmentResult,
    n_secondary: usize,
) -> String {
    let mut fields = vec![id.to_string()];
    let status = match best.status[0] {
        AlignmentStatus::NotFound => "not_found",
        AlignmentStatus::SingleHit => "single",
        AlignmentStatus::MultipleHits => "multi",
    };
    fields.push(status.to_string());
    for r in 0..2 {
        if best.status[r] == AlignmentStatus::NotFound {
            fields.extend(["*".into(), "-1".into(), "*".into(), "0".into(), "-1".into()]);
            continue;
        }
        let (contig, pos) = match genome.contig_num_at_location(best.location[r]) {
            Some(c) => {
                let contig = &genome.contigs()[c];
                (contig.name.clone(), best.location[r] - contig.start)
            }
            None => ("*".to_string(), best.location[r]),
        };
        fields.push(contig);
        fields.push(pos.to_string());
        fields.push(
            match best.direction[r] {
                Direction::Forward => "+",
                Direction::Rc => "-",
            }
            .to_string(),
        );
        fields.push(best.mapq[r].to_string());
        fields.push(best.score[r].to_string());
    }
    fields.push(format!("{:e}", best.probability));
    fields.push(n_secondary.to_string());
    fields.join("\t")
}
