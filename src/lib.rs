pub mod aligner;
pub mod cluster;
pub mod genome;
pub mod index; // Seed index trait + in-memory hash reference implementation
pub mod io;
pub mod landau_vishkin; // Bounded edit-distance scoring
pub mod mapq;
pub mod opts;
pub mod read;
pub mod results;

pub use aligner::{AlignOutcome, AlignerError, IntersectingPairedEndAligner};
pub use opts::AlignerOptions;
pub use results::{AlignmentStatus, Direction, PairedAlignmentResult};
