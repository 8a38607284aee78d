// Reference genome: concatenated contig bases plus the contig table.
//
// Genome locations are absolute offsets into the concatenation. Contig
// boundaries only matter at the edges of the pipeline (substring fetches,
// per-contig secondary caps, and alignment adjustment).

use std::fmt;
use std::path::Path;

use bio::io::fasta;

/// Absolute offset into the concatenated reference.
pub type GenomeLocation = u64;

/// Sentinel for "no location".
pub const INVALID_GENOME_LOCATION: GenomeLocation = u64::MAX;

/// `|a - b| <= distance`, safe for unsigned locations.
#[inline]
pub fn locations_within(a: GenomeLocation, b: GenomeLocation, distance: u64) -> bool {
    a.abs_diff(b) <= distance
}

/// One contig of the reference.
#[derive(Debug, Clone)]
pub struct Contig {
    pub name: String,
    /// Offset of the contig's first base in the concatenation.
    pub start: GenomeLocation,
    pub length: u64,
}

/// The concatenated reference and its contig table.
pub struct Genome {
    bases: Vec<u8>,
    contigs: Vec<Contig>,
}

#[derive(Debug)]
pub enum GenomeError {
    Io(std::io::Error),
    /// The FASTA parsed but contained no sequence data.
    Empty,
}

impl fmt::Display for GenomeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenomeError::Io(err) => write!(f, "I/O error reading reference: {}", err),
            GenomeError::Empty => write!(f, "reference contains no sequence data"),
        }
    }
}

impl std::error::Error for GenomeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GenomeError::Io(err) => Some(err),
            GenomeError::Empty => None,
        }
    }
}

impl From<std::io::Error> for GenomeError {
    fn from(err: std::io::Error) -> Self {
        GenomeError::Io(err)
    }
}

impl Genome {
    /// Build a genome from already-concatenated pieces. Bases are uppercased;
    /// anything outside ACGT becomes N.
    pub fn from_contigs(contigs: Vec<(String, Vec<u8>)>) -> Self {
        let mut bases = Vec::new();
        let mut table = Vec::with_capacity(contigs.len());
        for (name, mut seq) in contigs {
            for b in seq.iter_mut() {
                *b = normalize_base(*b);
            }
            table.push(Contig {
                name,
                start: bases.len() as GenomeLocation,
                length: seq.len() as u64,
            });
            bases.extend_from_slice(&seq);
        }
        Genome {
            bases,
            contigs: table,
        }
    }

    /// Load a (possibly multi-contig) FASTA reference.
    pub fn from_fasta<P: AsRef<Path>>(path: P) -> Result<Self, GenomeError> {
        let reader = fasta::Reader::from_file(path.as_ref()).map_err(|e| {
            GenomeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;
        let mut contigs = Vec::new();
        for record in reader.records() {
            let record = record.map_err(GenomeError::Io)?;
            contigs.push((record.id().to_string(), record.seq().to_vec()));
        }
        if contigs.iter().all(|(_, seq)| seq.is_empty()) {
            return Err(GenomeError::Empty);
        }
        log::info!(
            "loaded reference: {} contigs, {} bases",
            contigs.len(),
            contigs.iter().map(|(_, s)| s.len()).sum::<usize>()
        );
        Ok(Genome::from_contigs(contigs))
    }

    #[inline]
    pub fn count_of_bases(&self) -> u64 {
        self.bases.len() as u64
    }

    #[inline]
    pub fn num_contigs(&self) -> usize {
        self.contigs.len()
    }

    #[inline]
    pub fn contigs(&self) -> &[Contig] {
        &self.contigs
    }

    /// Bases starting at `location`, at most `len` of them. `None` when the
    /// location is past the end of the concatenation; the slice is shortened
    /// when it would overrun.
    pub fn substring(&self, location: GenomeLocation, len: u64) -> Option<&[u8]> {
        let start = location as usize;
        if start >= self.bases.len() {
            return None;
        }
        let end = (start + len as usize).min(self.bases.len());
        Some(&self.bases[start..end])
    }

    /// Bases in `[end - len, end)`, clamped to the start of the genome.
    /// Used by the reversed-direction scorer, which walks left from a seed.
    pub fn substring_ending_at(&self, end: GenomeLocation, len: u64) -> Option<&[u8]> {
        let end = (end as usize).min(self.bases.len());
        let start = end.saturating_sub(len as usize);
        if start == end {
            return None;
        }
        Some(&self.bases[start..end])
    }

    /// Index of the contig containing `location`.
    pub fn contig_num_at_location(&self, location: GenomeLocation) -> Option<usize> {
        if self.contigs.is_empty() || location >= self.count_of_bases() {
            return None;
        }
        // Last contig whose start is <= location.
        let idx = self
            .contigs
            .partition_point(|c| c.start <= location)
            .checked_sub(1)?;
        let contig = &self.contigs[idx];
        if location < contig.start + contig.length {
            Some(idx)
        } else {
            None
        }
    }
}

#[inline]
pub fn normalize_base(b: u8) -> u8 {
    match b.to_ascii_uppercase() {
        b'A' => b'A',
        b'C' => b'C',
        b'G' => b'G',
        b'T' => b'T',
        _ => b'N',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_contig_genome() -> Genome {
        Genome::from_contigs(vec![
            ("chr1".to_string(), b"ACGTACGTAC".to_vec()),
            ("chr2".to_string(), b"TTTTGGGG".to_vec()),
        ])
    }

    #[test]
    fn test_contig_lookup() {
        let genome = two_contig_genome();
        assert_eq!(genome.count_of_bases(), 18);
        assert_eq!(genome.contig_num_at_location(0), Some(0));
        assert_eq!(genome.contig_num_at_location(9), Some(0));
        assert_eq!(genome.contig_num_at_location(10), Some(1));
        assert_eq!(genome.contig_num_at_location(17), Some(1));
        assert_eq!(genome.contig_num_at_location(18), None);
    }

    #[test]
    fn test_substring_bounds() {
        let genome = two_contig_genome();
        assert_eq!(genome.substring(0, 4).unwrap(), b"ACGT");
        assert_eq!(genome.substring(16, 10).unwrap(), b"GG");
        assert!(genome.substring(18, 1).is_none());
    }

    #[test]
    fn test_substring_ending_at_clamps() {
        let genome = two_contig_genome();
        assert_eq!(genome.substring_ending_at(4, 2).unwrap(), b"GT");
        assert_eq!(genome.substring_ending_at(2, 10).unwrap(), b"AC");
        assert!(genome.substring_ending_at(0, 5).is_none());
    }

    #[test]
    fn test_lowercase_and_ambiguity_normalized() {
        let genome = Genome::from_contigs(vec![("c".to_string(), b"acgtRyN".to_vec())]);
        assert_eq!(genome.substring(0, 7).unwrap(), b"ACGTNNN");
    }

    #[test]
    fn test_locations_within() {
        assert!(locations_within(100, 131, 31));
        assert!(!locations_within(100, 132, 31));
        assert!(locations_within(131, 100, 31));
    }
}
