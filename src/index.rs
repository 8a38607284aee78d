// Genome seed index.
//
// The engine only sees the `SeedIndex` trait: fixed seed length, one lookup
// returning descending-sorted hit lists for a seed and its reverse
// complement. Indexes come in 32- and 64-bit location flavors; the width is
// an associated type so the engine is monomorphized per index rather than
// branching on width at every hit.

use rustc_hash::FxHashMap;

use crate::genome::{Genome, GenomeLocation};
use crate::read::{complement, is_acgt};

/// A genome location as stored in an index's hit lists.
pub trait HitLocation: Copy + Ord + Send + Sync + std::fmt::Debug {
    fn as_u64(self) -> u64;
    fn from_u64(v: u64) -> Self;
}

impl HitLocation for u32 {
    #[inline]
    fn as_u64(self) -> u64 {
        self as u64
    }
    #[inline]
    fn from_u64(v: u64) -> Self {
        v as u32
    }
}

impl HitLocation for u64 {
    #[inline]
    fn as_u64(self) -> u64 {
        self
    }
    #[inline]
    fn from_u64(v: u64) -> Self {
        v
    }
}

/// Result of one seed lookup: hits for the seed as given and for its
/// reverse complement, both sorted in descending genome order.
#[derive(Debug, Clone, Copy)]
pub struct SeedHits<'a, L> {
    pub forward: &'a [L],
    pub reverse_complement: &'a [L],
}

pub trait SeedIndex {
    type Loc: HitLocation;

    fn seed_length(&self) -> usize;
    fn genome(&self) -> &Genome;

    /// Look up `seed` (exactly `seed_length` ACGT bases). Seeds containing
    /// ambiguous bases must be filtered by the caller.
    fn lookup_seed(&self, seed: &[u8]) -> SeedHits<'_, Self::Loc>;
}

/// Longest seed a 2-bit packing fits in a u64.
pub const MAX_SEED_LEN: usize = 31;

#[inline]
fn encode_base(b: u8) -> Option<u64> {
    match b {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Pack an ACGT seed into a u64 key. `None` if it contains an ambiguous
/// base or is too long.
pub fn pack_seed(seed: &[u8]) -> Option<u64> {
    if seed.len() > MAX_SEED_LEN {
        return None;
    }
    let mut key: u64 = 1; // Leading 1 disambiguates lengths
    for &b in seed {
        key = (key << 2) | encode_base(b)?;
    }
    Some(key)
}

/// Pack the reverse complement of an ACGT seed.
pub fn pack_seed_rc(seed: &[u8]) -> Option<u64> {
    if seed.len() > MAX_SEED_LEN {
        return None;
    }
    let mut key: u64 = 1;
    for &b in seed.iter().rev() {
        key = (key << 2) | encode_base(complement(b))?;
    }
    Some(key)
}

/// In-memory reference index: seed key -> descending genome locations.
///
/// This is the reference implementation the CLI and tests use; anything
/// implementing `SeedIndex` can stand in for it.
pub struct HashSeedIndex<L: HitLocation> {
    genome: Genome,
    seed_len: usize,
    map: FxHashMap<u64, Vec<L>>,
}

pub type HashSeedIndex32 = HashSeedIndex<u32>;
pub type HashSeedIndex64 = HashSeedIndex<u64>;

impl<L: HitLocation> HashSeedIndex<L> {
    /// Index every ACGT window of `seed_len` bases. Per-seed lists are
    /// capped at `max_hits_per_seed` locations (the lowest ones); a capped
    /// list is long enough that the aligner treats the seed as popular
    /// anyway.
    pub fn build(genome: Genome, seed_len: usize, max_hits_per_seed: usize) -> Self {
        assert!(
            (4..=MAX_SEED_LEN).contains(&seed_len),
            "seed length {} out of range",
            seed_len
        );
        let mut map: FxHashMap<u64, Vec<L>> = FxHashMap::default();
        let n = genome.count_of_bases();
        let mut indexed: u64 = 0;
        for pos in 0..n.saturating_sub(seed_len as u64 - 1) {
            let window = genome
                .substring(pos as GenomeLocation, seed_len as u64)
                .expect("window within genome");
            if window.len() < seed_len || !window.iter().all(|&b| is_acgt(b)) {
                continue;
            }
            let key = pack_seed(window).expect("ACGT window packs");
            let hits = map.entry(key).or_default();
            if hits.len() < max_hits_per_seed {
                hits.push(L::from_u64(pos));
                indexed += 1;
            }
        }
        // Build order is ascending; the aligner walks hits high-to-low.
        for hits in map.values_mut() {
            hits.reverse();
        }
        log::info!(
            "indexed {} seed occurrences across {} distinct {}-mers",
            indexed,
            map.len(),
            seed_len
        );
        HashSeedIndex {
            genome,
            seed_len,
            map,
        }
    }

    fn hits_for_key(&self, key: Option<u64>) -> &[L] {
        key.and_then(|k| self.map.get(&k))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl<L: HitLocation> SeedIndex for HashSeedIndex<L> {
    type Loc = L;

    fn seed_length(&self) -> usize {
        self.seed_len
    }

    fn genome(&self) -> &Genome {
        &self.genome
    }

    fn lookup_seed(&self, seed: &[u8]) -> SeedHits<'_, L> {
        debug_assert_eq!(seed.len(), self.seed_len);
        SeedHits {
            forward: self.hits_for_key(pack_seed(seed)),
            reverse_complement: self.hits_for_key(pack_seed_rc(seed)),
        }
    }
}
