//! Hash distance used to pick external round references
//!
//! Hashes are read as big-endian unsigned integers. The distance between two
//! hashes is their absolute difference modulo 100, so only the residues of
//! both values are needed: for `hi >= lo`, `(hi - lo) mod 100` equals
//! `(hi mod 100 - lo mod 100) mod 100`.

use kernel_common::Hash;

const MODULUS: u32 = 100;

fn residue(hash: &Hash) -> u32 {
    hash.0
        .iter()
        .fold(0u32, |acc, b| (acc * 256 + u32::from(*b)) % MODULUS)
}

/// `|a - b| mod 100` over the hashes as 256-bit integers
pub fn node_distance(a: &Hash, b: &Hash) -> u64 {
    // Byte arrays compare like the big-endian integers they encode
    let (hi, lo) = if a.0 >= b.0 { (a, b) } else { (b, a) };
    let diff = residue(hi) as i64 - residue(lo) as i64;
    diff.rem_euclid(MODULUS as i64) as u64
}

/// The candidate closest to `target`. Ties go to the earliest candidate.
pub fn select_closest(target: &Hash, candidates: &[Hash]) -> Option<Hash> {
    let mut best: Option<(Hash, u64)> = None;
    for candidate in candidates {
        let distance = node_distance(target, candidate);
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((*candidate, distance));
        }
    }
    best.map(|(hash, _)| hash)
}
