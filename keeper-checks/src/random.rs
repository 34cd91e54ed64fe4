//! Deterministic workload generation.
//!
//! Every check owns one [`PseudoGenerator`] keyed only by its resolved seed,
//! so re-running a check with the same seed replays the same chunks, node
//! picks and signing keys.

use keeper_types::{Chunk, ChunkError, Signer, ID_SIZE, MAX_CHUNK_SIZE, SPAN_SIZE};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

/// Errors from generator queries that cannot be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    /// Fewer than two items to choose from while excluding one
    #[error("insufficient population: need at least 2 items, got {population}")]
    InsufficientPopulation {
        /// Number of items available
        population: usize,
    },

    /// Excluded index lies outside the population
    #[error("excluded index {index} out of range for population {population}")]
    ExcludedOutOfRange {
        /// Index that was to be excluded
        index: usize,
        /// Number of items available
        population: usize,
    },

    /// Pick from an empty population
    #[error("cannot pick from an empty population")]
    EmptyPopulation,
}

/// Seeded pseudo-random source for check workloads.
pub struct PseudoGenerator {
    seed: i64,
    rng: ChaCha8Rng,
}

impl PseudoGenerator {
    /// Create a generator keyed by `seed`. Any value, including 0, is valid.
    pub fn new(seed: i64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed as u64),
        }
    }

    /// The seed this generator was created with.
    pub fn seed(&self) -> i64 {
        self.seed
    }

    /// Exactly `n` bytes from the stream.
    pub fn random_bytes(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.rng.fill_bytes(&mut buf);
        buf
    }

    /// A chunk with a payload length drawn from `[0, MAX_CHUNK_SIZE - SPAN_SIZE)`.
    pub fn random_chunk(&mut self) -> Result<Chunk, ChunkError> {
        let len = self.rng.gen_range(0..MAX_CHUNK_SIZE - SPAN_SIZE);
        Chunk::new(self.random_bytes(len))
    }

    /// Uniform index in `[0, n)`.
    pub fn pick(&mut self, n: usize) -> Result<usize, GeneratorError> {
        if n == 0 {
            return Err(GeneratorError::EmptyPopulation);
        }
        Ok(self.rng.gen_range(0..n))
    }

    /// Uniform index in `[0, n)` other than `excluding`.
    ///
    /// Uses a single draw, so the stream advances by the same amount
    /// regardless of which index is excluded.
    pub fn pick_index(&mut self, n: usize, excluding: usize) -> Result<usize, GeneratorError> {
        if n < 2 {
            return Err(GeneratorError::InsufficientPopulation { population: n });
        }
        if excluding >= n {
            return Err(GeneratorError::ExcludedOutOfRange {
                index: excluding,
                population: n,
            });
        }
        let pick = self.rng.gen_range(0..n - 1);
        Ok(if pick >= excluding { pick + 1 } else { pick })
    }

    /// A 32-byte single-owner chunk identifier.
    pub fn random_id(&mut self) -> [u8; ID_SIZE] {
        let mut id = [0u8; ID_SIZE];
        self.rng.fill_bytes(&mut id);
        id
    }

    /// A secp256k1 signer derived from the stream.
    pub fn random_signer(&mut self) -> Signer {
        loop {
            // Out-of-range scalars are astronomically rare; draw again.
            if let Ok(signer) = Signer::from_secret(&self.random_bytes(32)) {
                return signer;
            }
        }
    }
}

impl std::fmt::Debug for PseudoGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PseudoGenerator(seed={})", self.seed)
    }
}
