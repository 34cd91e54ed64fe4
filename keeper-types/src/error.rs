//! Error types for swarm-keeper addressing and chunk handling.

use thiserror::Error;

/// Errors from address parsing and distance comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Two addresses of different byte lengths were compared
    #[error("address length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Length of the reference address
        expected: usize,
        /// Length of the offending address
        actual: usize,
    },

    /// A closest-node query was given no candidates
    #[error("empty candidate set")]
    EmptyCandidateSet,

    /// Address text was not valid hex
    #[error("invalid hex address: {0}")]
    InvalidHex(String),
}

/// Errors from building or parsing content-addressed chunks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// Payload exceeds the maximum chunk size
    #[error("payload too large: {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed payload size
        max: usize,
    },

    /// Wire data too short to carry the span prefix
    #[error("chunk data too short: {len} bytes")]
    DataTooShort {
        /// Length of the data received
        len: usize,
    },

    /// A chunk of a tree was not available
    #[error("chunk not found: {0}")]
    NotFound(String),

    /// Chunk tree structure is inconsistent
    #[error("malformed chunk tree: {0}")]
    Malformed(String),
}

/// Errors from signing, parsing or verifying single-owner chunks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocError {
    /// Wrapped chunk is invalid
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// Secret key bytes are not a valid secp256k1 scalar
    #[error("invalid signing key")]
    InvalidKey,

    /// Signing failed
    #[error("signing failed: {0}")]
    Signing(String),

    /// Signature bytes are malformed or do not recover a key
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Recovered owner differs from the claimed owner
    #[error("owner mismatch: claimed {claimed}, recovered {recovered}")]
    OwnerMismatch {
        /// Owner carried by the chunk
        claimed: String,
        /// Owner recovered from the signature
        recovered: String,
    },

    /// Wire data too short for id, signature and span
    #[error("single-owner chunk data too short: {len} bytes")]
    DataTooShort {
        /// Length of the data received
        len: usize,
    },
}
