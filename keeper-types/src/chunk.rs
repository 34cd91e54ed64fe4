//! Content-addressed chunks and the Binary Merkle Tree hash.
//!
//! A chunk is an 8-byte little-endian span followed by at most
//! [`MAX_CHUNK_SIZE`] bytes of payload. Its address is
//! `keccak256(span || bmt_root(payload))`, where the BMT root is computed
//! over the payload zero-padded to [`MAX_CHUNK_SIZE`] bytes.

use crate::address::Address;
use crate::error::ChunkError;
use sha3::{Digest, Keccak256};
use std::fmt;

/// Maximum payload carried by a single chunk.
pub const MAX_CHUNK_SIZE: usize = 4096;

/// Size of the little-endian span prefix.
pub const SPAN_SIZE: usize = 8;

/// Size of one BMT leaf segment and of every hash.
pub const SEGMENT_SIZE: usize = 32;

/// Keccak-256 over the concatenation of `parts`.
pub fn keccak256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Root of the Binary Merkle Tree over a zero-padded payload.
///
/// Callers must have checked the payload size.
fn bmt_root(payload: &[u8]) -> [u8; 32] {
    let mut level = vec![0u8; MAX_CHUNK_SIZE];
    level[..payload.len()].copy_from_slice(payload);
    while level.len() > SEGMENT_SIZE {
        level = level
            .chunks(2 * SEGMENT_SIZE)
            .flat_map(|pair| keccak256(&[pair]))
            .collect();
    }
    let mut root = [0u8; 32];
    root.copy_from_slice(&level);
    root
}

fn check_size(payload: &[u8]) -> Result<(), ChunkError> {
    if payload.len() > MAX_CHUNK_SIZE {
        return Err(ChunkError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_CHUNK_SIZE,
        });
    }
    Ok(())
}

fn address_with_span(span: u64, payload: &[u8]) -> Address {
    Address::from(keccak256(&[&span.to_le_bytes(), &bmt_root(payload)]))
}

/// Content address of `payload`, using its length as the span.
pub fn content_address(payload: &[u8]) -> Result<Address, ChunkError> {
    check_size(payload)?;
    Ok(address_with_span(payload.len() as u64, payload))
}

/// A content-addressed chunk with its address precomputed.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    address: Address,
    span: u64,
    payload: Vec<u8>,
}

impl Chunk {
    /// Build a leaf chunk whose span equals the payload length.
    pub fn new(payload: Vec<u8>) -> Result<Self, ChunkError> {
        let span = payload.len() as u64;
        Self::with_span(span, payload)
    }

    /// Build a chunk with an explicit span (intermediate chunks).
    pub fn with_span(span: u64, payload: Vec<u8>) -> Result<Self, ChunkError> {
        check_size(&payload)?;
        let address = address_with_span(span, &payload);
        Ok(Self {
            address,
            span,
            payload,
        })
    }

    /// Parse the wire form `span || payload`.
    pub fn from_data(data: &[u8]) -> Result<Self, ChunkError> {
        if data.len() < SPAN_SIZE {
            return Err(ChunkError::DataTooShort { len: data.len() });
        }
        let mut span = [0u8; SPAN_SIZE];
        span.copy_from_slice(&data[..SPAN_SIZE]);
        Self::with_span(u64::from_le_bytes(span), data[SPAN_SIZE..].to_vec())
    }

    /// The chunk address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The span (length of the data subtree this chunk covers).
    pub fn span(&self) -> u64 {
        self.span
    }

    /// The payload without span prefix.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The wire form `span || payload`.
    pub fn data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(SPAN_SIZE + self.payload.len());
        data.extend_from_slice(&self.span.to_le_bytes());
        data.extend_from_slice(&self.payload);
        data
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("address", &self.address)
            .field("span", &self.span)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
