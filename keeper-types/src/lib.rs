//! # keeper-types
//!
//! Addressing types for swarm-keeper, the Swarm cluster check driver.
//!
//! - [`Address`], [`closest`], [`proximity`] - Addresses and the XOR distance metric
//! - [`Chunk`], [`content_address`] - Content-addressed chunks (BMT hash)
//! - [`split`], [`join`] - Chunk trees for byte streams larger than one chunk
//! - [`SingleOwnerChunk`], [`Signer`] - Signed single-owner chunks
//! - [`AddressError`], [`ChunkError`], [`SocError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod address;
mod chunk;
mod error;
mod file;
mod soc;

pub use address::{closest, closest_index, distance, distance_cmp, proximity, Address, MAX_PO};
pub use chunk::{content_address, keccak256, Chunk, MAX_CHUNK_SIZE, SEGMENT_SIZE, SPAN_SIZE};
pub use error::{AddressError, ChunkError, SocError};
pub use file::{join, split, BRANCHES};
pub use soc::{
    recover_owner, soc_address, Owner, Signer, SingleOwnerChunk, ID_SIZE, OWNER_SIZE,
    SIGNATURE_SIZE,
};
