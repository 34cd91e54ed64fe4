//! Node operations used by checks.
//!
//! Checks never build transports themselves. Every node in a group is
//! reached through one [`NodeApi`] trait object, either an
//! [`HttpNodeClient`] talking to a live node or a [`MockNode`] backed by an
//! in-memory [`MockCluster`].
//!
//! # Design
//!
//! Operations map one-to-one onto the node's HTTP surface:
//! - API: chunks, bytes, single-owner chunks, tags, pins
//! - Debug API: addresses, local chunk store, peers, topology, balances,
//!   settlements, pingpong

mod http;
mod mock;
mod types;

pub use http::{HttpNodeClient, NodeEndpoint};
pub use mock::{MockCluster, MockClusterConfig, MockNode};
pub use types::{
    Addresses, Balance, Bin, Pong, Settlement, Settlements, TagStatus, Topology, UploadOptions,
};

use async_trait::async_trait;
use keeper_types::{Address, Chunk, SingleOwnerChunk};
use thiserror::Error;

/// Errors from node operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Node could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request failed in transit.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Node answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        body: String,
    },

    /// Requested resource does not exist on the node.
    #[error("not found: {0}")]
    NotFound(String),

    /// Response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            ClientError::ConnectionFailed(e.to_string())
        } else if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_decode() {
            ClientError::InvalidResponse(e.to_string())
        } else {
            ClientError::RequestFailed(e.to_string())
        }
    }
}

/// Operations a check can perform against one node.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Overlay and underlay addresses of the node.
    async fn addresses(&self) -> Result<Addresses, ClientError>;

    /// Upload one content-addressed chunk.
    async fn upload_chunk(
        &self,
        chunk: &Chunk,
        options: &UploadOptions,
    ) -> Result<Address, ClientError>;

    /// Download one chunk in wire form (`span || payload`).
    async fn download_chunk(&self, address: &Address) -> Result<Vec<u8>, ClientError>;

    /// Upload a byte stream of any length, returning its root reference.
    async fn upload_bytes(
        &self,
        data: &[u8],
        options: &UploadOptions,
    ) -> Result<Address, ClientError>;

    /// Download the byte stream under `reference`.
    async fn download_bytes(&self, reference: &Address) -> Result<Vec<u8>, ClientError>;

    /// Upload a signed single-owner chunk.
    async fn upload_soc(
        &self,
        soc: &SingleOwnerChunk,
        options: &UploadOptions,
    ) -> Result<Address, ClientError>;

    /// Whether the chunk is in the node's local store.
    async fn has_chunk(&self, address: &Address) -> Result<bool, ClientError>;

    /// Remove a chunk from the node's local store.
    async fn remove_chunk(&self, address: &Address) -> Result<(), ClientError>;

    /// Create an upload tag.
    async fn create_tag(&self) -> Result<TagStatus, ClientError>;

    /// Current status of an upload tag.
    async fn tag(&self, uid: u32) -> Result<TagStatus, ClientError>;

    /// Pin content locally.
    async fn pin(&self, reference: &Address) -> Result<(), ClientError>;

    /// Remove a local pin.
    async fn unpin(&self, reference: &Address) -> Result<(), ClientError>;

    /// Whether content is pinned locally.
    async fn is_pinned(&self, reference: &Address) -> Result<bool, ClientError>;

    /// Per-peer accounting balances.
    async fn balances(&self) -> Result<Vec<Balance>, ClientError>;

    /// Per-peer settlements and totals.
    async fn settlements(&self) -> Result<Settlements, ClientError>;

    /// Overlays of connected peers.
    async fn peers(&self) -> Result<Vec<Address>, ClientError>;

    /// Kademlia view of the node.
    async fn topology(&self) -> Result<Topology, ClientError>;

    /// Round trip to a peer.
    async fn ping(&self, peer: &Address) -> Result<Pong, ClientError>;
}
