//! Local pinning.
//!
//! A pinned chunk must outlive a full store. In `pin-chunk` mode the chunk
//! is pinned at upload on the node under test. In `pin-remote` mode it is
//! uploaded elsewhere and pinned afterwards by reference, so the node has
//! to fetch it from the network first.

use super::gc::{fill_store, pinned_and_held};
use super::{default_node_group, require_nodes, Check};
use crate::client::UploadOptions;
use crate::context::{CheckContext, Phase};
use crate::error::Result;
use crate::topology::Cluster;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the chunk under test gets pinned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinningMode {
    /// Pin at upload on the node under test
    #[default]
    PinChunk,
    /// Upload on another node, then pin by reference
    PinRemote,
}

impl fmt::Display for PinningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinningMode::PinChunk => write!(f, "pin-chunk"),
            PinningMode::PinRemote => write!(f, "pin-remote"),
        }
    }
}

/// Options for the `local-pinning` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LocalPinningOptions {
    /// Node group under test
    pub node_group: String,
    /// Seed for chunk contents and node choice
    pub seed: Option<i64>,
    /// Pinning path under test
    pub mode: PinningMode,
    /// Chunks the node's local store holds
    pub store_size: usize,
}

impl Default for LocalPinningOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            seed: None,
            mode: PinningMode::default(),
            store_size: 1_000,
        }
    }
}

#[async_trait]
impl Check for LocalPinningOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        let min = match self.mode {
            PinningMode::PinChunk => 1,
            PinningMode::PinRemote => 2,
        };
        require_nodes(&group, min, "local-pinning")?;
        let mut generator = ctx.generator();
        let nodes = group.nodes();
        let pinner_index = generator.pick(nodes.len())?;
        let pinner = &nodes[pinner_index];
        let uploader = match self.mode {
            PinningMode::PinChunk => pinner,
            PinningMode::PinRemote => &nodes[generator.pick_index(nodes.len(), pinner_index)?],
        };
        ctx.advance(Phase::NodesSelected);

        let chunk = generator.random_chunk()?;
        let address = chunk.address().clone();
        match self.mode {
            PinningMode::PinChunk => {
                let options = UploadOptions::default().pinned();
                group
                    .invoke(ctx, pinner, |api| api.upload_chunk(&chunk, &options))
                    .await?;
            }
            PinningMode::PinRemote => {
                let options = UploadOptions::default();
                group
                    .invoke(ctx, uploader, |api| api.upload_chunk(&chunk, &options))
                    .await?;
                group.invoke(ctx, pinner, |api| api.pin(&address)).await?;
            }
        }
        ctx.advance(Phase::Dispatched);
        tracing::info!(
            check = ctx.check_name(),
            mode = %self.mode,
            chunk = %address,
            uploader = %uploader.name,
            pinner = %pinner.name,
            "Pinned chunk"
        );

        fill_store(ctx, &group, pinner, &mut generator, self.store_size + 1).await?;
        ctx.advance(Phase::Asserted);
        pinned_and_held(ctx, &group, pinner, &address).await?;
        tracing::info!(check = ctx.check_name(), mode = %self.mode, node = %pinner.name, "Pinned chunk survived");
        Ok(())
    }
}
