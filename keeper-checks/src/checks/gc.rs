//! Garbage collection.
//!
//! An unpinned and a pinned chunk are uploaded to one node, then the node
//! is filled past its store capacity. The unpinned chunk must be evicted;
//! the pinned one must survive.

use super::{default_node_group, millis, require_nodes, secs, Check};
use crate::assertions::AssertionFailure;
use crate::client::UploadOptions;
use crate::context::{CheckContext, Phase};
use crate::error::Result;
use crate::random::PseudoGenerator;
use crate::topology::{Cluster, NodeGroup, NodeIdentity};
use crate::wait::wait_until;
use async_trait::async_trait;
use keeper_types::Address;
use serde::Deserialize;

/// Options for the `gc` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct GcOptions {
    /// Node group under test
    pub node_group: String,
    /// Seed for chunk contents and node choice
    pub seed: Option<i64>,
    /// Chunks the node's local store holds
    pub store_size: usize,
    /// How long eviction may take
    pub sync_timeout_secs: u64,
    /// Poll interval while waiting
    pub poll_interval_ms: u64,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            seed: None,
            store_size: 1_000,
            sync_timeout_secs: 60,
            poll_interval_ms: 1_000,
        }
    }
}

/// Upload `count` random unpinned chunks to `node`.
pub(super) async fn fill_store(
    ctx: &CheckContext,
    group: &NodeGroup,
    node: &NodeIdentity,
    generator: &mut PseudoGenerator,
    count: usize,
) -> Result<()> {
    let options = UploadOptions::default();
    for _ in 0..count {
        let chunk = generator.random_chunk()?;
        group
            .invoke(ctx, node, |api| api.upload_chunk(&chunk, &options))
            .await?;
    }
    tracing::debug!(check = ctx.check_name(), node = %node.name, count, "Filled local store");
    Ok(())
}

/// Fail unless `node` holds `address` and has it pinned.
pub(super) async fn pinned_and_held(
    ctx: &CheckContext,
    group: &NodeGroup,
    node: &NodeIdentity,
    address: &Address,
) -> Result<()> {
    let held = group.invoke(ctx, node, |api| api.has_chunk(address)).await?;
    if !held {
        return Err(AssertionFailure::new(
            format!("pinned chunk {address} kept by {}", node.name),
            "present",
            "evicted",
        )
        .into());
    }
    let pinned = group.invoke(ctx, node, |api| api.is_pinned(address)).await?;
    if !pinned {
        return Err(AssertionFailure::new(
            format!("chunk {address} pinned on {}", node.name),
            true,
            false,
        )
        .into());
    }
    Ok(())
}

async fn evicted(
    ctx: &CheckContext,
    group: &NodeGroup,
    node: &NodeIdentity,
    address: &Address,
) -> Result<()> {
    let held = group.invoke(ctx, node, |api| api.has_chunk(address)).await?;
    if held {
        return Err(AssertionFailure::new(
            format!("unpinned chunk {address} evicted from {}", node.name),
            "evicted",
            "present",
        )
        .into());
    }
    Ok(())
}

#[async_trait]
impl Check for GcOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        require_nodes(&group, 1, "gc")?;
        let mut generator = ctx.generator();
        let nodes = group.nodes();
        let node = &nodes[generator.pick(nodes.len())?];
        ctx.advance(Phase::NodesSelected);

        let unpinned = generator.random_chunk()?;
        let pinned = generator.random_chunk()?;
        let plain = UploadOptions::default();
        let pin = UploadOptions::default().pinned();
        group
            .invoke(ctx, node, |api| api.upload_chunk(&unpinned, &plain))
            .await?;
        group
            .invoke(ctx, node, |api| api.upload_chunk(&pinned, &pin))
            .await?;
        ctx.advance(Phase::Dispatched);
        tracing::info!(
            check = ctx.check_name(),
            node = %node.name,
            unpinned = %unpinned.address(),
            pinned = %pinned.address(),
            store_size = self.store_size,
            "Uploaded chunks, filling store"
        );

        fill_store(ctx, &group, node, &mut generator, self.store_size + 1).await?;

        wait_until(
            ctx,
            secs(self.sync_timeout_secs),
            millis(self.poll_interval_ms),
            || evicted(ctx, &group, node, unpinned.address()),
        )
        .await
        .map_err(|e| e.into_check_error(&format!("eviction of {}", unpinned.address())))?;
        ctx.advance(Phase::Asserted);
        pinned_and_held(ctx, &group, node, pinned.address()).await?;
        tracing::info!(check = ctx.check_name(), node = %node.name, "Garbage collection spared pinned chunk");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::cluster;
    use crate::client::{MockCluster, MockClusterConfig};
    use crate::error::CheckError;

    fn options() -> GcOptions {
        GcOptions {
            seed: Some(8),
            store_size: 10,
            sync_timeout_secs: 1,
            poll_interval_ms: 100,
            ..Default::default()
        }
    }

    fn bounded(capacity: Option<usize>) -> MockCluster {
        MockCluster::new(MockClusterConfig {
            nodes: 3,
            capacity,
            replication: 0,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn unpinned_chunk_is_evicted() {
        let mock = bounded(Some(10));
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("gc", 8);
        options().run(&ctx, &cluster).await.unwrap();
        assert_eq!(ctx.phase(), Phase::Asserted);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_store_never_evicts() {
        let mock = bounded(None);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("gc", 8);
        match options().run(&ctx, &cluster).await.unwrap_err() {
            CheckError::WaitTimeout { what, last, .. } => {
                assert!(what.starts_with("eviction of "));
                assert!(last.unwrap().contains("observed present"));
            }
            other => panic!("unexpected: {other}"),
        }
    }
}
