//! Push-sync.
//!
//! Each uploaded chunk is tracked with a tag until it syncs. The node
//! closest to the chunk must then hold it, and enough nodes of the group
//! must hold a replica.

use super::{
    default_node_group, millis, replica_holders, require_nodes, secs, wait_for_tag, Check,
};
use crate::assertions::{assert_at_least, AssertionFailure};
use crate::client::UploadOptions;
use crate::context::{CheckContext, Phase};
use crate::error::Result;
use crate::topology::{Cluster, NodeGroup, NodeIdentity};
use crate::wait::{retry, wait_until, RetryPolicy};
use async_trait::async_trait;
use keeper_types::Address;
use serde::Deserialize;
use tokio::time::Instant;

/// Options for the `pushsync` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PushsyncOptions {
    /// Node group under test
    pub node_group: String,
    /// Seed for chunk contents and node choice
    pub seed: Option<i64>,
    /// Nodes that upload
    pub upload_node_count: usize,
    /// Chunks uploaded by each uploading node
    pub chunks_per_node: usize,
    /// Nodes that must hold each chunk
    pub replication_threshold: usize,
    /// Checks of the closest node before giving up
    pub retries: u32,
    /// Delay between checks of the closest node
    pub retry_delay_ms: u64,
    /// How long tags and replicas may take to sync
    pub sync_timeout_secs: u64,
    /// Poll interval while waiting
    pub poll_interval_ms: u64,
}

impl Default for PushsyncOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            seed: None,
            upload_node_count: 1,
            chunks_per_node: 1,
            replication_threshold: 2,
            retries: 5,
            retry_delay_ms: 1_000,
            sync_timeout_secs: 60,
            poll_interval_ms: 1_000,
        }
    }
}

async fn closest_holds(
    ctx: &CheckContext,
    group: &NodeGroup,
    closest: &NodeIdentity,
    address: &Address,
) -> Result<()> {
    let held = group
        .invoke(ctx, closest, |api| api.has_chunk(address))
        .await?;
    if held {
        Ok(())
    } else {
        Err(AssertionFailure::new(
            format!("closest node {} holds {address}", closest.name),
            true,
            false,
        )
        .into())
    }
}

async fn enough_replicas(
    ctx: &CheckContext,
    group: &NodeGroup,
    address: &Address,
    threshold: usize,
) -> Result<()> {
    let holders = replica_holders(ctx, group, address).await?;
    assert_at_least(&format!("replicas of {address}"), threshold, holders.len())?;
    Ok(())
}

#[async_trait]
impl Check for PushsyncOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        require_nodes(&group, 1, "pushsync")?;
        let mut generator = ctx.generator();
        let nodes = group.nodes();
        let uploaders: Vec<&NodeIdentity> = (0..self.upload_node_count)
            .map(|_| generator.pick(nodes.len()).map(|i| &nodes[i]))
            .collect::<std::result::Result<_, _>>()?;
        ctx.advance(Phase::NodesSelected);
        let policy = RetryPolicy::new(self.retries, millis(self.retry_delay_ms));

        for uploader in uploaders {
            for _ in 0..self.chunks_per_node {
                let chunk = generator.random_chunk()?;
                let address = chunk.address().clone();
                let tag = group.invoke(ctx, uploader, |api| api.create_tag()).await?;
                let options = UploadOptions::default().with_tag(tag.uid);

                let started = Instant::now();
                group
                    .invoke(ctx, uploader, |api| api.upload_chunk(&chunk, &options))
                    .await?;
                ctx.metrics().observe(
                    ctx.check_name(),
                    "upload_seconds",
                    &[("node", uploader.name.as_str())],
                    started.elapsed().as_secs_f64(),
                );
                ctx.advance(Phase::Dispatched);

                wait_for_tag(
                    ctx,
                    &group,
                    uploader,
                    tag.uid,
                    secs(self.sync_timeout_secs),
                    millis(self.poll_interval_ms),
                )
                .await?;

                let closest = group.closest_to(&address)?;
                retry(ctx, policy, || closest_holds(ctx, &group, closest, &address)).await?;

                wait_until(
                    ctx,
                    secs(self.sync_timeout_secs),
                    millis(self.poll_interval_ms),
                    || enough_replicas(ctx, &group, &address, self.replication_threshold),
                )
                .await
                .map_err(|e| e.into_check_error(&format!("replication of {address}")))?;

                tracing::info!(
                    check = ctx.check_name(),
                    chunk = %address,
                    uploader = %uploader.name,
                    closest = %closest.name,
                    "Chunk pushed to closest node"
                );
            }
        }
        ctx.advance(Phase::Asserted);
        Ok(())
    }
}
