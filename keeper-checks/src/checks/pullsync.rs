//! Pull-sync.
//!
//! After an upload, the nodes in the neighbourhood of the chunk's closest
//! node (proximity to it at least the closest node's depth) pull the chunk
//! from each other. Enough of them must end up holding it.

use super::{default_node_group, millis, replica_holders, require_nodes, secs, Check};
use crate::assertions::assert_at_least;
use crate::client::UploadOptions;
use crate::context::{CheckContext, Phase};
use crate::error::Result;
use crate::topology::{Cluster, NodeGroup, NodeIdentity};
use crate::wait::wait_until;
use async_trait::async_trait;
use keeper_types::{proximity, Address};
use serde::Deserialize;

/// Options for the `pullsync` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PullsyncOptions {
    /// Node group under test
    pub node_group: String,
    /// Seed for chunk contents and node choice
    pub seed: Option<i64>,
    /// Nodes that upload
    pub upload_node_count: usize,
    /// Chunks uploaded by each uploading node
    pub chunks_per_node: usize,
    /// Neighbourhood nodes that must hold each chunk
    pub replication_factor_threshold: usize,
    /// How long replication may take
    pub sync_timeout_secs: u64,
    /// Poll interval while waiting
    pub poll_interval_ms: u64,
}

impl Default for PullsyncOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            seed: None,
            upload_node_count: 1,
            chunks_per_node: 1,
            replication_factor_threshold: 2,
            sync_timeout_secs: 60,
            poll_interval_ms: 1_000,
        }
    }
}

/// Members whose proximity to `closest` is at least `depth`.
fn neighbourhood<'g>(
    group: &'g NodeGroup,
    closest: &NodeIdentity,
    depth: u8,
) -> Result<Vec<&'g NodeIdentity>> {
    let mut members = Vec::new();
    for node in group.nodes() {
        if proximity(&closest.overlay, &node.overlay)? >= depth {
            members.push(node);
        }
    }
    Ok(members)
}

async fn neighbourhood_replicated(
    ctx: &CheckContext,
    group: &NodeGroup,
    neighbours: &[&NodeIdentity],
    address: &Address,
    threshold: usize,
) -> Result<()> {
    let holders = replica_holders(ctx, group, address).await?;
    let replicated = holders
        .iter()
        .filter(|holder| neighbours.iter().any(|n| n.name == holder.name))
        .count();
    assert_at_least(
        &format!("neighbourhood replicas of {address}"),
        threshold,
        replicated,
    )?;
    Ok(())
}

#[async_trait]
impl Check for PullsyncOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        require_nodes(&group, 2, "pullsync")?;
        let mut generator = ctx.generator();
        let nodes = group.nodes();
        let uploaders: Vec<&NodeIdentity> = (0..self.upload_node_count)
            .map(|_| generator.pick(nodes.len()).map(|i| &nodes[i]))
            .collect::<std::result::Result<_, _>>()?;
        ctx.advance(Phase::NodesSelected);

        let options = UploadOptions::default();
        for uploader in uploaders {
            for _ in 0..self.chunks_per_node {
                let chunk = generator.random_chunk()?;
                let address = chunk.address().clone();
                group
                    .invoke(ctx, uploader, |api| api.upload_chunk(&chunk, &options))
                    .await?;
                ctx.advance(Phase::Dispatched);

                let closest = group.closest_to(&address)?;
                let depth = group.invoke(ctx, closest, |api| api.topology()).await?.depth;
                let neighbours = neighbourhood(&group, closest, depth)?;
                tracing::info!(
                    check = ctx.check_name(),
                    chunk = %address,
                    uploader = %uploader.name,
                    closest = %closest.name,
                    depth,
                    neighbourhood = neighbours.len(),
                    "Uploaded chunk"
                );

                wait_until(
                    ctx,
                    secs(self.sync_timeout_secs),
                    millis(self.poll_interval_ms),
                    || {
                        neighbourhood_replicated(
                            ctx,
                            &group,
                            &neighbours,
                            &address,
                            self.replication_factor_threshold,
                        )
                    },
                )
                .await
                .map_err(|e| e.into_check_error(&format!("pull-sync of {address}")))?;
            }
        }
        ctx.advance(Phase::Asserted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::cluster;
    use crate::client::{MockCluster, MockClusterConfig};
    use crate::error::CheckError;

    fn options() -> PullsyncOptions {
        PullsyncOptions {
            seed: Some(9),
            upload_node_count: 2,
            chunks_per_node: 3,
            sync_timeout_secs: 2,
            poll_interval_ms: 100,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn neighbourhood_replicates() {
        let mock = MockCluster::with_nodes(6);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("pullsync", 9);
        options().run(&ctx, &cluster).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn under_replication_times_out() {
        let mock = MockCluster::new(MockClusterConfig {
            nodes: 6,
            replication: 1,
            ..Default::default()
        });
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("pullsync", 9);
        let opts = PullsyncOptions {
            replication_factor_threshold: 5,
            ..options()
        };
        match opts.run(&ctx, &cluster).await.unwrap_err() {
            CheckError::WaitTimeout { what, last, .. } => {
                assert!(what.starts_with("pull-sync of "));
                assert!(last.unwrap().contains("expected >= 5"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn depth_limits_neighbourhood() {
        let mock = MockCluster::with_nodes(6);
        let cluster = cluster(&mock).await;
        let group = cluster.node_group("bee").unwrap();
        let closest = &group.nodes()[0];
        assert_eq!(neighbourhood(&group, closest, 0).unwrap().len(), 6);
        let deep = neighbourhood(&group, closest, keeper_types::MAX_PO).unwrap();
        assert_eq!(deep.len(), 1);
        assert_eq!(deep[0].name, closest.name);
    }
}
