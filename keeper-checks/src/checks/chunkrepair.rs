//! Chunk repair.
//!
//! A pinned chunk is uploaded, then deleted from the local store of the
//! node closest to it (other than the uploader). A third node must still
//! retrieve it byte-equal.

use super::{default_node_group, millis, require_nodes, Check};
use crate::assertions::assert_bytes_equal;
use crate::client::UploadOptions;
use crate::context::{CheckContext, Phase};
use crate::error::Result;
use crate::topology::{Cluster, NodeIdentity};
use crate::wait::{retry, RetryPolicy};
use async_trait::async_trait;
use keeper_types::closest_index;
use serde::Deserialize;

/// Options for the `chunk-repair` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ChunkRepairOptions {
    /// Node group under test
    pub node_group: String,
    /// Seed for chunk contents and node choice
    pub seed: Option<i64>,
    /// Chunks to remove and repair
    pub number_of_chunks_to_repair: usize,
    /// Download retries
    pub retries: u32,
    /// Delay between download retries
    pub retry_delay_ms: u64,
}

impl Default for ChunkRepairOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            seed: None,
            number_of_chunks_to_repair: 1,
            retries: 5,
            retry_delay_ms: 1_000,
        }
    }
}

#[async_trait]
impl Check for ChunkRepairOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        require_nodes(&group, 3, "chunk-repair")?;
        let mut generator = ctx.generator();
        let policy = RetryPolicy::new(self.retries, millis(self.retry_delay_ms));
        let nodes = group.nodes();
        ctx.advance(Phase::NodesSelected);

        for round in 0..self.number_of_chunks_to_repair {
            let chunk = generator.random_chunk()?;
            let address = chunk.address().clone();
            let uploader_index = generator.pick(nodes.len())?;
            let uploader = &nodes[uploader_index];

            let others: Vec<&NodeIdentity> = nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != uploader_index)
                .map(|(_, n)| n)
                .collect();
            let closest = others[closest_index(&address, others.iter().map(|n| &n.overlay))?];
            let candidates: Vec<&NodeIdentity> = others
                .iter()
                .copied()
                .filter(|n| n.name != closest.name)
                .collect();
            let requester = candidates[generator.pick(candidates.len())?];

            let options = UploadOptions::default().pinned();
            group
                .invoke(ctx, uploader, |api| api.upload_chunk(&chunk, &options))
                .await?;
            ctx.advance(Phase::Dispatched);

            let held = group
                .invoke(ctx, closest, |api| api.has_chunk(&address))
                .await?;
            if held {
                group
                    .invoke(ctx, closest, |api| api.remove_chunk(&address))
                    .await?;
            }
            tracing::info!(
                check = ctx.check_name(),
                round,
                chunk = %address,
                uploader = %uploader.name,
                removed_from = %closest.name,
                held,
                requester = %requester.name,
                "Removed chunk from closest node"
            );

            let retrieved = retry(ctx, policy, || {
                group.invoke(ctx, requester, |api| api.download_chunk(&address))
            })
            .await?;
            assert_bytes_equal(
                &format!("chunk {address} repaired through {}", requester.name),
                &chunk.data(),
                &retrieved,
            )?;
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

    fn options() -> ChunkRepairOptions {
        ChunkRepairOptions {
            seed: Some(11),
            number_of_chunks_to_repair: 3,
            retries: 1,
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn removed_chunk_is_still_retrievable() {
        let mock = MockCluster::with_nodes(5);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("chunk-repair", 11);
        options().run(&ctx, &cluster).await.unwrap();
    }

    #[tokio::test]
    async fn corrupted_retrieval_fails() {
        let mock = MockCluster::new(MockClusterConfig {
            nodes: 3,
            ..Default::default()
        });
        for i in 0..3 {
            mock.corrupt_downloads(i, true);
        }
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("chunk-repair", 11);
        let err = options().run(&ctx, &cluster).await.unwrap_err();
        assert!(matches!(err, CheckError::Assertion(_)), "{err}");
    }

    #[tokio::test]
    async fn needs_three_nodes() {
        let mock = MockCluster::with_nodes(2);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("chunk-repair", 11);
        assert!(matches!(
            options().run(&ctx, &cluster).await,
            Err(CheckError::Environment(_))
        ));
    }
}
