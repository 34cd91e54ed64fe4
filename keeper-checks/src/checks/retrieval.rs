//! Chunk retrieval.
//!
//! Chunks uploaded on one node are downloaded from another and compared
//! byte for byte. Upload and download timings are recorded per node.

use super::{default_node_group, millis, require_nodes, Check};
use crate::assertions::assert_bytes_equal;
use crate::client::UploadOptions;
use crate::context::{CheckContext, Phase};
use crate::error::Result;
use crate::topology::Cluster;
use crate::wait::{retry, RetryPolicy};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;

/// Options for the `retrieval` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RetrievalOptions {
    /// Node group under test
    pub node_group: String,
    /// Seed for chunk contents and node choice
    pub seed: Option<i64>,
    /// Nodes that upload
    pub upload_node_count: usize,
    /// Chunks uploaded by each uploading node
    pub chunks_per_node: usize,
    /// Download retries
    pub retries: u32,
    /// Delay between download retries
    pub retry_delay_ms: u64,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            seed: None,
            upload_node_count: 1,
            chunks_per_node: 1,
            retries: 5,
            retry_delay_ms: 1_000,
        }
    }
}

#[async_trait]
impl Check for RetrievalOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        require_nodes(&group, 2, "retrieval")?;
        let mut generator = ctx.generator();
        let policy = RetryPolicy::new(self.retries, millis(self.retry_delay_ms));
        let nodes = group.nodes();
        let mut pairs = Vec::with_capacity(self.upload_node_count);
        for _ in 0..self.upload_node_count {
            let uploader = generator.pick(nodes.len())?;
            let downloader = generator.pick_index(nodes.len(), uploader)?;
            pairs.push((&nodes[uploader], &nodes[downloader]));
        }
        ctx.advance(Phase::NodesSelected);

        let options = UploadOptions::default();
        for (uploader, downloader) in pairs {
            for _ in 0..self.chunks_per_node {
                let chunk = generator.random_chunk()?;
                let address = chunk.address().clone();

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

                let started = Instant::now();
                let retrieved = retry(ctx, policy, || {
                    group.invoke(ctx, downloader, |api| api.download_chunk(&address))
                })
                .await?;
                ctx.metrics().observe(
                    ctx.check_name(),
                    "download_seconds",
                    &[("node", downloader.name.as_str())],
                    started.elapsed().as_secs_f64(),
                );
                assert_bytes_equal(
                    &format!("chunk {address} retrieved by {}", downloader.name),
                    &chunk.data(),
                    &retrieved,
                )?;
                ctx.metrics().increment(
                    ctx.check_name(),
                    "chunks_retrieved",
                    &[("node", downloader.name.as_str())],
                );
                tracing::debug!(
                    check = ctx.check_name(),
                    chunk = %address,
                    uploader = %uploader.name,
                    downloader = %downloader.name,
                    "Chunk retrieved"
                );
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
    use crate::metrics::RecordingMetrics;
    use std::sync::Arc;

    fn options() -> RetrievalOptions {
        RetrievalOptions {
            seed: Some(4),
            upload_node_count: 2,
            chunks_per_node: 3,
            retries: 2,
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn chunks_are_retrievable_and_timed() {
        let mock = MockCluster::with_nodes(4);
        let cluster = cluster(&mock).await;
        let metrics = Arc::new(RecordingMetrics::new());
        let ctx = CheckContext::new("retrieval", 4).with_metrics(metrics.clone());
        options().run(&ctx, &cluster).await.unwrap();
        assert_eq!(metrics.observation_count("retrieval", "upload_seconds"), 6);
        assert_eq!(metrics.observation_count("retrieval", "download_seconds"), 6);
        assert_eq!(metrics.counter("retrieval", "chunks_retrieved"), 6);
    }

    #[tokio::test]
    async fn corrupted_download_is_an_assertion_failure() {
        let mock = MockCluster::with_nodes(2);
        mock.corrupt_downloads(0, true);
        mock.corrupt_downloads(1, true);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("retrieval", 4);
        match options().run(&ctx, &cluster).await.unwrap_err() {
            CheckError::Assertion(failure) => {
                assert!(failure.condition.contains("retrieved by bee-"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn unreplicated_chunk_still_reaches_downloader() {
        let mock = MockCluster::new(MockClusterConfig {
            nodes: 3,
            replication: 0,
            ..Default::default()
        });
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("retrieval", 4);
        options().run(&ctx, &cluster).await.unwrap();
    }
}
