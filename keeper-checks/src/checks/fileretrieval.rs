//! File retrieval.
//!
//! Multi-chunk files uploaded through the bytes endpoint of one node are
//! downloaded from another node, or from every other node in `full` mode,
//! and compared byte for byte.

use super::{default_node_group, millis, require_nodes, Check};
use crate::assertions::assert_bytes_equal;
use crate::client::UploadOptions;
use crate::context::{CheckContext, Phase};
use crate::error::Result;
use crate::topology::{Cluster, NodeIdentity};
use crate::wait::{retry, RetryPolicy};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;

/// Options for the `file-retrieval` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileRetrievalOptions {
    /// Node group under test
    pub node_group: String,
    /// Seed for file contents and node choice
    pub seed: Option<i64>,
    /// Name attached to uploaded files in logs
    pub file_name: String,
    /// Bytes per file
    pub file_size: usize,
    /// Files uploaded by each uploading node
    pub files_per_node: usize,
    /// Download from every other node instead of one
    pub full: bool,
    /// Nodes that upload
    pub upload_node_count: usize,
    /// Download retries
    pub retries: u32,
    /// Delay between download retries
    pub retry_delay_ms: u64,
}

impl Default for FileRetrievalOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            seed: None,
            file_name: "file-retrieval".to_string(),
            file_size: 1024 * 1024,
            files_per_node: 1,
            full: false,
            upload_node_count: 1,
            retries: 5,
            retry_delay_ms: 1_000,
        }
    }
}

#[async_trait]
impl Check for FileRetrievalOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        require_nodes(&group, 2, "file-retrieval")?;
        let mut generator = ctx.generator();
        let policy = RetryPolicy::new(self.retries, millis(self.retry_delay_ms));
        let nodes = group.nodes();

        let mut plan: Vec<(&NodeIdentity, Vec<&NodeIdentity>)> =
            Vec::with_capacity(self.upload_node_count);
        for _ in 0..self.upload_node_count {
            let uploader = generator.pick(nodes.len())?;
            let downloaders = if self.full {
                nodes
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != uploader)
                    .map(|(_, n)| n)
                    .collect()
            } else {
                vec![&nodes[generator.pick_index(nodes.len(), uploader)?]]
            };
            plan.push((&nodes[uploader], downloaders));
        }
        ctx.advance(Phase::NodesSelected);

        let options = UploadOptions::default();
        for (uploader, downloaders) in plan {
            for file in 0..self.files_per_node {
                let data = generator.random_bytes(self.file_size);
                let started = Instant::now();
                let reference = group
                    .invoke(ctx, uploader, |api| api.upload_bytes(&data, &options))
                    .await?;
                ctx.metrics().observe(
                    ctx.check_name(),
                    "upload_seconds",
                    &[("node", uploader.name.as_str())],
                    started.elapsed().as_secs_f64(),
                );
                ctx.advance(Phase::Dispatched);
                tracing::info!(
                    check = ctx.check_name(),
                    file = %format!("{}-{file}", self.file_name),
                    node = %uploader.name,
                    reference = %reference,
                    bytes = data.len(),
                    "Uploaded file"
                );

                for downloader in &downloaders {
                    let started = Instant::now();
                    let downloaded = retry(ctx, policy, || {
                        group.invoke(ctx, downloader, |api| api.download_bytes(&reference))
                    })
                    .await?;
                    ctx.metrics().observe(
                        ctx.check_name(),
                        "download_seconds",
                        &[("node", downloader.name.as_str())],
                        started.elapsed().as_secs_f64(),
                    );
                    assert_bytes_equal(
                        &format!("file {reference} retrieved by {}", downloader.name),
                        &data,
                        &downloaded,
                    )?;
                    ctx.metrics().increment(
                        ctx.check_name(),
                        "files_retrieved",
                        &[("node", downloader.name.as_str())],
                    );
                }
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
    use crate::client::MockCluster;
    use crate::error::CheckError;
    use crate::metrics::RecordingMetrics;
    use std::sync::Arc;

    fn options() -> FileRetrievalOptions {
        FileRetrievalOptions {
            seed: Some(6),
            file_size: 20_000,
            files_per_node: 2,
            upload_node_count: 2,
            retries: 2,
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn files_download_from_another_node() {
        let mock = MockCluster::with_nodes(4);
        let cluster = cluster(&mock).await;
        let metrics = Arc::new(RecordingMetrics::new());
        let ctx = CheckContext::new("file-retrieval", 6).with_metrics(metrics.clone());
        options().run(&ctx, &cluster).await.unwrap();
        assert_eq!(ctx.phase(), Phase::Asserted);
        assert_eq!(metrics.observation_count("file-retrieval", "upload_seconds"), 4);
        assert_eq!(metrics.counter("file-retrieval", "files_retrieved"), 4);
    }

    #[tokio::test]
    async fn full_mode_downloads_from_every_other_node() {
        let mock = MockCluster::with_nodes(4);
        let cluster = cluster(&mock).await;
        let metrics = Arc::new(RecordingMetrics::new());
        let ctx = CheckContext::new("file-retrieval", 6).with_metrics(metrics.clone());
        let opts = FileRetrievalOptions {
            full: true,
            ..options()
        };
        opts.run(&ctx, &cluster).await.unwrap();
        // 2 uploaders x 2 files x 3 other nodes
        assert_eq!(metrics.counter("file-retrieval", "files_retrieved"), 12);
    }

    #[tokio::test]
    async fn corrupted_file_is_an_assertion_failure() {
        let mock = MockCluster::with_nodes(2);
        mock.corrupt_downloads(0, true);
        mock.corrupt_downloads(1, true);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("file-retrieval", 6);
        match options().run(&ctx, &cluster).await.unwrap_err() {
            CheckError::Assertion(failure) => {
                assert!(failure.condition.starts_with("file "));
                assert!(failure.condition.contains("retrieved by bee-"));
            }
            other => panic!("unexpected: {other}"),
        }
        assert_ne!(ctx.phase(), Phase::Asserted);
    }

    #[tokio::test]
    async fn single_node_group_is_rejected() {
        let mock = MockCluster::with_nodes(1);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("file-retrieval", 6);
        let err = options().run(&ctx, &cluster).await.unwrap_err();
        assert!(matches!(err, CheckError::Environment(_)));
    }
}
