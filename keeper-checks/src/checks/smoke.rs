//! Smoke test.
//!
//! Each run uploads random bytes with a tag on one node, waits for the
//! tag to sync, then downloads the bytes from a different node.

use super::{default_node_group, millis, require_nodes, secs, wait_for_tag, Check};
use crate::assertions::assert_bytes_equal;
use crate::client::UploadOptions;
use crate::context::{CheckContext, Phase};
use crate::error::Result;
use crate::topology::Cluster;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;

/// Options for the `smoke` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SmokeOptions {
    /// Node group under test
    pub node_group: String,
    /// Seed for content and node choice
    pub seed: Option<i64>,
    /// Upload and download rounds
    pub runs: usize,
    /// Bytes uploaded per round
    pub bytes: usize,
    /// How long a tag may take to sync
    pub sync_timeout_secs: u64,
    /// Poll interval while waiting
    pub poll_interval_ms: u64,
}

impl Default for SmokeOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            seed: None,
            runs: 1,
            bytes: 1024,
            sync_timeout_secs: 30,
            poll_interval_ms: 1_000,
        }
    }
}

#[async_trait]
impl Check for SmokeOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        require_nodes(&group, 2, "smoke")?;
        let mut generator = ctx.generator();
        let nodes = group.nodes();
        ctx.advance(Phase::NodesSelected);

        for run in 0..self.runs {
            let uploader_index = generator.pick(nodes.len())?;
            let uploader = &nodes[uploader_index];
            let downloader = &nodes[generator.pick_index(nodes.len(), uploader_index)?];
            let data = generator.random_bytes(self.bytes);

            let tag = group.invoke(ctx, uploader, |api| api.create_tag()).await?;
            let options = UploadOptions::default().with_tag(tag.uid);
            let started = Instant::now();
            let reference = group
                .invoke(ctx, uploader, |api| api.upload_bytes(&data, &options))
                .await?;
            ctx.advance(Phase::Dispatched);
            tracing::info!(
                check = ctx.check_name(),
                run,
                node = %uploader.name,
                reference = %reference,
                bytes = data.len(),
                "Uploaded data"
            );

            wait_for_tag(
                ctx,
                &group,
                uploader,
                tag.uid,
                secs(self.sync_timeout_secs),
                millis(self.poll_interval_ms),
            )
            .await?;
            ctx.metrics().observe(
                ctx.check_name(),
                "sync_seconds",
                &[],
                started.elapsed().as_secs_f64(),
            );

            let started = Instant::now();
            let downloaded = group
                .invoke(ctx, downloader, |api| api.download_bytes(&reference))
                .await?;
            ctx.metrics().observe(
                ctx.check_name(),
                "download_seconds",
                &[],
                started.elapsed().as_secs_f64(),
            );
            assert_bytes_equal(
                "downloaded data matches uploaded data",
                &data,
                &downloaded,
            )?;
            tracing::info!(check = ctx.check_name(), run, node = %downloader.name, "Downloaded data");
        }
        ctx.advance(Phase::Asserted);
        Ok(())
    }
}
