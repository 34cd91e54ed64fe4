//! Single-owner chunks.
//!
//! A chunk is signed with a key drawn from the seeded generator, uploaded
//! under the owner's address and retrieved byte-identical. The retrieved
//! wire form must still carry a signature recovering the same owner.

use super::{default_node_group, require_nodes, Check};
use crate::assertions::AssertionFailure;
use crate::client::UploadOptions;
use crate::context::{CheckContext, Phase};
use crate::error::Result;
use crate::topology::Cluster;
use async_trait::async_trait;
use keeper_types::{Chunk, SingleOwnerChunk};
use serde::Deserialize;

const PAYLOAD: &[u8] = b"Hello Swarm :)";

/// Options for the `soc` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SocOptions {
    /// Node group under test
    pub node_group: String,
    /// Seed for the signing key, identifier and node choice
    pub seed: Option<i64>,
}

impl Default for SocOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            seed: None,
        }
    }
}

#[async_trait]
impl Check for SocOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        require_nodes(&group, 1, "soc")?;
        let mut generator = ctx.generator();
        let nodes = group.nodes();
        let uploader_index = generator.pick(nodes.len())?;
        let uploader = &nodes[uploader_index];
        let downloader = if nodes.len() > 1 {
            &nodes[generator.pick_index(nodes.len(), uploader_index)?]
        } else {
            tracing::warn!(
                check = ctx.check_name(),
                group = group.name(),
                node = %uploader.name,
                "Single-node group, reading the chunk back from its uploader"
            );
            uploader
        };
        ctx.advance(Phase::NodesSelected);

        let signer = generator.random_signer();
        let id = generator.random_id();
        let soc = SingleOwnerChunk::sign(id, Chunk::new(PAYLOAD.to_vec())?, &signer)?;
        let expected = soc.address();

        let options = UploadOptions::default();
        let reference = group
            .invoke(ctx, uploader, |api| api.upload_soc(&soc, &options))
            .await?;
        ctx.advance(Phase::Dispatched);
        tracing::info!(
            check = ctx.check_name(),
            node = %uploader.name,
            owner = %soc.owner(),
            reference = %reference,
            "Uploaded single-owner chunk"
        );
        if reference != expected {
            return Err(AssertionFailure::new(
                "node returns the single-owner chunk address",
                &expected,
                &reference,
            )
            .into());
        }

        let retrieved = group
            .invoke(ctx, downloader, |api| api.download_chunk(&expected))
            .await?;
        ctx.advance(Phase::Asserted);
        if retrieved != soc.data() {
            return Err(AssertionFailure::new(
                "retrieved content does not match signed content",
                hex::encode(soc.data()),
                hex::encode(&retrieved),
            )
            .into());
        }
        let parsed = SingleOwnerChunk::from_data(&retrieved)?;
        if parsed.owner() != soc.owner() {
            return Err(AssertionFailure::new(
                "retrieved signature recovers the owner",
                soc.owner(),
                parsed.owner(),
            )
            .into());
        }
        tracing::info!(check = ctx.check_name(), node = %downloader.name, "Single-owner chunk verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::cluster;
    use crate::client::MockCluster;
    use crate::error::CheckError;

    fn options() -> SocOptions {
        SocOptions {
            seed: Some(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn signed_chunk_round_trips() {
        let mock = MockCluster::with_nodes(3);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("soc", 5);
        options().run(&ctx, &cluster).await.unwrap();
        assert_eq!(ctx.phase(), Phase::Asserted);
    }

    #[tokio::test]
    async fn single_node_group_reads_its_own_upload() {
        let mock = MockCluster::with_nodes(1);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("soc", 5);
        options().run(&ctx, &cluster).await.unwrap();
    }

    #[tokio::test]
    async fn tampered_content_is_reported() {
        let mock = MockCluster::with_nodes(2);
        mock.corrupt_downloads(0, true);
        mock.corrupt_downloads(1, true);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("soc", 5);
        match options().run(&ctx, &cluster).await.unwrap_err() {
            CheckError::Assertion(failure) => {
                assert_eq!(
                    failure.condition,
                    "retrieved content does not match signed content"
                );
                assert_ne!(failure.expected, failure.observed);
            }
            other => panic!("unexpected: {other}"),
        }
    }
}
