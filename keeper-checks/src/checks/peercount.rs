//! Peer count floor.

use super::{default_node_group, Check};
use crate::assertions::assert_none;
use crate::context::{CheckContext, Phase};
use crate::error::Result;
use crate::topology::Cluster;
use async_trait::async_trait;
use serde::Deserialize;

/// Options for the `peer-count` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PeerCountOptions {
    /// Node group under test
    pub node_group: String,
    /// Fewest peers a node may report
    pub min_peers: usize,
}

impl Default for PeerCountOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            min_peers: 1,
        }
    }
}

#[async_trait]
impl Check for PeerCountOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        ctx.advance(Phase::NodesSelected);
        ctx.advance(Phase::Dispatched);

        let mut short = Vec::new();
        for node in group.nodes() {
            let peers = group.invoke(ctx, node, |api| api.peers()).await?;
            tracing::info!(check = ctx.check_name(), node = %node.name, peers = peers.len(), "Peer count");
            if peers.len() < self.min_peers {
                short.push(format!("{} has {} peer(s)", node.name, peers.len()));
            }
        }
        ctx.advance(Phase::Asserted);
        assert_none(&format!("at least {} peer(s) per node", self.min_peers), &short)?;
        Ok(())
    }
}
