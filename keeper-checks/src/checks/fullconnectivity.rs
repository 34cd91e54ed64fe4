//! Full mesh connectivity.

use super::{default_node_group, Check};
use crate::assertions::assert_none;
use crate::context::{CheckContext, Phase};
use crate::error::{CheckError, Result};
use crate::topology::Cluster;
use async_trait::async_trait;
use futures_util::future::join_all;
use keeper_types::Address;
use serde::Deserialize;
use std::collections::HashSet;

/// Options for the `full-connectivity` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FullConnectivityOptions {
    /// Node group under test
    pub node_group: String,
}

impl Default for FullConnectivityOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
        }
    }
}

#[async_trait]
impl Check for FullConnectivityOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        ctx.advance(Phase::NodesSelected);

        let group = group.as_ref();
        let queries = group.nodes().iter().map(|node| async move {
            let peers = group.invoke(ctx, node, |api| api.peers()).await?;
            Ok::<_, CheckError>((node, peers.into_iter().collect::<HashSet<Address>>()))
        });
        ctx.advance(Phase::Dispatched);
        let views = join_all(queries)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let mut missing = Vec::new();
        for (node, peers) in &views {
            for other in group.nodes() {
                if other.name != node.name && !peers.contains(&other.overlay) {
                    missing.push(format!("{} is not connected to {}", node.name, other.name));
                }
            }
        }
        ctx.advance(Phase::Asserted);
        assert_none("every node connected to every other node", &missing)?;
        tracing::info!(check = ctx.check_name(), nodes = group.len(), "Cluster fully connected");
        Ok(())
    }
}
