//! Kademlia table health.
//!
//! Below the neighbourhood depth every bin needs at least one connected
//! peer. At and beyond depth a node must be connected to every peer it
//! knows.

use super::{default_node_group, millis, secs, Check};
use crate::assertions::assert_none;
use crate::client::Topology;
use crate::context::{CheckContext, Phase};
use crate::error::Result;
use crate::topology::{Cluster, NodeGroup};
use crate::wait::wait_until;
use async_trait::async_trait;
use serde::Deserialize;

/// Options for the `kademlia` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct KademliaOptions {
    /// Node group under test
    pub node_group: String,
    /// Poll until the tables become healthy instead of checking once
    pub dynamic: bool,
    /// How long a dynamic check may wait
    pub timeout_secs: u64,
    /// Poll interval of a dynamic check
    pub poll_interval_ms: u64,
}

impl Default for KademliaOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            dynamic: false,
            timeout_secs: 300,
            poll_interval_ms: 5_000,
        }
    }
}

fn table_violations(name: &str, topology: &Topology) -> Vec<String> {
    let mut violations = Vec::new();
    if topology.population > 0 && topology.connected == 0 {
        violations.push(format!("{name} has no connected peers"));
    }
    for (po, bin) in topology.ordered_bins() {
        if po < topology.depth {
            if bin.population > 0 && bin.connected == 0 {
                violations.push(format!(
                    "{name} bin {po} below depth {} has no connected peers",
                    topology.depth
                ));
            }
        } else if !bin.disconnected_peers.is_empty() {
            violations.push(format!(
                "{name} bin {po} at depth {} has {} disconnected peer(s)",
                topology.depth,
                bin.disconnected_peers.len()
            ));
        }
    }
    violations
}

async fn tables_healthy(ctx: &CheckContext, group: &NodeGroup) -> Result<()> {
    let mut violations = Vec::new();
    for node in group.nodes() {
        let topology = group.invoke(ctx, node, |api| api.topology()).await?;
        tracing::debug!(
            check = ctx.check_name(),
            node = %node.name,
            depth = topology.depth,
            population = topology.population,
            connected = topology.connected,
            "Topology"
        );
        violations.extend(table_violations(&node.name, &topology));
    }
    assert_none("kademlia tables healthy", &violations)?;
    Ok(())
}

#[async_trait]
impl Check for KademliaOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        ctx.advance(Phase::NodesSelected);
        ctx.advance(Phase::Dispatched);

        if self.dynamic {
            wait_until(
                ctx,
                secs(self.timeout_secs),
                millis(self.poll_interval_ms),
                || tables_healthy(ctx, &group),
            )
            .await
            .map_err(|e| e.into_check_error("kademlia tables"))?;
        } else {
            tables_healthy(ctx, &group).await?;
        }
        ctx.advance(Phase::Asserted);
        tracing::info!(check = ctx.check_name(), nodes = group.len(), "Kademlia tables healthy");
        Ok(())
    }
}
