//! Settlement symmetry and payment thresholds.

use super::balances::{asymmetric_balances, balance_sheet, exchange_file};
use super::{default_node_group, millis, require_nodes, secs, Check};
use crate::assertions::{assert_none, AssertionFailure};
use crate::client::Settlements;
use crate::context::{CheckContext, Phase};
use crate::error::{CheckError, Result};
use crate::topology::{Cluster, NodeGroup};
use crate::wait::wait_until;
use async_trait::async_trait;
use futures_util::future::join_all;
use keeper_types::Address;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Options for the `settlements` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SettlementsOptions {
    /// Node group under test
    pub node_group: String,
    /// Seed for file contents and node choice
    pub seed: Option<i64>,
    /// Only validate current state
    pub dry_run: bool,
    /// Require the exchange to trigger at least one settlement
    pub expect_settlements: bool,
    /// Bytes per uploaded file
    pub file_size: usize,
    /// Largest balance any node may carry
    pub threshold: i64,
    /// Files moved between nodes
    pub upload_node_count: usize,
    /// Pause between upload and download
    pub wait_before_download_ms: u64,
    /// How long settlements may take to appear
    pub sync_timeout_secs: u64,
    /// Poll interval while waiting
    pub poll_interval_ms: u64,
}

impl Default for SettlementsOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            seed: None,
            dry_run: false,
            expect_settlements: true,
            file_size: 1024 * 1024,
            threshold: 10_000_000_000_000,
            upload_node_count: 1,
            wait_before_download_ms: 5_000,
            sync_timeout_secs: 60,
            poll_interval_ms: 1_000,
        }
    }
}

type SettlementSheet = BTreeMap<Address, Settlements>;

async fn settlement_sheet(ctx: &CheckContext, group: &NodeGroup) -> Result<SettlementSheet> {
    let queries = group.nodes().iter().map(|node| async move {
        let settlements = group.invoke(ctx, node, |api| api.settlements()).await?;
        Ok::<_, CheckError>((node.overlay.clone(), settlements))
    });
    join_all(queries).await.into_iter().collect()
}

// A.sent[B] must equal B.received[A] in both directions.
fn asymmetric_settlements(group: &NodeGroup, sheet: &SettlementSheet) -> Vec<String> {
    let lookup = |owner: &Address, peer: &Address| {
        sheet
            .get(owner)
            .and_then(|s| s.with_peer(peer))
            .map(|s| (s.sent, s.received))
            .unwrap_or((0, 0))
    };
    let nodes = group.nodes();
    let mut violations = Vec::new();
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            let (a_sent, a_received) = lookup(&a.overlay, &b.overlay);
            let (b_sent, b_received) = lookup(&b.overlay, &a.overlay);
            if a_sent != b_received {
                violations.push(format!(
                    "{} sent {a_sent} to {}, which received {b_received}",
                    a.name, b.name
                ));
            }
            if b_sent != a_received {
                violations.push(format!(
                    "{} sent {b_sent} to {}, which received {a_received}",
                    b.name, a.name
                ));
            }
        }
    }
    violations
}

fn total_sent(sheet: &SettlementSheet) -> i128 {
    sheet.values().map(|s| s.total_sent).sum()
}

async fn validate(ctx: &CheckContext, group: &NodeGroup, threshold: i64) -> Result<SettlementSheet> {
    let balances = balance_sheet(ctx, group).await?;
    assert_none("balances symmetric", &asymmetric_balances(group, &balances))?;

    let limit = i128::from(threshold);
    let mut over = Vec::new();
    for node in group.nodes() {
        if let Some(peers) = balances.get(&node.overlay) {
            for (peer, balance) in peers {
                if balance.abs() > limit {
                    let peer = group
                        .by_overlay(peer)
                        .map(|n| n.name.clone())
                        .unwrap_or_else(|| peer.to_string());
                    over.push(format!("{} has {balance} with {peer}", node.name));
                }
            }
        }
    }
    assert_none(&format!("balances within {threshold}"), &over)?;

    let settlements = settlement_sheet(ctx, group).await?;
    assert_none(
        "settlements symmetric",
        &asymmetric_settlements(group, &settlements),
    )?;
    Ok(settlements)
}

async fn settled_since(
    ctx: &CheckContext,
    group: &NodeGroup,
    threshold: i64,
    expect_settlements: bool,
    sent_before: i128,
) -> Result<()> {
    let settlements = validate(ctx, group, threshold).await?;
    let sent_after = total_sent(&settlements);
    if expect_settlements && sent_after <= sent_before {
        return Err(AssertionFailure::new(
            "settlements after retrieval",
            format!("total sent above {sent_before}"),
            sent_after,
        )
        .into());
    }
    Ok(())
}

#[async_trait]
impl Check for SettlementsOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        require_nodes(&group, 2, "settlements")?;
        let mut generator = ctx.generator();
        ctx.advance(Phase::NodesSelected);

        let before = validate(ctx, &group, self.threshold).await?;
        if self.dry_run {
            ctx.advance(Phase::Asserted);
            tracing::info!(check = ctx.check_name(), nodes = group.len(), "Settlements valid");
            return Ok(());
        }
        let sent_before = total_sent(&before);

        ctx.advance(Phase::Dispatched);
        for _ in 0..self.upload_node_count {
            exchange_file(
                ctx,
                &group,
                &mut generator,
                self.file_size,
                millis(self.wait_before_download_ms),
            )
            .await?;
        }

        wait_until(
            ctx,
            secs(self.sync_timeout_secs),
            millis(self.poll_interval_ms),
            || settled_since(ctx, &group, self.threshold, self.expect_settlements, sent_before),
        )
        .await
        .map_err(|e| e.into_check_error("settlements to complete"))?;
        ctx.advance(Phase::Asserted);
        tracing::info!(check = ctx.check_name(), sent_before, "Settlements valid after retrieval");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::cluster;
    use crate::client::{MockCluster, MockClusterConfig};

    fn network() -> MockCluster {
        MockCluster::new(MockClusterConfig {
            nodes: 3,
            replication: 0,
            price_per_chunk: 600,
            payment_threshold: 1_000,
            ..Default::default()
        })
    }

    fn options() -> SettlementsOptions {
        SettlementsOptions {
            seed: Some(3),
            file_size: 10_000,
            threshold: 10_000,
            wait_before_download_ms: 0,
            sync_timeout_secs: 1,
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn retrieval_triggers_symmetric_settlements() {
        let mock = network();
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("settlements", 3);
        options().run(&ctx, &cluster).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_settlement_times_out_with_diagnostic() {
        let mock = MockCluster::new(MockClusterConfig {
            nodes: 3,
            replication: 0,
            ..Default::default()
        });
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("settlements", 3);
        // Debts stay far below the payment threshold, so nobody settles.
        let opts = SettlementsOptions {
            threshold: 10_000_000,
            ..options()
        };
        match opts.run(&ctx, &cluster).await.unwrap_err() {
            CheckError::WaitTimeout { what, last, .. } => {
                assert_eq!(what, "settlements to complete");
                assert!(last.unwrap().contains("settlements after retrieval"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn balance_above_threshold_fails() {
        let mock = network();
        mock.skew_balance(0, 1, 50_000);
        mock.skew_balance(1, 0, -50_000);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("settlements", 3);
        let opts = SettlementsOptions {
            dry_run: true,
            ..options()
        };
        match opts.run(&ctx, &cluster).await.unwrap_err() {
            CheckError::Assertion(failure) => {
                assert_eq!(failure.condition, "balances within 10000");
                assert!(failure.observed.contains("2 violation(s)"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn dry_run_without_expectations_passes() {
        let mock = network();
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("settlements", 3);
        let opts = SettlementsOptions {
            dry_run: true,
            ..options()
        };
        opts.run(&ctx, &cluster).await.unwrap();
    }
}
