//! Accounting balance symmetry.
//!
//! Two nodes keep opposite views of the same debt: when A reports +x
//! with B, B must report -x with A. The check validates this across the
//! group, moves a file between two nodes and validates again.

use super::{default_node_group, millis, require_nodes, secs, Check};
use crate::assertions::{assert_at_least, assert_bytes_equal, assert_none};
use crate::client::UploadOptions;
use crate::context::{CheckContext, Phase};
use crate::error::{CheckError, Result};
use crate::random::PseudoGenerator;
use crate::topology::{Cluster, NodeGroup};
use crate::wait::wait_until;
use async_trait::async_trait;
use futures_util::future::join_all;
use keeper_types::Address;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Options for the `balances` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BalancesOptions {
    /// Node group under test
    pub node_group: String,
    /// Seed for file contents and node choice
    pub seed: Option<i64>,
    /// Only validate current balances
    pub dry_run: bool,
    /// Bytes per uploaded file
    pub file_size: usize,
    /// Files moved between nodes
    pub upload_node_count: usize,
    /// Pause between upload and download
    pub wait_before_download_ms: u64,
    /// How long balances may take to settle into symmetry
    pub sync_timeout_secs: u64,
    /// Poll interval while waiting
    pub poll_interval_ms: u64,
}

impl Default for BalancesOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
            seed: None,
            dry_run: false,
            file_size: 1024 * 1024,
            upload_node_count: 1,
            wait_before_download_ms: 5_000,
            sync_timeout_secs: 60,
            poll_interval_ms: 1_000,
        }
    }
}

/// Balances of every node, keyed by the node's overlay, then the peer's.
pub(super) type BalanceSheet = BTreeMap<Address, HashMap<Address, i128>>;

pub(super) async fn balance_sheet(ctx: &CheckContext, group: &NodeGroup) -> Result<BalanceSheet> {
    let queries = group.nodes().iter().map(|node| async move {
        let balances = group.invoke(ctx, node, |api| api.balances()).await?;
        let by_peer: HashMap<Address, i128> =
            balances.into_iter().map(|b| (b.peer, b.balance)).collect();
        Ok::<_, CheckError>((node.overlay.clone(), by_peer))
    });
    join_all(queries).await.into_iter().collect()
}

fn label(group: &NodeGroup, overlay: &Address) -> String {
    group
        .by_overlay(overlay)
        .map(|n| n.name.clone())
        .unwrap_or_else(|| overlay.to_string())
}

/// Pairs whose two views of the same balance do not cancel out.
pub(super) fn asymmetric_balances(group: &NodeGroup, sheet: &BalanceSheet) -> Vec<String> {
    let nodes = group.nodes();
    let mut violations = Vec::new();
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            let ab = sheet.get(&a.overlay).and_then(|m| m.get(&b.overlay)).copied().unwrap_or(0);
            let ba = sheet.get(&b.overlay).and_then(|m| m.get(&a.overlay)).copied().unwrap_or(0);
            if ab != -ba {
                violations.push(format!(
                    "{} has {ab} with {}, {} has {ba} with {}",
                    a.name, b.name, b.name, a.name
                ));
            }
        }
    }
    violations
}

fn changed_entries(before: &BalanceSheet, after: &BalanceSheet) -> usize {
    after
        .iter()
        .flat_map(|(node, peers)| {
            peers.iter().filter(move |(peer, amount)| {
                let previous = before
                    .get(node)
                    .and_then(|m| m.get(*peer))
                    .copied()
                    .unwrap_or(0);
                previous != **amount
            })
        })
        .count()
}

/// Upload a random file on one node and download it from another.
pub(super) async fn exchange_file(
    ctx: &CheckContext,
    group: &NodeGroup,
    generator: &mut PseudoGenerator,
    file_size: usize,
    wait_before_download: Duration,
) -> Result<()> {
    let nodes = group.nodes();
    let uploader_index = generator.pick(nodes.len())?;
    let uploader = &nodes[uploader_index];
    let downloader = &nodes[generator.pick_index(nodes.len(), uploader_index)?];
    let data = generator.random_bytes(file_size);

    let options = UploadOptions::default();
    let started = Instant::now();
    let reference = group
        .invoke(ctx, uploader, |api| api.upload_bytes(&data, &options))
        .await?;
    tracing::info!(
        check = ctx.check_name(),
        node = %uploader.name,
        reference = %reference,
        bytes = data.len(),
        elapsed = ?started.elapsed(),
        "Uploaded file"
    );

    ctx.sleep(wait_before_download).await?;
    let downloaded = group
        .invoke(ctx, downloader, |api| api.download_bytes(&reference))
        .await?;
    assert_bytes_equal(
        &format!("file {reference} downloaded from {}", downloader.name),
        &data,
        &downloaded,
    )?;
    tracing::info!(check = ctx.check_name(), node = %downloader.name, reference = %reference, "Downloaded file");
    Ok(())
}

async fn moved_and_symmetric(
    ctx: &CheckContext,
    group: &NodeGroup,
    before: &BalanceSheet,
) -> Result<()> {
    let after = balance_sheet(ctx, group).await?;
    assert_none(
        "balances symmetric after retrieval",
        &asymmetric_balances(group, &after),
    )?;
    assert_at_least(
        "balance entries changed by retrieval",
        1,
        changed_entries(before, &after),
    )?;
    Ok(())
}

#[async_trait]
impl Check for BalancesOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        require_nodes(&group, 2, "balances")?;
        let mut generator = ctx.generator();
        ctx.advance(Phase::NodesSelected);

        let before = balance_sheet(ctx, &group).await?;
        assert_none(
            "balances symmetric",
            &asymmetric_balances(&group, &before),
        )?;
        if self.dry_run {
            ctx.advance(Phase::Asserted);
            tracing::info!(check = ctx.check_name(), nodes = group.len(), "Balances symmetric");
            return Ok(());
        }

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
            || moved_and_symmetric(ctx, &group, &before),
        )
        .await
        .map_err(|e| e.into_check_error("balances to settle"))?;
        ctx.advance(Phase::Asserted);
        tracing::info!(check = ctx.check_name(), nodes = group.len(), "Balances symmetric after retrieval");
        Ok(())
    }
}
