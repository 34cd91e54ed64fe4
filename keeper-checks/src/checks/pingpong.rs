//! Round trips between every node and each peer it reports.

use super::{default_node_group, Check};
use crate::assertions::assert_none;
use crate::context::{CheckContext, Phase};
use crate::error::{CheckError, Result};
use crate::topology::Cluster;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Options for the `pingpong` check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PingpongOptions {
    /// Node group under test
    pub node_group: String,
}

impl Default for PingpongOptions {
    fn default() -> Self {
        Self {
            node_group: default_node_group(),
        }
    }
}

/// Parse a round-trip time such as `1.5ms`, `850µs` or `1m2.5s`.
pub(crate) fn parse_rtt(text: &str) -> Option<Duration> {
    let mut rest = text.trim();
    if rest.is_empty() {
        return None;
    }
    let mut total = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += value * scale;
    }
    Some(Duration::from_secs_f64(total))
}

#[async_trait]
impl Check for PingpongOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        let group = cluster.node_group(&self.node_group)?;
        ctx.advance(Phase::NodesSelected);
        ctx.advance(Phase::Dispatched);

        let mut unreachable = Vec::new();
        for node in group.nodes() {
            let peers = group.invoke(ctx, node, |api| api.peers()).await?;
            for peer in &peers {
                match group.invoke(ctx, node, |api| api.ping(peer)).await {
                    Ok(pong) => {
                        tracing::info!(check = ctx.check_name(), node = %node.name, peer = %peer, rtt = %pong.rtt, "Pong");
                        if let Some(rtt) = parse_rtt(&pong.rtt) {
                            ctx.metrics().observe(
                                ctx.check_name(),
                                "rtt_seconds",
                                &[("node", node.name.as_str())],
                                rtt.as_secs_f64(),
                            );
                        }
                    }
                    Err(CheckError::Client { source, .. }) => {
                        unreachable.push(format!("{} -> {peer}: {source}", node.name));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        ctx.advance(Phase::Asserted);
        assert_none("every reported peer answers a ping", &unreachable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::cluster;
    use crate::client::MockCluster;
    use crate::metrics::RecordingMetrics;
    use std::sync::Arc;

    #[test]
    fn rtt_formats() {
        assert_eq!(parse_rtt("1.5ms"), Some(Duration::from_micros(1_500)));
        assert_eq!(parse_rtt("850µs"), Some(Duration::from_micros(850)));
        assert_eq!(parse_rtt("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_rtt("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_rtt(""), None);
        assert_eq!(parse_rtt("fast"), None);
        assert_eq!(parse_rtt("12"), None);
    }

    #[tokio::test]
    async fn records_rtt_for_every_peer() {
        let mock = MockCluster::with_nodes(3);
        let cluster = cluster(&mock).await;
        let metrics = Arc::new(RecordingMetrics::new());
        let ctx = CheckContext::new("pingpong", 0).with_metrics(metrics.clone());
        PingpongOptions::default().run(&ctx, &cluster).await.unwrap();
        assert_eq!(metrics.observation_count("pingpong", "rtt_seconds"), 6);
    }

    #[tokio::test]
    async fn silent_peer_is_reported_by_every_node() {
        let mock = MockCluster::with_nodes(3);
        mock.refuse_pings(2, true);
        let cluster = cluster(&mock).await;
        let ctx = CheckContext::new("pingpong", 0);
        match PingpongOptions::default().run(&ctx, &cluster).await.unwrap_err() {
            CheckError::Assertion(failure) => {
                assert!(failure.observed.starts_with("2 violation(s)"));
                assert!(failure.observed.contains("bee-0 -> "));
                assert!(failure.observed.contains("bee-1 -> "));
            }
            other => panic!("unexpected: {other}"),
        }
    }
}
