//! Run checks against a cluster.

use anyhow::{Context, Result};
use keeper_checks::{
    CheckContext, Cluster, MetricsSink, MockCluster, RecordingMetrics, RunReport, Runner,
    StaticTopology,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;

/// Arguments of the check command.
#[derive(Debug, Default)]
pub struct CheckArgs {
    /// Configuration file.
    pub config: Option<PathBuf>,
    /// Checks replacing the configured run list.
    pub checks: Vec<String>,
    /// Seed overriding the configured run seed.
    pub seed: Option<i64>,
    /// Stop after the first failure.
    pub stop_on_failure: bool,
    /// Run checks concurrently.
    pub concurrent: bool,
    /// Size of an in-memory cluster to use instead of live nodes.
    pub mock: Option<usize>,
    /// Where to write Prometheus metrics.
    pub metrics_file: Option<PathBuf>,
    /// Print the report as JSON.
    pub json: bool,
}

/// Run the check command.
pub async fn run(args: CheckArgs) -> Result<()> {
    let report = execute(&args).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.passed() {
        anyhow::bail!(
            "{} of {} check(s) failed, {} skipped",
            report.failures().count(),
            report.checks.len(),
            report.skipped.len()
        );
    }
    Ok(())
}

async fn execute(args: &CheckArgs) -> Result<RunReport> {
    let config = match (&args.config, args.mock) {
        (Some(path), _) => Config::from_file(path)?,
        (None, Some(_)) => Config::default(),
        (None, None) => anyhow::bail!("--config is required unless --mock is given"),
    };

    let mut runner_config = config.runner_config(args.seed);
    runner_config.stop_on_failure |= args.stop_on_failure;
    runner_config.concurrent |= args.concurrent;
    if args.metrics_file.is_some() {
        runner_config.global.metrics_enabled = true;
    }

    let checks = config.run_list(&args.checks)?;
    if checks.is_empty() {
        anyhow::bail!("No checks to run. Configure [run] checks or pass --checks.");
    }

    let setup = CheckContext::new("setup", 0);
    let cluster = match args.mock {
        Some(nodes) => {
            tracing::info!(nodes, "Using in-memory cluster");
            Cluster::resolve(&setup, &MockCluster::with_nodes(nodes)).await
        }
        None => {
            if config.cluster.node_groups.is_empty() {
                anyhow::bail!("No node groups configured under [cluster.node-groups]");
            }
            let topology = StaticTopology::new(
                config.cluster.node_groups.clone(),
                config.cluster.request_timeout(),
            );
            Cluster::resolve(&setup, &topology).await
        }
    };
    for (group, reason) in cluster.unavailable() {
        tracing::warn!(group, reason, "Checks on this node group will fail");
    }
    tracing::info!(groups = ?cluster.group_names(), "Cluster resolved");

    let metrics = args
        .metrics_file
        .as_ref()
        .map(|_| Arc::new(RecordingMetrics::new()));
    let mut runner = Runner::new(Arc::new(cluster), runner_config);
    if let Some(metrics) = &metrics {
        runner = runner.with_metrics(metrics.clone() as Arc<dyn MetricsSink>);
    }

    let cancel = runner.cancellation();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling checks");
            cancel.cancel();
        }
    });
    let report = runner.run(checks).await;
    interrupt.abort();

    if let (Some(path), Some(metrics)) = (&args.metrics_file, &metrics) {
        tokio::fs::write(path, metrics.render())
            .await
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }
    Ok(report)
}

fn print_report(report: &RunReport) {
    println!("=== swarm-keeper run {} ===", report.run_id);
    println!();
    let width = report
        .checks
        .iter()
        .map(|c| c.name.len())
        .chain(report.skipped.iter().map(String::len))
        .max()
        .unwrap_or(0);
    for check in &report.checks {
        let status = if check.passed { "PASS" } else { "FAIL" };
        println!(
            "  {status}  {:width$}  seed={:<20} {:>8.2}s",
            check.name,
            check.seed,
            check.elapsed.as_secs_f64()
        );
        if let Some(error) = &check.error {
            let category = check
                .category
                .map(|c| format!("{c:?}").to_lowercase())
                .unwrap_or_default();
            println!("        [{category}] {error}");
        }
    }
    for name in &report.skipped {
        println!("  SKIP  {name}");
    }
    println!();
    println!(
        "{} passed, {} failed, {} skipped",
        report.checks.iter().filter(|c| c.passed).count(),
        report.failures().count(),
        report.skipped.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_checks::ErrorCategory;
    use std::io::Write;

    fn mock_args(checks: &[&str]) -> CheckArgs {
        CheckArgs {
            checks: checks.iter().map(|c| c.to_string()).collect(),
            seed: Some(3),
            mock: Some(4),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn mock_run_passes_and_writes_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let metrics_file = dir.path().join("metrics.prom");
        let args = CheckArgs {
            metrics_file: Some(metrics_file.clone()),
            ..mock_args(&["full-connectivity", "pingpong", "soc"])
        };
        let report = execute(&args).await.unwrap();
        assert!(report.passed(), "{report:?}");
        assert!(report.checks.iter().all(|c| c.seed == 3));
        let rendered = std::fs::read_to_string(metrics_file).unwrap();
        assert!(rendered.contains("swarm_keeper_checks_passed_total 3"));
        assert!(rendered.contains("swarm_keeper_pingpong_rtt_seconds"));
    }

    #[tokio::test]
    async fn failing_check_fails_the_command() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[checks.crowded]
type = "peer-count"

[checks.crowded.options]
min-peers = 50
"#,
        )
        .unwrap();
        let args = CheckArgs {
            config: Some(file.path().to_path_buf()),
            ..mock_args(&["crowded"])
        };
        let report = execute(&args).await.unwrap();
        assert!(!report.passed());
        assert!(run(args).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_nodes_are_reported_per_check() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[cluster]
request-timeout-secs = 2

[[cluster.node-groups.bee]]
name = "bee-0"
api-url = "http://127.0.0.1:1"
debug-api-url = "http://127.0.0.1:1"
"#,
        )
        .unwrap();
        let args = CheckArgs {
            config: Some(file.path().to_path_buf()),
            checks: vec!["peer-count".into(), "pingpong".into()],
            ..Default::default()
        };
        let report = execute(&args).await.unwrap();
        assert_eq!(report.checks.len(), 2);
        for check in &report.checks {
            assert!(!check.passed);
            assert_eq!(check.category, Some(ErrorCategory::Environment));
        }
    }

    #[tokio::test]
    async fn live_mode_needs_config() {
        let err = execute(&CheckArgs::default()).await.unwrap_err();
        assert!(err.to_string().contains("--config"));
    }

    #[tokio::test]
    async fn live_mode_needs_node_groups() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let args = CheckArgs {
            config: Some(file.path().to_path_buf()),
            checks: vec!["smoke".into()],
            ..Default::default()
        };
        let err = execute(&args).await.unwrap_err();
        assert!(err.to_string().contains("node groups"));
    }
}
