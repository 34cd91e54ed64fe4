//! Run list execution.
//!
//! The [`Runner`] executes configured checks against one resolved
//! [`Cluster`]. Each check gets its own [`CheckContext`]: a seed resolved
//! from its own options and the run-wide [`GlobalOptions`], a deadline from
//! its timeout, and a child of the run's cancellation token. Every check is
//! recorded in a [`CheckReport`]; a failing check does not stop the run
//! unless `stop_on_failure` is set.
//!
//! Checks run one after another by default. In concurrent mode they share
//! the read-only cluster view and each owns its generator.

use crate::checks::{Check, CheckKind, CheckOptions};
use crate::context::{CheckContext, Phase};
use crate::error::ErrorCategory;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::options::{resolve_metrics, resolve_seed, GlobalOptions};
use crate::topology::Cluster;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One entry of a run list.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRun {
    /// Name the check is reported under
    pub name: String,
    /// Typed options, which also select the check
    pub options: CheckOptions,
    /// Upper bound on the whole check
    pub timeout: Option<Duration>,
    /// Overrides the run-wide metrics flag
    pub metrics_enabled: Option<bool>,
}

impl CheckRun {
    /// A run entry with no timeout and the run-wide metrics flag.
    pub fn new(name: impl Into<String>, options: CheckOptions) -> Self {
        Self {
            name: name.into(),
            options,
            timeout: None,
            metrics_enabled: None,
        }
    }

    /// Entry for `kind` with default options, named after the kind.
    pub fn with_defaults(kind: CheckKind) -> Self {
        Self::new(kind.name(), kind.default_options())
    }

    /// Bound the check to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Record or suppress metrics for this check.
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = Some(enabled);
        self
    }
}

/// Run-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Seed and metrics defaults for every check
    pub global: GlobalOptions,
    /// Skip remaining checks after the first failure
    pub stop_on_failure: bool,
    /// Run checks as concurrent tasks
    pub concurrent: bool,
}

/// Outcome of one check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    /// Name from the run list
    pub name: String,
    /// Check that ran
    pub kind: CheckKind,
    /// Seed the check ran with
    pub seed: i64,
    /// Phase the check finished in
    pub phase: Phase,
    /// Whether every invariant held
    pub passed: bool,
    /// Failure description
    pub error: Option<String>,
    /// Failure class
    pub category: Option<ErrorCategory>,
    /// Wall time spent
    pub elapsed: Duration,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Identifier attached to every log line of the run
    pub run_id: Uuid,
    /// One report per executed check, in run list order
    pub checks: Vec<CheckReport>,
    /// Checks never started because an earlier one failed
    pub skipped: Vec<String>,
}

impl RunReport {
    /// Whether every executed check passed and none was skipped.
    pub fn passed(&self) -> bool {
        self.skipped.is_empty() && self.checks.iter().all(|c| c.passed)
    }

    /// Reports of failed checks.
    pub fn failures(&self) -> impl Iterator<Item = &CheckReport> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Executes run lists against one cluster.
pub struct Runner {
    cluster: Arc<Cluster>,
    config: RunnerConfig,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
}

impl Runner {
    /// Runner over `cluster`, without a metrics sink.
    pub fn new(cluster: Arc<Cluster>, config: RunnerConfig) -> Self {
        Self {
            cluster,
            config,
            metrics: Arc::new(NoopMetrics),
            cancel: CancellationToken::new(),
        }
    }

    /// Send measurements of metrics-enabled checks to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Token cancelling every check of this runner.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute `checks` and report each one.
    pub async fn run(&self, checks: Vec<CheckRun>) -> RunReport {
        let run_id = Uuid::new_v4();
        tracing::info!(
            %run_id,
            checks = checks.len(),
            concurrent = self.config.concurrent,
            stop_on_failure = self.config.stop_on_failure,
            "Starting run"
        );
        let report = if self.config.concurrent {
            self.run_concurrent(run_id, checks).await
        } else {
            self.run_sequential(run_id, checks).await
        };
        let failed = report.failures().count();
        tracing::info!(
            %run_id,
            passed = report.checks.len() - failed,
            failed,
            skipped = report.skipped.len(),
            "Run finished"
        );
        report
    }

    fn prepare(&self, run: &CheckRun) -> PreparedCheck {
        let seed = resolve_seed(run.options.seed(), self.config.global.seed);
        let metrics_enabled =
            resolve_metrics(run.metrics_enabled, self.config.global.metrics_enabled);
        PreparedCheck {
            run: run.clone(),
            seed,
            metrics: metrics_enabled.then(|| self.metrics.clone()),
            cancel: self.cancel.child_token(),
        }
    }

    async fn run_sequential(&self, run_id: Uuid, checks: Vec<CheckRun>) -> RunReport {
        let mut reports = Vec::with_capacity(checks.len());
        let mut skipped = Vec::new();
        for run in &checks {
            if self.halted(&reports) {
                skipped.push(run.name.clone());
                continue;
            }
            let report = self.prepare(run).execute(run_id, &self.cluster).await;
            self.metrics.record_outcome(&report.name, report.passed);
            reports.push(report);
        }
        if !skipped.is_empty() {
            tracing::warn!(%run_id, skipped = ?skipped, "Skipped remaining checks");
        }
        RunReport {
            run_id,
            checks: reports,
            skipped,
        }
    }

    async fn run_concurrent(&self, run_id: Uuid, checks: Vec<CheckRun>) -> RunReport {
        let mut tasks = JoinSet::new();
        for (index, run) in checks.iter().enumerate() {
            let prepared = self.prepare(run);
            let cluster = self.cluster.clone();
            tasks.spawn(async move { (index, prepared.execute(run_id, &cluster).await) });
        }

        let mut slots: Vec<Option<CheckReport>> = vec![None; checks.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => {
                    self.metrics.record_outcome(&report.name, report.passed);
                    if !report.passed && self.config.stop_on_failure && !self.cancel.is_cancelled() {
                        tracing::warn!(%run_id, check = %report.name, "Cancelling remaining checks");
                        self.cancel.cancel();
                    }
                    slots[index] = Some(report);
                }
                Err(e) => tracing::error!(%run_id, error = %e, "Check task failed to complete"),
            }
        }

        let mut reports = Vec::with_capacity(checks.len());
        for (run, slot) in checks.iter().zip(slots) {
            reports.push(slot.unwrap_or_else(|| CheckReport {
                name: run.name.clone(),
                kind: run.options.kind(),
                seed: 0,
                phase: Phase::Failed,
                passed: false,
                error: Some("check task aborted".to_string()),
                category: Some(ErrorCategory::Aborted),
                elapsed: Duration::ZERO,
            }));
        }
        RunReport {
            run_id,
            checks: reports,
            skipped: Vec::new(),
        }
    }

    fn halted(&self, reports: &[CheckReport]) -> bool {
        self.cancel.is_cancelled()
            || (self.config.stop_on_failure && reports.iter().any(|r| !r.passed))
    }
}

struct PreparedCheck {
    run: CheckRun,
    seed: i64,
    metrics: Option<Arc<dyn MetricsSink>>,
    cancel: CancellationToken,
}

impl PreparedCheck {
    async fn execute(self, run_id: Uuid, cluster: &Cluster) -> CheckReport {
        let PreparedCheck {
            run,
            seed,
            metrics,
            cancel,
        } = self;
        let mut ctx = CheckContext::new(run.name.clone(), seed).with_cancellation(cancel);
        if let Some(timeout) = run.timeout {
            ctx = ctx.with_timeout(timeout);
        }
        if let Some(metrics) = metrics {
            ctx = ctx.with_metrics(metrics);
        }

        tracing::info!(%run_id, check = %run.name, kind = %run.options.kind(), seed, "Running check");
        let started = Instant::now();
        let outcome = run.options.run(&ctx, cluster).await;
        let elapsed = started.elapsed();
        let (passed, error, category) = match outcome {
            Ok(()) => {
                ctx.advance(Phase::Passed);
                tracing::info!(%run_id, check = %run.name, seed, ?elapsed, "Check passed");
                (true, None, None)
            }
            Err(e) => {
                let reached = ctx.phase();
                ctx.advance(Phase::Failed);
                tracing::error!(
                    %run_id,
                    check = %run.name,
                    seed,
                    phase = ?reached,
                    category = ?e.category(),
                    error = %e,
                    "Check failed"
                );
                (false, Some(e.to_string()), Some(e.category()))
            }
        };
        CheckReport {
            name: run.name,
            kind: run.options.kind(),
            seed,
            phase: ctx.phase(),
            passed,
            error,
            category,
            elapsed,
        }
    }
}
