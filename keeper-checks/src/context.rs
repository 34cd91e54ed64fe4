//! Per-check execution context.
//!
//! A [`CheckContext`] travels with one check invocation. It owns the resolved
//! seed, the cancellation token and the deadline derived from the check's
//! timeout, and it records which [`Phase`] the check has reached. Every
//! node call and every sleep goes through [`CheckContext::bound`], so
//! cancelling the token or passing the deadline aborts in-flight work.

use crate::error::{CheckError, Result};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::random::PseudoGenerator;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Progress of a check invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Seed resolved, generator created
    Seeded,
    /// Nodes chosen for the workload
    NodesSelected,
    /// Operations sent to nodes
    Dispatched,
    /// Polling for a condition
    Waiting,
    /// Invariants evaluated
    Asserted,
    /// Finished successfully
    Passed,
    /// Finished with a failure
    Failed,
}

impl Phase {
    /// Whether `next` may follow `self`.
    ///
    /// Phases move forward. Multi-round checks alternate between
    /// `Dispatched` and `Waiting`; once `Asserted`, only a terminal phase may
    /// follow, and terminal phases never change.
    pub fn can_advance_to(self, next: Phase) -> bool {
        match self {
            Phase::Passed | Phase::Failed => false,
            Phase::Asserted => next.is_terminal(),
            Phase::Waiting if next == Phase::Dispatched => true,
            _ => next >= self,
        }
    }

    /// Whether the check has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Passed | Phase::Failed)
    }
}

/// Context handed to every check invocation.
#[derive(Clone)]
pub struct CheckContext {
    check: String,
    seed: i64,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    phase: Arc<Mutex<Phase>>,
    metrics: Arc<dyn MetricsSink>,
}

impl CheckContext {
    /// Context for `check` with its resolved seed, no deadline and no metrics.
    pub fn new(check: impl Into<String>, seed: i64) -> Self {
        Self {
            check: check.into(),
            seed,
            cancel: CancellationToken::new(),
            deadline: None,
            phase: Arc::new(Mutex::new(Phase::Seeded)),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Bound all work to `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Observe `token` for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Report measurements to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Name of the running check.
    pub fn check_name(&self) -> &str {
        &self.check
    }

    /// Resolved seed.
    pub fn seed(&self) -> i64 {
        self.seed
    }

    /// A fresh generator keyed by the resolved seed.
    pub fn generator(&self) -> PseudoGenerator {
        PseudoGenerator::new(self.seed)
    }

    /// Metrics sink for this check.
    pub fn metrics(&self) -> &dyn MetricsSink {
        self.metrics.as_ref()
    }

    /// Deadline of this check, if bounded.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancellation token of this check.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    /// Move to `next` if allowed; returns whether the phase changed.
    pub fn advance(&self, next: Phase) -> bool {
        let mut phase = self.phase.lock().unwrap();
        let current = *phase;
        if current == next {
            return false;
        }
        if !current.can_advance_to(next) {
            tracing::warn!(
                check = %self.check,
                from = ?current,
                to = ?next,
                "Ignoring out-of-order phase transition"
            );
            return false;
        }
        tracing::debug!(check = %self.check, from = ?current, to = ?next, "Phase");
        *phase = next;
        true
    }

    /// Run `fut` unless cancelled or past the deadline first.
    pub async fn bound<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CheckError::DeadlineExceeded);
            }
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CheckError::Cancelled),
            _ = sleep_until(self.deadline) => Err(CheckError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }

    /// Sleep for `duration`, honouring cancellation and the deadline.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.bound(tokio::time::sleep(duration)).await
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for CheckContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckContext")
            .field("check", &self.check)
            .field("seed", &self.seed)
            .field("deadline", &self.deadline)
            .field("phase", &self.phase())
            .finish()
    }
}
