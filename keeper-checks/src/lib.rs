//! # keeper-checks
//!
//! Deterministic verification checks for Swarm/Bee clusters.
//!
//! Every check derives its workload (chunk contents, node choice, signing
//! keys) from a single seed, drives the cluster through one injected
//! [`NodeApi`] per node, waits for eventually-consistent state within a
//! bounded window and fails with one structured [`CheckError`].
//!
//! ## Features
//!
//! - **Seeded workloads**: [`PseudoGenerator`] reproduces a run from its seed
//! - **Node group view**: [`NodeGroup`] orders members by overlay and finds
//!   the node closest to a chunk
//! - **Bounded waits**: [`wait_until`] keeps the last predicate error as the
//!   diagnostic
//! - **Checks**: fifteen scenarios selected by [`CheckKind`]
//! - **Runner**: sequential or concurrent execution with per-check reports
//! - **Mock cluster**: [`MockCluster`] simulates push-sync, retrieval,
//!   accounting and eviction for tests and dry runs
//!
//! ## Example
//!
//! ```ignore
//! use keeper_checks::{CheckKind, CheckRun, Cluster, MockCluster, Runner, RunnerConfig};
//!
//! let mock = MockCluster::with_nodes(4);
//! let cluster = Cluster::resolve(&ctx, &mock).await;
//! let runner = Runner::new(Arc::new(cluster), RunnerConfig::default());
//! let report = runner.run(vec![CheckRun::with_defaults(CheckKind::Smoke)]).await;
//! assert!(report.passed());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assertions;
pub mod checks;
pub mod client;
pub mod context;
pub mod error;
pub mod metrics;
pub mod options;
pub mod random;
pub mod runner;
pub mod topology;
pub mod wait;

pub use assertions::AssertionFailure;
pub use checks::{Check, CheckKind, CheckOptions, UnknownCheck};
pub use client::{
    ClientError, HttpNodeClient, MockCluster, MockClusterConfig, NodeApi, NodeEndpoint,
};
pub use context::{CheckContext, Phase};
pub use error::{CheckError, ErrorCategory, Result};
pub use metrics::{MetricsSink, NoopMetrics, RecordingMetrics};
pub use options::{resolve_seed, GlobalOptions};
pub use random::{GeneratorError, PseudoGenerator};
pub use runner::{CheckReport, CheckRun, RunReport, Runner, RunnerConfig};
pub use topology::{
    Cluster, NodeGroup, NodeIdentity, NodeMember, StaticTopology, TopologyError, TopologyProvider,
    DEFAULT_NODE_GROUP,
};
pub use wait::{retry, wait_until, RetryPolicy, WaitError};
