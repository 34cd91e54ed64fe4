//! Error types for check scenarios.

use crate::assertions::AssertionFailure;
use crate::client::ClientError;
use crate::random::GeneratorError;
use keeper_types::{AddressError, ChunkError, SocError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Broad class of a check failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Invalid input, never retried
    Input,
    /// Cluster call failed after retries or wait timed out
    Transient,
    /// An invariant was violated
    Assertion,
    /// Topology or node group is unusable
    Environment,
    /// Cancelled or out of time
    Aborted,
}

/// Result type for check operations.
pub type Result<T> = std::result::Result<T, CheckError>;

/// Single structured failure of a check.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Invalid address input
    #[error(transparent)]
    Address(#[from] AddressError),

    /// Invalid chunk input
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// Single-owner chunk could not be built or verified
    #[error(transparent)]
    Soc(#[from] SocError),

    /// Generator query could not be satisfied
    #[error(transparent)]
    Generator(#[from] GeneratorError),

    /// Node operation failed
    #[error("node {node}: {source}")]
    Client {
        /// Node that failed
        node: String,
        /// Underlying client error
        #[source]
        source: ClientError,
    },

    /// Condition did not hold before the wait expired
    #[error("timed out waiting for {what} after {attempts} attempt(s) in {elapsed:?}: {}", describe_last(.last))]
    WaitTimeout {
        /// Condition being waited for
        what: String,
        /// Predicate evaluations performed
        attempts: u32,
        /// Time spent waiting
        elapsed: Duration,
        /// Last predicate error
        last: Option<String>,
    },

    /// Invariant violated
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),

    /// Topology problem
    #[error("environment: {0}")]
    Environment(String),

    /// Run was cancelled
    #[error("check cancelled")]
    Cancelled,

    /// Check deadline passed
    #[error("check deadline exceeded")]
    DeadlineExceeded,
}

fn describe_last(last: &Option<String>) -> String {
    match last {
        Some(error) => format!("last error: {error}"),
        None => "no predicate result before deadline".to_string(),
    }
}

impl CheckError {
    /// Wrap a client error with the node it came from.
    pub fn client(node: impl Into<String>, source: ClientError) -> Self {
        CheckError::Client {
            node: node.into(),
            source,
        }
    }

    /// Category of this failure.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CheckError::Address(_)
            | CheckError::Chunk(_)
            | CheckError::Soc(_)
            | CheckError::Generator(_) => ErrorCategory::Input,
            CheckError::Client { .. } | CheckError::WaitTimeout { .. } => ErrorCategory::Transient,
            CheckError::Assertion(_) => ErrorCategory::Assertion,
            CheckError::Environment(_) => ErrorCategory::Environment,
            CheckError::Cancelled | CheckError::DeadlineExceeded => ErrorCategory::Aborted,
        }
    }

    /// Whether retrying could change the outcome.
    ///
    /// Input, environment and abort failures are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::Assertion
        )
    }
}
