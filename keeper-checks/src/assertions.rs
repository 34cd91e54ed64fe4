//! Assertion helpers for check scenarios.
//!
//! Pure functions that compare observed cluster state against an expected
//! value. A failing assertion carries both sides so the report can show
//! exactly what diverged.

use std::fmt::Display;
use thiserror::Error;

/// A violated check invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{condition}: expected {expected}, observed {observed}")]
pub struct AssertionFailure {
    /// What was checked
    pub condition: String,
    /// Expected value
    pub expected: String,
    /// Observed value
    pub observed: String,
}

impl AssertionFailure {
    /// Create a failure from any displayable values.
    pub fn new(condition: impl Into<String>, expected: impl Display, observed: impl Display) -> Self {
        Self {
            condition: condition.into(),
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }
}

/// Assert that retrieved bytes equal the bytes that were sent.
///
/// On mismatch the observed side names both lengths and the first
/// differing offset.
pub fn assert_bytes_equal(
    condition: &str,
    expected: &[u8],
    observed: &[u8],
) -> Result<(), AssertionFailure> {
    if expected == observed {
        return Ok(());
    }
    let offset = expected
        .iter()
        .zip(observed.iter())
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| expected.len().min(observed.len()));
    Err(AssertionFailure::new(
        condition,
        format!("{} bytes", expected.len()),
        format!("{} bytes, first difference at offset {offset}", observed.len()),
    ))
}

/// Assert that a count reaches a threshold.
pub fn assert_at_least(
    condition: &str,
    threshold: usize,
    observed: usize,
) -> Result<(), AssertionFailure> {
    if observed >= threshold {
        Ok(())
    } else {
        Err(AssertionFailure::new(
            condition,
            format!(">= {threshold}"),
            observed,
        ))
    }
}

/// Assert that a list of violations is empty.
///
/// Violations are joined into the observed side.
pub fn assert_none<T: Display>(condition: &str, violations: &[T]) -> Result<(), AssertionFailure> {
    if violations.is_empty() {
        return Ok(());
    }
    let listed: Vec<String> = violations.iter().map(ToString::to_string).collect();
    Err(AssertionFailure::new(
        condition,
        "no violations",
        format!("{} violation(s): {}", violations.len(), listed.join("; ")),
    ))
}
