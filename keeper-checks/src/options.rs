//! Run-wide options and per-check precedence.
//!
//! A check's own value wins when set, then the run-wide value, then a
//! default. Seeds are special: a negative seed means "unset", and when
//! neither level provides one a fresh random seed is drawn.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Options shared by every check of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GlobalOptions {
    /// Seed used by checks without their own
    pub seed: Option<i64>,
    /// Record metrics for checks that do not say otherwise
    pub metrics_enabled: bool,
}

/// Pick the seed for one check invocation.
///
/// `local` wins when set and non-negative, then `global` under the same
/// rule, otherwise a random seed in `1..=i64::MAX`. Zero is a valid seed.
pub fn resolve_seed(local: Option<i64>, global: Option<i64>) -> i64 {
    local
        .filter(|seed| *seed >= 0)
        .or_else(|| global.filter(|seed| *seed >= 0))
        .unwrap_or_else(random_seed)
}

/// A fresh seed in `1..=i64::MAX`.
pub fn random_seed() -> i64 {
    rand::thread_rng().gen_range(1..=i64::MAX)
}

/// Whether a check records metrics.
pub fn resolve_metrics(local: Option<bool>, global: bool) -> bool {
    local.unwrap_or(global)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_seed_wins() {
        assert_eq!(resolve_seed(Some(7), Some(3)), 7);
    }

    #[test]
    fn zero_is_a_seed() {
        assert_eq!(resolve_seed(Some(0), Some(3)), 0);
        assert_eq!(resolve_seed(None, Some(0)), 0);
    }

    #[test]
    fn negative_local_falls_back_to_global() {
        assert_eq!(resolve_seed(Some(-1), Some(3)), 3);
        assert_eq!(resolve_seed(None, Some(3)), 3);
    }

    #[test]
    fn random_fallback_is_positive() {
        for _ in 0..100 {
            assert!(resolve_seed(None, None) >= 1);
            assert!(resolve_seed(Some(-1), Some(-5)) >= 1);
        }
    }

    #[test]
    fn unseeded_resolutions_differ() {
        let first = resolve_seed(None, None);
        let second = resolve_seed(None, None);
        assert_ne!(first, second);
        assert_ne!(resolve_seed(Some(-1), None), resolve_seed(Some(-1), None));
    }

    #[test]
    fn metrics_precedence() {
        assert!(resolve_metrics(Some(true), false));
        assert!(!resolve_metrics(Some(false), true));
        assert!(resolve_metrics(None, true));
    }

    #[test]
    fn global_options_from_toml() {
        let options: GlobalOptions = toml::from_str("seed = 42\nmetrics-enabled = true").unwrap();
        assert_eq!(options.seed, Some(42));
        assert!(options.metrics_enabled);
        let empty: GlobalOptions = toml::from_str("").unwrap();
        assert_eq!(empty, GlobalOptions::default());
    }
}
