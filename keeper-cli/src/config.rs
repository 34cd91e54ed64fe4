//! Configuration loading for swarm-keeper.
//!
//! A TOML file describes the cluster, the run list and per-check options:
//!
//! ```toml
//! [run]
//! checks = ["smoke", "pushsync"]
//! seed = 42
//!
//! [cluster]
//! request-timeout-secs = 30
//!
//! [[cluster.node-groups.bee]]
//! name = "bee-0"
//! api-url = "http://bee-0:1633"
//! debug-api-url = "http://bee-0:1635"
//!
//! [checks.smoke]
//! type = "smoke"
//! timeout-secs = 600
//!
//! [checks.smoke.options]
//! runs = 3
//! ```
//!
//! A run list entry names a `[checks.<name>]` section, or a check type run
//! with default options.

use keeper_checks::{CheckKind, CheckRun, GlobalOptions, NodeEndpoint, RunnerConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Run-wide settings.
    pub run: RunConfig,
    /// Cluster to check.
    pub cluster: ClusterConfig,
    /// Configured checks by name.
    pub checks: BTreeMap<String, CheckConfig>,
}

/// Run-wide settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RunConfig {
    /// Checks to run, in order (default: every configured check).
    pub checks: Vec<String>,
    /// Seed for checks without their own.
    pub seed: Option<i64>,
    /// Record metrics for checks that do not say otherwise.
    pub metrics_enabled: bool,
    /// Skip remaining checks after the first failure.
    pub stop_on_failure: bool,
    /// Run checks concurrently.
    pub concurrent: bool,
}

/// Cluster configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClusterConfig {
    /// Timeout of one node request in seconds (default: 30).
    pub request_timeout_secs: u64,
    /// Node endpoints by group name.
    pub node_groups: BTreeMap<String, Vec<NodeEndpoint>>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            node_groups: BTreeMap::new(),
        }
    }
}

impl ClusterConfig {
    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// One configured check.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CheckConfig {
    /// Check type.
    #[serde(rename = "type")]
    pub kind: CheckKind,
    /// Upper bound on the whole check in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Overrides `run.metrics-enabled`.
    #[serde(default)]
    pub metrics_enabled: Option<bool>,
    /// Type-specific options; missing fields take their defaults.
    #[serde(default)]
    pub options: Option<toml::Value>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Runner settings, with `seed` overriding `run.seed` when given.
    pub fn runner_config(&self, seed: Option<i64>) -> RunnerConfig {
        RunnerConfig {
            global: GlobalOptions {
                seed: seed.or(self.run.seed),
                metrics_enabled: self.run.metrics_enabled,
            },
            stop_on_failure: self.run.stop_on_failure,
            concurrent: self.run.concurrent,
        }
    }

    /// Build the run list.
    ///
    /// `selected` replaces `run.checks`; when both are empty every
    /// configured check runs in name order.
    pub fn run_list(&self, selected: &[String]) -> Result<Vec<CheckRun>, ConfigError> {
        let names: Vec<String> = if !selected.is_empty() {
            selected.to_vec()
        } else if !self.run.checks.is_empty() {
            self.run.checks.clone()
        } else {
            self.checks.keys().cloned().collect()
        };
        names.iter().map(|name| self.check_run(name)).collect()
    }

    fn check_run(&self, name: &str) -> Result<CheckRun, ConfigError> {
        let Some(check) = self.checks.get(name) else {
            let kind: CheckKind = name.parse().map_err(|_| ConfigError::UnknownCheck {
                name: name.to_string(),
            })?;
            return Ok(CheckRun::with_defaults(kind));
        };
        let options = check
            .options
            .clone()
            .unwrap_or_else(|| toml::Value::Table(toml::Table::new()));
        let options = check
            .kind
            .decode_options(options)
            .map_err(|e| ConfigError::InvalidOptions {
                name: name.to_string(),
                source: e,
            })?;
        let mut run = CheckRun::new(name, options);
        if let Some(secs) = check.timeout_secs {
            run = run.with_timeout(Duration::from_secs(secs));
        }
        if let Some(enabled) = check.metrics_enabled {
            run = run.with_metrics(enabled);
        }
        Ok(run)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Run list names neither a configured check nor a check type.
    #[error("unknown check: {name}")]
    UnknownCheck {
        /// Name from the run list.
        name: String,
    },
    /// Options do not fit the check type.
    #[error("invalid options for check {name}: {source}")]
    InvalidOptions {
        /// Configured check name.
        name: String,
        /// Underlying decode error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_checks::CheckOptions;
    use std::io::Write;

    const SAMPLE: &str = r#"
[run]
checks = ["quick-smoke", "pushsync"]
seed = 42
stop-on-failure = true

[cluster]
request-timeout-secs = 5

[[cluster.node-groups.bee]]
name = "bee-0"
api-url = "http://bee-0:1633"
debug-api-url = "http://bee-0:1635"

[[cluster.node-groups.bee]]
name = "bee-1"
api-url = "http://bee-1:1633"
debug-api-url = "http://bee-1:1635"

[checks.quick-smoke]
type = "smoke"
timeout-secs = 120
metrics-enabled = true

[checks.quick-smoke.options]
runs = 3
seed = 7
"#;

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn config_from_file() {
        let file = write(SAMPLE);
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.run.seed, Some(42));
        assert!(config.run.stop_on_failure);
        assert_eq!(config.cluster.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.cluster.node_groups["bee"].len(), 2);
        assert_eq!(config.cluster.node_groups["bee"][1].api_url, "http://bee-1:1633");
    }

    #[test]
    fn run_list_decodes_options_and_fills_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let runs = config.run_list(&[]).unwrap();
        assert_eq!(runs.len(), 2);

        assert_eq!(runs[0].name, "quick-smoke");
        assert_eq!(runs[0].timeout, Some(Duration::from_secs(120)));
        assert_eq!(runs[0].metrics_enabled, Some(true));
        match &runs[0].options {
            CheckOptions::Smoke(options) => {
                assert_eq!(options.runs, 3);
                assert_eq!(options.seed, Some(7));
                assert_eq!(options.bytes, 1024);
            }
            other => panic!("unexpected options: {other:?}"),
        }

        assert_eq!(runs[1].name, "pushsync");
        assert_eq!(runs[1].options, CheckKind::Pushsync.default_options());
        assert_eq!(runs[1].timeout, None);
    }

    #[test]
    fn selected_checks_replace_run_list() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let runs = config.run_list(&["pingpong".to_string()]).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].options.kind(), CheckKind::Pingpong);
    }

    #[test]
    fn empty_run_list_runs_every_configured_check() {
        let config: Config = toml::from_str(
            r#"
[checks.b-retrieval]
type = "retrieval"

[checks.a-soc]
type = "soc"
"#,
        )
        .unwrap();
        let names: Vec<String> = config
            .run_list(&[])
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a-soc", "b-retrieval"]);
    }

    #[test]
    fn unknown_check_is_an_error() {
        let config = Config::default();
        let err = config.run_list(&["manifest".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCheck { name } if name == "manifest"));
    }

    #[test]
    fn unknown_check_type_fails_to_parse() {
        let file = write("[checks.x]\ntype = \"upload-everything\"\n");
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn misspelled_option_is_rejected() {
        let config: Config = toml::from_str(
            r#"
[checks.smoke]
type = "smoke"

[checks.smoke.options]
rnus = 3
"#,
        )
        .unwrap();
        assert!(matches!(
            config.run_list(&[]),
            Err(ConfigError::InvalidOptions { name, .. }) if name == "smoke"
        ));
    }

    #[test]
    fn cli_seed_overrides_config_seed() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.runner_config(None).global.seed, Some(42));
        assert_eq!(config.runner_config(Some(9)).global.seed, Some(9));
        assert!(config.runner_config(None).stop_on_failure);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::from_file(Path::new("/nonexistent/keeper.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cluster.request_timeout_secs, 30);
        assert!(config.checks.is_empty());
        assert!(!config.run.concurrent);
    }
}
