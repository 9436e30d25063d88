use crate::keep_test::{KeepTest, KeepTestRegistry};
use crate::row_auditor::AuditMode;
use crate::ScanError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_DIR_ENV: &str = "FDRSCAN_STATE_DIR";
pub const DEFAULT_STATE_DIR: &str = "./fdrscan_state";
pub const DEFAULT_FLUSH_THRESHOLD: u64 = 100;

/// Directory holding shared checkpoints unless a path is given explicitly
pub fn state_dir() -> PathBuf {
    std::env::var(STATE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_DIR))
}

/// Configuration for one [`CompletionTracker`](crate::completion_tracker::CompletionTracker)
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub checkpoint_path: PathBuf,
    /// Size N of the batch; the checkpoint is complete when it equals `0..N`
    pub item_count: u64,
    /// Pending completions that trigger a background flush
    pub flush_threshold: u64,
}

impl TrackerConfig {
    pub fn new(checkpoint_path: impl Into<PathBuf>, item_count: u64) -> Self {
        Self {
            checkpoint_path: checkpoint_path.into(),
            item_count,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    /// Checkpoint named `<batch_name>.completed` inside the state directory
    pub fn in_state_dir(batch_name: &str, item_count: u64) -> Self {
        Self::new(state_dir().join(format!("{}.completed", batch_name)), item_count)
    }

    pub fn with_flush_threshold(mut self, flush_threshold: u64) -> Self {
        self.flush_threshold = flush_threshold.max(1);
        self
    }
}

/// How q-values are computed for each split bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QValueMethod {
    /// Storey–Tibshirani estimate from the real p-values alone
    StoreyTibshirani,
    /// Empirical FDR against one pooled null distribution
    #[default]
    Randomization,
    /// Empirical FDR against per-`groupId` null pools
    LocalRandomization,
}

impl QValueMethod {
    pub fn uses_null_runs(self) -> bool {
        !matches!(self, QValueMethod::StoreyTibshirani)
    }
}

/// Everything one tabulation pass needs. Loadable from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TabulateConfig {
    pub input_dir: PathBuf,
    /// Each entry is one broad pattern, optionally '+'-joined from narrow glob patterns
    pub patterns: Vec<String>,
    pub output: PathBuf,
    /// Keep-test expression applied to every row
    pub keep_test: String,
    /// Ordered split keep-tests; rows matching none land in a trailing bucket
    pub split_keep_tests: Vec<String>,
    pub max_p_value: f64,
    pub audit: AuditMode,
    pub method: QValueMethod,
    /// Hypothesis count m for Storey–Tibshirani instead of the observed count
    pub num_tests_override: Option<u64>,
}

impl Default for TabulateConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            patterns: Vec::new(),
            output: PathBuf::from("tabulate.txt"),
            keep_test: "AlwaysKeep".to_string(),
            split_keep_tests: Vec::new(),
            max_p_value: 1.0,
            audit: AuditMode::Strict,
            method: QValueMethod::Randomization,
            num_tests_override: None,
        }
    }
}

impl TabulateConfig {
    pub fn new(input_dir: impl Into<PathBuf>, pattern: &str, output: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            patterns: vec![pattern.to_string()],
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ScanError> {
        let text = fs::read_to_string(path)?;
        let config: TabulateConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.patterns.is_empty() {
            return Err(ScanError::Config("at least one input file pattern is required".into()));
        }
        if !(self.max_p_value >= 0.0) {
            return Err(ScanError::Config(format!("max_p_value must be non-negative, got {}", self.max_p_value)));
        }
        if self.num_tests_override.is_some() && self.method != QValueMethod::StoreyTibshirani {
            return Err(ScanError::Config(
                "num_tests_override only applies to the storey_tibshirani method".into(),
            ));
        }
        Ok(())
    }

    /// Parse the global and split keep-test expressions
    pub fn keep_tests(&self, registry: &KeepTestRegistry) -> Result<(KeepTest, Vec<KeepTest>), ScanError> {
        let global = registry.parse(&self.keep_test)?;
        let splits = self
            .split_keep_tests
            .iter()
            .map(|expr| registry.parse(expr))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((global, splits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tabulate_config_from_json_uses_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("job.json");
        fs::write(
            &path,
            r#"{"input_dir": "results", "patterns": ["real*.txt+null*.txt"], "method": "storey_tibshirani", "num_tests_override": 5000}"#,
        )
        .unwrap();

        let config = TabulateConfig::from_json_file(&path).unwrap();
        assert_eq!(config.input_dir, PathBuf::from("results"));
        assert_eq!(config.patterns, vec!["real*.txt+null*.txt".to_string()]);
        assert_eq!(config.method, QValueMethod::StoreyTibshirani);
        assert_eq!(config.num_tests_override, Some(5000));
        assert_eq!(config.max_p_value, 1.0);
        assert_eq!(config.audit, AuditMode::Strict);
        assert_eq!(config.keep_test, "AlwaysKeep");
    }

    #[test]
    fn test_validate_rejects_override_without_storey() {
        let mut config = TabulateConfig::new(".", "*.txt", "out.txt");
        config.num_tests_override = Some(10);
        assert!(matches!(config.validate(), Err(ScanError::Config(_))));
    }

    #[test]
    fn test_validate_requires_patterns() {
        let config = TabulateConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tracker_config_threshold_is_at_least_one() {
        let config = TrackerConfig::new("x.completed", 10).with_flush_threshold(0);
        assert_eq!(config.flush_threshold, 1);
        assert_eq!(TrackerConfig::new("x", 1).flush_threshold, DEFAULT_FLUSH_THRESHOLD);
    }
}
