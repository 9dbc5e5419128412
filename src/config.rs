use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::retry::RetryPolicy;

// -----------------------------------------------------------------------------
// Types

/// How a source branch is folded into its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    #[default]
    Merge,
    Rebase,
    Squash,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => f.write_str("merge"),
            Self::Rebase => f.write_str("rebase"),
            Self::Squash => f.write_str("squash"),
        }
    }
}

/// Configuration for a single branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchConfig {
    pub name: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_true")]
    pub auto_fetch: bool,
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
}

impl BranchConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            remote: default_remote(),
            auto_fetch: true,
            merge_strategy: MergeStrategy::default(),
        }
    }
}

/// Configuration for a single repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub path: PathBuf,
    pub name: String,
    #[serde(default)]
    pub branches: Vec<BranchConfig>,
    #[serde(default = "default_remote")]
    pub default_remote: String,
}

/// Top-level configuration for one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default = "default_true")]
    pub parallel_operations: bool,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Delay before the first retry of a failed network operation.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            parallel_operations: true,
            max_workers: default_max_workers(),
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_workers() -> usize {
    4
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> f64 {
    2.0
}

// -----------------------------------------------------------------------------
// Config impl

impl Config {
    /// Load config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save config to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Check the configuration, returning one message per problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.repositories.is_empty() {
            errors.push("at least one repository must be configured".to_string());
        }

        for repo in &self.repositories {
            if !repo.path.exists() {
                errors.push(format!(
                    "repository path does not exist: {}",
                    repo.path.display()
                ));
            }
        }

        if self.max_workers < 1 {
            errors.push("max_workers must be at least 1".to_string());
        }

        errors
    }

    /// Retry parameters shared by every network operation in the run.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_delay: Duration::from_secs_f64(self.retry_delay_secs.max(0.0)),
            backoff_base: 2.0,
        }
    }

    /// A starter configuration covering the given repository.
    pub fn default_for(repo_path: &Path) -> Self {
        let name = repo_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "repository".to_string());

        Self {
            repositories: vec![RepositoryConfig {
                path: repo_path.to_path_buf(),
                name,
                branches: vec![BranchConfig::new("main"), BranchConfig::new("develop")],
                default_remote: default_remote(),
            }],
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_knobs() {
        let config = Config::default();
        assert!(config.parallel_operations);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay_secs, 2.0);
    }

    #[test]
    fn branch_config_defaults_apply_when_omitted() {
        let branch: BranchConfig = serde_json::from_str(r#"{"name": "main"}"#).unwrap();
        assert_eq!(branch.remote, "origin");
        assert!(branch.auto_fetch);
        assert_eq!(branch.merge_strategy, MergeStrategy::Merge);
    }

    #[test]
    fn merge_strategy_parses_lowercase_names() {
        let branch: BranchConfig =
            serde_json::from_str(r#"{"name": "dev", "merge_strategy": "rebase"}"#).unwrap();
        assert_eq!(branch.merge_strategy, MergeStrategy::Rebase);
    }

    #[test]
    fn round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gitfleet.json");

        let config = Config::default_for(dir.path());
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(config, loaded);
        assert_eq!(loaded.repositories.len(), 1);
        assert_eq!(loaded.repositories[0].branches.len(), 2);
    }

    #[test]
    fn validate_flags_empty_repository_list() {
        let config = Config::default();
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("at least one repository"));
    }

    #[test]
    fn validate_flags_missing_path_and_zero_workers() {
        let config = Config {
            repositories: vec![RepositoryConfig {
                path: PathBuf::from("/does/not/exist"),
                name: "ghost".to_string(),
                branches: vec![],
                default_remote: "origin".to_string(),
            }],
            max_workers: 0,
            ..Config::default()
        };

        let errors = config.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("does not exist")));
        assert!(errors.iter().any(|e| e.contains("max_workers")));
    }

    #[test]
    fn validate_accepts_a_real_repository_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default_for(dir.path());
        assert!(config.validate().is_empty());
    }
}
