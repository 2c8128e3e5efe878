//! Run configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Inclusive TCP port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(3000, 9000)
    }
}

/// Per-agent runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-case timeout override in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Free-form options passed through to the adapter
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl AgentConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            timeout_ms: None,
            options: None,
        }
    }
}

/// Benchmark run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Path to scenes.json
    pub scenes_path: PathBuf,

    /// Path to the test case config
    pub cases_path: PathBuf,

    /// Directory that receives one sub-directory per run
    pub output_dir: PathBuf,

    /// Agents to run, by registry name
    pub agents: Vec<String>,

    /// Maximum number of tasks in flight
    pub concurrency: usize,

    /// Default per-task timeout in milliseconds
    pub timeout_ms: u64,

    /// Ports handed to local dev servers
    pub port_range: PortRange,

    /// Per-agent overrides
    #[serde(rename = "agent_config")]
    pub agent_configs: Vec<AgentConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scenes_path: PathBuf::from("data/ui-scenes/scenes.json"),
            cases_path: PathBuf::from("data/test-cases/test-case-config.json"),
            output_dir: PathBuf::from("runs"),
            agents: vec!["dummy".to_string()],
            concurrency: 1,
            timeout_ms: 1_200_000,
            port_range: PortRange::default(),
            agent_configs: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "timeout must be greater than 0".to_string(),
            ));
        }
        if self.agents.is_empty() {
            return Err(Error::InvalidConfig("no agents selected".to_string()));
        }
        if let Some(agent) = self
            .agent_configs
            .iter()
            .find(|c| c.timeout_ms == Some(0))
        {
            return Err(Error::InvalidConfig(format!(
                "timeout for agent {} must be greater than 0",
                agent.name
            )));
        }
        if self.port_range.min == 0 || self.port_range.min > self.port_range.max {
            return Err(Error::InvalidConfig(format!(
                "invalid port range {}-{}",
                self.port_range.min, self.port_range.max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = RunConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, RunConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("uibench.toml");
        std::fs::write(
            &path,
            r#"
agents = ["dummy", "noop"]
concurrency = 4

[port_range]
min = 4000
max = 4100

[[agent_config]]
name = "noop"
timeout_ms = 5000
"#,
        )
        .unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.agents, vec!["dummy", "noop"]);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.timeout_ms, 1_200_000);
        assert_eq!(config.port_range, PortRange::new(4000, 4100));
        let noop = config.agent_configs.iter().find(|c| c.name == "noop").unwrap();
        assert!(noop.enabled);
        assert_eq!(noop.timeout_ms, Some(5000));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = RunConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_agent_timeout() {
        let mut noop = AgentConfig::named("noop");
        noop.timeout_ms = Some(0);
        let config = RunConfig {
            agent_configs: vec![AgentConfig::named("dummy"), noop],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("noop"));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let config = RunConfig {
            port_range: PortRange::new(5000, 4000),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
